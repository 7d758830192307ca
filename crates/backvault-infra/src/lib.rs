//! Infrastructure layer for Backvault.
//!
//! Contains implementations of the ports defined in `backvault-core`:
//! SQLite history storage, local filesystem activities, and the
//! `config.toml` loader.

pub mod config;
pub mod filesystem;
pub mod sqlite;
