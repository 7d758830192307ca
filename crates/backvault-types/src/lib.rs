//! Shared domain types for Backvault.
//!
//! This crate contains the data model of the durable backup orchestration:
//! history events, workflow instances, activity invocations and their
//! failures, engine configuration and engine lifecycle events.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod activity;
pub mod config;
pub mod error;
pub mod event;
pub mod history;
pub mod instance;
pub mod outcome;
