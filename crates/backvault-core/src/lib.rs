//! Orchestration engine and repository trait definitions for Backvault.
//!
//! This crate defines the "ports" (history repository, activity executor)
//! that the infrastructure layer implements, plus the deterministic replay
//! driver, fan-in aggregation and the host engine that ties them together.
//! It depends only on `backvault-types` -- never on `backvault-infra` or any
//! database/IO crate.

pub mod activity;
pub mod event;
pub mod repository;
pub mod workflow;
