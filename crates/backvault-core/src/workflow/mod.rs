//! Durable orchestration: deterministic replay over an append-only history.
//!
//! - `context` -- replay state and the handle orchestrations schedule activities through
//! - `driver` -- one replay turn of an orchestration over a history
//! - `fan_in` -- waiting on many activity handles and aggregating their outcomes
//! - `backup` -- the file backup orchestration
//! - `retry` -- activity retry policy and backoff
//! - `checkpoint` -- history journal on top of the repository
//! - `executor` -- the engine that dispatches activities and drives instances

pub mod backup;
pub mod checkpoint;
pub mod context;
pub mod driver;
pub mod executor;
pub mod fan_in;
pub mod retry;
