//! Retry policy for activity execution.
//!
//! Stateless: all logic is in associated functions that take the
//! configuration as a parameter. Attempts are 1-based (the first execution
//! is attempt 1).

use std::time::Duration;

use backvault_types::activity::ActivityError;
use backvault_types::config::RetryConfig;

pub struct RetryHandler;

impl RetryHandler {
    /// Determine whether a failed attempt should be retried.
    ///
    /// Only retryable failure kinds are retried, and only while `attempt` is
    /// below `config.max_attempts`.
    pub fn should_retry(config: &RetryConfig, attempt: u32, error: &ActivityError) -> bool {
        attempt < config.max_attempts && error.kind.is_retryable()
    }

    /// Delay before the attempt following `attempt`.
    ///
    /// `initial_backoff_ms * multiplier^(attempt - 1)`, capped at `max_backoff_ms`.
    pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = config.backoff_multiplier.max(1.0).powi(exponent);
        let millis = (config.initial_backoff_ms as f64 * factor).min(config.max_backoff_ms as f64);
        Duration::from_millis(millis as u64)
    }
}
