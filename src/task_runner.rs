//! Task Runner with Bounded Retry
//!
//! Runs one unit of work with automatic retry and exponential backoff. Unlike
//! a long-running supervisor, a unit gives up after `max_attempts` and hands
//! the last error back to the caller, so one failing unit never takes the
//! process down with it.

use std::fmt::Display;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

/// Retry configuration for a unit of work
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_retry_delay: Duration,
    /// Maximum delay between retries
    pub max_retry_delay: Duration,
}

impl RetryPolicy {
    /// `max_retries` retries on top of the first attempt.
    pub fn new(max_retries: u32, initial_retry_delay: Duration, max_retry_delay: Duration) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            initial_retry_delay,
            max_retry_delay,
        }
    }
}

/// Final failure of a unit after retries were exhausted or refused
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
}

/// Internal backoff state
#[derive(Debug)]
struct BackoffState {
    attempts: u32,
    current_retry_delay: Duration,
}

impl BackoffState {
    fn new(initial_delay: Duration) -> Self {
        Self {
            attempts: 0,
            current_retry_delay: initial_delay,
        }
    }

    /// Returns the delay to wait before the next attempt.
    fn record_failure(&mut self, max_delay: Duration) -> Duration {
        let delay = std::cmp::min(self.current_retry_delay, max_delay);
        // Exponential backoff with cap
        self.current_retry_delay = std::cmp::min(self.current_retry_delay * 2, max_delay);
        delay
    }
}

/// Run a unit of work with bounded retry
///
/// # Arguments
/// * `task_name` - Name of the unit for logging purposes
/// * `policy` - Attempt limit and backoff delays
/// * `should_retry` - Whether an error is transient; permanent errors fail at once
/// * `task_fn` - Async function that executes one attempt
pub async fn run_with_retry<T, E, F, Fut, R>(
    task_name: &str,
    policy: &RetryPolicy,
    should_retry: R,
    mut task_fn: F,
) -> Result<T, RetryFailure<E>>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut state = BackoffState::new(policy.initial_retry_delay);

    loop {
        state.attempts += 1;
        match task_fn().await {
            Ok(value) => {
                if state.attempts > 1 {
                    warn!(
                        "Task '{}' recovered after {} failed attempts",
                        task_name,
                        state.attempts - 1
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                error!(
                    "Task '{}' failed (attempt {}/{}): {}",
                    task_name, state.attempts, max_attempts, e
                );

                if state.attempts >= max_attempts || !should_retry(&e) {
                    return Err(RetryFailure {
                        error: e,
                        attempts: state.attempts,
                    });
                }

                let delay = state.record_failure(policy.max_retry_delay);
                warn!("Task '{}' will retry in {:?}", task_name, delay);
                sleep(delay).await;
            }
        }
    }
}
