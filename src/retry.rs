//! Bounded retry combinators
//!
//! Every retry loop in the crate goes through these so the outcome is a typed
//! value (`Success`, `Exhausted`, `Fatal`) instead of a counter the caller
//! has to inspect.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first; zero behaves as one
    pub max_attempts: u32,
    /// Pause between async attempts
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T, E> {
    Success { value: T, attempts: u32 },
    /// Every attempt failed with a retryable error
    Exhausted { last_error: E, attempts: u32 },
    /// An attempt failed with an error that must not be retried
    Fatal { error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
            RetryOutcome::Fatal { error, .. } => Err(error),
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Fatal { attempts, .. } => *attempts,
        }
    }
}

/// Run `op` until it succeeds, fails fatally, or the policy runs out.
/// `op` receives the 1-based attempt number.
pub fn retry_sync<T, E, F, R>(policy: &RetryPolicy, mut op: F, retryable: R) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    R: Fn(&E) -> bool,
{
    let max = policy.attempts();
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return RetryOutcome::Success { value, attempts: attempt },
            Err(error) if !retryable(&error) => {
                return RetryOutcome::Fatal { error, attempts: attempt }
            }
            Err(error) if attempt >= max => {
                return RetryOutcome::Exhausted { last_error: error, attempts: attempt }
            }
            Err(_) => attempt += 1,
        }
    }
}

/// Async variant with `backoff_ms` between attempts
pub async fn retry_async<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    mut op: F,
    retryable: R,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let max = policy.attempts();
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return RetryOutcome::Success { value, attempts: attempt },
            Err(error) if !retryable(&error) => {
                return RetryOutcome::Fatal { error, attempts: attempt }
            }
            Err(error) if attempt >= max => {
                return RetryOutcome::Exhausted { last_error: error, attempts: attempt }
            }
            Err(_) => {
                if policy.backoff_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(policy.backoff_ms)).await;
                }
                attempt += 1;
            }
        }
    }
}
