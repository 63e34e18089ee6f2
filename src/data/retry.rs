//! Retry-with-backoff for upstream calls
//!
//! A single policy type and driver loop shared by every outbound request, so
//! attempt counts and delays are configured in one place.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Default number of attempts per request (first try included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default fixed delay between attempts
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Errors that can tell whether trying again might succeed
pub trait Transient {
    /// Returns true if the failure is worth retrying
    fn is_transient(&self) -> bool;
}

/// How often and how patiently to retry a failing operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero behaves like one.
    pub max_attempts: u32,
    /// Fixed delay between consecutive attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

/// Runs `op` until it succeeds, fails permanently, or attempts run out
///
/// `op` receives the 1-based attempt number so errors can record how many
/// attempts were made before surfacing.
///
/// # Arguments
/// * `policy` - Attempt bound and backoff
/// * `op` - Factory producing one attempt's future
///
/// # Returns
/// * `Ok(T)` from the first successful attempt
/// * `Err(E)` from the last attempt, or from the first non-transient failure
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Transient + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && err.is_transient() => {
                warn!(
                    attempt,
                    max_attempts,
                    backoff_ms = policy.backoff.as_millis() as u64,
                    error = %err,
                    "transient upstream failure, retrying"
                );
                tokio::time::sleep(policy.backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}
