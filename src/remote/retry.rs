//! Fixed-count, fixed-delay retry for transient remote failures.

use std::future::Future;
use std::time::Duration;

use derive_getters::Getters;
use derive_new::new;
use tracing::{debug, warn};

use super::RemoteError;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Getters, new)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    attempts: u32,
    /// Pause between attempts.
    delay: Duration,
}

impl RetryPolicy {
    /// A policy that tries once.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Runs `op` until it succeeds, fails definitively, or the budget runs out.
///
/// Only [`RemoteError::is_transient`] failures are retried. When the budget
/// is spent the last failure is wrapped in [`RemoteError::RetriesExhausted`].
pub async fn retry_transient<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(label, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt < attempts => {
                warn!(label, attempt, attempts, error = %err, "Transient failure, retrying");
                tokio::time::sleep(policy.delay).await;
            }
            Err(err) if err.is_transient() => {
                warn!(label, attempts, error = %err, "Retry budget exhausted");
                return Err(RemoteError::RetriesExhausted {
                    attempts,
                    last: Box::new(err),
                });
            }
            Err(err) => return Err(err),
        }
    }
}
