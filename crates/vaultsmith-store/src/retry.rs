//! Bounded-retry helper shared by every readiness check
//!
//! The original stack duplicated sleep-poll loops in each startup path;
//! here there is exactly one, with a hard attempt bound so callers fail
//! fast instead of hanging under a process supervisor.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Fixed-interval retry bound
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    /// 2s x 60 attempts: the 120s readiness bound used before bootstrap,
    /// authentication, and renewal.
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Total wall-clock bound this policy allows.
    pub fn deadline(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the final attempt's error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

/// Poll `op` until it succeeds or the policy is exhausted.
///
/// The interval elapses between attempts, not before the first one, so a
/// healthy target costs no delay.
pub async fn wait_until<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_err = None;
    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                debug!(attempt, max = policy.max_attempts, error = %err, "retry attempt failed");
                last_err = Some(err);
            }
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    Err(RetryError::Exhausted {
        attempts: policy.max_attempts,
        // max_attempts >= 1 guarantees at least one recorded error
        last: last_err.expect("at least one attempt"),
    })
}
