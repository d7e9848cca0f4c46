//! Bounded retry with exponential backoff.
//!
//! One wrapper for every memory call. The caller supplies a classifier that
//! decides, per error, whether to retry, give up quietly, or fail.

use std::future::Future;
use std::time::Duration;
use concierge_config::MemoryConfig;
use tracing::{debug, warn};

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient; try again after a backoff if attempts remain.
    Retry,
    /// The backend cannot be reached; stop now without retrying.
    Skip,
    /// Not a backend problem; hand the error to the caller.
    Fatal,
}

/// Attempt budget and backoff curve.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first try included. Never less than 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay before retry number `retry` (1 for the first retry):
    /// base, 2×base, 4×base, … capped at `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Why a resilient call gave up.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<E> {
    /// Short-circuited on an unreachable backend.
    Skipped { attempts: u32, error: E },
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, error: E },
    /// A non-retryable error.
    Fatal { attempts: u32, error: E },
}

impl<E> Outcome<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Outcome::Skipped { attempts, .. }
            | Outcome::Exhausted { attempts, .. }
            | Outcome::Fatal { attempts, .. } => *attempts,
        }
    }

    pub fn into_error(self) -> E {
        match self {
            Outcome::Skipped { error, .. } | Outcome::Exhausted { error, .. } | Outcome::Fatal { error, .. } => error,
        }
    }

    /// Whether the failure means "memory is unavailable right now".
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Outcome::Fatal { .. })
    }
}

/// Run `op` under `policy`, classifying each failure with `classify`.
pub async fn resilient_call<T, E, Op, Fut, C>(
    policy: &RetryPolicy,
    operation: &str,
    classify: C,
    mut op: Op,
) -> Result<T, Outcome<E>>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> Disposition,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        match classify(&error) {
            Disposition::Skip => {
                warn!(operation, attempt, error = %error, "Backend unreachable, skipping");
                return Err(Outcome::Skipped { attempts: attempt, error });
            }
            Disposition::Fatal => {
                return Err(Outcome::Fatal { attempts: attempt, error });
            }
            Disposition::Retry if attempt >= max_attempts => {
                warn!(operation, attempts = attempt, error = %error, "Retries exhausted");
                return Err(Outcome::Exhausted { attempts: attempt, error });
            }
            Disposition::Retry => {
                let delay = policy.backoff(attempt);
                debug!(operation, attempt, delay_ms = delay.as_millis() as u64, error = %error, "Retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
