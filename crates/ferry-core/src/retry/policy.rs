//! Retry policy: bounded re-execution of a classified unit of work.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Classified, RetryError};
use crate::serde_util::duration_ms;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay between two attempts.
///
/// `None` is the default: attempts are issued back to back. Other variants
/// have to be chosen explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryDelay {
    #[default]
    None,

    Fixed {
        #[serde(rename = "delay_ms", with = "duration_ms")]
        delay: Duration,
    },

    /// delay = base * multiplier^(attempt - 1)
    Exponential {
        #[serde(rename = "base_ms", with = "duration_ms")]
        base: Duration,
        multiplier: f64,
    },
}

impl RetryDelay {
    /// Delay to wait after the `attempt`-th failure (1-indexed).
    ///
    /// Example with base=2s, multiplier=2.0:
    /// - attempt 1: 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            RetryDelay::None => Duration::ZERO,
            RetryDelay::Fixed { delay } => *delay,
            RetryDelay::Exponential { base, multiplier } => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let secs = base.as_secs_f64() * multiplier.powi(exponent);
                // NaN or negative factors fall back to the base delay; growth saturates.
                if secs.is_nan() || secs < 0.0 {
                    *base
                } else {
                    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
                }
            }
        }
    }
}

/// Bounded retry with error classification.
///
/// The unit of work returns `Classified<E>` on failure:
/// - `Retryable`: run again until `max_attempts` invocations were made,
///   then `RetryError::Exhausted`.
/// - `Unrecoverable`: stop immediately.
/// - `Plain`: stop immediately (retry is opt-in).
///
/// `max_attempts` of 0 behaves like 1: the work always runs at least once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: RetryDelay,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: RetryDelay::None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delay(mut self, delay: RetryDelay) -> Self {
        self.delay = delay;
        self
    }

    /// Run `operation` until it succeeds or the policy says stop.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Classified<E>>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);

            let source = match operation().await {
                Ok(value) => return Ok(value),
                Err(Classified::Retryable(source)) => source,
                Err(Classified::Unrecoverable(source)) => {
                    return Err(RetryError::Unrecoverable {
                        attempts: attempt,
                        source,
                    });
                }
                Err(Classified::Plain(source)) => {
                    return Err(RetryError::NotRetryable {
                        attempts: attempt,
                        source,
                    });
                }
            };

            if attempt >= self.max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source,
                });
            }

            let delay = self.delay.delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Run `operation` with the default policy (3 attempts, no delay).
pub async fn execute<T, E, F, Fut>(operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Classified<E>>>,
{
    RetryPolicy::default().execute(operation).await
}
