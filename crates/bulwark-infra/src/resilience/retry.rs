//! Exponential backoff retry for transient failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use bulwark_core::AppError;

use crate::env;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Add 0-10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: env::parse_or("RETRY_MAX_ATTEMPTS", defaults.max_attempts),
            initial_delay: env::millis_or("RETRY_INITIAL_DELAY_MS", defaults.initial_delay),
            max_delay: env::millis_or("RETRY_MAX_DELAY_MS", defaults.max_delay),
            multiplier: env::parse_or("RETRY_MULTIPLIER", defaults.multiplier),
            jitter: defaults.jitter,
        }
    }

    /// Delay after the given failed attempt (1-based), capped at `max_delay`
    /// before jitter is added.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let base_ms = self.initial_delay.as_millis() as f64 * factor;
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64) as u64;

        let jitter_range = capped_ms / 10;
        let jitter = if self.jitter && jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(capped_ms + jitter)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempts run out.
///
/// With a `deadline`, each attempt is bounded by it and no backoff sleep is
/// started that would cross it; the caller then gets a timeout error.
pub async fn retry_with_backoff<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    mut op: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match deadline {
            Some(at) => match tokio::time::timeout_at(at, op()).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(AppError::timeout(operation)),
            },
            None => op().await,
        };

        let err = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() || attempt >= max_attempts {
            return Err(err);
        }

        let delay = policy.delay_for(attempt);
        if deadline.is_some_and(|at| Instant::now() + delay >= at) {
            return Err(AppError::timeout(operation).with_source(err));
        }

        tracing::warn!(
            operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after transient failure"
        );
        tokio::time::sleep(delay).await;
    }
}
