use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Error types that can flow through [`retry`].
pub trait Retryable: std::fmt::Display + Sized {
    fn is_retryable(&self) -> bool;
    fn timed_out(after: Duration) -> Self;
    fn cancelled() -> Self;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub attempt_timeout_ms: u64,
    pub overall_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            attempt_timeout_ms: 30_000,
            overall_timeout_ms: 120_000,
        }
    }
}

impl RetryPolicy {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms.max(1))
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms.max(1))
    }

    /// Exponential backoff for the delay after `attempt` (1-based), plus up
    /// to 50% random jitter, capped at `max_delay_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let base = self.base_delay_ms.saturating_mul(1u64 << exp);
        let capped = base.min(self.max_delay_ms);
        let jitter = jitter_ms(capped / 2);
        Duration::from_millis(capped.saturating_add(jitter).min(self.max_delay_ms.max(capped)))
    }
}

fn jitter_ms(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let random = uuid::Uuid::new_v4().as_u128();
    (random % (u128::from(max) + 1)) as u64
}

/// Runs `op` until it succeeds, fails with a non-retryable error, runs out of
/// attempts, hits the overall deadline, or `cancel` fires.
///
/// Each attempt is bounded by `attempt_timeout`; a timed-out attempt counts
/// as a retryable failure. Cancellation drops the in-flight future, so no
/// request keeps running after the caller gives up.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let overall = policy.overall_timeout();
    let deadline = Instant::now() + overall;

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(E::cancelled());
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::warn!(operation, attempt, "operation deadline exceeded");
            return Err(E::timed_out(overall));
        }
        let attempt_timeout = policy.attempt_timeout().min(remaining);

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(E::cancelled()),
            outcome = tokio::time::timeout(attempt_timeout, op()) => outcome,
        };

        let err = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => E::timed_out(attempt_timeout),
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if attempt >= attempts {
            tracing::warn!(operation, attempts, error = %err, "retries exhausted");
            return Err(err);
        }

        let delay = policy.backoff(attempt);
        tracing::debug!(
            operation,
            attempt,
            attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying after backoff"
        );

        let remaining = deadline.saturating_duration_since(Instant::now());
        if delay >= remaining {
            tracing::warn!(operation, attempt, "operation deadline exceeded");
            return Err(E::timed_out(overall));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(E::cancelled()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
