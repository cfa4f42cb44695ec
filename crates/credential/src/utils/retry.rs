//! Bounded retries for transient network failures
//!
//! Only the operation's own `Err` path retries; an HTTP response with an
//! error status is a completed operation and passes through untouched. The
//! Aden provider wraps its transport sends in this.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Initial backoff duration
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Backoff multiplier (typically 2.0 for exponential)
    pub backoff_multiplier: f32,

    /// Maximum backoff duration
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given 0-based attempt
    ///
    /// The delay grows geometrically with the attempt number; a random
    /// factor in `[0.9, 1.1)` spreads out callers whose requests failed in
    /// lockstep, and `max_backoff` bounds the result.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let growth = f64::from(self.backoff_multiplier).powi(attempt as i32);
        let spread = rand::thread_rng().gen_range(0.9..1.1);
        self.initial_backoff
            .mul_f64((growth * spread).max(0.0))
            .min(self.max_backoff)
    }
}

/// Runs `f` until it succeeds or the policy's attempts are spent, sleeping
/// between attempts; the last error is returned as-is
///
/// # Example
///
/// ```rust,ignore
/// let policy = RetryPolicy::default();
/// let response = retry_with_policy(&policy, "aden_refresh", || {
///     let request = client.post(&url);
///     async move { request.send().await }
/// }).await?;
/// ```
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let total = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 >= total => {
                tracing::warn!(
                    operation = operation_name,
                    attempts = total,
                    error = %e,
                    "Giving up after final attempt"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.backoff_duration(attempt);
                attempt += 1;
                tracing::debug!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, sleeping before retry"
                );
                sleep(delay).await;
            }
        }
    }
}
