use std::{future::Future, time::Duration};

use tokio::time::sleep;
use tracing::warn;

/// Backoff schedule for transport failures. There is deliberately no attempt limit:
/// an extraction job keeps retrying until the upstream answers or the process is killed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub multiplier: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            multiplier: Duration::from_secs(1),
            min_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following failed attempt number `attempt` (1-based):
    /// `multiplier * 2^attempt`, clamped to `[min_delay, max_delay]`, plus jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(30) as i32;
        let raw = self.multiplier.mul_f64(2f64.powi(exponent));
        let clamped = raw.clamp(self.min_delay, self.max_delay.max(self.min_delay));

        if self.jitter.is_zero() {
            clamped
        } else {
            clamped + self.jitter.mul_f64(fastrand::f64())
        }
    }
}

pub async fn retry_forever<F, Fut, T, E>(mut operation: F, policy: &RetryPolicy, context: &str) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 1;

    loop {
        match operation().await {
            Ok(result) => return result,
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "Attempt {} for '{}' failed: {}. Retrying in {}ms...",
                    attempt,
                    context,
                    e,
                    delay.as_millis()
                );
                sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
