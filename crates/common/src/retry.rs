//! Exponential backoff with jitter and a bounded async retry loop.

use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

/// Backoff settings for [`retry_async`].
///
/// Each delay doubles the previous one up to `max`, then gets a random
/// `±jitter` factor applied. `max_retries` counts retries after the first
/// attempt; `None` retries until the error stops being retryable.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub jitter: f64,
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(5),
            jitter: 0.2,
            max_retries: Some(4),
        }
    }
}

impl RetryPolicy {
    pub fn new(
        initial: Duration,
        max: Duration,
        jitter: f64,
        max_retries: Option<u32>,
    ) -> Self {
        Self {
            initial,
            max,
            jitter: jitter.clamp(0.0, 1.0),
            max_retries,
        }
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self {
            max_retries: Some(0),
            ..Self::default()
        }
    }

    /// `retry` is 1 for the first retry.
    pub fn allows(&self, retry: u32) -> bool {
        self.max_retries.is_none_or(|max| retry <= max)
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::rng().random_range(-self.jitter..self.jitter);
        base.mul_f64(factor).max(Duration::from_millis(1))
    }
}

/// Next base delay: double, capped at `policy.max`.
pub fn next_backoff(cur: Duration, policy: &RetryPolicy) -> Duration {
    cur.saturating_mul(2).min(policy.max)
}

/// Run `op` until it succeeds, returns an error `should_retry` rejects, or
/// the policy runs out of retries. The last error is returned as is.
///
/// `op` receives the attempt number, starting at 1.
pub async fn retry_async<T, E, Fut, Op, Retryable>(
    mut op: Op,
    should_retry: Retryable,
    policy: &RetryPolicy,
    label: &'static str,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Retryable: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    let mut backoff = policy.initial.min(policy.max);

    loop {
        attempt += 1;
        let err = match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        if !should_retry(&err) || !policy.allows(attempt) {
            return Err(err);
        }

        let delay = policy.jittered(backoff);
        warn!(label, attempt, ?delay, error = %err, "attempt failed; will retry");
        sleep(delay).await;
        backoff = next_backoff(backoff, policy);
    }
}
