//! Bounded retry with exponential backoff

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, doubling per attempt and capped at `max_delay`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently or attempts run out.
    ///
    /// Returns the final result together with the number of attempts made.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F, is_transient: impl Fn(&E) -> bool) -> (Result<T, E>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return (Ok(value), attempt),
                Err(err) if attempt < max_attempts && is_transient(&err) => {
                    let delay = self.delay_after(attempt);
                    warn!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, error = %err, "retrying after transient failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return (Err(err), attempt),
            }
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(5));
        assert_eq!(policy.delay_after(40), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let (result, attempts) = fast_policy(3)
            .run(
                |_| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move { if n < 2 { Err("connection reset") } else { Ok("pushed") } }
                },
                |_| true,
            )
            .await;
        assert_eq!(result, Ok("pushed"));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let (result, attempts) = fast_policy(2)
            .run(|_| async { Err::<(), _>("quota exceeded") }, |_| true)
            .await;
        assert_eq!(result, Err("quota exceeded"));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let (result, attempts) = fast_policy(5)
            .run(|_| async { Err::<(), _>("binary not found") }, |_| false)
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_partial_policy_fills_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, RetryPolicy::default().base_delay);
        assert_eq!(policy.max_delay, RetryPolicy::default().max_delay);
    }
}
