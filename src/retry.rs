use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Explicit retry policy passed into each unreliable call site.
///
/// Backoff is exponential with jitter: attempt n sleeps a uniformly random
/// duration between half of and the full capped exponential delay. Keeping
/// the policy a plain value keeps retry behaviour inspectable and testable
/// independently of the I/O it wraps.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Network fetches: 4 attempts, 1s..10s backoff.
    pub fn fetch() -> Self {
        RetryPolicy::new(4, Duration::from_secs(1), Duration::from_secs(10))
    }

    /// Conversion backends fail transiently under load; a small fixed ceiling.
    pub fn conversion() -> Self {
        RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(30))
    }

    /// Object-store uploads: same shape as fetches.
    pub fn upload() -> Self {
        RetryPolicy::new(4, Duration::from_secs(1), Duration::from_secs(10))
    }

    /// Jittered backoff delay before retrying after failed attempt `attempt`
    /// (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let cap = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
            .max(self.base_delay);
        let cap_ms = cap.as_millis() as u64;
        if cap_ms == 0 {
            return Duration::ZERO;
        }
        let jittered = rand::thread_rng().gen_range(cap_ms / 2..=cap_ms);
        Duration::from_millis(jittered)
    }

    /// Run `operation` up to `max_attempts` times, sleeping between attempts.
    ///
    /// Errors for which `is_transient` returns false are returned
    /// immediately; on exhaustion the last error is returned. Every retry is
    /// logged with its attempt number and backoff delay.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        op_name: &str,
        is_transient: P,
        mut operation: F,
    ) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && is_transient(&err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = op_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[test]
    fn delay_stays_within_cap() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(400));
        for attempt in 1..=10 {
            let delay = policy.delay_for(attempt);
            assert!(delay <= Duration::from_millis(400), "attempt {attempt}: {delay:?}");
            assert!(delay >= Duration::from_millis(50), "attempt {attempt}: {delay:?}");
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = fast_policy(4)
            .run("test_op", |_| true, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(format!("transient {n}"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = fast_policy(3)
            .run("test_op", |_| true, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(format!("boom {n}")) }
            })
            .await;
        assert_eq!(result, Err("boom 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = fast_policy(5)
            .run("test_op", |_| false, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err("permanent".to_string()) }
            })
            .await;
        assert_eq!(result, Err("permanent".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
