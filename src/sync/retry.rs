//! Single retry-with-backoff wrapper applied to every external call site.

use std::{future::Future, time::Duration};

use tokio::time::sleep;
use tracing::warn;

use crate::{platform::PlatformError, store::StoreError};

/// Error classification consumed by [`retry_with_backoff`].
pub trait Retryable {
    /// Whether another attempt may succeed.
    fn is_transient(&self) -> bool;

    /// Explicit backoff requested by the remote side, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for PlatformError {
    fn is_transient(&self) -> bool {
        PlatformError::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        PlatformError::retry_after(self)
    }
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

/// Bounded exponential backoff parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each attempt after that.
    pub base_delay: Duration,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep after the given zero-based failed attempt.
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `call`, retrying transient failures with capped exponential backoff.
///
/// Terminal failures and exhausted attempts surface the last error unchanged;
/// a `retry-after` hint from the remote side overrides the computed delay.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = err.retry_after().unwrap_or_else(|| policy.delay_for(attempt));
                warn!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, backing off"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("terminal")]
        Terminal,
        #[error("throttled")]
        Throttled,
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            !matches!(self, TestError::Terminal)
        }

        fn retry_after(&self) -> Option<Duration> {
            matches!(self, TestError::Throttled).then(|| Duration::from_secs(7))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let result = retry_with_backoff(RetryPolicy::default(), "test", move || {
            let calls = calls_in_op.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let result: Result<(), _> = retry_with_backoff(RetryPolicy::default(), "test", move || {
            let calls = calls_in_op.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Terminal)
            }
        })
        .await;

        assert!(matches!(result, Err(TestError::Terminal)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();
        let policy = RetryPolicy {
            max_attempts: 4,
            ..RetryPolicy::default()
        };

        let result: Result<(), _> = retry_with_backoff(policy, "test", move || {
            let calls = calls_in_op.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Transient)
            }
        })
        .await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_overrides_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let started = tokio::time::Instant::now();
        let result = retry_with_backoff(RetryPolicy::default(), "test", move || {
            let calls = calls_in_op.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TestError::Throttled)
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[test]
    fn delays_double_up_to_the_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
    }
}
