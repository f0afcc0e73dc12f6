//! Bounded exponential-backoff retry, applied within a single candidate
//! attempt by the failover controller (see [`crate::failover`]).
//!
//! Retry is data (a [`RetryPolicy`]) plus a free function that takes an
//! operation, rather than logic folded into the adapter itself — a
//! `RetryPolicy` can be constructed, inspected and unit-tested on its own.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Tunables for the backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling the backoff delay is clamped to
    pub max_delay: Duration,
    /// Multiplier applied to the delay each attempt
    pub backoff_multiple: f64,
    /// Whether to add up to ±10% uniform jitter to each computed delay
    pub jitter: bool,
    /// Substrings that mark an error as retryable, matched against the
    /// error's `Display` text
    pub retryable_tokens: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiple: 2.0,
            jitter: true,
            retryable_tokens: vec![
                "timeout".to_string(),
                "connection reset".to_string(),
                "429".to_string(),
                "502".to_string(),
                "503".to_string(),
                "504".to_string(),
            ],
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `n` (1-indexed):
    /// `min(max_delay, initial_delay * backoff_multiple^(n-1))`, optionally
    /// jittered by up to ±10%.
    pub fn delay_for_attempt(&self, n: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiple.powi(n as i32 - 1);
        let capped = base.min(self.max_delay.as_secs_f64());
        let final_secs = if self.jitter {
            let jitter_frac = (fastrand::f64() * 0.2) - 0.1; // uniform in [-0.1, 0.1]
            (capped * (1.0 + jitter_frac)).max(0.0)
        } else {
            capped
        };
        Duration::from_secs_f64(final_secs)
    }

    /// Whether an error should trigger a retry: matches the configured
    /// substring tokens, or is classified retryable by its own kind.
    pub fn is_retryable(&self, err: &Error) -> bool {
        err.is_retryable() || err.matches_any_token(&self.retryable_tokens)
    }
}

/// Run `op` under `policy`, retrying on retryable errors with backoff until
/// `max_retries` is exhausted or `cancel` fires. Non-retryable errors and
/// cancellation both abort immediately.
pub async fn retry<F, Fut, T>(policy: &RetryPolicy, cancel: &CancellationToken, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                if attempt >= policy.max_retries || !policy.is_retryable(&err) {
                    return Err(err);
                }
                attempt += 1;
                let delay = policy.delay_for_attempt(attempt);
                debug!(attempt, ?delay, "retry: scheduling backoff");

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        warn!("retry: cancelled during backoff sleep");
                        return Err(Error::Cancelled);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiple: 2.0,
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let policy = fast_policy(3);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<u32> = retry(&policy, &cancel, move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_retryable_errors_up_to_budget() {
        let policy = fast_policy(2);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<u32> = retry(&policy, &cancel, move || {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::ProviderHttp {
                    status: 503,
                    body_head: format!("attempt {n}"),
                })
            }
        })
        .await;

        assert!(result.is_err());
        // initial attempt + 2 retries = 3 calls total
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_aborts_immediately() {
        let policy = fast_policy(3);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<u32> = retry(&policy, &cancel, move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::ProviderSchema("bad json".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_aborts() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1),
            backoff_multiple: 1.0,
            jitter: false,
            ..RetryPolicy::default()
        };
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<u32> = retry(&policy, &cancel, move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::ProviderHttp {
                    status: 502,
                    body_head: "bad gateway".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            backoff_multiple: 2.0,
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350)); // capped from 400
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(350));
    }
}
