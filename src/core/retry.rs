//! Retry policy for upstream calls.
//!
//! The policy is plain data taken from configuration; sleeping between
//! attempts goes through a [`Clock`] so tests can observe the backoff
//! schedule without waiting for it.

use crate::core::{MonitorError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Source of delays between attempts
#[async_trait]
pub trait Clock: Send + Sync {
    /// Suspends the caller for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Bounded retry with fixed or exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
    /// Growth factor applied per further failure (1.0 keeps the delay fixed)
    pub multiplier: f64,
    /// Upper bound for a single delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Add up to 10% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
            multiplier: 1.0,
            max_backoff: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Fixed delay between a bounded number of attempts
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: delay,
            multiplier: 1.0,
            max_backoff: delay,
            jitter: false,
        }
    }

    /// Delay to wait after the given failed attempt (1-based), before jitter
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(self.max_backoff);
        delay.min(self.max_backoff)
    }

    /// Checks the policy for values that would never make progress
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(MonitorError::config("retry.maxAttempts must be at least 1"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(MonitorError::config(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// Runs `operation` until it succeeds, fails permanently or runs out of
    /// attempts.
    ///
    /// Non-recoverable errors are returned as-is after the first attempt.
    /// Exhaustion yields [`MonitorError::RetriesExhausted`] wrapping the last
    /// failure.
    pub async fn run<C, F, Fut, T>(&self, clock: &C, label: &str, operation: F) -> Result<T>
    where
        C: Clock + ?Sized,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) if !error.is_recoverable() => return Err(error),
                Err(error) if attempt >= self.max_attempts => {
                    tracing::warn!(%label, attempts = attempt, %error, "giving up on upstream call");
                    return Err(MonitorError::RetriesExhausted {
                        path: label.to_string(),
                        attempts: attempt,
                        last: Box::new(error),
                    });
                }
                Err(error) => {
                    let delay = self.with_jitter(self.backoff_for(attempt));
                    tracing::debug!(
                        %label,
                        attempt,
                        %error,
                        delay_ms = delay.as_millis() as u64,
                        "upstream call failed, retrying"
                    );
                    clock.sleep(delay).await;
                }
            }
        }
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let jitter_ms = rand::random::<f64>() * delay.as_millis() as f64 * 0.1;
        delay + Duration::from_millis(jitter_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Records requested delays and returns immediately
    #[derive(Default)]
    struct RecordingClock {
        sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Clock for RecordingClock {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    #[tokio::test]
    async fn test_retry_success_after_transient_failures() {
        let clock = RecordingClock::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = RetryPolicy::fixed(3, Duration::from_secs(5))
            .run(&clock, "metrics.json", move || {
                let attempts = attempts_clone.clone();
                async move {
                    let count = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    if count < 3 {
                        Err(MonitorError::Upstream {
                            path: "metrics.json".into(),
                            status: 503,
                        })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
        assert_eq!(
            *clock.sleeps.lock().unwrap(),
            vec![Duration::from_secs(5), Duration::from_secs(5)]
        );
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let clock = RecordingClock::default();
        let result: Result<()> = RetryPolicy::fixed(3, Duration::from_millis(10))
            .run(&clock, "filters.json", || async {
                Err(MonitorError::network("connection refused"))
            })
            .await;

        match result {
            Err(MonitorError::RetriesExhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, MonitorError::Network(_)));
            }
            other => panic!("Expected exhaustion, got {:?}", other),
        }
        // No sleep after the final attempt
        assert_eq!(clock.sleeps.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_non_recoverable() {
        let clock = RecordingClock::default();
        let result: Result<()> = RetryPolicy::default()
            .run(&clock, "metrics.json", || async {
                Err(MonitorError::mapping("permanent failure"))
            })
            .await;

        assert!(matches!(result, Err(MonitorError::Mapping(_))));
        assert!(clock.sleeps.lock().unwrap().is_empty());
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
            jitter: false,
        };

        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(5));
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::fixed(0, Duration::from_secs(1)).validate().is_err());

        let shrinking = RetryPolicy {
            multiplier: 0.5,
            ..RetryPolicy::default()
        };
        assert!(shrinking.validate().is_err());
    }
}
