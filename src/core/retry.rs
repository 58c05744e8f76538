//! Retry with exponential backoff for calls to external model services.
//!
//! Every attempt runs under a timeout, holds a limiter permit for remote
//! calls, and stops as soon as the document is cancelled.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::limiter::ExternalCallLimiter;

/// Retry policy for failed external calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    500
}
fn default_max_delay() -> u64 {
    8000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Why a retried call produced nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// The document was cancelled while the call was pending
    Cancelled,
    /// All attempts failed or timed out
    Exhausted { attempts: u32, reason: String },
}

/// Everything a document's external calls share: policy, per-attempt
/// timeout, the process-wide limiter and the document's cancellation token.
#[derive(Clone, Copy)]
pub struct CallBudget<'a> {
    pub policy: &'a RetryPolicy,
    pub timeout: Duration,
    pub limiter: &'a ExternalCallLimiter,
    pub cancel: &'a CancellationToken,
}

impl CallBudget<'_> {
    /// Run `call` under this budget; only remote calls take a limiter permit.
    pub async fn run<T, F, Fut>(&self, name: &str, remote: bool, call: F) -> Result<T, CallFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let limiter = remote.then_some(self.limiter);
        run_with_retry(name, self.policy, self.timeout, limiter, self.cancel, call).await
    }
}

/// Run `call` under the retry policy.
///
/// Each attempt is bounded by `timeout`. When a limiter is given, a permit is
/// held for the duration of each attempt (not during backoff).
pub async fn run_with_retry<T, F, Fut>(
    name: &str,
    policy: &RetryPolicy,
    timeout: Duration,
    limiter: Option<&ExternalCallLimiter>,
    cancel: &CancellationToken,
    mut call: F,
) -> Result<T, CallFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let permit = match limiter {
            Some(limiter) => {
                let acquired = tokio::select! {
                    _ = cancel.cancelled() => return Err(CallFailure::Cancelled),
                    acquired = limiter.acquire() => acquired,
                };
                match acquired {
                    Ok(permit) => Some(permit),
                    Err(e) => {
                        return Err(CallFailure::Exhausted {
                            attempts: attempt,
                            reason: format!("limiter unavailable: {}", e),
                        })
                    }
                }
            }
            None => None,
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(CallFailure::Cancelled),
            outcome = tokio::time::timeout(timeout, call()) => outcome,
        };
        drop(permit);

        let reason = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}ms", timeout.as_millis()),
        };

        if policy.should_retry(attempt) {
            let delay = policy.delay_for_attempt(attempt);
            debug!(
                call = name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %reason,
                "External call failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(CallFailure::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            continue;
        }

        warn!(call = name, attempt, error = %reason, "External call failed permanently");
        return Err(CallFailure::Exhausted {
            attempts: attempt,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10000,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10000)); // Capped
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let counter = Arc::clone(&calls);
        let result = run_with_retry(
            "flaky",
            &fast_policy(3),
            Duration::from_secs(1),
            None,
            &token,
            || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        anyhow::bail!("attempt {} failed", n);
                    }
                    Ok(n)
                }
            },
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_after_timeouts() {
        let token = CancellationToken::new();
        let result: Result<(), _> = run_with_retry(
            "slow",
            &fast_policy(2),
            Duration::from_millis(10),
            None,
            &token,
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        match result {
            Err(CallFailure::Exhausted { attempts, reason }) => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("timed out"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_pending_call() {
        let token = CancellationToken::new();
        let child = token.child_token();

        let handle = tokio::spawn(async move {
            run_with_retry(
                "hanging",
                &fast_policy(3),
                Duration::from_secs(30),
                None,
                &child,
                || async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                },
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = handle.await.unwrap();
        assert_eq!(result, Err(CallFailure::Cancelled));
    }

    #[tokio::test]
    async fn test_limiter_permit_released_after_call() {
        let limiter = ExternalCallLimiter::new(1);
        let token = CancellationToken::new();

        let result = run_with_retry(
            "limited",
            &fast_policy(1),
            Duration::from_secs(1),
            Some(&limiter),
            &token,
            || async { Ok(42) },
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(limiter.available(), 1);
    }
}
