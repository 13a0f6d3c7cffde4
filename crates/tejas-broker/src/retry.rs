use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::BrokerError;

/// Retry policy: up to `max_attempts` total attempts, exponential backoff
/// starting at `initial_delay` and multiplying by `multiplier` each retry.
/// Only `BrokerError::Transient` is retried; `Permanent` propagates on the
/// first attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // "3+1": three retries after the first attempt.
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    op_name: &str,
    mut f: F,
) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                warn!(
                    op = op_name,
                    attempt, max = policy.max_attempts, error = %e, "retrying transient broker error"
                );
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(policy.multiplier);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
        };
        let result = retry_with_backoff(policy, "test_op", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(BrokerError::transient("not yet"))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_never_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<(), BrokerError> = retry_with_backoff(policy, "test_op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BrokerError::permanent("invalid token"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
        };
        let result: Result<(), BrokerError> = retry_with_backoff(policy, "test_op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BrokerError::transient("still failing"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
