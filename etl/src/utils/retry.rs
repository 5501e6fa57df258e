use common::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// HTTP statuses worth another attempt.
pub const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

pub fn is_transient(status: u16) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Seconds.
    pub backoff_factor: f64,
    /// Cap on the summed sleep of one retry sequence.
    pub max_total_wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_factor: f64, max_total_wait: Duration) -> Self {
        Self {
            max_retries,
            backoff_factor,
            max_total_wait,
        }
    }

    pub fn from_config(api: &common::config::ApiConfig) -> Self {
        Self::new(
            api.max_retries,
            api.backoff_factor,
            Duration::from_secs(api.max_backoff_secs),
        )
    }

    /// `backoff_factor * 2^attempt`, never above `max_total_wait`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = self.backoff_factor * 2f64.powi(attempt.min(62) as i32);
        if !secs.is_finite() || secs <= 0.0 {
            return if secs > 0.0 { self.max_total_wait } else { Duration::ZERO };
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_total_wait)
            .min(self.max_total_wait)
    }
}

/// Outcome of one attempt as judged by the caller.
pub enum Attempt<T> {
    Done(T),
    Retryable { status: Option<u16>, cause: String },
    Fatal(Error),
}

/// Runs `operation` until it succeeds, fails fatally, or the policy is spent.
/// The closure receives the zero-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut attempt = 0u32;
    let mut waited = Duration::ZERO;

    loop {
        match operation(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(e) => return Err(e),
            Attempt::Retryable { status, cause } => {
                if attempt >= policy.max_retries {
                    return Err(Error::fetch(
                        status,
                        format!("giving up after {} attempts: {}", attempt + 1, cause),
                    ));
                }

                let delay = policy.delay_for(attempt);
                if waited + delay > policy.max_total_wait {
                    return Err(Error::fetch(
                        status,
                        format!(
                            "retry budget of {:?} exhausted after {} attempts: {}",
                            policy.max_total_wait,
                            attempt + 1,
                            cause
                        ),
                    ));
                }

                warn!(
                    attempt = attempt + 1,
                    status = ?status,
                    delay_ms = delay.as_millis() as u64,
                    %cause,
                    "Transient failure, retrying"
                );
                sleep(delay).await;
                waited += delay;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, 0.0, Duration::from_secs(1))
    }

    #[test]
    fn delay_doubles_and_is_capped() {
        let policy = RetryPolicy::new(5, 0.5, Duration::from_secs(3));
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40), Duration::from_secs(3));
    }

    #[test]
    fn non_finite_factor_does_not_panic() {
        let policy = RetryPolicy::new(1, f64::NAN, Duration::from_secs(2));
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        let policy = RetryPolicy::new(1, f64::INFINITY, Duration::from_secs(2));
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let value = retry_with_backoff(&instant_policy(3), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Attempt::Retryable { status: Some(503), cause: "busy".to_string() }
                } else {
                    Attempt::Done(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_carries_last_status() {
        let calls = AtomicU32::new(0);
        let err = retry_with_backoff(&instant_policy(2), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::<()>::Retryable { status: Some(429), cause: "slow down".to_string() } }
        })
        .await
        .unwrap_err();

        assert_eq!(err.status(), Some(429));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_stops_immediately() {
        let calls = AtomicU32::new(0);
        let err = retry_with_backoff(&instant_policy(5), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::<()>::Fatal(Error::fetch(Some(404), "not found")) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.status(), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn total_wait_budget_bounds_the_sequence() {
        let policy = RetryPolicy::new(10, 0.02, Duration::from_millis(50));
        let calls = AtomicU32::new(0);
        let err = retry_with_backoff(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::<()>::Retryable { status: None, cause: "timeout".to_string() } }
        })
        .await
        .unwrap_err();

        // 20ms + 40ms would exceed the 50ms budget, so only one sleep happens.
        assert!(matches!(err, Error::Fetch { status: None, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
