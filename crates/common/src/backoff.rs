//! Bounded exponential backoff for retryable operations.
//!
//! Certificate authority round trips are network I/O against an external
//! party; transient failures are expected and retried locally before a
//! terminal error is surfaced. The policy is deliberately bounded: a fixed
//! attempt budget with capped, doubling delays.

use std::time::Duration;
use tracing::warn;

/// Retry policy: doubling delays starting at `base`, capped at `cap`,
/// for at most `max_attempts` total attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the second attempt.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub cap: Duration,
    /// Total attempt budget (including the first attempt).
    pub max_attempts: u32,
}

impl Backoff {
    pub const fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// The delay to sleep after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.base.saturating_mul(1u32 << exp);
        delay.min(self.cap)
    }
}

impl Default for Backoff {
    /// The driver's default: base 1s, cap 30s, 5 attempts.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 5)
    }
}

/// Run `op` until it succeeds or the attempt budget is exhausted.
///
/// Returns the last error when every attempt fails. Each failure short of
/// the budget is logged at warn level with the operation name.
pub async fn retry<T, E, F, Fut>(policy: Backoff, op_name: &str, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.max_attempts => {
                warn!(
                    operation = op_name,
                    attempts = attempt,
                    error = %e,
                    "Operation failed, attempt budget exhausted"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    operation = op_name,
                    attempt = attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_sequence_doubles_and_caps() {
        let policy = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 8);
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(5), Duration::from_secs(16));
        // 32s exceeds the cap
        assert_eq!(policy.delay_after(6), Duration::from_secs(30));
        assert_eq!(policy.delay_after(20), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_no_overflow_on_large_attempt() {
        let policy = Backoff::default();
        assert_eq!(policy.delay_after(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let policy = Backoff::new(Duration::from_millis(1), Duration::from_millis(2), 5);
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = retry(policy, "test-op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(format!("transient failure {n}"))
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
    async fn test_retry_exhausts_budget() {
        let policy = Backoff::new(Duration::from_millis(1), Duration::from_millis(2), 3);
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = retry(policy, "test-op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("always fails".to_string()) }
        })
        .await;

        assert_eq!(result, Err("always fails".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn delay_never_exceeds_cap(
                base_ms in 1u64..10_000,
                cap_ms in 1u64..100_000,
                attempt: u32,
            ) {
                let policy = Backoff::new(
                    Duration::from_millis(base_ms),
                    Duration::from_millis(cap_ms),
                    5,
                );
                prop_assert!(policy.delay_after(attempt) <= policy.cap);
            }
        }
    }
}
