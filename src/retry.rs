//! Per-request retry with exponential backoff, plus the between-round wait
//!
//! A transfer attempt that fails transiently (rate limiting, gateway errors,
//! timeouts, dropped connections) is retried after a timed backoff wait.
//! Terminal failures end the attempt chain immediately.
//!
//! # Example
//!
//! ```no_run
//! use channelplus_dl::TransferError;
//! use channelplus_dl::config::RetryConfig;
//! use channelplus_dl::retry::download_with_retry;
//!
//! # async fn example() -> Result<(), TransferError> {
//! let url = "https://channelplus.ner.gov.tw/viewalllang/390?page=1";
//! let html = download_with_retry(&RetryConfig::default(), |attempt| async move {
//!     tracing::debug!(attempt, url, "fetching course page");
//!     let response = reqwest::get(url).await?;
//!     match response.status().as_u16() {
//!         200 => Ok(response.text().await?),
//!         code @ (429 | 502 | 503 | 504) => Err(TransferError::RetryableStatus {
//!             code,
//!             url: url.to_string(),
//!         }),
//!         code => Err(TransferError::Status { code, url: url.to_string() }),
//!     }
//! })
//! .await?;
//! println!("{} bytes of HTML", html.len());
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::TransferError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Splits failures into worth-another-attempt and final
///
/// Transient failures (timeouts, gateway errors, rate limiting, connection resets)
/// return `true`. Terminal failures (client errors, local disk errors) return `false`.
pub trait IsRetryable {
    /// Whether another attempt could succeed
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TransferError {
    fn is_retryable(&self) -> bool {
        match self {
            TransferError::RetryableStatus { .. } => true,
            TransferError::Timeout { .. } => true,
            TransferError::Request(e) => {
                e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
            }
            // 4xx/5xx other than the transient set, and 2xx other than 200
            TransferError::Status { .. } => false,
            // Disk full, permission denied: retrying will not help
            TransferError::Io { .. } => false,
            TransferError::Cancelled => false,
        }
    }
}

/// Run `operation` until it succeeds, fails terminally, or runs out of attempts
///
/// `config.max_attempts` is the total number of attempts (a value of 0 is
/// treated as 1). The operation receives the 1-based attempt number. Between
/// attempts the task sleeps `initial_delay * backoff_multiplier^n`, capped at
/// `max_delay`, optionally jittered.
///
/// Returns the successful result or the last error once attempts are exhausted
/// or a non-retryable error is seen.
pub async fn download_with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    let mut delay = config.initial_delay;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Succeeded after retrying");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let wait = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = wait.as_millis(),
                    "Attempt failed, backing off"
                );

                tokio::time::sleep(wait).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Giving up, attempt budget spent"
                    );
                } else {
                    tracing::error!(error = %e, "Giving up, failure is terminal");
                }
                return Err(e);
            }
        }
    }
}

/// Delay to wait before retry round `round` (0-based): `base * 2^round`, capped at `cap`.
pub fn round_backoff(base: Duration, round: u32, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(round).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

/// Stretch `delay` by a random factor in `[1, 2]`
fn add_jitter(delay: Duration) -> Duration {
    let stretch = rand::thread_rng().gen_range(1.0..=2.0);
    delay.mul_f64(stretch)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    #[derive(Debug, Clone, Copy)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn policy(max_attempts: u32, initial_ms: u64, max_ms: u64, multiplier: f64) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            backoff_multiplier: multiplier,
            jitter: false,
        }
    }

    /// Feed `script` to the retry loop, one entry per attempt (missing entries
    /// succeed); returns the result and the attempt numbers and start times seen
    async fn replay(
        config: &RetryConfig,
        script: &[Option<TestError>],
    ) -> (Result<u32, TestError>, Vec<(u32, Instant)>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let result = download_with_retry(config, |attempt| {
            let seen = seen.clone();
            let outcome = script.get(attempt as usize - 1).copied().flatten();
            async move {
                seen.lock().unwrap().push((attempt, Instant::now()));
                match outcome {
                    Some(e) => Err(e),
                    None => Ok(attempt),
                }
            }
        })
        .await;
        let seen = seen.lock().unwrap().clone();
        (result, seen)
    }

    fn attempts(seen: &[(u32, Instant)]) -> Vec<u32> {
        seen.iter().map(|(n, _)| *n).collect()
    }

    #[tokio::test]
    async fn first_success_makes_one_attempt() {
        let (result, seen) = replay(&RetryConfig::default(), &[]).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(attempts(&seen), vec![1]);
    }

    #[tokio::test]
    async fn two_transient_failures_then_success_is_three_attempts() {
        let script = [Some(TestError::Transient), Some(TestError::Transient)];
        let (result, seen) = replay(&policy(3, 10, 1000, 2.0), &script).await;

        assert_eq!(result.unwrap(), 3, "succeeds on the third attempt");
        assert_eq!(attempts(&seen), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn transient_failures_stop_at_the_attempt_budget() {
        let script = [
            Some(TestError::Transient),
            Some(TestError::Transient),
            Some(TestError::Transient),
        ];
        let (result, seen) = replay(&policy(2, 10, 1000, 2.0), &script).await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(attempts(&seen), vec![1, 2], "max_attempts counts every attempt");
    }

    #[tokio::test]
    async fn terminal_failure_is_not_retried() {
        let script = [Some(TestError::Permanent)];
        let (result, seen) = replay(&policy(5, 10, 1000, 2.0), &script).await;

        assert!(matches!(result, Err(TestError::Permanent)));
        assert_eq!(attempts(&seen), vec![1]);
    }

    #[tokio::test]
    async fn zero_attempt_budget_still_tries_once() {
        let script = [Some(TestError::Transient)];
        let (result, seen) = replay(&policy(0, 10, 1000, 2.0), &script).await;

        assert!(result.is_err());
        assert_eq!(attempts(&seen), vec![1]);
    }

    #[tokio::test]
    async fn waits_double_between_attempts_up_to_the_cap() {
        let script = [
            Some(TestError::Transient),
            Some(TestError::Transient),
            Some(TestError::Transient),
        ];
        // 40ms, 80ms, then capped at 100ms instead of 160ms
        let (_, seen) = replay(&policy(4, 40, 100, 2.0), &script).await;

        let gaps: Vec<Duration> = seen.windows(2).map(|w| w[1].1 - w[0].1).collect();
        assert_eq!(gaps.len(), 3);
        assert!(gaps[0] >= Duration::from_millis(35), "{gaps:?}");
        assert!(gaps[1] >= Duration::from_millis(75), "{gaps:?}");
        assert!(gaps[2] >= Duration::from_millis(95), "{gaps:?}");
        assert!(gaps[2] < Duration::from_millis(150), "cap not applied: {gaps:?}");
    }

    #[test]
    fn jitter_at_most_doubles_the_wait() {
        let delay = Duration::from_millis(50);
        for _ in 0..200 {
            let jittered = add_jitter(delay);
            assert!((delay..=delay * 2).contains(&jittered), "{jittered:?}");
        }
        assert_eq!(add_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn round_backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        assert_eq!(round_backoff(base, 0, cap), Duration::from_secs(1));
        assert_eq!(round_backoff(base, 1, cap), Duration::from_secs(2));
        assert_eq!(round_backoff(base, 3, cap), Duration::from_secs(8));
        assert_eq!(round_backoff(base, 10, cap), cap);
    }

    // classification

    #[test]
    fn transient_statuses_are_retryable() {
        for code in [429, 502, 503, 504] {
            assert!(TransferError::from_status(code, "u").is_retryable(), "{code}");
        }
    }

    #[test]
    fn terminal_statuses_are_not_retryable() {
        for code in [204, 206, 400, 401, 403, 404, 410, 500] {
            assert!(!TransferError::from_status(code, "u").is_retryable(), "{code}");
        }
    }

    #[test]
    fn timeouts_are_retryable() {
        let err = TransferError::Timeout {
            url: "https://example.com".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn local_write_failures_are_not_retryable() {
        let err = TransferError::Io {
            path: "/tmp/x".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn cancellation_is_not_retryable() {
        assert!(!TransferError::Cancelled.is_retryable());
    }
}
