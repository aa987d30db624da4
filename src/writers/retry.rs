//! Retry utilities for transaction submission
//!
//! Exponential backoff plus string-based error classification for messages
//! coming back from either chain's RPC.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::RelayError;

/// Submission retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Check if another attempt is allowed after `attempts_made`
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Classifies errors for retry decisions
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// Temporary failure (RPC timeout, network issues)
    Transient,
    /// Transaction underpriced
    Underpriced,
    /// Account nonce raced with another transaction
    NonceTooLow,
    /// Nonce too high - wait for pending transactions
    NonceTooHigh,
    /// Permanent failure (invalid params, contract abort)
    Permanent,
    /// Unknown error - may retry with backoff
    Unknown,
}

/// Classify an error for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    // Transient errors
    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    // Gas and funding shortfalls clear once the relayer account is topped up
    if error_lower.contains("insufficient funds")
        || error_lower.contains("insufficientgas")
        || error_lower.contains("insufficient gas")
        || error_lower.contains("out of gas")
    {
        return ErrorClass::Transient;
    }

    // Gas price errors
    if error_lower.contains("underpriced")
        || error_lower.contains("replacement transaction")
        || error_lower.contains("gas price too low")
        || error_lower.contains("max fee per gas less than")
    {
        return ErrorClass::Underpriced;
    }

    // Nonce errors
    if error_lower.contains("nonce too low") || error_lower.contains("already known") {
        return ErrorClass::NonceTooLow;
    }

    if error_lower.contains("nonce too high") {
        return ErrorClass::NonceTooHigh;
    }

    // Permanent errors
    if error_lower.contains("reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("invalid parameters")
        || error_lower.contains("moveabort")
        || error_lower.contains("already processed")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// uses up `config.max_attempts`. The closure receives the 0-indexed attempt.
pub async fn with_retry<F, T, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, RelayError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let mut attempt = 0u32;

    loop {
        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && config.should_retry(attempt + 1) => {
                let backoff = config.backoff_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max = config.max_attempts,
                    ?backoff,
                    error = %e,
                    "Retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                debug!(attempt = attempt + 1, error = %e, "Giving up");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_calculation() {
        let config = RetryConfig::default();

        assert_eq!(config.backoff_for_attempt(0), Duration::from_secs(2));
        assert_eq!(config.backoff_for_attempt(1), Duration::from_secs(4));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_secs(8));
        assert_eq!(config.backoff_for_attempt(4), Duration::from_secs(32));
        assert_eq!(config.backoff_for_attempt(5), Duration::from_secs(60)); // capped
        assert_eq!(config.backoff_for_attempt(20), Duration::from_secs(60));
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(classify_error("connection timeout"), ErrorClass::Transient);
        assert_eq!(
            classify_error("replacement transaction underpriced"),
            ErrorClass::Underpriced
        );
        assert_eq!(classify_error("nonce too low"), ErrorClass::NonceTooLow);
        assert_eq!(classify_error("execution reverted"), ErrorClass::Permanent);
        assert_eq!(
            classify_error("MoveAbort(bridge_l1::unlock, 3)"),
            ErrorClass::Permanent
        );
        assert_eq!(classify_error("some unknown error"), ErrorClass::Unknown);
        assert_eq!(
            classify_error("insufficient funds for gas * price + value"),
            ErrorClass::Transient
        );
        assert_eq!(classify_error("InsufficientGas"), ErrorClass::Transient);
        assert_eq!(classify_error("out of gas"), ErrorClass::Transient);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();

        let result: Result<(), RelayError> = with_retry(&config, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(RelayError::TransientRpc {
                    chain: "evm",
                    message: "503".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_does_not_retry_rejections() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();

        let result: Result<(), RelayError> = with_retry(&config, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(RelayError::SubmissionRejected {
                    chain: "l1",
                    message: "MoveAbort".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(RelayError::SubmissionRejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();

        let result = with_retry(&config, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(RelayError::TransientRpc {
                        chain: "evm",
                        message: "timeout".into(),
                    })
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
