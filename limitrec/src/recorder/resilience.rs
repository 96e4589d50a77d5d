//! Retry policy and failure classification for recording attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::barrier::BarrierError;
use crate::browser::BrowserError;
use crate::capture::CaptureError;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 5_000,
            max_delay_ms: 15 * 60 * 1000,
            backoff_multiplier: 2.0,
            use_jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay_ms: base_delay.as_millis().try_into().unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based): `base * multiplier^(retry - 1)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay_ms as f64
            * self
                .backoff_multiplier
                .powi(retry.saturating_sub(1).min(i32::MAX as u32) as i32);
        let delay_ms = base_delay.min(self.max_delay_ms as f64) as u64;

        let final_delay = if self.use_jitter {
            let jitter = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms + jitter
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }

    /// Whether another retry is allowed after `retries_done` retries.
    pub fn should_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }
}

/// How the controller treats a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FailureKind {
    /// Retrying cannot help; the session ends as FAILED.
    Permanent,
    /// The attempt failed and may be retried; ends as FAILED when retries run out.
    Retryable,
    /// Infrastructure failure that may be retried; ends as ERROR when retries run out.
    Fatal,
}

/// A failed attempt stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl StageFailure {
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            reason: reason.into(),
        }
    }

    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Retryable,
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind, FailureKind::Permanent)
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

impl From<BarrierError> for StageFailure {
    fn from(err: BarrierError) -> Self {
        if err.is_permanent() {
            Self::permanent(err.to_string())
        } else {
            Self::retryable(err.to_string())
        }
    }
}

impl From<BrowserError> for StageFailure {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Launch(_) => Self::fatal(err.to_string()),
            _ => Self::retryable(err.to_string()),
        }
    }
}

impl From<CaptureError> for StageFailure {
    fn from(err: CaptureError) -> Self {
        match err {
            // A missing or non-executable capture tool ends the session at once.
            CaptureError::Spawn { ref source, .. }
                if matches!(
                    source.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
                ) =>
            {
                Self::permanent(err.to_string())
            }
            _ => Self::retryable(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays() {
        let config = RetryConfig::new(3, Duration::from_secs(5));
        assert_eq!(config.delay_for_retry(0), Duration::ZERO);
        assert_eq!(config.delay_for_retry(1), Duration::from_secs(5));
        assert_eq!(config.delay_for_retry(2), Duration::from_secs(10));
        assert_eq!(config.delay_for_retry(3), Duration::from_secs(20));
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig {
            max_delay_ms: 8_000,
            ..RetryConfig::new(10, Duration::from_secs(5))
        };
        assert_eq!(config.delay_for_retry(6), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let config = RetryConfig {
            use_jitter: true,
            ..RetryConfig::new(3, Duration::from_secs(4))
        };
        for _ in 0..20 {
            let delay = config.delay_for_retry(1);
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_should_retry() {
        let config = RetryConfig::new(2, Duration::from_secs(1));
        assert!(config.should_retry(0));
        assert!(config.should_retry(1));
        assert!(!config.should_retry(2));
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            StageFailure::from(BarrierError::PasswordRequired).kind,
            FailureKind::Permanent
        );
        assert_eq!(
            StageFailure::from(BrowserError::Launch("no chrome".into())).kind,
            FailureKind::Fatal
        );
        let exit = CaptureError::NonZeroExit {
            code: Some(1),
            stderr: String::new(),
        };
        assert!(StageFailure::from(exit).is_retryable());

        let missing = CaptureError::Spawn {
            binary: "yt-dlp".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(!StageFailure::from(missing).is_retryable());
        let busy = CaptureError::Spawn {
            binary: "yt-dlp".into(),
            source: std::io::Error::from(std::io::ErrorKind::WouldBlock),
        };
        assert!(StageFailure::from(busy).is_retryable());
    }
}
