use std::time::Duration;

use thiserror::Error;

/// Errors raised by browser automation backends.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Browser protocol error: {0}")]
    Protocol(String),

    #[error("Timed out after {0:?} while {1}")]
    Timeout(Duration, &'static str),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
}

impl BrowserError {
    pub fn navigation(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Navigation {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn protocol(err: impl ToString) -> Self {
        Self::Protocol(err.to_string())
    }
}
