//! Credential error types.

use thiserror::Error;

use crate::browser::BrowserError;

/// Errors that can occur while establishing an authenticated session.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No identity/password pair is configured and the profile is not logged in.
    #[error("No credentials configured")]
    NoCredentials,

    /// Every configured identity was tried and rejected.
    #[error("Login rejected for all {0} configured identities")]
    LoginRejected(usize),

    /// The automation backend failed.
    #[error("{backend} backend error: {source}")]
    Backend {
        backend: &'static str,
        #[source]
        source: BrowserError,
    },

    /// Reading or writing the cookie cache failed.
    #[error("Cookie cache error: {0}")]
    Cache(String),
}

impl CredentialError {
    pub fn backend(backend: &'static str, source: BrowserError) -> Self {
        Self::Backend { backend, source }
    }

    /// Check if this error requires new input from the operator.
    pub fn requires_relogin(&self) -> bool {
        matches!(self, Self::NoCredentials | Self::LoginRejected(_))
    }

    /// Check if this error is transient and may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Cache(_))
    }
}

impl From<crate::Error> for CredentialError {
    fn from(err: crate::Error) -> Self {
        Self::Cache(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(CredentialError::NoCredentials.requires_relogin());
        assert!(CredentialError::LoginRejected(2).requires_relogin());
        let backend = CredentialError::backend("chromium", BrowserError::Launch("boom".into()));
        assert!(backend.is_transient());
        assert!(!backend.requires_relogin());
        assert_eq!(
            backend.to_string(),
            "chromium backend error: Failed to launch browser: boom"
        );
    }
}
