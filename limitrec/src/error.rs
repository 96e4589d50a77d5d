//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::barrier::BarrierError;
use crate::browser::BrowserError;
use crate::capture::CaptureError;
use crate::credentials::CredentialError;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing dependency: {0}")]
    Dependency(String),

    #[error("Recording of {0} requires explicit user confirmation")]
    ConfirmationRequired(String),

    #[error("Already recording {0}")]
    AlreadyRecording(String),

    #[error("Concurrent recording limit reached ({0})")]
    ConcurrencyLimit(usize),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Barrier(#[from] BarrierError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("IO error while {op} ({path}): {source}")]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}
