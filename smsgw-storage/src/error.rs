//! Error types for the storage layer.

use smsgw_model::ModelError;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
///
/// A missing record is not an error: loads return `None`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Validation, schema or migration failure from the model layer.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The backend rejected or failed an operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// Network failure talking to the backend.
    #[error("network error: {0}")]
    Http(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A map-reduce or search call did not finish in time.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// A pagination token could not be decoded.
    #[error("invalid continuation: {0}")]
    InvalidContinuation(String),

    /// Cache store failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl StorageError {
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Model(e) if e.is_validation())
    }

    #[must_use]
    pub fn is_migration(&self) -> bool {
        matches!(self, Self::Model(e) if e.is_migration())
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}
