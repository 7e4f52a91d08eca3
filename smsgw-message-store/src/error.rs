//! Error types for the message store.

use smsgw_model::ModelError;
use smsgw_storage::StorageError;
use thiserror::Error;

/// Result type for message store operations.
pub type MessageStoreResult<T> = Result<T, MessageStoreError>;

/// Errors that can occur in message store operations.
///
/// Missing messages, events and batches are reported as `None` by the
/// readers. `BatchNotFound` is only raised by operations that must modify an
/// existing batch.
#[derive(Debug, Error)]
pub enum MessageStoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Types(#[from] smsgw_types::Error),

    /// A compound index value did not have the `<prefix>$<timestamp>$<value>`
    /// layout.
    #[error("invalid index value: {0}")]
    InvalidIndexValue(String),

    /// Batch ids prefix compound index values, so they may not contain the
    /// separator.
    #[error("invalid batch id: {0:?}")]
    InvalidBatchId(String),

    #[error("batch not found: {0}")]
    BatchNotFound(String),

    #[error("config error: {0}")]
    Config(String),
}

impl MessageStoreError {
    /// True for bad field values, including malformed stored data.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_validation(),
            Self::Model(e) => e.is_validation(),
            Self::Types(_) | Self::InvalidIndexValue(_) | Self::InvalidBatchId(_) => true,
            Self::BatchNotFound(_) | Self::Config(_) => false,
        }
    }

    #[must_use]
    pub fn is_migration(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_migration(),
            Self::Model(e) => e.is_migration(),
            _ => false,
        }
    }
}
