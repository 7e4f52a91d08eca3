//! Error types for the model layer.

use thiserror::Error;

/// Errors raised while building schemas, validating values or migrating
/// records.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A value does not satisfy its field's constraints.
    #[error("validation error: {0}")]
    Validation(String),

    /// A record's version has no registered migration step.
    #[error("migration error: {0}")]
    Migration(String),

    /// A schema definition is inconsistent.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("unknown field {field:?} on {model}")]
    UnknownField { model: String, field: String },

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Types(#[from] smsgw_types::Error),
}

impl ModelError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// True for bad field values, including malformed stored data.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Types(_))
    }

    #[must_use]
    pub fn is_migration(&self) -> bool {
        matches!(self, Self::Migration(_))
    }
}

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;
