//! Core type definitions for the SMS gateway persistence core.
//!
//! This crate defines the fundamental types shared by the model, storage and
//! message-store layers:
//! - Random message and batch identifiers (UUID v4, simple hex)
//! - The fixed textual timestamp format used on the wire
//! - Reverse-timestamp encoding for newest-first index scans
//! - Transport messages (`TransportUserMessage`) and events (`TransportEvent`)

mod ids;
mod message;
mod timestamp;

pub use ids::generate_id;
pub use message::{
    DeliveryStatus, EventType, MESSAGE_TYPE_EVENT, MESSAGE_TYPE_USER_MESSAGE, MESSAGE_VERSION,
    TransportEvent, TransportUserMessage, WireMessage,
};
pub use timestamp::{
    REVERSE_TIMESTAMP_BASE, TIMESTAMP_FORMAT, format_timestamp, from_reverse_timestamp,
    parse_timestamp, timestamp_format, to_reverse_timestamp, utc_now,
};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid reverse timestamp: {0}")]
    InvalidReverseTimestamp(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
