//! Identifier generation.
//!
//! Message, event and batch keys are opaque strings chosen by the caller.
//! When the store has to mint one itself it uses a random UUID v4 rendered
//! as 32 lowercase hex characters, which keeps keys URL and index safe.

use uuid::Uuid;

/// Generates a fresh random identifier (32 lowercase hex characters).
#[must_use]
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}
