//! Version chains for stored messages and events.
//!
//! Each step copies what the target version keeps and nothing else. The
//! compound index fields (`batches_with_addresses`, `message_with_status`
//! and friends) are never migrated: the save hooks in [`crate::models`]
//! recompute them from the message payload and batch set.

use serde_json::Value as Json;
use smsgw_model::{MigrationData, ModelError, ModelResult, Migrator};

fn copy_message_field(field: &str, data: &mut MigrationData) {
    let prefix = format!("{field}.");
    data.copy_dynamic_values(&[prefix.as_str()]);
}

/// Turns a legacy index-only foreign key into a many-to-many field.
fn foreign_key_to_many_to_many(foreign_key: &str, many_to_many: &str, data: &mut MigrationData) {
    let old_keys = data.old_index(&format!("{foreign_key}_bin"));
    let index = format!("{many_to_many}_bin");
    for key in &old_keys {
        data.add_index(&index, key);
    }
    data.set_value(many_to_many, old_keys);
}

fn copy_message_and_batches(data: &mut MigrationData) -> ModelResult<()> {
    copy_message_field("msg", data);
    data.copy_values(&["batches"]);
    data.copy_indexes(&["batches_bin"]);
    Ok(())
}

// ── User messages ────────────────────────────────────────────────

fn message_from_unversioned(data: &mut MigrationData) -> ModelResult<()> {
    copy_message_field("msg", data);
    foreign_key_to_many_to_many("batch", "batches", data);
    Ok(())
}

/// Unversioned messages belonged to at most one batch. Extra batches are
/// dropped.
fn message_to_unversioned(data: &mut MigrationData) -> ModelResult<()> {
    copy_message_field("msg", data);
    let first = data.old_index("batches_bin").into_iter().next();
    if let Some(batch) = &first {
        data.add_index("batch_bin", batch);
    }
    data.set_value("batch", first.map_or(Json::Null, Json::String));
    Ok(())
}

/// Chain shared by inbound and outbound messages, up to version 5.
#[must_use]
pub fn message_migrator() -> Migrator {
    Migrator::new()
        .forward(None, 1, message_from_unversioned)
        .forward(Some(1), 2, copy_message_and_batches)
        .forward(Some(2), 3, copy_message_and_batches)
        .forward(Some(3), 4, copy_message_and_batches)
        .forward(Some(4), 5, copy_message_and_batches)
        .reverse(5, Some(4), copy_message_and_batches)
        .reverse(4, Some(3), copy_message_and_batches)
        .reverse(3, Some(2), copy_message_and_batches)
        .reverse(2, Some(1), copy_message_and_batches)
        .reverse(1, None, message_to_unversioned)
}

// ── Events ───────────────────────────────────────────────────────

fn event_from_unversioned(data: &mut MigrationData) -> ModelResult<()> {
    copy_message_field("event", data);
    match data.old_value("message") {
        Some(message) if !message.is_null() => data.copy_values(&["message"]),
        _ => {
            // Old-style index-only foreign key.
            let keys = data.old_index("message_bin");
            let [message] = keys.as_slice() else {
                return Err(ModelError::Migration(format!(
                    "expected one message_bin entry on an unversioned event, found {}",
                    keys.len()
                )));
            };
            data.set_value("message", message.as_str());
        }
    }
    data.copy_indexes(&["message_bin"]);
    Ok(())
}

/// Batches are filled in from the outbound message after load, see
/// [`MessageStore::load_event`](crate::MessageStore::load_event).
fn event_add_batches(data: &mut MigrationData) -> ModelResult<()> {
    copy_message_field("event", data);
    data.copy_values(&["message"]);
    data.copy_indexes(&["message_bin"]);
    data.set_value("batches", Json::Array(Vec::new()));
    Ok(())
}

fn event_copy_message(data: &mut MigrationData) -> ModelResult<()> {
    copy_message_field("event", data);
    data.copy_values(&["message"]);
    data.copy_indexes(&["message_bin"]);
    Ok(())
}

/// Event chain, up to version 2.
#[must_use]
pub fn event_migrator() -> Migrator {
    Migrator::new()
        .forward(None, 1, event_from_unversioned)
        .forward(Some(1), 2, event_add_batches)
        .reverse(2, Some(1), event_copy_message)
        .reverse(1, None, event_copy_message)
}
