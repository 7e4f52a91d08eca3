//! Stored models: batches, current tags, messages and events.
//!
//! Messages and events carry compound index fields of the form
//! `<batch>$<timestamp>$<address or status>`. They are derived data,
//! recomputed by [`ModelHooks::before_store`] on every save, and are what
//! the ordered page queries in [`crate::MessageStore`] scan.

use crate::migrators::{event_migrator, message_migrator};
use smsgw_model::{
    Entity, Field, ModelResult, ModelHooks, SchemaBuilder, SchemaRegistry, Value,
};
use smsgw_types::{
    MESSAGE_TYPE_EVENT, MESSAGE_TYPE_USER_MESSAGE, TransportEvent, TransportUserMessage,
    format_timestamp, to_reverse_timestamp,
};

pub const BATCH: &str = "Batch";
pub const CURRENT_TAG: &str = "CurrentTag";
pub const OUTBOUND_MESSAGE: &str = "OutboundMessage";
pub const INBOUND_MESSAGE: &str = "InboundMessage";
pub const EVENT: &str = "Event";

pub const MESSAGE_VERSION: u32 = 5;
pub const EVENT_VERSION: u32 = 2;

/// Separator between the parts of a compound index value.
pub const INDEX_SEPARATOR: char = '$';

/// Builds a compound index value.
#[must_use]
pub fn compound_index_value(prefix: &str, timestamp: &str, value: &str) -> String {
    format!("{prefix}{INDEX_SEPARATOR}{timestamp}{INDEX_SEPARATOR}{value}")
}

/// Which address a message is indexed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Address {
    To,
    From,
}

struct MessageIndexHooks {
    address: Address,
}

impl ModelHooks for MessageIndexHooks {
    fn before_store(&self, entity: &mut Entity) -> ModelResult<()> {
        let mut forward = Vec::new();
        let mut reverse = Vec::new();
        if let Some(msg) = entity.message::<TransportUserMessage>("msg")? {
            let timestamp = format_timestamp(&msg.timestamp);
            let reverse_ts = to_reverse_timestamp(&msg.timestamp)?;
            let address = match self.address {
                Address::To => &msg.to_addr,
                Address::From => &msg.from_addr,
            };
            for batch in entity.related_keys("batches")? {
                forward.push(compound_index_value(&batch, &timestamp, address));
                reverse.push(compound_index_value(&batch, &reverse_ts, address));
            }
        }
        entity.set("batches_with_addresses", forward)?;
        entity.set("batches_with_addresses_reverse", reverse)
    }
}

struct EventIndexHooks;

impl ModelHooks for EventIndexHooks {
    fn before_store(&self, entity: &mut Entity) -> ModelResult<()> {
        let Some(event) = entity.message::<TransportEvent>("event")? else {
            entity.set("message_with_status", Value::Null)?;
            return entity.set("batches_with_statuses_reverse", Vec::<String>::new());
        };
        let timestamp = format_timestamp(&event.timestamp);
        let reverse_ts = to_reverse_timestamp(&event.timestamp)?;
        let status = event.status();
        let with_status = entity
            .foreign_key("message")?
            .map(|message| compound_index_value(&message, &timestamp, &status));
        entity.set("message_with_status", with_status)?;
        let reverse: Vec<String> = entity
            .related_keys("batches")?
            .iter()
            .map(|batch| compound_index_value(batch, &reverse_ts, &status))
            .collect();
        entity.set("batches_with_statuses_reverse", reverse)
    }
}

fn batch() -> SchemaBuilder {
    SchemaBuilder::new(BATCH)
        .bucket("batches")
        .field("tags", Field::list_of(Field::tag()))
        .field("metadata", Field::dynamic(Field::text()))
}

/// Keyed by the flattened `pool:tag`.
fn current_tag() -> SchemaBuilder {
    SchemaBuilder::new(CURRENT_TAG)
        .bucket("current_tags")
        .field("tag", Field::tag())
        .field("current_batch", Field::foreign_key(BATCH).nullable())
}

fn user_message(name: &str, bucket: &str, address: Address) -> SchemaBuilder {
    SchemaBuilder::new(name)
        .bucket(bucket)
        .version(MESSAGE_VERSION)
        .field("msg", Field::message(MESSAGE_TYPE_USER_MESSAGE))
        .field("batches", Field::many_to_many(BATCH))
        .field("batches_with_addresses", Field::list_of(Field::text()).indexed())
        .field(
            "batches_with_addresses_reverse",
            Field::list_of(Field::text()).indexed(),
        )
        .migrator(message_migrator())
        .hooks(MessageIndexHooks { address })
}

fn event() -> SchemaBuilder {
    SchemaBuilder::new(EVENT)
        .bucket("events")
        .version(EVENT_VERSION)
        .field("event", Field::message(MESSAGE_TYPE_EVENT))
        .field("message", Field::foreign_key(OUTBOUND_MESSAGE))
        .field("batches", Field::many_to_many(BATCH))
        .field("message_with_status", Field::text().nullable().indexed())
        .field(
            "batches_with_statuses_reverse",
            Field::list_of(Field::text()).indexed(),
        )
        .migrator(event_migrator())
        .hooks(EventIndexHooks)
}

/// Every model the message store reads and writes.
///
/// Backlinks registered on `Batch`: `currenttags`, `outboundmessages`,
/// `inboundmessages` and `events`. On `OutboundMessage`: `events`.
pub fn registry() -> ModelResult<SchemaRegistry> {
    SchemaRegistry::builder()
        .register(batch())
        .register(current_tag())
        .register(user_message(OUTBOUND_MESSAGE, "outbound_messages", Address::To))
        .register(user_message(INBOUND_MESSAGE, "inbound_messages", Address::From))
        .register(event())
        .build()
}
