//! Transport messages and events.
//!
//! These are the payloads exchanged with the transports. The store embeds
//! them whole inside message and event records, so every attribute survives
//! a round trip, including ones this crate does not know about (`extra`).

use crate::{Error, Result, generate_id, timestamp::timestamp_format, utc_now};
use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Version stamp carried by every message.
pub const MESSAGE_VERSION: &str = "20110921";

/// `message_type` of user messages.
pub const MESSAGE_TYPE_USER_MESSAGE: &str = "user_message";

/// `message_type` of events.
pub const MESSAGE_TYPE_EVENT: &str = "event";

/// A message that can be embedded in a record.
///
/// Implementors serialize to a flat JSON object whose `message_type`
/// attribute equals [`WireMessage::MESSAGE_TYPE`].
pub trait WireMessage: Serialize + DeserializeOwned {
    const MESSAGE_TYPE: &'static str;

    /// Converts the message to its JSON object form.
    fn to_payload(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(Error::InvalidMessage(format!(
                "expected an object, got {other}"
            ))),
        }
    }

    /// Builds the message from its JSON object form.
    fn from_payload(payload: Map<String, Value>) -> Result<Self> {
        match payload.get("message_type").and_then(Value::as_str) {
            Some(t) if t == Self::MESSAGE_TYPE => {}
            other => {
                return Err(Error::InvalidMessage(format!(
                    "expected message_type {:?}, got {:?}",
                    Self::MESSAGE_TYPE,
                    other
                )));
            }
        }
        Ok(serde_json::from_value(Value::Object(payload))?)
    }
}

fn user_message_type() -> String {
    MESSAGE_TYPE_USER_MESSAGE.to_string()
}

fn event_message_type() -> String {
    MESSAGE_TYPE_EVENT.to_string()
}

fn message_version() -> String {
    MESSAGE_VERSION.to_string()
}

/// An inbound or outbound user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportUserMessage {
    #[serde(default = "message_version")]
    pub message_version: String,
    #[serde(default = "user_message_type")]
    pub message_type: String,
    pub message_id: String,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub to_addr: String,
    pub from_addr: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub session_event: Option<String>,
    #[serde(default)]
    pub transport_name: Option<String>,
    #[serde(default)]
    pub transport_type: Option<String>,
    #[serde(default)]
    pub transport_metadata: Map<String, Value>,
    #[serde(default)]
    pub helper_metadata: Map<String, Value>,
    /// Attributes not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TransportUserMessage {
    /// Creates a message with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(to_addr: impl Into<String>, from_addr: impl Into<String>) -> Self {
        Self {
            message_version: message_version(),
            message_type: user_message_type(),
            message_id: generate_id(),
            timestamp: utc_now(),
            to_addr: to_addr.into(),
            from_addr: from_addr.into(),
            content: None,
            in_reply_to: None,
            session_event: None,
            transport_name: None,
            transport_type: None,
            transport_metadata: Map::new(),
            helper_metadata: Map::new(),
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_transport(mut self, name: impl Into<String>, kind: impl Into<String>) -> Self {
        self.transport_name = Some(name.into());
        self.transport_type = Some(kind.into());
        self
    }

    /// Builds a reply addressed back to the sender of this message.
    #[must_use]
    pub fn reply(&self, content: impl Into<String>) -> Self {
        let mut reply = Self::new(self.from_addr.clone(), self.to_addr.clone())
            .with_content(content);
        reply.in_reply_to = Some(self.message_id.clone());
        reply.transport_name = self.transport_name.clone();
        reply.transport_type = self.transport_type.clone();
        reply.transport_metadata = self.transport_metadata.clone();
        reply.helper_metadata = self.helper_metadata.clone();
        reply
    }
}

impl WireMessage for TransportUserMessage {
    const MESSAGE_TYPE: &'static str = MESSAGE_TYPE_USER_MESSAGE;
}

/// Kind of event reported against an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Ack,
    Nack,
    DeliveryReport,
}

impl EventType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Nack => "nack",
            Self::DeliveryReport => "delivery_report",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery state carried by delivery reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Failed,
    Delivered,
}

impl DeliveryStatus {
    pub const ALL: [Self; 3] = [Self::Pending, Self::Failed, Self::Delivered];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Failed => "failed",
            Self::Delivered => "delivered",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ack, nack or delivery report for a previously sent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportEvent {
    #[serde(default = "message_version")]
    pub message_version: String,
    #[serde(default = "event_message_type")]
    pub message_type: String,
    pub event_id: String,
    pub event_type: EventType,
    pub user_message_id: String,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    #[serde(default)]
    pub sent_message_id: Option<String>,
    #[serde(default)]
    pub delivery_status: Option<DeliveryStatus>,
    #[serde(default)]
    pub nack_reason: Option<String>,
    #[serde(default)]
    pub transport_name: Option<String>,
    #[serde(default)]
    pub transport_metadata: Map<String, Value>,
    #[serde(default)]
    pub helper_metadata: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TransportEvent {
    fn new(event_type: EventType, user_message_id: impl Into<String>) -> Self {
        Self {
            message_version: message_version(),
            message_type: event_message_type(),
            event_id: generate_id(),
            event_type,
            user_message_id: user_message_id.into(),
            timestamp: utc_now(),
            sent_message_id: None,
            delivery_status: None,
            nack_reason: None,
            transport_name: None,
            transport_metadata: Map::new(),
            helper_metadata: Map::new(),
            extra: Map::new(),
        }
    }

    /// An ack for `user_message_id`.
    #[must_use]
    pub fn ack(user_message_id: impl Into<String>, sent_message_id: impl Into<String>) -> Self {
        let mut event = Self::new(EventType::Ack, user_message_id);
        event.sent_message_id = Some(sent_message_id.into());
        event
    }

    /// A nack for `user_message_id`.
    #[must_use]
    pub fn nack(user_message_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut event = Self::new(EventType::Nack, user_message_id);
        event.nack_reason = Some(reason.into());
        event
    }

    /// A delivery report for `user_message_id`.
    #[must_use]
    pub fn delivery_report(user_message_id: impl Into<String>, status: DeliveryStatus) -> Self {
        let mut event = Self::new(EventType::DeliveryReport, user_message_id);
        event.delivery_status = Some(status);
        event
    }

    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The status string this event counts towards, e.g. `ack` or
    /// `delivery_report.delivered`.
    #[must_use]
    pub fn status(&self) -> String {
        match (self.event_type, self.delivery_status) {
            (EventType::DeliveryReport, Some(status)) => {
                format!("{}.{}", EventType::DeliveryReport, status)
            }
            (event_type, _) => event_type.to_string(),
        }
    }
}

impl WireMessage for TransportEvent {
    const MESSAGE_TYPE: &'static str = MESSAGE_TYPE_EVENT;
}
