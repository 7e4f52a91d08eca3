use pretty_assertions::assert_eq;
use serde_json::json;
use smsgw_types::{
    DeliveryStatus, EventType, MESSAGE_TYPE_USER_MESSAGE, TransportEvent, TransportUserMessage,
    WireMessage, generate_id,
};

// ── Identifiers ──────────────────────────────────────────────────

#[test]
fn generated_ids_are_simple_hex() {
    let id = generate_id();
    assert_eq!(id.len(), 32);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    assert_ne!(generate_id(), id);
}

// ── User messages ────────────────────────────────────────────────

#[test]
fn user_message_payload_roundtrip() {
    let msg = TransportUserMessage::new("+27831234567", "12345")
        .with_message_id("m1")
        .with_content("hello")
        .with_transport("sphex", "sms");
    let payload = msg.to_payload().unwrap();
    assert_eq!(payload["message_type"], json!(MESSAGE_TYPE_USER_MESSAGE));
    assert_eq!(payload["to_addr"], json!("+27831234567"));
    assert_eq!(TransportUserMessage::from_payload(payload).unwrap(), msg);
}

#[test]
fn user_message_keeps_unknown_attributes() {
    let payload = json!({
        "message_type": "user_message",
        "message_id": "m1",
        "timestamp": "2013-07-01 12:00:00.000000",
        "to_addr": "+1",
        "from_addr": "+2",
        "group": "news",
    });
    let msg = TransportUserMessage::from_payload(payload.as_object().unwrap().clone()).unwrap();
    assert_eq!(msg.extra["group"], json!("news"));
    assert_eq!(msg.to_payload().unwrap()["group"], json!("news"));
}

#[test]
fn user_message_rejects_event_payload() {
    let event = TransportEvent::ack("m1", "remote-1");
    let payload = event.to_payload().unwrap();
    assert!(TransportUserMessage::from_payload(payload).is_err());
}

#[test]
fn reply_swaps_addresses() {
    let msg = TransportUserMessage::new("+1", "+2").with_message_id("m1");
    let reply = msg.reply("pong");
    assert_eq!(reply.to_addr, "+2");
    assert_eq!(reply.from_addr, "+1");
    assert_eq!(reply.in_reply_to.as_deref(), Some("m1"));
    assert_eq!(reply.content.as_deref(), Some("pong"));
}

// ── Events ───────────────────────────────────────────────────────

#[test]
fn event_status_strings() {
    assert_eq!(TransportEvent::ack("m1", "r1").status(), "ack");
    assert_eq!(TransportEvent::nack("m1", "no route").status(), "nack");
    assert_eq!(
        TransportEvent::delivery_report("m1", DeliveryStatus::Delivered).status(),
        "delivery_report.delivered"
    );
}

#[test]
fn event_payload_roundtrip() {
    let event = TransportEvent::delivery_report("m1", DeliveryStatus::Failed).with_event_id("e1");
    let payload = event.to_payload().unwrap();
    assert_eq!(payload["event_type"], json!("delivery_report"));
    assert_eq!(payload["delivery_status"], json!("failed"));
    let back = TransportEvent::from_payload(payload).unwrap();
    assert_eq!(back, event);
    assert_eq!(back.event_type, EventType::DeliveryReport);
}
