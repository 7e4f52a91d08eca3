use pretty_assertions::assert_eq;
use serde_json::json;
use smsgw_model::{Entity, Field, Record, SchemaBuilder, SchemaRegistry, Value};
use smsgw_types::TransportUserMessage;

fn registry() -> SchemaRegistry {
    SchemaRegistry::builder()
        .register(
            SchemaBuilder::new("Contact")
                .field("name", Field::text().indexed())
                .field("nick", Field::text().nullable().indexed())
                .field("groups", Field::list_of(Field::text()).indexed())
                .field("labels", Field::set_of(Field::text()).indexed())
                .field("extras", Field::dynamic(Field::text()))
                .field("last_msg", Field::message("user_message").nullable()),
        )
        .register(SchemaBuilder::new("Group").field("title", Field::text().nullable()))
        .register(
            SchemaBuilder::new("Membership")
                .field("contact", Field::foreign_key("Contact").nullable())
                .field("groups", Field::many_to_many("Group")),
        )
        .build()
        .unwrap()
}

fn contact(registry: &SchemaRegistry) -> Entity {
    registry
        .get("Contact")
        .unwrap()
        .create("c1", [("name", "alice")])
        .unwrap()
}

fn index_values(entity: &Entity, index: &str) -> Vec<String> {
    entity.record().index_values(index).map(str::to_string).collect()
}

// ── Scalars ──────────────────────────────────────────────────────

#[test]
fn setting_indexed_field_replaces_index_entry() {
    let registry = registry();
    let mut e = contact(&registry);
    assert_eq!(index_values(&e, "name_bin"), vec!["alice"]);
    e.set("name", "bob").unwrap();
    assert_eq!(index_values(&e, "name_bin"), vec!["bob"]);
    assert_eq!(e.get_text("name").unwrap().as_deref(), Some("bob"));
}

#[test]
fn setting_null_removes_index_entry() {
    let registry = registry();
    let mut e = contact(&registry);
    e.set("nick", "al").unwrap();
    assert_eq!(index_values(&e, "nick_bin"), vec!["al"]);
    e.set("nick", Value::Null).unwrap();
    assert!(index_values(&e, "nick_bin").is_empty());
}

#[test]
fn failed_set_leaves_entity_unchanged() {
    let registry = registry();
    let mut e = contact(&registry);
    let before = e.record().clone();
    assert!(e.set("name", Value::Null).is_err());
    assert!(e.set("name", 12).is_err());
    assert_eq!(e.record(), &before);
}

#[test]
fn unknown_field_is_an_error() {
    let registry = registry();
    let e = contact(&registry);
    assert!(e.get("nope").is_err());
}

// ── Lists ────────────────────────────────────────────────────────

#[test]
fn append_and_remove_items() {
    let registry = registry();
    let mut e = contact(&registry);
    e.append_item("groups", "a").unwrap();
    e.append_item("groups", "b").unwrap();
    e.append_item("groups", "a").unwrap();
    assert_eq!(e.get("groups").unwrap(), Value::from(vec!["a", "b", "a"]));
    assert_eq!(index_values(&e, "groups_bin"), vec!["a", "b"]);

    assert!(e.remove_item("groups", &Value::from("b")).unwrap());
    assert!(!e.remove_item("groups", &Value::from("zz")).unwrap());
    assert_eq!(e.get("groups").unwrap(), Value::from(vec!["a", "a"]));
    assert_eq!(index_values(&e, "groups_bin"), vec!["a"]);
}

#[test]
fn append_to_non_list_is_an_error() {
    let registry = registry();
    let mut e = contact(&registry);
    assert!(e.append_item("name", "x").is_err());
}

// ── Sets ─────────────────────────────────────────────────────────

#[test]
fn add_and_remove_members() {
    let registry = registry();
    let mut e = contact(&registry);
    assert!(e.add_member("labels", "vip").unwrap());
    assert!(!e.add_member("labels", "vip").unwrap());
    assert!(e.add_member("labels", "new").unwrap());
    assert_eq!(e.get("labels").unwrap(), Value::from(vec!["new", "vip"]));
    assert!(e.remove_member("labels", &Value::from("vip")).unwrap());
    assert_eq!(index_values(&e, "labels_bin"), vec!["new"]);
    assert!(!e.remove_member("labels", &Value::from("vip")).unwrap());
}

// ── Dynamic ──────────────────────────────────────────────────────

#[test]
fn dynamic_entries() {
    let registry = registry();
    let mut e = contact(&registry);
    e.set_entry("extras", "city", "Cape Town").unwrap();
    e.set_entry("extras", "lang", "en").unwrap();
    assert_eq!(e.record().data["extras.city"], json!("Cape Town"));
    assert_eq!(e.get_entry("extras", "lang").unwrap(), Some(Value::from("en")));
    assert!(e.remove_entry("extras", "lang").unwrap());
    assert_eq!(e.entries("extras").unwrap().len(), 1);
    assert!(e.set_entry("extras", "n", 3).is_err());
}

// ── Embedded messages ────────────────────────────────────────────

#[test]
fn embedded_message_roundtrip() {
    let registry = registry();
    let mut e = contact(&registry);
    let msg = TransportUserMessage::new("+1", "+2")
        .with_message_id("m1")
        .with_content("hi");
    e.set_message("last_msg", &msg).unwrap();
    assert_eq!(e.record().data["last_msg.content"], json!("hi"));
    assert_eq!(e.message::<TransportUserMessage>("last_msg").unwrap(), Some(msg));
}

// ── Relations ────────────────────────────────────────────────────

#[test]
fn foreign_key_accessors() {
    let registry = registry();
    let c = contact(&registry);
    let mut m = registry.get("Membership").unwrap().create_default("m1").unwrap();
    assert_eq!(m.foreign_key("contact").unwrap(), None);
    m.set_related("contact", &c).unwrap();
    assert_eq!(m.foreign_key("contact").unwrap().as_deref(), Some("c1"));
    assert_eq!(index_values(&m, "contact_bin"), vec!["c1"]);
    m.set_foreign_key("contact", None).unwrap();
    assert!(index_values(&m, "contact_bin").is_empty());
}

#[test]
fn foreign_key_rejects_wrong_model() {
    let registry = registry();
    let group = registry.get("Group").unwrap().create_default("g1").unwrap();
    let mut m = registry.get("Membership").unwrap().create_default("m1").unwrap();
    assert!(m.set_related("contact", &group).unwrap_err().is_validation());
}

#[test]
fn many_to_many_accessors() {
    let registry = registry();
    let group_schema = registry.get("Group").unwrap();
    let g1 = group_schema.create_default("g1").unwrap();
    let g2 = group_schema.create_default("g2").unwrap();
    let mut m = registry.get("Membership").unwrap().create_default("m1").unwrap();
    assert!(m.add_related("groups", &g2).unwrap());
    assert!(m.add_related("groups", &g1).unwrap());
    assert!(!m.add_related_key("groups", "g1").unwrap());
    assert_eq!(m.related_keys("groups").unwrap(), vec!["g1", "g2"]);
    assert!(m.remove_related_key("groups", "g2").unwrap());
    assert_eq!(index_values(&m, "groups_bin"), vec!["g1"]);
    m.clear_related("groups").unwrap();
    assert!(m.related_keys("groups").unwrap().is_empty());
    assert!(m.add_related("groups", &contact(&registry)).is_err());
}

// ── Loading stored records ───────────────────────────────────────

#[test]
fn legacy_relations_are_rebuilt_from_indexes() {
    let registry = registry();
    let mut record = Record::new();
    record.add_index("contact_bin", "c9");
    record.add_index("groups_bin", "g2");
    record.add_index("groups_bin", "g1");
    let m = Entity::from_stored(registry.get("Membership").unwrap(), "m1", record).unwrap();
    assert_eq!(m.foreign_key("contact").unwrap().as_deref(), Some("c9"));
    assert_eq!(m.related_keys("groups").unwrap(), vec!["g1", "g2"]);
    assert_eq!(m.record().data["groups"], json!(["g1", "g2"]));
    assert!(!m.was_migrated());
}

#[test]
fn stored_record_roundtrips_unchanged() {
    let registry = registry();
    let mut e = contact(&registry);
    e.append_item("groups", "x").unwrap();
    e.set_entry("extras", "k", "v").unwrap();
    let record = e.record().clone();
    let loaded = Entity::from_stored(registry.get("Contact").unwrap(), "c1", record.clone()).unwrap();
    assert_eq!(loaded.record(), &record);
}
