use pretty_assertions::assert_eq;
use smsgw_model::{Field, ModelError, SchemaBuilder, SchemaRegistry, Value};

fn base() -> SchemaBuilder {
    SchemaBuilder::new("SimpleModel")
        .field("a", Field::integer())
        .field("b", Field::text().nullable())
}

// ── Inheritance ──────────────────────────────────────────────────

#[test]
fn subtype_inherits_parent_fields() {
    let child = SchemaBuilder::new("InheritedModel")
        .extends(&base())
        .field("c", Field::boolean().default_value(false));
    let registry = SchemaRegistry::builder().register(child).build().unwrap();
    let schema = registry.get("InheritedModel").unwrap();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
}

#[test]
fn subtype_overrides_parent_field() {
    let child = SchemaBuilder::new("OverriddenModel")
        .extends(&base())
        .field("a", Field::integer().min(10));
    let registry = SchemaRegistry::builder().register(child).build().unwrap();
    let schema = registry.get("OverriddenModel").unwrap();
    assert_eq!(schema.fields().len(), 2);
    let a = schema.field("a").unwrap();
    assert!(a.validate(&Value::Int(5)).is_err());
    assert!(a.validate(&Value::Int(10)).is_ok());
}

#[test]
fn override_before_extends_still_wins() {
    let child = SchemaBuilder::new("OverriddenModel")
        .field("a", Field::integer().min(10))
        .field("c", Field::boolean().default_value(false))
        .extends(&base());
    let registry = SchemaRegistry::builder().register(child).build().unwrap();
    let schema = registry.get("OverriddenModel").unwrap();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    assert!(schema.field("a").unwrap().validate(&Value::Int(5)).is_err());
}

#[test]
fn subtype_inherits_version() {
    let parent = base().version(2);
    let child = SchemaBuilder::new("Child").extends(&parent);
    let registry = SchemaRegistry::builder().register(child).build().unwrap();
    assert_eq!(registry.get("Child").unwrap().version(), Some(2));
}

// ── Buckets ──────────────────────────────────────────────────────

#[test]
fn bucket_defaults_to_lowercase_name() {
    let registry = SchemaRegistry::builder().register(base()).build().unwrap();
    assert_eq!(registry.get("SimpleModel").unwrap().bucket(), "simplemodel");
}

#[test]
fn bucket_override() {
    let registry = SchemaRegistry::builder()
        .register(base().bucket("simple"))
        .build()
        .unwrap();
    assert_eq!(registry.get("SimpleModel").unwrap().bucket(), "simple");
}

#[test]
fn duplicate_model_is_rejected() {
    let err = SchemaRegistry::builder()
        .register(base())
        .register(base())
        .build()
        .unwrap_err();
    assert!(matches!(err, ModelError::Schema(_)));
}

#[test]
fn unknown_model_lookup() {
    let registry = SchemaRegistry::builder().register(base()).build().unwrap();
    assert!(matches!(
        registry.get("Nope").unwrap_err(),
        ModelError::UnknownModel(_)
    ));
}

// ── Backlinks ────────────────────────────────────────────────────

fn related_models() -> SchemaRegistry {
    SchemaRegistry::builder()
        .register(SchemaBuilder::new("SimpleModel").field("a", Field::integer()))
        .register(
            SchemaBuilder::new("ForeignKeyModel")
                .field("simple", Field::foreign_key("SimpleModel").nullable()),
        )
        .register(
            SchemaBuilder::new("ManyToManyModel")
                .field("simples", Field::many_to_many("SimpleModel")),
        )
        .build()
        .unwrap()
}

#[test]
fn backlinks_registered_on_target() {
    let registry = related_models();
    let schema = registry.get("SimpleModel").unwrap();
    let names: Vec<&str> = schema.backlinks().keys().map(String::as_str).collect();
    assert_eq!(names, vec!["foreignkeymodels", "manytomanymodels"]);
    let link = schema.backlink("foreignkeymodels").unwrap();
    assert_eq!(link.model, "ForeignKeyModel");
    assert_eq!(link.field, "simple");
    assert_eq!(link.index, "simple_bin");
}

#[test]
fn duplicate_backlink_is_a_build_error() {
    let err = SchemaRegistry::builder()
        .register(SchemaBuilder::new("SimpleModel"))
        .register(
            SchemaBuilder::new("Twice")
                .field("first", Field::foreign_key("SimpleModel"))
                .field("second", Field::foreign_key("SimpleModel")),
        )
        .build()
        .unwrap_err();
    assert!(matches!(err, ModelError::Schema(_)));
}

#[test]
fn explicit_backlink_name_avoids_collision() {
    let registry = SchemaRegistry::builder()
        .register(SchemaBuilder::new("SimpleModel"))
        .register(
            SchemaBuilder::new("Twice")
                .field("first", Field::foreign_key("SimpleModel"))
                .field("second", Field::foreign_key("SimpleModel").backlink("seconds")),
        )
        .build()
        .unwrap();
    let schema = registry.get("SimpleModel").unwrap();
    assert!(schema.backlink("twices").is_ok());
    assert!(schema.backlink("seconds").is_ok());
}

#[test]
fn unknown_relation_target_is_rejected() {
    let err = SchemaRegistry::builder()
        .register(SchemaBuilder::new("Orphan").field("parent", Field::foreign_key("Missing")))
        .build()
        .unwrap_err();
    assert!(matches!(err, ModelError::Schema(_)));
}

// ── Definition checks ────────────────────────────────────────────

#[test]
fn dotted_field_name_is_rejected() {
    let err = SchemaRegistry::builder()
        .register(SchemaBuilder::new("Bad").field("a.b", Field::text()))
        .build()
        .unwrap_err();
    assert!(matches!(err, ModelError::Schema(_)));
}

#[test]
fn overlapping_prefixes_are_rejected() {
    let err = SchemaRegistry::builder()
        .register(
            SchemaBuilder::new("Bad")
                .field("meta", Field::dynamic(Field::text()).prefix("x"))
                .field("xtra", Field::text()),
        )
        .build()
        .unwrap_err();
    assert!(matches!(err, ModelError::Schema(_)));
}

#[test]
fn nested_collections_are_rejected() {
    let err = SchemaRegistry::builder()
        .register(SchemaBuilder::new("Bad").field("nested", Field::list_of(Field::list_of(Field::text()))))
        .build()
        .unwrap_err();
    assert!(matches!(err, ModelError::Schema(_)));
}

#[test]
fn indexing_json_is_rejected() {
    let err = SchemaRegistry::builder()
        .register(SchemaBuilder::new("Bad").field("blob", Field::json().indexed()))
        .build()
        .unwrap_err();
    assert!(matches!(err, ModelError::Schema(_)));
}

#[test]
fn invalid_default_is_rejected() {
    let err = SchemaRegistry::builder()
        .register(SchemaBuilder::new("Bad").field("n", Field::integer().max(3).default_value(5)))
        .build()
        .unwrap_err();
    assert!(matches!(err, ModelError::Schema(_)));
}

// ── Entity creation ──────────────────────────────────────────────

#[test]
fn create_requires_non_null_fields_without_default() {
    let registry = SchemaRegistry::builder().register(base()).build().unwrap();
    let schema = registry.get("SimpleModel").unwrap();
    let err = schema.create_default("k").unwrap_err();
    assert!(err.is_validation());
    let entity = schema.create("k", [("a", 5)]).unwrap();
    assert_eq!(entity.get("a").unwrap(), Value::Int(5));
    assert_eq!(entity.get("b").unwrap(), Value::Null);
}

#[test]
fn create_rejects_unknown_fields() {
    let registry = SchemaRegistry::builder().register(base()).build().unwrap();
    let schema = registry.get("SimpleModel").unwrap();
    let err = schema.create("k", [("zzz", 5)]).unwrap_err();
    assert!(matches!(err, ModelError::UnknownField { .. }));
}

fn next_default() -> Value {
    Value::from("generated")
}

#[test]
fn defaults_literal_and_factory() {
    let registry = SchemaRegistry::builder()
        .register(
            SchemaBuilder::new("Defaults")
                .field("n", Field::integer().default_value(7))
                .field("s", Field::text().default_with(next_default))
                .field("tags", Field::list_of(Field::text())),
        )
        .build()
        .unwrap();
    let entity = registry.get("Defaults").unwrap().create_default("k").unwrap();
    assert_eq!(entity.get("n").unwrap(), Value::Int(7));
    assert_eq!(entity.get("s").unwrap(), Value::from("generated"));
    assert_eq!(entity.get("tags").unwrap(), Value::List(vec![]));
}

#[test]
fn versioned_model_stamps_records() {
    let registry = SchemaRegistry::builder()
        .register(base().version(3))
        .build()
        .unwrap();
    let entity = registry.get("SimpleModel").unwrap().create("k", [("a", 1)]).unwrap();
    assert_eq!(entity.version(), Some(3));
    assert_eq!(entity.record().data["$VERSION"], serde_json::json!(3));
}
