use crate::field::{Field, FieldKind};
use crate::migration::migrate_record;
use crate::schema::ModelSchema;
use crate::value::{Record, Value};
use crate::{ModelError, ModelResult};
use chrono::NaiveDateTime;
use serde_json::Value as Json;
use smsgw_types::WireMessage;
use std::collections::BTreeMap;
use std::sync::Arc;

/// An in-memory handle on one record of a model.
///
/// All mutation goes through the accessors below, which validate the value,
/// drop every physical key and index entry the field previously owned and
/// write the new ones. Nothing touches the store until the entity is
/// explicitly saved through a manager.
#[derive(Debug, Clone)]
pub struct Entity {
    schema: Arc<ModelSchema>,
    key: String,
    record: Record,
    migration_path: Vec<Option<u32>>,
}

impl Entity {
    pub(crate) fn from_parts(
        schema: Arc<ModelSchema>,
        key: &str,
        record: Record,
        migration_path: Vec<Option<u32>>,
    ) -> Self {
        Self {
            schema,
            key: key.to_string(),
            record,
            migration_path,
        }
    }

    /// Builds an entity from a stored record, migrating it to the schema's
    /// version and rebuilding relation data kept only in the indexes.
    pub fn from_stored(schema: Arc<ModelSchema>, key: &str, record: Record) -> ModelResult<Self> {
        let (mut record, path) =
            migrate_record(schema.name(), schema.migrator(), record, schema.version())?;
        for field in schema.fields() {
            if field.kind().is_relation() {
                field.clean(&mut record);
            }
        }
        Ok(Self::from_parts(schema, key, record, path))
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        self.schema.name()
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn record(&self) -> &Record {
        &self.record
    }

    #[must_use]
    pub fn into_record(self) -> Record {
        self.record
    }

    /// Version of the in-memory record.
    #[must_use]
    pub fn version(&self) -> Option<u32> {
        self.record.version()
    }

    /// Versions the record passed through while being loaded.
    #[must_use]
    pub fn migration_path(&self) -> &[Option<u32>] {
        &self.migration_path
    }

    #[must_use]
    pub fn was_migrated(&self) -> bool {
        !self.migration_path.is_empty()
    }

    fn field(&self, name: &str) -> ModelResult<Field> {
        self.schema.field(name).cloned()
    }

    pub fn get(&self, field: &str) -> ModelResult<Value> {
        self.schema.field(field)?.decode(&self.record)
    }

    /// Text value of `field`, `None` if null.
    pub fn get_text(&self, field: &str) -> ModelResult<Option<String>> {
        match self.get(field)? {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s)),
            other => Err(ModelError::validation(format!(
                "{field}: expected text, got {}",
                other.kind_name()
            ))),
        }
    }

    pub fn get_timestamp(&self, field: &str) -> ModelResult<Option<NaiveDateTime>> {
        match self.get(field)? {
            Value::Null => Ok(None),
            Value::Timestamp(ts) => Ok(Some(ts)),
            other => Err(ModelError::validation(format!(
                "{field}: expected a timestamp, got {}",
                other.kind_name()
            ))),
        }
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> ModelResult<()> {
        let field = self.field(field)?;
        let value = field.validate(&value.into())?;
        field.clear(&mut self.record);
        field.write(&value, &mut self.record)
    }

    // ── Embedded messages ────────────────────────────────────────

    /// Decodes an embedded message field.
    pub fn message<M: WireMessage>(&self, field: &str) -> ModelResult<Option<M>> {
        match self.get(field)? {
            Value::Null => Ok(None),
            Value::Json(Json::Object(payload)) => Ok(Some(M::from_payload(payload)?)),
            other => Err(ModelError::validation(format!(
                "{field}: expected a message, got {}",
                other.kind_name()
            ))),
        }
    }

    pub fn set_message<M: WireMessage>(&mut self, field: &str, message: &M) -> ModelResult<()> {
        self.set(field, message.to_payload()?)
    }

    // ── Lists ────────────────────────────────────────────────────

    /// Appends one element, writing only that element's key.
    pub fn append_item(&mut self, field: &str, value: impl Into<Value>) -> ModelResult<()> {
        let field = self.list_field(field)?;
        let value = value.into();
        field.validate_item(&value)?;
        let position = field.next_list_position(&self.record);
        field.write_list_item(position, &value, &mut self.record)
    }

    /// Removes the first element equal to `value`. Returns whether one was
    /// found.
    pub fn remove_item(&mut self, field: &str, value: &Value) -> ModelResult<bool> {
        let list = self.list_field(field)?;
        let mut items = match list.decode(&self.record)? {
            Value::List(items) => items,
            _ => Vec::new(),
        };
        let Some(position) = items.iter().position(|v| v == value) else {
            return Ok(false);
        };
        items.remove(position);
        self.set(field, Value::List(items))?;
        Ok(true)
    }

    fn list_field(&self, name: &str) -> ModelResult<Field> {
        let field = self.field(name)?;
        match field.kind() {
            FieldKind::ListOf(_) => Ok(field),
            other => Err(ModelError::validation(format!(
                "{name}: {} fields have no list items",
                other.name()
            ))),
        }
    }

    // ── Sets ─────────────────────────────────────────────────────

    /// Adds a member. Returns false if it was already present.
    pub fn add_member(&mut self, field: &str, value: impl Into<Value>) -> ModelResult<bool> {
        let field = self.set_field(field)?;
        let value = value.into();
        field.validate_item(&value)?;
        let (key, _) = field.member_key(&value)?;
        if self.record.data.contains_key(&key) {
            return Ok(false);
        }
        field.write_member(&value, &mut self.record)?;
        Ok(true)
    }

    pub fn remove_member(&mut self, field: &str, value: &Value) -> ModelResult<bool> {
        let field = self.set_field(field)?;
        let (key, member) = field.member_key(value)?;
        if self.record.data.remove(&key).is_none() {
            return Ok(false);
        }
        if let Some(index) = field.index() {
            self.record.remove_index_value(index, &member);
        }
        Ok(true)
    }

    fn set_field(&self, name: &str) -> ModelResult<Field> {
        let field = self.field(name)?;
        match field.kind() {
            FieldKind::SetOf(_) => Ok(field),
            other => Err(ModelError::validation(format!(
                "{name}: {} fields have no set members",
                other.name()
            ))),
        }
    }

    // ── Dynamic maps ─────────────────────────────────────────────

    pub fn entries(&self, field: &str) -> ModelResult<BTreeMap<String, Value>> {
        self.dynamic_field(field)?;
        match self.get(field)? {
            Value::Map(entries) => Ok(entries),
            _ => Ok(BTreeMap::new()),
        }
    }

    pub fn get_entry(&self, field: &str, entry: &str) -> ModelResult<Option<Value>> {
        Ok(self.entries(field)?.remove(entry))
    }

    /// Sets one entry, writing only that entry's key.
    pub fn set_entry(&mut self, field: &str, entry: &str, value: impl Into<Value>) -> ModelResult<()> {
        let field = self.dynamic_field(field)?;
        let value = value.into();
        field.validate_item(&value)?;
        field.write_entry(entry, &value, &mut self.record)
    }

    pub fn remove_entry(&mut self, field: &str, entry: &str) -> ModelResult<bool> {
        let field = self.dynamic_field(field)?;
        Ok(field.remove_entry(entry, &mut self.record))
    }

    fn dynamic_field(&self, name: &str) -> ModelResult<Field> {
        let field = self.field(name)?;
        match field.kind() {
            FieldKind::Dynamic { .. } => Ok(field),
            other => Err(ModelError::validation(format!(
                "{name}: {} fields have no entries",
                other.name()
            ))),
        }
    }

    // ── Relations ────────────────────────────────────────────────

    pub fn foreign_key(&self, field: &str) -> ModelResult<Option<String>> {
        self.relation_field(field, false)?;
        self.get_text(field)
    }

    pub fn set_foreign_key(&mut self, field: &str, key: Option<&str>) -> ModelResult<()> {
        self.relation_field(field, false)?;
        self.set(field, key.map(str::to_string))
    }

    /// Points a foreign key at `target`, which must be of the referenced
    /// model.
    pub fn set_related(&mut self, field: &str, target: &Entity) -> ModelResult<()> {
        self.check_target(field, target, false)?;
        self.set_foreign_key(field, Some(target.key()))
    }

    pub fn related_keys(&self, field: &str) -> ModelResult<Vec<String>> {
        self.relation_field(field, true)?;
        Ok(self.get(field)?.into_strings())
    }

    /// Adds a key to a many-to-many field. Returns false if already present.
    pub fn add_related_key(&mut self, field: &str, key: &str) -> ModelResult<bool> {
        let mut keys = self.related_keys(field)?;
        if keys.iter().any(|k| k == key) {
            return Ok(false);
        }
        keys.push(key.to_string());
        self.set(field, keys)?;
        Ok(true)
    }

    pub fn add_related(&mut self, field: &str, target: &Entity) -> ModelResult<bool> {
        self.check_target(field, target, true)?;
        self.add_related_key(field, target.key())
    }

    pub fn remove_related_key(&mut self, field: &str, key: &str) -> ModelResult<bool> {
        let mut keys = self.related_keys(field)?;
        let before = keys.len();
        keys.retain(|k| k != key);
        if keys.len() == before {
            return Ok(false);
        }
        self.set(field, keys)?;
        Ok(true)
    }

    pub fn clear_related(&mut self, field: &str) -> ModelResult<()> {
        self.relation_field(field, true)?;
        self.set(field, Value::List(Vec::new()))
    }

    fn relation_field(&self, name: &str, many: bool) -> ModelResult<Field> {
        let field = self.field(name)?;
        match (field.kind(), many) {
            (FieldKind::ForeignKey { .. }, false) | (FieldKind::ManyToMany { .. }, true) => Ok(field),
            (other, _) => Err(ModelError::validation(format!(
                "{name}: expected a {} field, found {}",
                if many { "many-to-many" } else { "foreign key" },
                other.name()
            ))),
        }
    }

    fn check_target(&self, field: &str, target: &Entity, many: bool) -> ModelResult<()> {
        let field = self.relation_field(field, many)?;
        match field.target() {
            Some(expected) if expected == target.model_name() => Ok(()),
            expected => Err(ModelError::validation(format!(
                "{}: expected a {} entity, got {}",
                field.name(),
                expected.unwrap_or("related"),
                target.model_name()
            ))),
        }
    }
}
