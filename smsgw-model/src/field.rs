//! Field definitions: validation, wire encoding and index derivation.
//!
//! Every field owns a slice of its record's flat data map and, when
//! indexed, every entry of one secondary index:
//!
//! | kind              | physical keys                 | index entries          |
//! |-------------------|-------------------------------|------------------------|
//! | scalar, json      | `<name>`                      | one, unless null       |
//! | embedded message  | `<name>.<attribute>`          | none                   |
//! | dynamic           | `<prefix><entry>`             | none                   |
//! | list              | `<name>.<position>`           | one per element        |
//! | set               | `<name>.<member>`             | one per member         |
//! | foreign key       | `<name>` (key or null)        | one, unless null       |
//! | many-to-many      | `<name>` (sorted key list)    | one per key            |
//!
//! Null values never produce index entries, and asking for the index value
//! of null is a validation error.

use crate::value::{Record, Tag, Value};
use crate::{ModelError, ModelResult};
use serde_json::{Map, Value as Json};
use smsgw_types::{format_timestamp, parse_timestamp};
use std::collections::BTreeMap;

/// Width of the zero-padded position suffix of list element keys.
const LIST_POSITION_WIDTH: usize = 6;

/// The type of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Integer { min: Option<i64>, max: Option<i64> },
    Boolean,
    Text { max_length: Option<usize> },
    Timestamp,
    Tag,
    Json,
    /// A transport message flattened into the record. Only payloads whose
    /// `message_type` matches are accepted.
    EmbeddedMessage { message_type: String },
    /// An open string-keyed map of `value` entries.
    Dynamic { prefix: Option<String>, value: Box<FieldKind> },
    ListOf(Box<FieldKind>),
    SetOf(Box<FieldKind>),
    ForeignKey { target: String },
    ManyToMany { target: String },
}

impl FieldKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Integer { .. } => "integer",
            Self::Boolean => "boolean",
            Self::Text { .. } => "text",
            Self::Timestamp => "timestamp",
            Self::Tag => "tag",
            Self::Json => "json",
            Self::EmbeddedMessage { .. } => "embedded message",
            Self::Dynamic { .. } => "dynamic",
            Self::ListOf(_) => "list",
            Self::SetOf(_) => "set",
            Self::ForeignKey { .. } => "foreign key",
            Self::ManyToMany { .. } => "many-to-many",
        }
    }

    /// Scalars have a single value with a canonical index string.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Integer { .. } | Self::Boolean | Self::Text { .. } | Self::Timestamp | Self::Tag
        )
    }

    #[must_use]
    pub fn is_relation(&self) -> bool {
        matches!(self, Self::ForeignKey { .. } | Self::ManyToMany { .. })
    }

    /// Validates a non-null element value.
    fn validate_element(&self, field: &str, value: &Value) -> ModelResult<()> {
        let mismatch = || {
            ModelError::validation(format!(
                "{field}: expected {}, got {}",
                self.name(),
                value.kind_name()
            ))
        };
        match (self, value) {
            (Self::Integer { min, max }, Value::Int(v)) => {
                if let Some(min) = min {
                    if v < min {
                        return Err(ModelError::validation(format!(
                            "{field}: value {v} is less than the minimum {min}"
                        )));
                    }
                }
                if let Some(max) = max {
                    if v > max {
                        return Err(ModelError::validation(format!(
                            "{field}: value {v} is greater than the maximum {max}"
                        )));
                    }
                }
                Ok(())
            }
            (Self::Boolean, Value::Bool(_)) | (Self::Timestamp, Value::Timestamp(_)) => Ok(()),
            (Self::Text { max_length }, Value::Text(s)) => match max_length {
                Some(max) if s.chars().count() > *max => Err(ModelError::validation(format!(
                    "{field}: text longer than {max} characters"
                ))),
                _ => Ok(()),
            },
            (Self::Tag, Value::Tag(_)) | (Self::Json, Value::Json(_)) => Ok(()),
            _ => Err(mismatch()),
        }
    }

    fn encode_element(&self, value: &Value) -> Json {
        match value {
            Value::Null => Json::Null,
            Value::Int(v) => Json::from(*v),
            Value::Bool(v) => Json::Bool(*v),
            Value::Text(v) => Json::String(v.clone()),
            Value::Timestamp(ts) => Json::String(format_timestamp(ts)),
            Value::Tag(tag) => Json::Array(vec![
                Json::String(tag.pool.clone()),
                Json::String(tag.tag.clone()),
            ]),
            Value::Json(v) => v.clone(),
            Value::List(items) => Json::Array(items.iter().map(|v| self.encode_element(v)).collect()),
            Value::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.encode_element(v)))
                    .collect(),
            ),
        }
    }

    fn decode_element(&self, field: &str, raw: &Json) -> ModelResult<Value> {
        let bad = || {
            ModelError::validation(format!(
                "{field}: stored value {raw} is not a valid {}",
                self.name()
            ))
        };
        if raw.is_null() {
            return Ok(Value::Null);
        }
        match self {
            Self::Integer { .. } => raw.as_i64().map(Value::Int).ok_or_else(bad),
            Self::Boolean => raw.as_bool().map(Value::Bool).ok_or_else(bad),
            Self::Text { .. } => raw
                .as_str()
                .map(|s| Value::Text(s.to_string()))
                .ok_or_else(bad),
            Self::Timestamp => {
                let s = raw.as_str().ok_or_else(bad)?;
                Ok(Value::Timestamp(parse_timestamp(s)?))
            }
            Self::Tag => match raw.as_array().map(Vec::as_slice) {
                Some([Json::String(pool), Json::String(tag)]) => Ok(Value::Tag(Tag::new(pool, tag))),
                _ => Err(bad()),
            },
            Self::Json => Ok(Value::Json(raw.clone())),
            _ => Err(bad()),
        }
    }

    /// Canonical index string of a non-null scalar value.
    fn index_string(&self, field: &str, value: &Value) -> ModelResult<String> {
        match value {
            Value::Int(v) => Ok(v.to_string()),
            Value::Bool(v) => Ok(v.to_string()),
            Value::Text(v) => Ok(v.clone()),
            Value::Timestamp(ts) => Ok(format_timestamp(ts)),
            Value::Tag(tag) => Ok(tag.flatten()),
            Value::Null => Err(ModelError::validation(format!(
                "{field}: null values are not indexed"
            ))),
            other => Err(ModelError::validation(format!(
                "{field}: {} values cannot be indexed",
                other.kind_name()
            ))),
        }
    }
}

/// Default value of a field: a literal or a factory called per entity.
#[derive(Debug, Clone)]
pub enum FieldDefault {
    Value(Value),
    Factory(fn() -> Value),
}

impl FieldDefault {
    fn produce(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Factory(f) => f(),
        }
    }
}

/// A named, typed attribute of a model.
///
/// Fields are built with the shorthand constructors and chained modifiers,
/// then named when added to a schema:
///
/// ```
/// use smsgw_model::Field;
///
/// let age = Field::integer().min(0).max(150).nullable().indexed();
/// let batches = Field::many_to_many("Batch");
/// ```
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    kind: FieldKind,
    nullable: bool,
    default: Option<FieldDefault>,
    indexed: bool,
    index: Option<String>,
    backlink: Option<String>,
}

impl Field {
    /// Builds an unnamed field of `kind`.
    #[must_use]
    pub fn new(kind: FieldKind) -> Self {
        let indexed = kind.is_relation();
        Self {
            name: String::new(),
            kind,
            nullable: false,
            default: None,
            indexed,
            index: None,
            backlink: None,
        }
    }

    #[must_use]
    pub fn integer() -> Self {
        Self::new(FieldKind::Integer {
            min: None,
            max: None,
        })
    }

    #[must_use]
    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    #[must_use]
    pub fn text() -> Self {
        Self::new(FieldKind::Text { max_length: None })
    }

    #[must_use]
    pub fn timestamp() -> Self {
        Self::new(FieldKind::Timestamp)
    }

    #[must_use]
    pub fn tag() -> Self {
        Self::new(FieldKind::Tag)
    }

    #[must_use]
    pub fn json() -> Self {
        Self::new(FieldKind::Json)
    }

    /// An embedded transport message of the given `message_type`.
    #[must_use]
    pub fn message(message_type: &str) -> Self {
        Self::new(FieldKind::EmbeddedMessage {
            message_type: message_type.to_string(),
        })
    }

    /// An open map whose entries are `value` fields.
    #[must_use]
    pub fn dynamic(value: Field) -> Self {
        Self::new(FieldKind::Dynamic {
            prefix: None,
            value: Box::new(value.kind),
        })
    }

    #[must_use]
    pub fn list_of(element: Field) -> Self {
        Self::new(FieldKind::ListOf(Box::new(element.kind)))
    }

    #[must_use]
    pub fn set_of(element: Field) -> Self {
        Self::new(FieldKind::SetOf(Box::new(element.kind)))
    }

    /// A reference to one entity of the model named `target`.
    #[must_use]
    pub fn foreign_key(target: &str) -> Self {
        Self::new(FieldKind::ForeignKey {
            target: target.to_string(),
        })
    }

    /// References to any number of entities of the model named `target`.
    #[must_use]
    pub fn many_to_many(target: &str) -> Self {
        Self::new(FieldKind::ManyToMany {
            target: target.to_string(),
        })
    }

    #[must_use]
    pub fn min(mut self, min: i64) -> Self {
        if let FieldKind::Integer { min: m, .. } = &mut self.kind {
            *m = Some(min);
        }
        self
    }

    #[must_use]
    pub fn max(mut self, max: i64) -> Self {
        if let FieldKind::Integer { max: m, .. } = &mut self.kind {
            *m = Some(max);
        }
        self
    }

    #[must_use]
    pub fn max_length(mut self, max_length: usize) -> Self {
        if let FieldKind::Text { max_length: m } = &mut self.kind {
            *m = Some(max_length);
        }
        self
    }

    /// Physical key prefix of a dynamic field (default `<name>.`).
    #[must_use]
    pub fn prefix(mut self, prefix: &str) -> Self {
        if let FieldKind::Dynamic { prefix: p, .. } = &mut self.kind {
            *p = Some(prefix.to_string());
        }
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(FieldDefault::Value(value.into()));
        self
    }

    /// Default produced by calling `factory` for every new entity.
    #[must_use]
    pub fn default_with(mut self, factory: fn() -> Value) -> Self {
        self.default = Some(FieldDefault::Factory(factory));
        self
    }

    /// Indexes the field under `<name>_bin`.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    #[must_use]
    pub fn index_name(mut self, index: &str) -> Self {
        self.indexed = true;
        self.index = Some(index.to_string());
        self
    }

    /// Name of the reverse lookup registered on the target model.
    #[must_use]
    pub fn backlink(mut self, name: &str) -> Self {
        self.backlink = Some(name.to_string());
        self
    }

    pub(crate) fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        if self.indexed && self.index.is_none() {
            self.index = Some(format!("{name}_bin"));
        }
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Name of the secondary index, if the field is indexed.
    #[must_use]
    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    #[must_use]
    pub fn backlink_name(&self) -> Option<&str> {
        self.backlink.as_deref()
    }

    /// Target model of a relation field.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::ForeignKey { target } | FieldKind::ManyToMany { target } => Some(target),
            _ => None,
        }
    }

    /// Prefix of the physical keys owned by a multi-key field.
    #[must_use]
    pub fn physical_prefix(&self) -> Option<String> {
        match &self.kind {
            FieldKind::Dynamic {
                prefix: Some(prefix),
                ..
            } => Some(prefix.clone()),
            FieldKind::Dynamic { .. }
            | FieldKind::EmbeddedMessage { .. }
            | FieldKind::ListOf(_)
            | FieldKind::SetOf(_) => Some(format!("{}.", self.name)),
            _ => None,
        }
    }

    /// Value given to a new entity when none is supplied. `None` means the
    /// field is required.
    #[must_use]
    pub fn initial_value(&self) -> Option<Value> {
        if let Some(default) = &self.default {
            return Some(default.produce());
        }
        match &self.kind {
            FieldKind::Dynamic { .. } => Some(Value::Map(BTreeMap::new())),
            FieldKind::ListOf(_) | FieldKind::SetOf(_) | FieldKind::ManyToMany { .. } => {
                Some(Value::List(Vec::new()))
            }
            _ if self.nullable => Some(Value::Null),
            _ => None,
        }
    }

    /// Checks a field definition once its name is known.
    pub(crate) fn check_definition(&self, model: &str) -> ModelResult<()> {
        let name = &self.name;
        if name.is_empty() || name.contains('.') || name.starts_with('$') {
            return Err(ModelError::schema(format!(
                "{model}: invalid field name {name:?}"
            )));
        }
        let element = match &self.kind {
            FieldKind::Dynamic { value, .. } => Some(value.as_ref()),
            FieldKind::ListOf(element) => Some(element.as_ref()),
            FieldKind::SetOf(element) => {
                if !element.is_scalar() {
                    return Err(ModelError::schema(format!(
                        "{model}.{name}: set members must be scalar, not {}",
                        element.name()
                    )));
                }
                Some(element.as_ref())
            }
            _ => None,
        };
        if let Some(element) = element {
            if !element.is_scalar() && *element != FieldKind::Json {
                return Err(ModelError::schema(format!(
                    "{model}.{name}: collections cannot contain {} values",
                    element.name()
                )));
            }
        }
        if self.indexed {
            let indexable = match &self.kind {
                FieldKind::ListOf(element) | FieldKind::SetOf(element) => element.is_scalar(),
                kind => kind.is_scalar() || kind.is_relation(),
            };
            if !indexable {
                return Err(ModelError::schema(format!(
                    "{model}.{name}: {} fields cannot be indexed",
                    self.kind.name()
                )));
            }
        }
        if let Some(default) = &self.default {
            self.validate(&default.produce()).map_err(|e| {
                ModelError::schema(format!("{model}.{name}: invalid default: {e}"))
            })?;
        }
        Ok(())
    }

    /// Validates `value` and returns its canonical form: sets and key lists
    /// sorted and de-duplicated, JSON null folded into `Null`.
    pub fn validate(&self, value: &Value) -> ModelResult<Value> {
        let name = self.name.as_str();
        if matches!(value, Value::Null | Value::Json(Json::Null)) {
            return match &self.kind {
                FieldKind::Dynamic { .. }
                | FieldKind::ListOf(_)
                | FieldKind::SetOf(_)
                | FieldKind::ManyToMany { .. } => Err(ModelError::validation(format!(
                    "{name}: {} fields cannot be null",
                    self.kind.name()
                ))),
                _ if self.nullable => Ok(Value::Null),
                _ => Err(ModelError::validation(format!("{name}: value may not be null"))),
            };
        }
        match &self.kind {
            FieldKind::EmbeddedMessage { message_type } => {
                let payload = value.as_json().and_then(Json::as_object).ok_or_else(|| {
                    ModelError::validation(format!(
                        "{name}: expected a message object, got {}",
                        value.kind_name()
                    ))
                })?;
                match payload.get("message_type").and_then(Json::as_str) {
                    Some(t) if t == message_type => Ok(value.clone()),
                    other => Err(ModelError::validation(format!(
                        "{name}: expected message_type {message_type:?}, got {other:?}"
                    ))),
                }
            }
            FieldKind::Dynamic { value: kind, .. } => {
                let entries = value.as_map().ok_or_else(|| {
                    ModelError::validation(format!("{name}: expected a map, got {}", value.kind_name()))
                })?;
                for entry in entries.values() {
                    kind.validate_element(name, entry)?;
                }
                Ok(value.clone())
            }
            FieldKind::ListOf(kind) => {
                let items = self.expect_list(value)?;
                for item in items {
                    kind.validate_element(name, item)?;
                }
                Ok(value.clone())
            }
            FieldKind::SetOf(kind) => {
                let items = self.expect_list(value)?;
                let mut members = BTreeMap::new();
                for item in items {
                    kind.validate_element(name, item)?;
                    members.insert(kind.index_string(name, item)?, item.clone());
                }
                Ok(Value::List(members.into_values().collect()))
            }
            FieldKind::ForeignKey { .. } => match value {
                Value::Text(_) => Ok(value.clone()),
                other => Err(ModelError::validation(format!(
                    "{name}: expected a key, got {}",
                    other.kind_name()
                ))),
            },
            FieldKind::ManyToMany { .. } => {
                let mut keys = Vec::new();
                for item in self.expect_list(value)? {
                    match item {
                        Value::Text(key) => keys.push(key.clone()),
                        other => {
                            return Err(ModelError::validation(format!(
                                "{name}: expected a key, got {}",
                                other.kind_name()
                            )));
                        }
                    }
                }
                keys.sort();
                keys.dedup();
                Ok(Value::from(keys))
            }
            kind => {
                kind.validate_element(name, value)?;
                Ok(value.clone())
            }
        }
    }

    fn expect_list<'a>(&self, value: &'a Value) -> ModelResult<&'a [Value]> {
        value.as_list().ok_or_else(|| {
            ModelError::validation(format!(
                "{}: expected a list, got {}",
                self.name,
                value.kind_name()
            ))
        })
    }

    /// Removes every physical key and index entry owned by this field.
    pub fn clear(&self, record: &mut Record) {
        match self.physical_prefix() {
            Some(prefix) => record.data.retain(|k, _| !k.starts_with(&prefix)),
            None => {
                record.data.remove(&self.name);
            }
        }
        if let Some(index) = &self.index {
            record.remove_index(index);
        }
    }

    /// Writes an already validated value into `record`. The field's previous
    /// keys must have been cleared.
    pub(crate) fn write(&self, value: &Value, record: &mut Record) -> ModelResult<()> {
        let name = self.name.as_str();
        match (&self.kind, value) {
            (FieldKind::EmbeddedMessage { .. }, Value::Json(Json::Object(payload))) => {
                for (attr, v) in payload {
                    record.data.insert(format!("{name}.{attr}"), v.clone());
                }
            }
            (FieldKind::EmbeddedMessage { .. }, _) => {}
            (FieldKind::Dynamic { .. }, Value::Map(entries)) => {
                for (entry, v) in entries {
                    self.write_entry(entry, v, record)?;
                }
            }
            (FieldKind::ListOf(_), Value::List(items)) => {
                for (position, item) in items.iter().enumerate() {
                    self.write_list_item(position, item, record)?;
                }
            }
            (FieldKind::SetOf(_), Value::List(items)) => {
                for item in items {
                    self.write_member(item, record)?;
                }
            }
            (FieldKind::ManyToMany { .. }, Value::List(keys)) => {
                let keys: Vec<Json> = keys.iter().map(|k| self.kind.encode_element(k)).collect();
                if let Some(index) = &self.index {
                    for key in &keys {
                        if let Some(key) = key.as_str() {
                            record.add_index(index.clone(), key);
                        }
                    }
                }
                record.data.insert(name.to_string(), Json::Array(keys));
            }
            (kind, value) => {
                record
                    .data
                    .insert(name.to_string(), kind.encode_element(value));
                if let (Some(index), false) = (&self.index, value.is_null()) {
                    record.add_index(index.clone(), kind.index_string(name, value)?);
                }
            }
        }
        Ok(())
    }

    /// Encodes a value into a fresh record.
    pub fn encode(&self, value: &Value) -> ModelResult<Record> {
        let value = self.validate(value)?;
        let mut record = Record::new();
        self.write(&value, &mut record)?;
        Ok(record)
    }

    /// Reads this field's value back out of `record`.
    pub fn decode(&self, record: &Record) -> ModelResult<Value> {
        let name = self.name.as_str();
        match &self.kind {
            FieldKind::EmbeddedMessage { .. } => {
                let prefix = format!("{name}.");
                let payload: Map<String, Json> = record
                    .data
                    .iter()
                    .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|attr| (attr.to_string(), v.clone())))
                    .collect();
                if payload.is_empty() {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Json(Json::Object(payload)))
                }
            }
            FieldKind::Dynamic { value: kind, .. } => {
                let prefix = self.physical_prefix().unwrap_or_default();
                let mut entries = BTreeMap::new();
                for (k, raw) in &record.data {
                    if let Some(entry) = k.strip_prefix(&prefix) {
                        entries.insert(entry.to_string(), kind.decode_element(name, raw)?);
                    }
                }
                Ok(Value::Map(entries))
            }
            FieldKind::ListOf(kind) => {
                let prefix = format!("{name}.");
                let mut items = Vec::new();
                for (k, raw) in &record.data {
                    if let Some(position) = k.strip_prefix(&prefix) {
                        let position: usize = position.parse().map_err(|_| {
                            ModelError::validation(format!("{name}: bad list key {k:?}"))
                        })?;
                        items.push((position, kind.decode_element(name, raw)?));
                    }
                }
                items.sort_by_key(|(position, _)| *position);
                Ok(Value::List(items.into_iter().map(|(_, v)| v).collect()))
            }
            FieldKind::SetOf(kind) => {
                let prefix = format!("{name}.");
                let mut members = Vec::new();
                for (k, raw) in &record.data {
                    if k.starts_with(&prefix) {
                        members.push(kind.decode_element(name, raw)?);
                    }
                }
                Ok(Value::List(members))
            }
            FieldKind::ManyToMany { .. } => match record.data.get(name) {
                None | Some(Json::Null) => Ok(Value::List(Vec::new())),
                Some(Json::Array(keys)) => keys
                    .iter()
                    .map(|k| {
                        k.as_str().map(Value::from).ok_or_else(|| {
                            ModelError::validation(format!("{name}: stored key {k} is not text"))
                        })
                    })
                    .collect::<ModelResult<Vec<_>>>()
                    .map(Value::List),
                Some(other) => Err(ModelError::validation(format!(
                    "{name}: stored value {other} is not a key list"
                ))),
            },
            FieldKind::ForeignKey { .. } => match record.data.get(name) {
                None | Some(Json::Null) => Ok(Value::Null),
                Some(Json::String(key)) => Ok(Value::Text(key.clone())),
                Some(other) => Err(ModelError::validation(format!(
                    "{name}: stored value {other} is not a key"
                ))),
            },
            kind => match record.data.get(name) {
                None => Ok(Value::Null),
                Some(raw) => kind.decode_element(name, raw),
            },
        }
    }

    /// Rebuilds a relation field's data key from its index entries when the
    /// record predates storing relations in the data.
    pub(crate) fn clean(&self, record: &mut Record) {
        let Some(index) = &self.index else { return };
        if record.data.contains_key(&self.name) {
            return;
        }
        let keys: Vec<String> = record.index_values(index).map(str::to_string).collect();
        match &self.kind {
            FieldKind::ForeignKey { .. } => {
                let key = keys.into_iter().next().map_or(Json::Null, Json::String);
                record.data.insert(self.name.clone(), key);
            }
            FieldKind::ManyToMany { .. } => {
                let keys = keys.into_iter().map(Json::String).collect();
                record.data.insert(self.name.clone(), Json::Array(keys));
            }
            _ => {}
        }
    }

    /// The string to query this field's index with for `value`. Collection
    /// fields are queried by element.
    pub fn index_value(&self, value: &Value) -> ModelResult<String> {
        let name = self.name.as_str();
        if self.index.is_none() {
            return Err(ModelError::validation(format!("{name}: field is not indexed")));
        }
        let kind = match &self.kind {
            FieldKind::ListOf(element) | FieldKind::SetOf(element) => element.as_ref(),
            FieldKind::ForeignKey { .. } | FieldKind::ManyToMany { .. } => {
                return match value {
                    Value::Text(key) => Ok(key.clone()),
                    Value::Null => Err(ModelError::validation(format!(
                        "{name}: null values are not indexed"
                    ))),
                    other => Err(ModelError::validation(format!(
                        "{name}: expected a key, got {}",
                        other.kind_name()
                    ))),
                };
            }
            kind => kind,
        };
        if !value.is_null() {
            kind.validate_element(name, value)?;
        }
        kind.index_string(name, value)
    }

    // ── Single-entry mutation ────────────────────────────────────

    pub(crate) fn element_kind(&self) -> Option<&FieldKind> {
        match &self.kind {
            FieldKind::Dynamic { value, .. } => Some(value),
            FieldKind::ListOf(element) | FieldKind::SetOf(element) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn validate_item(&self, value: &Value) -> ModelResult<()> {
        match self.element_kind() {
            Some(kind) => kind.validate_element(&self.name, value),
            None => Err(ModelError::validation(format!(
                "{}: {} fields have no items",
                self.name,
                self.kind.name()
            ))),
        }
    }

    pub(crate) fn write_entry(&self, entry: &str, value: &Value, record: &mut Record) -> ModelResult<()> {
        let kind = self.element_kind().ok_or_else(|| self.not_a("dynamic"))?;
        let prefix = self.physical_prefix().unwrap_or_default();
        record
            .data
            .insert(format!("{prefix}{entry}"), kind.encode_element(value));
        Ok(())
    }

    pub(crate) fn remove_entry(&self, entry: &str, record: &mut Record) -> bool {
        let prefix = self.physical_prefix().unwrap_or_default();
        record.data.remove(&format!("{prefix}{entry}")).is_some()
    }

    pub(crate) fn write_list_item(&self, position: usize, value: &Value, record: &mut Record) -> ModelResult<()> {
        let kind = self.element_kind().ok_or_else(|| self.not_a("list"))?;
        record.data.insert(
            format!("{}.{:0width$}", self.name, position, width = LIST_POSITION_WIDTH),
            kind.encode_element(value),
        );
        if let Some(index) = &self.index {
            record.add_index(index.clone(), kind.index_string(&self.name, value)?);
        }
        Ok(())
    }

    /// Position the next appended list element will take.
    pub(crate) fn next_list_position(&self, record: &Record) -> usize {
        let prefix = format!("{}.", self.name);
        record
            .data
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|p| p.parse::<usize>().ok())
            .max()
            .map_or(0, |p| p + 1)
    }

    pub(crate) fn member_key(&self, value: &Value) -> ModelResult<(String, String)> {
        let kind = self.element_kind().ok_or_else(|| self.not_a("set"))?;
        let member = kind.index_string(&self.name, value)?;
        Ok((format!("{}.{member}", self.name), member))
    }

    pub(crate) fn write_member(&self, value: &Value, record: &mut Record) -> ModelResult<()> {
        let kind = self.element_kind().ok_or_else(|| self.not_a("set"))?;
        let (key, member) = self.member_key(value)?;
        record.data.insert(key, kind.encode_element(value));
        if let Some(index) = &self.index {
            record.add_index(index.clone(), member);
        }
        Ok(())
    }

    fn not_a(&self, expected: &str) -> ModelError {
        ModelError::validation(format!(
            "{}: expected a {expected} field, found {}",
            self.name,
            self.kind.name()
        ))
    }
}
