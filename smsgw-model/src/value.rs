//! Logical field values and the physical record they are stored in.

use crate::error::{ModelError, ModelResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Key under which a record's schema version is stored.
pub const VERSION_KEY: &str = "$VERSION";

/// A (pool, tag) pair identifying a routing tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub pool: String,
    pub tag: String,
}

impl Tag {
    #[must_use]
    pub fn new(pool: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            tag: tag.into(),
        }
    }

    /// The flattened `pool:tag` form used for keys and index values.
    #[must_use]
    pub fn flatten(&self) -> String {
        format!("{}:{}", self.pool, self.tag)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pool, self.tag)
    }
}

impl<P: Into<String>, T: Into<String>> From<(P, T)> for Tag {
    fn from((pool, tag): (P, T)) -> Self {
        Self::new(pool, tag)
    }
}

/// The logical value of a field.
///
/// Collections use `List` (list and set fields, many-to-many keys) and `Map`
/// (dynamic fields). Embedded messages and JSON fields use `Json`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Bool(bool),
    Text(String),
    Timestamp(NaiveDateTime),
    Tag(Tag),
    Json(Json),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_tag(&self) -> Option<&Tag> {
        match self {
            Self::Tag(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&Json> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Converts a list of text values into owned strings, skipping anything
    /// that is not text.
    #[must_use]
    pub fn into_strings(self) -> Vec<String> {
        match self {
            Self::List(items) => items
                .into_iter()
                .filter_map(|v| match v {
                    Self::Text(s) => Some(s),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "integer",
            Self::Bool(_) => "boolean",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
            Self::Tag(_) => "tag",
            Self::Json(_) => "json",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Tag> for Value {
    fn from(v: Tag) -> Self {
        Self::Tag(v)
    }
}

impl From<Json> for Value {
    fn from(v: Json) -> Self {
        match v {
            Json::Null => Self::Null,
            other => Self::Json(other),
        }
    }
}

impl From<Map<String, Json>> for Value {
    fn from(v: Map<String, Json>) -> Self {
        Self::Json(Json::Object(v))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A record as it sits in the key-value store: a flat JSON object plus the
/// secondary index entries written alongside it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    pub data: Map<String, Json>,
    pub indexes: BTreeSet<(String, String)>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored schema version, or `None` for unversioned records. A
    /// malformed `$VERSION` also reads as `None`; migration goes through
    /// [`Record::stored_version`] instead.
    #[must_use]
    pub fn version(&self) -> Option<u32> {
        self.stored_version().ok().flatten()
    }

    /// The stored schema version. `Ok(None)` only when `$VERSION` is absent.
    pub fn stored_version(&self) -> ModelResult<Option<u32>> {
        let Some(raw) = self.data.get(VERSION_KEY) else {
            return Ok(None);
        };
        raw.as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| ModelError::Migration(format!("invalid {VERSION_KEY} {raw}")))
    }

    pub fn set_version(&mut self, version: Option<u32>) {
        match version {
            Some(v) => {
                self.data.insert(VERSION_KEY.to_string(), Json::from(v));
            }
            None => {
                self.data.remove(VERSION_KEY);
            }
        }
    }

    /// All values written under `index`.
    pub fn index_values<'a>(&'a self, index: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.indexes
            .iter()
            .filter(move |(name, _)| name == index)
            .map(|(_, value)| value.as_str())
    }

    pub fn add_index(&mut self, index: impl Into<String>, value: impl Into<String>) {
        self.indexes.insert((index.into(), value.into()));
    }

    pub fn remove_index(&mut self, index: &str) {
        self.indexes.retain(|(name, _)| name != index);
    }

    pub fn remove_index_value(&mut self, index: &str, value: &str) {
        self.indexes.retain(|(name, v)| !(name == index && v == value));
    }
}

/// Renders a version for messages, `unversioned` for `None`.
#[must_use]
pub fn version_label(version: Option<u32>) -> String {
    version.map_or_else(|| "unversioned".to_string(), |v| v.to_string())
}
