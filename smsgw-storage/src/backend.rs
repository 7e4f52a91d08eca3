//! Key-value backend abstraction.
//!
//! Defines the operations the managers need from an eventually-consistent
//! key-value store with secondary indexes, allowing them to work with any
//! backend (the in-process [`MemoryBackend`](crate::MemoryBackend) or the
//! Riak HTTP client).

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use regex_lite::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use smsgw_model::Record;

/// Implicit index holding every key of a bucket, queried with the bucket
/// name as value.
pub const BUCKET_INDEX: &str = "$bucket";

/// Exact or range match against one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexQuery {
    Exact { value: String },
    /// Inclusive at both ends.
    Range { start: String, end: String },
}

impl IndexQuery {
    #[must_use]
    pub fn exact(value: impl Into<String>) -> Self {
        Self::Exact {
            value: value.into(),
        }
    }

    #[must_use]
    pub fn range(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self::Range {
            start: start.into(),
            end: end.into(),
        }
    }

    #[must_use]
    pub fn matches(&self, term: &str) -> bool {
        match self {
            Self::Exact { value } => term == value,
            Self::Range { start, end } => term >= start.as_str() && term <= end.as_str(),
        }
    }
}

/// A paginated secondary index query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRequest {
    pub bucket: String,
    pub index: String,
    pub query: IndexQuery,
    /// `None` returns every match in one page.
    pub max_results: Option<usize>,
    pub continuation: Option<String>,
    /// Return the matched index value alongside each key.
    pub return_terms: bool,
}

/// One match of an index query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: String,
    /// The matched index value, present when terms were requested.
    pub term: Option<String>,
}

/// One page of index matches, ordered by (term, key).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexResponse {
    pub entries: Vec<IndexEntry>,
    /// Opaque token for the next page; `None` when exhausted.
    pub continuation: Option<String>,
}

/// A regex applied to one data key of each record in an index range.
/// Rules are OR-ed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRule {
    pub key: String,
    pub pattern: String,
    /// Regex flags; `i` makes the match case-insensitive.
    #[serde(default)]
    pub flags: String,
}

impl MatchRule {
    #[must_use]
    pub fn new(key: &str, pattern: &str, flags: &str) -> Self {
        Self {
            key: key.to_string(),
            pattern: pattern.to_string(),
            flags: flags.to_string(),
        }
    }

    /// Compiles the rule's pattern honouring `i`, `m` and `s` flags. `g`
    /// is accepted and ignored.
    pub fn compile(&self) -> StorageResult<Regex> {
        let mut builder = RegexBuilder::new(&self.pattern);
        for flag in self.flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'g' => {}
                other => {
                    return Err(StorageError::Backend(format!(
                        "unsupported regex flag {other:?} in rule for {:?}",
                        self.key
                    )));
                }
            }
        }
        builder
            .build()
            .map_err(|e| StorageError::Backend(format!("invalid pattern {:?}: {e}", self.pattern)))
    }
}

/// Returns true if any compiled rule matches `record`. Rules on keys the
/// record lacks, or holding null, never match.
pub(crate) fn record_matches(record: &Record, rules: &[(MatchRule, Regex)]) -> bool {
    rules.iter().any(|(rule, regex)| match record.data.get(&rule.key) {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::String(s)) => regex.is_match(s),
        Some(other) => regex.is_match(&other.to_string()),
    })
}

/// An indexed key-value store.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Fetches a record. Missing keys and tombstones yield `None`.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Option<Record>>;

    /// Writes a record and replaces its index entries.
    async fn put(&self, bucket: &str, key: &str, record: &Record) -> StorageResult<()>;

    /// Deletes a record. Deleting a missing key is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Runs one page of a secondary index query.
    async fn index_page(&self, request: &IndexRequest) -> StorageResult<IndexResponse>;

    /// Returns keys in the index range whose record matches any rule.
    async fn index_match(
        &self,
        bucket: &str,
        index: &str,
        query: &IndexQuery,
        rules: &[MatchRule],
    ) -> StorageResult<Vec<String>>;

    /// Runs a full-text query against a search-enabled bucket.
    async fn search(&self, bucket: &str, query: &str) -> StorageResult<Vec<String>>;

    /// Turns on full-text indexing for a bucket.
    async fn enable_search(&self, bucket: &str) -> StorageResult<()>;
}
