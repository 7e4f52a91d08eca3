//! In-process backend.
//!
//! Behaves like the production store as far as the managers can observe:
//! secondary indexes (including the implicit `$bucket` index), paginated
//! index queries ordered by (term, key) with opaque continuations, regex
//! matching over an index range, and a minimal conjunctive `field:value`
//! search on search-enabled buckets.

use crate::backend::{
    BUCKET_INDEX, IndexEntry, IndexQuery, IndexRequest, IndexResponse, KvBackend, MatchRule,
    record_matches,
};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use smsgw_model::Record;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryState {
    buckets: BTreeMap<String, BTreeMap<String, Record>>,
    search_enabled: BTreeSet<String>,
}

/// A shareable in-memory store. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in `bucket`.
    pub async fn len(&self, bucket: &str) -> usize {
        self.state
            .read()
            .await
            .buckets
            .get(bucket)
            .map_or(0, BTreeMap::len)
    }

    /// Names of buckets holding at least one record.
    pub async fn bucket_names(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .buckets
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn encode_continuation(term: &str, key: &str) -> StorageResult<String> {
    let raw = serde_json::to_vec(&(term, key))?;
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

fn decode_continuation(token: &str) -> StorageResult<(String, String)> {
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| StorageError::InvalidContinuation(e.to_string()))?;
    serde_json::from_slice(&raw).map_err(|e| StorageError::InvalidContinuation(e.to_string()))
}

/// All (term, key) matches of `query` on `index`, sorted.
fn index_matches(
    state: &MemoryState,
    bucket: &str,
    index: &str,
    query: &IndexQuery,
) -> Vec<(String, String)> {
    let Some(records) = state.buckets.get(bucket) else {
        return Vec::new();
    };
    let mut matches: Vec<(String, String)> = if index == BUCKET_INDEX {
        if query.matches(bucket) {
            records
                .keys()
                .map(|key| (bucket.to_string(), key.clone()))
                .collect()
        } else {
            Vec::new()
        }
    } else {
        records
            .iter()
            .flat_map(|(key, record)| {
                record
                    .index_values(index)
                    .filter(|term| query.matches(term))
                    .map(|term| (term.to_string(), key.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    };
    matches.sort();
    matches.dedup();
    matches
}

/// One parsed `field:value` clause of a search query.
fn parse_search(query: &str) -> StorageResult<Vec<(String, String)>> {
    query
        .split(" AND ")
        .map(|clause| {
            let clause = clause.trim();
            let mut field = String::new();
            let mut chars = clause.chars();
            let mut found = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(next) = chars.next() {
                            field.push(next);
                        }
                    }
                    ':' => {
                        found = true;
                        break;
                    }
                    c => field.push(c),
                }
            }
            if !found || field.is_empty() {
                return Err(StorageError::Backend(format!(
                    "unsupported search clause {clause:?}"
                )));
            }
            let rest: String = chars.collect();
            let rest = rest
                .strip_prefix('"')
                .and_then(|r| r.strip_suffix('"'))
                .unwrap_or(&rest);
            let mut value = String::new();
            let mut chars = rest.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        value.push(next);
                    }
                } else {
                    value.push(c);
                }
            }
            Ok((field, value))
        })
        .collect()
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Option<Record>> {
        let state = self.state.read().await;
        Ok(state.buckets.get(bucket).and_then(|b| b.get(key)).cloned())
    }

    async fn put(&self, bucket: &str, key: &str, record: &Record) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if let Some(records) = state.buckets.get_mut(bucket) {
            records.remove(key);
        }
        Ok(())
    }

    async fn index_page(&self, request: &IndexRequest) -> StorageResult<IndexResponse> {
        let after = request
            .continuation
            .as_deref()
            .map(decode_continuation)
            .transpose()?;
        let state = self.state.read().await;
        let matches = index_matches(&state, &request.bucket, &request.index, &request.query);
        drop(state);

        let remaining: Vec<(String, String)> = match after {
            Some(after) => matches.into_iter().filter(|m| *m > after).collect(),
            None => matches,
        };
        let limit = request.max_results.unwrap_or(usize::MAX);
        let continuation = if remaining.len() > limit && limit > 0 {
            let (term, key) = &remaining[limit - 1];
            Some(encode_continuation(term, key)?)
        } else {
            None
        };
        let entries = remaining
            .into_iter()
            .take(limit)
            .map(|(term, key)| IndexEntry {
                key,
                term: request.return_terms.then_some(term),
            })
            .collect();
        debug!(bucket = %request.bucket, index = %request.index, "memory index page");
        Ok(IndexResponse {
            entries,
            continuation,
        })
    }

    async fn index_match(
        &self,
        bucket: &str,
        index: &str,
        query: &IndexQuery,
        rules: &[MatchRule],
    ) -> StorageResult<Vec<String>> {
        let compiled = rules
            .iter()
            .map(|rule| Ok((rule.clone(), rule.compile()?)))
            .collect::<StorageResult<Vec<_>>>()?;
        let state = self.state.read().await;
        let mut seen = BTreeSet::new();
        let mut keys = Vec::new();
        for (_, key) in index_matches(&state, bucket, index, query) {
            if !seen.insert(key.clone()) {
                continue;
            }
            let record = state.buckets.get(bucket).and_then(|b| b.get(&key));
            if record.is_some_and(|r| record_matches(r, &compiled)) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn search(&self, bucket: &str, query: &str) -> StorageResult<Vec<String>> {
        let clauses = parse_search(query)?;
        let state = self.state.read().await;
        if !state.search_enabled.contains(bucket) {
            return Err(StorageError::Backend(format!(
                "search is not enabled for bucket {bucket:?}"
            )));
        }
        let Some(records) = state.buckets.get(bucket) else {
            return Ok(Vec::new());
        };
        Ok(records
            .iter()
            .filter(|(_, record)| {
                clauses.iter().all(|(field, value)| match record.data.get(field) {
                    None | Some(serde_json::Value::Null) => false,
                    Some(_) if value == "*" => true,
                    Some(serde_json::Value::String(s)) => s == value,
                    Some(other) => other.to_string() == *value,
                })
            })
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn enable_search(&self, bucket: &str) -> StorageResult<()> {
        self.state
            .write()
            .await
            .search_enabled
            .insert(bucket.to_string());
        Ok(())
    }
}
