//! Fast key/structure store used for batch caches and query results.
//!
//! The [`CacheStore`] trait covers the subset of Redis commands the message
//! store needs: strings and counters, hashes, sets and sorted sets, each key
//! optionally expiring. [`MemoryCacheStore`] implements it in process.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A Redis-like structure store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    // Strings
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    /// Adds `by` to the integer at `key` (missing counts as 0).
    async fn incr_by(&self, key: &str, by: i64) -> StorageResult<i64>;
    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;
    async fn exists(&self, key: &str) -> StorageResult<bool>;
    /// Sets a time to live on an existing key. Returns false if missing.
    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool>;

    // Hashes
    async fn hget(&self, key: &str, field: &str) -> StorageResult<Option<String>>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> StorageResult<()>;
    async fn hincr_by(&self, key: &str, field: &str, by: i64) -> StorageResult<i64>;
    async fn hgetall(&self, key: &str) -> StorageResult<BTreeMap<String, String>>;

    // Sets
    /// Returns true if the member was added.
    async fn sadd(&self, key: &str, member: &str) -> StorageResult<bool>;
    async fn scard(&self, key: &str) -> StorageResult<usize>;
    async fn sismember(&self, key: &str, member: &str) -> StorageResult<bool>;
    async fn smembers(&self, key: &str) -> StorageResult<BTreeSet<String>>;

    // Sorted sets
    /// Adds or rescores a member. Returns true if the member was new.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StorageResult<bool>;
    async fn zcard(&self, key: &str) -> StorageResult<usize>;
    async fn zscore(&self, key: &str, member: &str) -> StorageResult<Option<f64>>;
    /// Members by rank, ascending by (score, member) or descending when
    /// `desc`. `start` and `stop` are inclusive; negative values count
    /// from the end.
    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        desc: bool,
    ) -> StorageResult<Vec<(String, f64)>>;
    /// Removes members by ascending rank, inclusive. Returns the count.
    async fn zrem_range_by_rank(&self, key: &str, start: i64, stop: i64)
    -> StorageResult<usize>;

    /// Live keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

#[derive(Debug, Clone)]
enum CacheValue {
    Str(String),
    Hash(BTreeMap<String, String>),
    Set(BTreeSet<String>),
    Sorted(HashMap<String, f64>),
}

impl CacheValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Hash(_) => "hash",
            Self::Set(_) => "set",
            Self::Sorted(_) => "zset",
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CacheValue,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
}

impl CacheState {
    fn purge_expired(&mut self, key: &str) {
        let now = Instant::now();
        if self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now)
        {
            self.entries.remove(key);
        }
    }

    fn live(&mut self, key: &str) -> Option<&mut CacheEntry> {
        self.purge_expired(key);
        self.entries.get_mut(key)
    }

    fn entry_or(&mut self, key: &str, init: impl FnOnce() -> CacheValue) -> &mut CacheEntry {
        self.purge_expired(key);
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry {
                value: init(),
                expires_at: None,
            })
    }
}

fn wrong_type(key: &str, expected: &str, found: &CacheValue) -> StorageError {
    StorageError::Cache(format!(
        "WRONGTYPE {key} holds a {}, not a {expected}",
        found.type_name()
    ))
}

fn parse_int(key: &str, value: &str) -> StorageResult<i64> {
    value
        .parse()
        .map_err(|_| StorageError::Cache(format!("{key} does not hold an integer")))
}

/// Resolves Redis-style inclusive rank bounds against `len`.
fn rank_bounds(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = i64::try_from(len).ok()?;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(stop).ok()?))
}

fn sorted_members(members: &HashMap<String, f64>) -> Vec<(String, f64)> {
    let mut sorted: Vec<(String, f64)> = members.iter().map(|(m, s)| (m.clone(), *s)).collect();
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

/// In-process [`CacheStore`]. Clones share state; expiry is lazy.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    state: Arc<Mutex<CacheState>>,
}

impl MemoryCacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let mut state = self.state.lock().await;
        match state.live(key) {
            None => Ok(None),
            Some(CacheEntry {
                value: CacheValue::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(entry) => Err(wrong_type(key, "string", &entry.value)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value: CacheValue::Str(value.to_string()),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn incr_by(&self, key: &str, by: i64) -> StorageResult<i64> {
        let mut state = self.state.lock().await;
        let entry = state.entry_or(key, || CacheValue::Str("0".into()));
        match &mut entry.value {
            CacheValue::Str(s) => {
                let next = parse_int(key, s)? + by;
                *s = next.to_string();
                Ok(next)
            }
            other => Err(wrong_type(key, "string", other)),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        Ok(state.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let mut state = self.state.lock().await;
        Ok(state.live(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        let mut state = self.state.lock().await;
        match state.live(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> StorageResult<Option<String>> {
        let mut state = self.state.lock().await;
        match state.live(key) {
            None => Ok(None),
            Some(CacheEntry {
                value: CacheValue::Hash(h),
                ..
            }) => Ok(h.get(field).cloned()),
            Some(entry) => Err(wrong_type(key, "hash", &entry.value)),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        let entry = state.entry_or(key, || CacheValue::Hash(BTreeMap::new()));
        match &mut entry.value {
            CacheValue::Hash(h) => {
                h.insert(field.to_string(), value.to_string());
                Ok(())
            }
            other => Err(wrong_type(key, "hash", other)),
        }
    }

    async fn hincr_by(&self, key: &str, field: &str, by: i64) -> StorageResult<i64> {
        let mut state = self.state.lock().await;
        let entry = state.entry_or(key, || CacheValue::Hash(BTreeMap::new()));
        match &mut entry.value {
            CacheValue::Hash(h) => {
                let current = match h.get(field) {
                    Some(v) => parse_int(key, v)?,
                    None => 0,
                };
                let next = current + by;
                h.insert(field.to_string(), next.to_string());
                Ok(next)
            }
            other => Err(wrong_type(key, "hash", other)),
        }
    }

    async fn hgetall(&self, key: &str) -> StorageResult<BTreeMap<String, String>> {
        let mut state = self.state.lock().await;
        match state.live(key) {
            None => Ok(BTreeMap::new()),
            Some(CacheEntry {
                value: CacheValue::Hash(h),
                ..
            }) => Ok(h.clone()),
            Some(entry) => Err(wrong_type(key, "hash", &entry.value)),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> StorageResult<bool> {
        let mut state = self.state.lock().await;
        let entry = state.entry_or(key, || CacheValue::Set(BTreeSet::new()));
        match &mut entry.value {
            CacheValue::Set(s) => Ok(s.insert(member.to_string())),
            other => Err(wrong_type(key, "set", other)),
        }
    }

    async fn scard(&self, key: &str) -> StorageResult<usize> {
        Ok(self.smembers(key).await?.len())
    }

    async fn sismember(&self, key: &str, member: &str) -> StorageResult<bool> {
        let mut state = self.state.lock().await;
        match state.live(key) {
            None => Ok(false),
            Some(CacheEntry {
                value: CacheValue::Set(s),
                ..
            }) => Ok(s.contains(member)),
            Some(entry) => Err(wrong_type(key, "set", &entry.value)),
        }
    }

    async fn smembers(&self, key: &str) -> StorageResult<BTreeSet<String>> {
        let mut state = self.state.lock().await;
        match state.live(key) {
            None => Ok(BTreeSet::new()),
            Some(CacheEntry {
                value: CacheValue::Set(s),
                ..
            }) => Ok(s.clone()),
            Some(entry) => Err(wrong_type(key, "set", &entry.value)),
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StorageResult<bool> {
        let mut state = self.state.lock().await;
        let entry = state.entry_or(key, || CacheValue::Sorted(HashMap::new()));
        match &mut entry.value {
            CacheValue::Sorted(z) => Ok(z.insert(member.to_string(), score).is_none()),
            other => Err(wrong_type(key, "zset", other)),
        }
    }

    async fn zcard(&self, key: &str) -> StorageResult<usize> {
        let mut state = self.state.lock().await;
        match state.live(key) {
            None => Ok(0),
            Some(CacheEntry {
                value: CacheValue::Sorted(z),
                ..
            }) => Ok(z.len()),
            Some(entry) => Err(wrong_type(key, "zset", &entry.value)),
        }
    }

    async fn zscore(&self, key: &str, member: &str) -> StorageResult<Option<f64>> {
        let mut state = self.state.lock().await;
        match state.live(key) {
            None => Ok(None),
            Some(CacheEntry {
                value: CacheValue::Sorted(z),
                ..
            }) => Ok(z.get(member).copied()),
            Some(entry) => Err(wrong_type(key, "zset", &entry.value)),
        }
    }

    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        desc: bool,
    ) -> StorageResult<Vec<(String, f64)>> {
        let mut state = self.state.lock().await;
        let mut sorted = match state.live(key) {
            None => return Ok(Vec::new()),
            Some(CacheEntry {
                value: CacheValue::Sorted(z),
                ..
            }) => sorted_members(z),
            Some(entry) => return Err(wrong_type(key, "zset", &entry.value)),
        };
        if desc {
            sorted.reverse();
        }
        Ok(match rank_bounds(start, stop, sorted.len()) {
            Some((from, to)) => sorted.drain(from..=to).collect(),
            None => Vec::new(),
        })
    }

    async fn zrem_range_by_rank(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> StorageResult<usize> {
        let mut state = self.state.lock().await;
        let z = match state.live(key) {
            None => return Ok(0),
            Some(CacheEntry {
                value: CacheValue::Sorted(z),
                ..
            }) => z,
            Some(entry) => return Err(wrong_type(key, "zset", &entry.value)),
        };
        let sorted = sorted_members(z);
        let Some((from, to)) = rank_bounds(start, stop, sorted.len()) else {
            return Ok(0);
        };
        for (member, _) in &sorted[from..=to] {
            z.remove(member);
        }
        Ok(to - from + 1)
    }

    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state
            .entries
            .retain(|_, e| e.expires_at.is_none_or(|at| at > now));
        let mut keys: Vec<String> = state
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
