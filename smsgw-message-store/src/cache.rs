//! Per-batch cache: message keys, address sets, status counters and
//! match-query results.
//!
//! # Layout
//!
//! Every key lives under `<prefix>:batches:<batch_id>:`:
//!
//! ```text
//! outbound, inbound              sorted sets of message keys, scored by timestamp
//! outbound_count, inbound_count  counters of every message ever added
//! outbound_seen, inbound_seen    sets of message keys already counted
//! to_addr, from_addr             sets of addresses seen
//! status                         hash of event counters (sent, ack, nack, ...)
//! event_keys                     set of event keys already counted
//! query:<token>                  sorted set of match results
//! query:<token>:in_progress      flag while a match query runs
//! ```
//!
//! The sorted key sets are trimmed to the newest
//! `truncate_message_key_count_at` members, after which a batch is counted
//! rather than listed. The `*_seen` and `event_keys` sets are not trimmed:
//! they hold one member per message or event of the batch so a repeated
//! write is never counted twice. [`crate::MessageStore::reconcile_cache`]
//! rebuilds everything from the indexes.

use crate::error::MessageStoreResult;
use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use sha2::{Digest, Sha256};
use smsgw_storage::{CacheStore, MatchRule, StorageError};
use smsgw_types::{EventType, TransportEvent, TransportUserMessage};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Status counters present for every started batch.
pub const STATUS_FIELDS: [&str; 7] = [
    "sent",
    "ack",
    "nack",
    "delivery_report",
    "delivery_report.pending",
    "delivery_report.failed",
    "delivery_report.delivered",
];

/// Inbound or outbound traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    /// The set of addresses counted for this direction.
    const fn address_key(&self) -> &'static str {
        match self {
            Self::Inbound => "from_addr",
            Self::Outbound => "to_addr",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sorted-set score for a timestamp: seconds since the epoch, with
/// microseconds in the fraction.
#[must_use]
pub fn timestamp_score(timestamp: &NaiveDateTime) -> f64 {
    timestamp.and_utc().timestamp_micros() as f64 / 1_000_000.0
}

fn score_timestamp(score: f64) -> MessageStoreResult<NaiveDateTime> {
    DateTime::from_timestamp_micros((score * 1_000_000.0).round() as i64)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| StorageError::Cache(format!("score {score} is not a timestamp")).into())
}

fn parse_count(key: &str, raw: &str) -> MessageStoreResult<i64> {
    raw.parse()
        .map_err(|_| StorageError::Cache(format!("{key} holds non-integer {raw:?}")).into())
}

/// Token identifying a match query. Identical queries share a token.
#[must_use]
pub fn query_token(direction: Direction, rules: &[MatchRule]) -> String {
    #[derive(Serialize)]
    struct Query<'a> {
        direction: Direction,
        rules: &'a [MatchRule],
    }
    // Serializing a struct of strings cannot fail.
    let canonical = serde_json::to_vec(&Query { direction, rules }).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

/// Batch statistics kept in a [`CacheStore`].
#[derive(Clone)]
pub struct MessageStoreCache {
    store: Arc<dyn CacheStore>,
    prefix: String,
    truncate_at: usize,
}

impl fmt::Debug for MessageStoreCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStoreCache")
            .field("prefix", &self.prefix)
            .field("truncate_at", &self.truncate_at)
            .finish_non_exhaustive()
    }
}

impl MessageStoreCache {
    pub fn new(store: Arc<dyn CacheStore>, prefix: &str, truncate_at: usize) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            truncate_at,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    #[must_use]
    pub fn truncate_at(&self) -> usize {
        self.truncate_at
    }

    fn batch_key(&self, batch_id: &str, part: &str) -> String {
        format!("{}:batches:{batch_id}:{part}", self.prefix)
    }

    fn keys_key(&self, batch_id: &str, direction: Direction) -> String {
        self.batch_key(batch_id, direction.as_str())
    }

    fn count_key(&self, batch_id: &str, direction: Direction) -> String {
        self.batch_key(batch_id, &format!("{direction}_count"))
    }

    fn seen_key(&self, batch_id: &str, direction: Direction) -> String {
        self.batch_key(batch_id, &format!("{direction}_seen"))
    }

    fn query_key(&self, batch_id: &str, token: &str) -> String {
        self.batch_key(batch_id, &format!("query:{token}"))
    }

    fn in_progress_key(&self, batch_id: &str, token: &str) -> String {
        self.batch_key(batch_id, &format!("query:{token}:in_progress"))
    }

    // ── Batch lifecycle ──────────────────────────────────────────

    /// Initialises every status counter to zero.
    pub async fn batch_start(&self, batch_id: &str) -> MessageStoreResult<()> {
        let status = self.batch_key(batch_id, "status");
        for field in STATUS_FIELDS {
            self.store.hset(&status, field, "0").await?;
        }
        debug!(batch_id, "cache batch started");
        Ok(())
    }

    /// Removes every cache key of the batch, query results included.
    pub async fn clear_batch(&self, batch_id: &str) -> MessageStoreResult<()> {
        let prefix = self.batch_key(batch_id, "");
        let keys = self.store.keys(&prefix).await?;
        for key in &keys {
            self.store.delete(key).await?;
        }
        debug!(batch_id, removed = keys.len(), "cache batch cleared");
        Ok(())
    }

    // ── Messages ─────────────────────────────────────────────────

    pub async fn add_outbound_message(
        &self,
        batch_id: &str,
        msg: &TransportUserMessage,
    ) -> MessageStoreResult<()> {
        self.add_message_key(batch_id, Direction::Outbound, &msg.message_id, &msg.timestamp)
            .await?;
        self.add_address(batch_id, Direction::Outbound, &msg.to_addr)
            .await
    }

    pub async fn add_inbound_message(
        &self,
        batch_id: &str,
        msg: &TransportUserMessage,
    ) -> MessageStoreResult<()> {
        self.add_message_key(batch_id, Direction::Inbound, &msg.message_id, &msg.timestamp)
            .await?;
        self.add_address(batch_id, Direction::Inbound, &msg.from_addr)
            .await
    }

    /// Records a message key. Returns false if the key was counted before,
    /// even if it has since been trimmed from the listing. No counter moves
    /// then. New outbound keys count as `sent`.
    pub async fn add_message_key(
        &self,
        batch_id: &str,
        direction: Direction,
        key: &str,
        timestamp: &NaiveDateTime,
    ) -> MessageStoreResult<bool> {
        if !self.mark_counted(batch_id, direction, key).await? {
            return Ok(false);
        }
        let keys = self.keys_key(batch_id, direction);
        self.store.zadd(&keys, key, timestamp_score(timestamp)).await?;
        self.store
            .incr_by(&self.count_key(batch_id, direction), 1)
            .await?;
        if direction == Direction::Outbound {
            self.increment_status(batch_id, "sent", 1).await?;
        }
        self.truncate_keys(&keys).await?;
        Ok(true)
    }

    /// Marks `key` as counted without listing it. Returns false if it
    /// already was.
    pub async fn mark_counted(
        &self,
        batch_id: &str,
        direction: Direction,
        key: &str,
    ) -> MessageStoreResult<bool> {
        Ok(self
            .store
            .sadd(&self.seen_key(batch_id, direction), key)
            .await?)
    }

    /// Counts `count` messages that are not listed individually.
    pub async fn add_message_count(
        &self,
        batch_id: &str,
        direction: Direction,
        count: u64,
    ) -> MessageStoreResult<()> {
        if count == 0 {
            return Ok(());
        }
        let count = i64::try_from(count)
            .map_err(|_| StorageError::Cache(format!("message count {count} overflows")))?;
        self.store
            .incr_by(&self.count_key(batch_id, direction), count)
            .await?;
        if direction == Direction::Outbound {
            self.increment_status(batch_id, "sent", count).await?;
        }
        Ok(())
    }

    pub async fn add_address(
        &self,
        batch_id: &str,
        direction: Direction,
        address: &str,
    ) -> MessageStoreResult<()> {
        self.store
            .sadd(&self.batch_key(batch_id, direction.address_key()), address)
            .await?;
        Ok(())
    }

    async fn truncate_keys(&self, keys: &str) -> MessageStoreResult<()> {
        let cached = self.store.zcard(keys).await?;
        if cached > self.truncate_at {
            let excess = (cached - self.truncate_at) as i64;
            let removed = self.store.zrem_range_by_rank(keys, 0, excess - 1).await?;
            debug!(key = keys, removed, "truncated cached message keys");
        }
        Ok(())
    }

    /// Total messages seen in one direction, listed or counted.
    pub async fn count_message_keys(
        &self,
        batch_id: &str,
        direction: Direction,
    ) -> MessageStoreResult<u64> {
        let key = self.count_key(batch_id, direction);
        match self.store.get(&key).await? {
            Some(raw) => Ok(parse_count(&key, &raw)?.max(0) as u64),
            None => Ok(0),
        }
    }

    /// Cached keys, newest first. `start` and `stop` are inclusive ranks;
    /// negative values count from the oldest end.
    pub async fn get_message_keys(
        &self,
        batch_id: &str,
        direction: Direction,
        start: i64,
        stop: i64,
    ) -> MessageStoreResult<Vec<String>> {
        let range = self
            .store
            .zrange(&self.keys_key(batch_id, direction), start, stop, true)
            .await?;
        Ok(range.into_iter().map(|(key, _)| key).collect())
    }

    pub async fn get_message_keys_with_timestamps(
        &self,
        batch_id: &str,
        direction: Direction,
        start: i64,
        stop: i64,
    ) -> MessageStoreResult<Vec<(String, NaiveDateTime)>> {
        self.store
            .zrange(&self.keys_key(batch_id, direction), start, stop, true)
            .await?
            .into_iter()
            .map(|(key, score)| Ok((key, score_timestamp(score)?)))
            .collect()
    }

    /// Cached timestamp of a message key, if still listed.
    pub async fn message_timestamp(
        &self,
        batch_id: &str,
        direction: Direction,
        key: &str,
    ) -> MessageStoreResult<Option<NaiveDateTime>> {
        match self
            .store
            .zscore(&self.keys_key(batch_id, direction), key)
            .await?
        {
            Some(score) => Ok(Some(score_timestamp(score)?)),
            None => Ok(None),
        }
    }

    pub async fn count_addresses(
        &self,
        batch_id: &str,
        direction: Direction,
    ) -> MessageStoreResult<usize> {
        Ok(self
            .store
            .scard(&self.batch_key(batch_id, direction.address_key()))
            .await?)
    }

    // ── Events ───────────────────────────────────────────────────

    /// Counts an event once per batch. Delivery reports bump both
    /// `delivery_report` and `delivery_report.<status>`.
    pub async fn add_event(&self, batch_id: &str, event: &TransportEvent) -> MessageStoreResult<bool> {
        let added = self
            .store
            .sadd(&self.batch_key(batch_id, "event_keys"), &event.event_id)
            .await?;
        if !added {
            return Ok(false);
        }
        self.increment_status(batch_id, event.event_type.as_str(), 1)
            .await?;
        if event.event_type == EventType::DeliveryReport && event.delivery_status.is_some() {
            self.increment_status(batch_id, &event.status(), 1).await?;
        }
        Ok(true)
    }

    /// Adds `count` to one status counter for events not replayed
    /// individually.
    pub async fn add_event_count(
        &self,
        batch_id: &str,
        status: &str,
        count: i64,
    ) -> MessageStoreResult<()> {
        self.increment_status(batch_id, status, count).await
    }

    async fn increment_status(&self, batch_id: &str, status: &str, by: i64) -> MessageStoreResult<()> {
        self.store
            .hincr_by(&self.batch_key(batch_id, "status"), status, by)
            .await?;
        Ok(())
    }

    /// Every status counter of the batch.
    pub async fn get_event_status(&self, batch_id: &str) -> MessageStoreResult<BTreeMap<String, i64>> {
        let key = self.batch_key(batch_id, "status");
        self.store
            .hgetall(&key)
            .await?
            .into_iter()
            .map(|(status, raw)| Ok((status, parse_count(&key, &raw)?)))
            .collect()
    }

    // ── Match-query results ──────────────────────────────────────

    /// Flags a query as running and returns its token.
    pub async fn start_query(
        &self,
        batch_id: &str,
        direction: Direction,
        rules: &[MatchRule],
    ) -> MessageStoreResult<String> {
        let token = query_token(direction, rules);
        self.store
            .set(&self.in_progress_key(batch_id, &token), "1")
            .await?;
        Ok(token)
    }

    /// Stores scored result keys under `token` and clears the in-progress
    /// flag. Results replace any earlier run of the same query.
    pub async fn store_query_results(
        &self,
        batch_id: &str,
        token: &str,
        results: &[(String, f64)],
        ttl: Duration,
    ) -> MessageStoreResult<()> {
        let key = self.query_key(batch_id, token);
        self.store.delete(&key).await?;
        for (member, score) in results {
            self.store.zadd(&key, member, *score).await?;
        }
        self.store.expire(&key, ttl).await?;
        self.store
            .delete(&self.in_progress_key(batch_id, token))
            .await?;
        Ok(())
    }

    /// Clears the in-progress flag without storing results.
    pub async fn abandon_query(&self, batch_id: &str, token: &str) -> MessageStoreResult<()> {
        self.store
            .delete(&self.in_progress_key(batch_id, token))
            .await?;
        Ok(())
    }

    pub async fn is_query_in_progress(&self, batch_id: &str, token: &str) -> MessageStoreResult<bool> {
        Ok(self
            .store
            .exists(&self.in_progress_key(batch_id, token))
            .await?)
    }

    /// Result keys by descending timestamp, or ascending when `asc`.
    pub async fn get_query_results(
        &self,
        batch_id: &str,
        token: &str,
        start: i64,
        stop: i64,
        asc: bool,
    ) -> MessageStoreResult<Vec<String>> {
        let range = self
            .store
            .zrange(&self.query_key(batch_id, token), start, stop, !asc)
            .await?;
        Ok(range.into_iter().map(|(key, _)| key).collect())
    }

    pub async fn count_query_results(&self, batch_id: &str, token: &str) -> MessageStoreResult<usize> {
        Ok(self.store.zcard(&self.query_key(batch_id, token)).await?)
    }
}

