//! The message store: batches, messages and events over a [`Manager`], with
//! batch statistics in a [`MessageStoreCache`].

use crate::cache::{Direction, MessageStoreCache, timestamp_score};
use crate::config::MessageStoreConfig;
use crate::error::{MessageStoreError, MessageStoreResult};
use crate::index_page::{FormattedPage, IndexFormat};
use crate::models::{
    BATCH, CURRENT_TAG, EVENT, INBOUND_MESSAGE, INDEX_SEPARATOR, OUTBOUND_MESSAGE, registry,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use smsgw_model::{Entity, Tag, Value};
use smsgw_storage::{
    CacheStore, IndexPage, IndexQuery, KvBackend, Manager, ManagerConfig, MatchRule, PageOptions,
    StorageError,
};
use smsgw_types::{
    TransportEvent, TransportUserMessage, WireMessage, format_timestamp, generate_id,
    to_reverse_timestamp, utc_now,
};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sorts just below the compound index separator `$`.
const RANGE_START_SUFFIX: char = '#';
/// Sorts just above the compound index separator `$`.
const RANGE_END_SUFFIX: char = '%';

/// The batches a new message is associated with. All sources are combined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchTarget {
    /// The tag's current batch, if it has one.
    pub tag: Option<Tag>,
    pub batch_id: Option<String>,
    pub batch_ids: Vec<String>,
}

impl BatchTarget {
    #[must_use]
    pub fn tag(tag: impl Into<Tag>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn batch(batch_id: &str) -> Self {
        Self {
            batch_id: Some(batch_id.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn batches<I, S>(batch_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            batch_ids: batch_ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn with_batch(mut self, batch_id: &str) -> Self {
        self.batch_id = Some(batch_id.to_string());
        self
    }
}

/// Optional inclusive timestamp bounds for ordered page queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl TimeRange {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn between(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    #[must_use]
    pub fn since(start: NaiveDateTime) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    #[must_use]
    pub fn until(end: NaiveDateTime) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }
}

/// Totals over one direction of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStats {
    pub total: usize,
    pub unique_addresses: usize,
}

/// Range bounds covering every `<prefix>$<timestamp>$...` term with the
/// timestamp part inside `start..=end`.
fn range_values(prefix: &str, start: Option<&str>, end: Option<&str>) -> (String, String) {
    let start = match start {
        Some(start) => format!("{prefix}${start}"),
        None => format!("{prefix}{RANGE_START_SUFFIX}"),
    };
    // A value part may follow the end timestamp.
    let end = match end {
        Some(end) => format!("{prefix}${end}{RANGE_END_SUFFIX}"),
        None => format!("{prefix}{RANGE_END_SUFFIX}"),
    };
    (start, end)
}

fn check_batch_ids<'a>(batch_ids: impl IntoIterator<Item = &'a String>) -> MessageStoreResult<()> {
    match batch_ids.into_iter().find(|id| id.contains(INDEX_SEPARATOR)) {
        Some(id) => Err(MessageStoreError::InvalidBatchId(id.clone())),
        None => Ok(()),
    }
}

fn message_model(direction: Direction) -> &'static str {
    match direction {
        Direction::Inbound => INBOUND_MESSAGE,
        Direction::Outbound => OUTBOUND_MESSAGE,
    }
}

/// Splits message keys seen oldest-first during reconciliation into those
/// replayed individually and those only counted.
///
/// Keys newer than `start` are always replayed. Of the rest, the newest
/// `keep` are replayed and older ones are handed back by
/// [`add_key`](Self::add_key) to be counted.
#[derive(Debug)]
struct ReconKeys {
    start: NaiveDateTime,
    keep: usize,
    cache_keys: VecDeque<(String, NaiveDateTime)>,
    new_keys: Vec<(String, NaiveDateTime)>,
}

impl ReconKeys {
    fn new(start: NaiveDateTime, keep: usize) -> Self {
        Self {
            start,
            keep,
            cache_keys: VecDeque::new(),
            new_keys: Vec::new(),
        }
    }

    fn add_key(&mut self, key: &str, timestamp: NaiveDateTime) -> Option<(String, NaiveDateTime)> {
        if timestamp > self.start {
            self.new_keys.push((key.to_string(), timestamp));
            return None;
        }
        self.cache_keys.push_back((key.to_string(), timestamp));
        if self.cache_keys.len() > self.keep {
            return self.cache_keys.pop_front();
        }
        None
    }

    fn into_keys(self) -> impl Iterator<Item = (String, NaiveDateTime)> {
        self.cache_keys.into_iter().chain(self.new_keys)
    }
}

/// Persistent store for batches, user messages and delivery events.
///
/// Records live in the key-value backend behind the [`Manager`]; batch
/// statistics live in the cache. Both are shared by clones.
#[derive(Debug, Clone)]
pub struct MessageStore {
    manager: Manager,
    cache: MessageStoreCache,
    config: Arc<MessageStoreConfig>,
}

impl MessageStore {
    /// Wraps a manager whose registry holds the message store models.
    pub fn new(
        manager: Manager,
        cache_store: Arc<dyn CacheStore>,
        config: MessageStoreConfig,
    ) -> Self {
        let cache = MessageStoreCache::new(
            cache_store,
            &config.cache_prefix,
            config.truncate_message_key_count_at,
        );
        Self {
            manager,
            cache,
            config: Arc::new(config),
        }
    }

    /// Builds the model registry and a manager over `backend`.
    pub fn open(
        backend: Arc<dyn KvBackend>,
        cache_store: Arc<dyn CacheStore>,
        manager_config: ManagerConfig,
        config: MessageStoreConfig,
    ) -> MessageStoreResult<Self> {
        let manager = Manager::new(backend, registry()?, manager_config);
        Ok(Self::new(manager, cache_store, config))
    }

    #[must_use]
    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    #[must_use]
    pub fn cache(&self) -> &MessageStoreCache {
        &self.cache
    }

    #[must_use]
    pub fn config(&self) -> &MessageStoreConfig {
        &self.config
    }

    fn page_size(&self, max_results: Option<usize>) -> usize {
        max_results.unwrap_or(self.config.default_max_results)
    }

    fn index_name(&self, model: &str, field: &str) -> MessageStoreResult<String> {
        let schema = self.manager.schema(model)?;
        let (_, index) = schema.indexed_field(field)?;
        Ok(index.to_string())
    }

    // ── Batches ──────────────────────────────────────────────────

    /// Creates a batch and makes it the current batch of every tag.
    pub async fn batch_start(
        &self,
        tags: &[Tag],
        metadata: BTreeMap<String, String>,
    ) -> MessageStoreResult<String> {
        let batch_id = generate_id();
        let mut batch = self
            .manager
            .create(BATCH, &batch_id, std::iter::empty::<(&str, Value)>())?;
        for tag in tags {
            batch.append_item("tags", tag.clone())?;
        }
        for (name, value) in metadata {
            batch.set_entry("metadata", &name, value)?;
        }
        self.manager.store(&mut batch).await?;

        for tag in tags {
            let mut current = self.get_tag_info(tag).await?;
            current.set_foreign_key("current_batch", Some(&batch_id))?;
            self.manager.store(&mut current).await?;
        }
        self.cache.batch_start(&batch_id).await?;
        info!(batch_id = %batch_id, tags = tags.len(), "batch started");
        Ok(batch_id)
    }

    /// Detaches the batch from every tag that still points at it. The batch
    /// and its messages are kept.
    pub async fn batch_done(&self, batch_id: &str) -> MessageStoreResult<()> {
        let batch = self
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| MessageStoreError::BatchNotFound(batch_id.to_string()))?;
        let tag_keys = self.manager.backlinks(&batch, "currenttags").await?;
        for key in &tag_keys {
            let Some(mut current) = self.manager.load(CURRENT_TAG, key).await? else {
                continue;
            };
            current.set_foreign_key("current_batch", None)?;
            self.manager.store(&mut current).await?;
        }
        info!(batch_id, tags = tag_keys.len(), "batch done");
        Ok(())
    }

    pub async fn get_batch(&self, batch_id: &str) -> MessageStoreResult<Option<Entity>> {
        Ok(self.manager.load(BATCH, batch_id).await?)
    }

    /// The stored `CurrentTag` for `tag`, or a new unsaved one.
    pub async fn get_tag_info(&self, tag: &Tag) -> MessageStoreResult<Entity> {
        let key = tag.flatten();
        match self.manager.load(CURRENT_TAG, &key).await? {
            Some(current) => Ok(current),
            None => Ok(self
                .manager
                .create(CURRENT_TAG, &key, [("tag", Value::from(tag.clone()))])?),
        }
    }

    /// Cached status counters of the batch.
    pub async fn batch_status(&self, batch_id: &str) -> MessageStoreResult<BTreeMap<String, i64>> {
        self.cache.get_event_status(batch_id).await
    }

    async fn resolve_batches(&self, target: &BatchTarget) -> MessageStoreResult<BTreeSet<String>> {
        let mut batch_ids: BTreeSet<String> = target.batch_ids.iter().cloned().collect();
        if let Some(batch_id) = &target.batch_id {
            batch_ids.insert(batch_id.clone());
        }
        if let Some(tag) = &target.tag {
            if let Some(current) = self.manager.load(CURRENT_TAG, &tag.flatten()).await? {
                if let Some(batch_id) = current.foreign_key("current_batch")? {
                    batch_ids.insert(batch_id);
                }
            }
        }
        check_batch_ids(&batch_ids)?;
        Ok(batch_ids)
    }

    // ── Messages ─────────────────────────────────────────────────

    pub async fn add_outbound_message(
        &self,
        msg: &TransportUserMessage,
        target: &BatchTarget,
    ) -> MessageStoreResult<()> {
        self.add_message(Direction::Outbound, msg, target).await
    }

    pub async fn add_inbound_message(
        &self,
        msg: &TransportUserMessage,
        target: &BatchTarget,
    ) -> MessageStoreResult<()> {
        self.add_message(Direction::Inbound, msg, target).await
    }

    /// Stores `msg`, replacing the payload of an earlier write with the same
    /// id. Batches are only ever added.
    async fn add_message(
        &self,
        direction: Direction,
        msg: &TransportUserMessage,
        target: &BatchTarget,
    ) -> MessageStoreResult<()> {
        let model = message_model(direction);
        let mut stored = match self.manager.load(model, &msg.message_id).await? {
            Some(mut stored) => {
                stored.set_message("msg", msg)?;
                stored
            }
            None => self.manager.create(
                model,
                &msg.message_id,
                [("msg", Value::from(msg.to_payload()?))],
            )?,
        };
        let batch_ids = self.resolve_batches(target).await?;
        for batch_id in &batch_ids {
            stored.add_related_key("batches", batch_id)?;
            match direction {
                Direction::Outbound => self.cache.add_outbound_message(batch_id, msg).await?,
                Direction::Inbound => self.cache.add_inbound_message(batch_id, msg).await?,
            }
        }
        self.manager.store(&mut stored).await?;
        debug!(
            message_id = %msg.message_id,
            direction = %direction,
            batches = batch_ids.len(),
            "message stored"
        );
        Ok(())
    }

    pub async fn get_outbound_message(
        &self,
        message_id: &str,
    ) -> MessageStoreResult<Option<TransportUserMessage>> {
        self.get_message(Direction::Outbound, message_id).await
    }

    pub async fn get_inbound_message(
        &self,
        message_id: &str,
    ) -> MessageStoreResult<Option<TransportUserMessage>> {
        self.get_message(Direction::Inbound, message_id).await
    }

    async fn get_message(
        &self,
        direction: Direction,
        message_id: &str,
    ) -> MessageStoreResult<Option<TransportUserMessage>> {
        match self.manager.load(message_model(direction), message_id).await? {
            Some(stored) => Ok(stored.message("msg")?),
            None => Ok(None),
        }
    }

    /// Batch ids of a stored outbound message, empty if it is unknown.
    async fn outbound_batches(&self, message_id: &str) -> MessageStoreResult<Vec<String>> {
        match self.manager.load(OUTBOUND_MESSAGE, message_id).await? {
            Some(stored) => Ok(stored.related_keys("batches")?),
            None => Ok(Vec::new()),
        }
    }

    // ── Events ───────────────────────────────────────────────────

    /// Stores an event and counts it in each of its batches.
    ///
    /// `batch_ids` names the batches outright, even when empty. Without it
    /// an existing event keeps its stored batches and a new event takes
    /// those of the outbound message it reports on.
    pub async fn add_event(
        &self,
        event: &TransportEvent,
        batch_ids: Option<&[String]>,
    ) -> MessageStoreResult<()> {
        if let Some(ids) = batch_ids {
            check_batch_ids(ids)?;
        }
        let (mut stored, batches) = match self.load_event(&event.event_id).await? {
            Some(mut stored) => {
                stored.set_message("event", event)?;
                let batches = match batch_ids {
                    Some(ids) => ids.to_vec(),
                    None => stored.related_keys("batches")?,
                };
                (stored, batches)
            }
            None => {
                let stored = self.manager.create(
                    EVENT,
                    &event.event_id,
                    [
                        ("event", Value::from(event.to_payload()?)),
                        ("message", Value::from(event.user_message_id.as_str())),
                    ],
                )?;
                let batches = match batch_ids {
                    Some(ids) => ids.to_vec(),
                    None => self.outbound_batches(&event.user_message_id).await?,
                };
                (stored, batches)
            }
        };
        for batch_id in &batches {
            stored.add_related_key("batches", batch_id)?;
            self.cache.add_event(batch_id, event).await?;
        }
        self.manager.store(&mut stored).await?;
        debug!(
            event_id = %event.event_id,
            status = %event.status(),
            batches = batches.len(),
            "event stored"
        );
        Ok(())
    }

    /// Loads a stored event. Events migrated from before batches were
    /// recorded get the batches of their outbound message. The fix is not
    /// saved until the event is next stored.
    pub async fn load_event(&self, event_id: &str) -> MessageStoreResult<Option<Entity>> {
        let Some(mut stored) = self.manager.load(EVENT, event_id).await? else {
            return Ok(None);
        };
        if stored.was_migrated() && stored.related_keys("batches")?.is_empty() {
            if let Some(message_id) = stored.foreign_key("message")? {
                for batch_id in self.outbound_batches(&message_id).await? {
                    stored.add_related_key("batches", &batch_id)?;
                }
            }
        }
        Ok(Some(stored))
    }

    pub async fn get_event(&self, event_id: &str) -> MessageStoreResult<Option<TransportEvent>> {
        match self.load_event(event_id).await? {
            Some(stored) => Ok(stored.message("event")?),
            None => Ok(None),
        }
    }

    pub async fn get_events_for_message(
        &self,
        message_id: &str,
    ) -> MessageStoreResult<Vec<TransportEvent>> {
        let mut events = Vec::new();
        for event_id in self.message_event_keys(message_id).await? {
            if let Some(event) = self.get_event(&event_id).await? {
                events.push(event);
            }
        }
        Ok(events)
    }

    // ── Keys and counts ──────────────────────────────────────────

    pub async fn batch_outbound_keys(&self, batch_id: &str) -> MessageStoreResult<Vec<String>> {
        self.batch_keys(Direction::Outbound, batch_id).await
    }

    pub async fn batch_inbound_keys(&self, batch_id: &str) -> MessageStoreResult<Vec<String>> {
        self.batch_keys(Direction::Inbound, batch_id).await
    }

    pub async fn batch_keys(
        &self,
        direction: Direction,
        batch_id: &str,
    ) -> MessageStoreResult<Vec<String>> {
        Ok(self
            .manager
            .index_keys(message_model(direction), "batches", batch_id, None)
            .await?)
    }

    pub async fn batch_outbound_keys_page(
        &self,
        batch_id: &str,
        max_results: Option<usize>,
        continuation: Option<String>,
    ) -> MessageStoreResult<IndexPage> {
        self.batch_keys_page(Direction::Outbound, batch_id, max_results, continuation)
            .await
    }

    pub async fn batch_inbound_keys_page(
        &self,
        batch_id: &str,
        max_results: Option<usize>,
        continuation: Option<String>,
    ) -> MessageStoreResult<IndexPage> {
        self.batch_keys_page(Direction::Inbound, batch_id, max_results, continuation)
            .await
    }

    pub async fn batch_keys_page(
        &self,
        direction: Direction,
        batch_id: &str,
        max_results: Option<usize>,
        continuation: Option<String>,
    ) -> MessageStoreResult<IndexPage> {
        let options = PageOptions::max_results(self.page_size(max_results))
            .with_continuation(continuation);
        Ok(self
            .manager
            .index_keys_page(message_model(direction), "batches", batch_id, None, options)
            .await?)
    }

    pub async fn message_event_keys(&self, message_id: &str) -> MessageStoreResult<Vec<String>> {
        Ok(self
            .manager
            .index_keys(EVENT, "message", message_id, None)
            .await?)
    }

    pub async fn batch_outbound_count(&self, batch_id: &str) -> MessageStoreResult<usize> {
        Ok(self.batch_outbound_keys(batch_id).await?.len())
    }

    pub async fn batch_inbound_count(&self, batch_id: &str) -> MessageStoreResult<usize> {
        Ok(self.batch_inbound_keys(batch_id).await?.len())
    }

    // ── Ordered pages ────────────────────────────────────────────

    async fn query_compound_index(
        &self,
        model: &str,
        field: &str,
        prefix: &str,
        (start, end): (String, String),
        max_results: Option<usize>,
        format: IndexFormat,
    ) -> MessageStoreResult<FormattedPage> {
        let index = self.index_name(model, field)?;
        let options = PageOptions::max_results(self.page_size(max_results)).with_terms();
        let page = self
            .manager
            .query_index(model, &index, IndexQuery::range(start, end), options)
            .await?;
        FormattedPage::new(format, prefix, page)
    }

    async fn keys_by_timestamp(
        &self,
        direction: Direction,
        batch_id: &str,
        range: TimeRange,
        max_results: Option<usize>,
        format: IndexFormat,
    ) -> MessageStoreResult<FormattedPage> {
        let start = range.start.map(|ts| format_timestamp(&ts));
        let end = range.end.map(|ts| format_timestamp(&ts));
        self.query_compound_index(
            message_model(direction),
            "batches_with_addresses",
            batch_id,
            range_values(batch_id, start.as_deref(), end.as_deref()),
            max_results,
            format,
        )
        .await
    }

    /// Message keys and timestamps, oldest first.
    pub async fn batch_keys_with_timestamps(
        &self,
        direction: Direction,
        batch_id: &str,
        range: TimeRange,
        max_results: Option<usize>,
    ) -> MessageStoreResult<FormattedPage> {
        self.keys_by_timestamp(direction, batch_id, range, max_results, IndexFormat::TimestampOnly)
            .await
    }

    /// Message keys, timestamps and addresses, oldest first.
    pub async fn batch_keys_with_addresses(
        &self,
        direction: Direction,
        batch_id: &str,
        range: TimeRange,
        max_results: Option<usize>,
    ) -> MessageStoreResult<FormattedPage> {
        self.keys_by_timestamp(
            direction,
            batch_id,
            range,
            max_results,
            IndexFormat::TimestampAndValue,
        )
        .await
    }

    /// Message keys, timestamps and addresses, newest first.
    pub async fn batch_keys_with_addresses_reverse(
        &self,
        direction: Direction,
        batch_id: &str,
        range: TimeRange,
        max_results: Option<usize>,
    ) -> MessageStoreResult<FormattedPage> {
        // Reverse timestamps sort the other way round, so the bounds swap.
        let start = range.end.map(|ts| to_reverse_timestamp(&ts)).transpose()?;
        let end = range.start.map(|ts| to_reverse_timestamp(&ts)).transpose()?;
        self.query_compound_index(
            message_model(direction),
            "batches_with_addresses_reverse",
            batch_id,
            range_values(batch_id, start.as_deref(), end.as_deref()),
            max_results,
            IndexFormat::ReverseTimestampAndValue,
        )
        .await
    }

    pub async fn batch_outbound_keys_with_timestamps(
        &self,
        batch_id: &str,
        range: TimeRange,
        max_results: Option<usize>,
    ) -> MessageStoreResult<FormattedPage> {
        self.batch_keys_with_timestamps(Direction::Outbound, batch_id, range, max_results)
            .await
    }

    pub async fn batch_inbound_keys_with_timestamps(
        &self,
        batch_id: &str,
        range: TimeRange,
        max_results: Option<usize>,
    ) -> MessageStoreResult<FormattedPage> {
        self.batch_keys_with_timestamps(Direction::Inbound, batch_id, range, max_results)
            .await
    }

    pub async fn batch_outbound_keys_with_addresses(
        &self,
        batch_id: &str,
        range: TimeRange,
        max_results: Option<usize>,
    ) -> MessageStoreResult<FormattedPage> {
        self.batch_keys_with_addresses(Direction::Outbound, batch_id, range, max_results)
            .await
    }

    pub async fn batch_inbound_keys_with_addresses(
        &self,
        batch_id: &str,
        range: TimeRange,
        max_results: Option<usize>,
    ) -> MessageStoreResult<FormattedPage> {
        self.batch_keys_with_addresses(Direction::Inbound, batch_id, range, max_results)
            .await
    }

    pub async fn batch_outbound_keys_with_addresses_reverse(
        &self,
        batch_id: &str,
        range: TimeRange,
        max_results: Option<usize>,
    ) -> MessageStoreResult<FormattedPage> {
        self.batch_keys_with_addresses_reverse(Direction::Outbound, batch_id, range, max_results)
            .await
    }

    pub async fn batch_inbound_keys_with_addresses_reverse(
        &self,
        batch_id: &str,
        range: TimeRange,
        max_results: Option<usize>,
    ) -> MessageStoreResult<FormattedPage> {
        self.batch_keys_with_addresses_reverse(Direction::Inbound, batch_id, range, max_results)
            .await
    }

    /// Event keys of a message with their timestamps and statuses, oldest
    /// first. Events per message are few, so there are no time bounds.
    pub async fn message_event_keys_with_statuses(
        &self,
        message_id: &str,
        max_results: Option<usize>,
    ) -> MessageStoreResult<FormattedPage> {
        self.query_compound_index(
            EVENT,
            "message_with_status",
            message_id,
            range_values(message_id, None, None),
            max_results,
            IndexFormat::TimestampAndValue,
        )
        .await
    }

    // ── Stats ────────────────────────────────────────────────────

    /// Message total and distinct addresses in the time range, counted
    /// from the address index.
    pub async fn batch_stats(
        &self,
        direction: Direction,
        batch_id: &str,
        range: TimeRange,
        max_results: Option<usize>,
    ) -> MessageStoreResult<MessageStats> {
        let mut total = 0;
        let mut addresses = HashSet::new();
        let mut page = Some(
            self.batch_keys_with_addresses(direction, batch_id, range, max_results)
                .await?,
        );
        while let Some(current) = page {
            total += current.len();
            addresses.extend(current.rows().iter().filter_map(|row| row.value.clone()));
            page = current.next_page(&self.manager).await?;
        }
        Ok(MessageStats {
            total,
            unique_addresses: addresses.len(),
        })
    }

    pub async fn batch_outbound_stats(
        &self,
        batch_id: &str,
        range: TimeRange,
    ) -> MessageStoreResult<MessageStats> {
        self.batch_stats(Direction::Outbound, batch_id, range, None)
            .await
    }

    pub async fn batch_inbound_stats(
        &self,
        batch_id: &str,
        range: TimeRange,
    ) -> MessageStoreResult<MessageStats> {
        self.batch_stats(Direction::Inbound, batch_id, range, None)
            .await
    }

    // ── Cached keys ──────────────────────────────────────────────

    /// Cached outbound keys, newest first. `start` and `stop` are inclusive
    /// ranks; `-1` is the oldest cached key.
    pub async fn get_cached_outbound_message_keys(
        &self,
        batch_id: &str,
        start: i64,
        stop: i64,
    ) -> MessageStoreResult<Vec<String>> {
        self.cache
            .get_message_keys(batch_id, Direction::Outbound, start, stop)
            .await
    }

    pub async fn get_cached_inbound_message_keys(
        &self,
        batch_id: &str,
        start: i64,
        stop: i64,
    ) -> MessageStoreResult<Vec<String>> {
        self.cache
            .get_message_keys(batch_id, Direction::Inbound, start, stop)
            .await
    }

    pub async fn get_cached_message_keys_with_timestamps(
        &self,
        direction: Direction,
        batch_id: &str,
        start: i64,
        stop: i64,
    ) -> MessageStoreResult<Vec<(String, NaiveDateTime)>> {
        self.cache
            .get_message_keys_with_timestamps(batch_id, direction, start, stop)
            .await
    }

    // ── Reconciliation ───────────────────────────────────────────

    /// True if a cached message count is off from the indexed count by more
    /// than `delta`, relative to the indexed count. Directions with no
    /// indexed messages are not compared.
    pub async fn needs_reconciliation(&self, batch_id: &str, delta: f64) -> MessageStoreResult<bool> {
        for direction in [Direction::Inbound, Direction::Outbound] {
            let indexed = self.batch_keys(direction, batch_id).await?.len() as f64;
            if indexed == 0.0 {
                continue;
            }
            let cached = self.cache.count_message_keys(batch_id, direction).await? as f64;
            if (cached - indexed).abs() / indexed > delta {
                debug!(batch_id, direction = %direction, indexed, cached, "cache out of date");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Clears and rebuilds the batch cache from the indexes.
    ///
    /// Messages at or before `start_timestamp` (default now) beyond the
    /// newest `truncate_message_key_count_at` are only counted. Everything
    /// else is replayed with its events. A record that fails to replay is
    /// logged and skipped.
    pub async fn reconcile_cache(
        &self,
        batch_id: &str,
        start_timestamp: Option<NaiveDateTime>,
    ) -> MessageStoreResult<()> {
        let start = start_timestamp.unwrap_or_else(utc_now);
        self.cache.clear_batch(batch_id).await?;
        self.cache.batch_start(batch_id).await?;
        self.reconcile_direction(Direction::Outbound, batch_id, start)
            .await?;
        self.reconcile_direction(Direction::Inbound, batch_id, start)
            .await?;
        info!(batch_id, "cache reconciled");
        Ok(())
    }

    async fn reconcile_direction(
        &self,
        direction: Direction,
        batch_id: &str,
        start: NaiveDateTime,
    ) -> MessageStoreResult<()> {
        let mut keys = ReconKeys::new(start, self.cache.truncate_at());
        let mut counted = 0u64;
        let mut status_counts: BTreeMap<String, i64> = BTreeMap::new();

        let mut page = Some(
            self.batch_keys_with_addresses(direction, batch_id, TimeRange::all(), None)
                .await?,
        );
        while let Some(current) = page {
            for row in current.rows() {
                if let Some(address) = &row.value {
                    self.cache.add_address(batch_id, direction, address).await?;
                }
                let Some((old_key, _)) = keys.add_key(&row.key, row.timestamp) else {
                    continue;
                };
                self.cache.mark_counted(batch_id, direction, &old_key).await?;
                counted += 1;
                if direction == Direction::Outbound {
                    for (status, count) in self.get_event_counts(&old_key).await? {
                        *status_counts.entry(status).or_default() += count;
                    }
                }
            }
            page = current.next_page(&self.manager).await?;
        }

        self.cache
            .add_message_count(batch_id, direction, counted)
            .await?;
        for (status, count) in &status_counts {
            self.cache.add_event_count(batch_id, status, *count).await?;
        }
        for (key, timestamp) in keys.into_keys() {
            if let Err(e) = self.replay_message(direction, batch_id, &key, &timestamp).await {
                warn!(
                    batch_id,
                    direction = %direction,
                    key = %key,
                    error = %e,
                    "skipping message during cache reconciliation"
                );
            }
        }
        debug!(batch_id, direction = %direction, counted, "direction reconciled");
        Ok(())
    }

    async fn replay_message(
        &self,
        direction: Direction,
        batch_id: &str,
        key: &str,
        timestamp: &NaiveDateTime,
    ) -> MessageStoreResult<()> {
        self.cache
            .add_message_key(batch_id, direction, key, timestamp)
            .await?;
        if direction == Direction::Outbound {
            for event_id in self.message_event_keys(key).await? {
                if let Some(event) = self.get_event(&event_id).await? {
                    self.cache.add_event(batch_id, &event).await?;
                }
            }
        }
        Ok(())
    }

    /// Event counts per status for one message, read from the status
    /// index. Delivery reports also count towards `delivery_report`.
    pub async fn get_event_counts(&self, message_id: &str) -> MessageStoreResult<BTreeMap<String, i64>> {
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        let mut page = Some(self.message_event_keys_with_statuses(message_id, None).await?);
        while let Some(current) = page {
            for status in current.rows().iter().filter_map(|row| row.value.as_deref()) {
                *counts.entry(status.to_string()).or_default() += 1;
                if status.starts_with("delivery_report.") {
                    *counts.entry("delivery_report".to_string()).or_default() += 1;
                }
            }
            page = current.next_page(&self.manager).await?;
        }
        Ok(counts)
    }

    // ── Match queries ────────────────────────────────────────────

    /// Keys of the batch's messages matching any of `rules`.
    pub async fn batch_keys_matching(
        &self,
        direction: Direction,
        batch_id: &str,
        rules: &[MatchRule],
    ) -> MessageStoreResult<Vec<String>> {
        Ok(self
            .manager
            .index_match(message_model(direction), rules, "batches", batch_id, None)
            .await?
            .into_keys())
    }

    pub async fn find_outbound_keys_matching(
        &self,
        batch_id: &str,
        rules: &[MatchRule],
        ttl: Option<Duration>,
        wait: bool,
    ) -> MessageStoreResult<String> {
        self.find_keys_matching(Direction::Outbound, batch_id, rules, ttl, wait)
            .await
    }

    pub async fn find_inbound_keys_matching(
        &self,
        batch_id: &str,
        rules: &[MatchRule],
        ttl: Option<Duration>,
        wait: bool,
    ) -> MessageStoreResult<String> {
        self.find_keys_matching(Direction::Inbound, batch_id, rules, ttl, wait)
            .await
    }

    /// Starts a match query in the background and returns its token.
    ///
    /// Results are stored newest first under the token for `ttl` (default
    /// `default_query_ttl_secs`). With `wait` the call returns once they
    /// are stored and reports a failed query. Without it a failure is only
    /// logged.
    pub async fn find_keys_matching(
        &self,
        direction: Direction,
        batch_id: &str,
        rules: &[MatchRule],
        ttl: Option<Duration>,
        wait: bool,
    ) -> MessageStoreResult<String> {
        let token = self.cache.start_query(batch_id, direction, rules).await?;
        let ttl = ttl.unwrap_or_else(|| self.config.query_ttl());
        let store = self.clone();
        let batch = batch_id.to_string();
        let query_token = token.clone();
        let rules = rules.to_vec();
        let task = tokio::spawn(async move {
            store
                .run_match_query(direction, &batch, &rules, &query_token, ttl)
                .await
        });
        if wait {
            task.await
                .map_err(|e| StorageError::Backend(format!("match query task failed: {e}")))??;
        }
        Ok(token)
    }

    async fn run_match_query(
        &self,
        direction: Direction,
        batch_id: &str,
        rules: &[MatchRule],
        token: &str,
        ttl: Duration,
    ) -> MessageStoreResult<()> {
        match self.scored_matches(direction, batch_id, rules).await {
            Ok(results) => {
                self.cache
                    .store_query_results(batch_id, token, &results, ttl)
                    .await?;
                debug!(batch_id, token, results = results.len(), "match query stored");
                Ok(())
            }
            Err(e) => {
                warn!(batch_id, token, error = %e, "match query failed");
                self.cache.abandon_query(batch_id, token).await?;
                Err(e)
            }
        }
    }

    /// Matching keys scored by message timestamp. Keys whose message has
    /// gone are dropped.
    async fn scored_matches(
        &self,
        direction: Direction,
        batch_id: &str,
        rules: &[MatchRule],
    ) -> MessageStoreResult<Vec<(String, f64)>> {
        let keys = self.batch_keys_matching(direction, batch_id, rules).await?;
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let timestamp = match self.cache.message_timestamp(batch_id, direction, &key).await? {
                Some(timestamp) => Some(timestamp),
                None => self
                    .get_message(direction, &key)
                    .await?
                    .map(|msg| msg.timestamp),
            };
            if let Some(timestamp) = timestamp {
                results.push((key, timestamp_score(&timestamp)));
            }
        }
        Ok(results)
    }

    /// Result keys of a match query, newest first unless `asc`.
    pub async fn get_keys_for_token(
        &self,
        batch_id: &str,
        token: &str,
        start: i64,
        stop: i64,
        asc: bool,
    ) -> MessageStoreResult<Vec<String>> {
        self.cache
            .get_query_results(batch_id, token, start, stop, asc)
            .await
    }

    pub async fn count_keys_for_token(&self, batch_id: &str, token: &str) -> MessageStoreResult<usize> {
        self.cache.count_query_results(batch_id, token).await
    }

    pub async fn is_query_in_progress(&self, batch_id: &str, token: &str) -> MessageStoreResult<bool> {
        self.cache.is_query_in_progress(batch_id, token).await
    }
}
