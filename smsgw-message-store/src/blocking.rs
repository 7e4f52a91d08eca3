//! Blocking facade over [`MessageStore`].
//!
//! Uses the same runtime setup as [`smsgw_storage::BlockingManager`], so a
//! blocking writer and an async reader over one backend see the same
//! records. Must not be called from inside an async context.

use crate::cache::Direction;
use crate::error::MessageStoreResult;
use crate::index_page::FormattedPage;
use crate::store::{BatchTarget, MessageStats, MessageStore, TimeRange};
use chrono::NaiveDateTime;
use smsgw_model::{Entity, Tag};
use smsgw_storage::{MatchRule, blocking_runtime};
use smsgw_types::{TransportEvent, TransportUserMessage};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// A [`MessageStore`] with blocking methods.
#[derive(Debug, Clone)]
pub struct BlockingMessageStore {
    runtime: Arc<Runtime>,
    store: MessageStore,
}

impl BlockingMessageStore {
    pub fn new(store: MessageStore) -> MessageStoreResult<Self> {
        Ok(Self::with_runtime(blocking_runtime()?, store))
    }

    #[must_use]
    pub fn with_runtime(runtime: Arc<Runtime>, store: MessageStore) -> Self {
        Self { runtime, store }
    }

    /// The async store sharing this facade's backend and cache.
    #[must_use]
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    // ── Batches ──────────────────────────────────────────────────

    pub fn batch_start(
        &self,
        tags: &[Tag],
        metadata: BTreeMap<String, String>,
    ) -> MessageStoreResult<String> {
        self.runtime.block_on(self.store.batch_start(tags, metadata))
    }

    pub fn batch_done(&self, batch_id: &str) -> MessageStoreResult<()> {
        self.runtime.block_on(self.store.batch_done(batch_id))
    }

    pub fn get_batch(&self, batch_id: &str) -> MessageStoreResult<Option<Entity>> {
        self.runtime.block_on(self.store.get_batch(batch_id))
    }

    pub fn get_tag_info(&self, tag: &Tag) -> MessageStoreResult<Entity> {
        self.runtime.block_on(self.store.get_tag_info(tag))
    }

    pub fn batch_status(&self, batch_id: &str) -> MessageStoreResult<BTreeMap<String, i64>> {
        self.runtime.block_on(self.store.batch_status(batch_id))
    }

    // ── Messages and events ──────────────────────────────────────

    pub fn add_outbound_message(
        &self,
        msg: &TransportUserMessage,
        target: &BatchTarget,
    ) -> MessageStoreResult<()> {
        self.runtime
            .block_on(self.store.add_outbound_message(msg, target))
    }

    pub fn add_inbound_message(
        &self,
        msg: &TransportUserMessage,
        target: &BatchTarget,
    ) -> MessageStoreResult<()> {
        self.runtime
            .block_on(self.store.add_inbound_message(msg, target))
    }

    pub fn get_outbound_message(
        &self,
        message_id: &str,
    ) -> MessageStoreResult<Option<TransportUserMessage>> {
        self.runtime
            .block_on(self.store.get_outbound_message(message_id))
    }

    pub fn get_inbound_message(
        &self,
        message_id: &str,
    ) -> MessageStoreResult<Option<TransportUserMessage>> {
        self.runtime
            .block_on(self.store.get_inbound_message(message_id))
    }

    pub fn add_event(
        &self,
        event: &TransportEvent,
        batch_ids: Option<&[String]>,
    ) -> MessageStoreResult<()> {
        self.runtime.block_on(self.store.add_event(event, batch_ids))
    }

    pub fn get_event(&self, event_id: &str) -> MessageStoreResult<Option<TransportEvent>> {
        self.runtime.block_on(self.store.get_event(event_id))
    }

    pub fn get_events_for_message(
        &self,
        message_id: &str,
    ) -> MessageStoreResult<Vec<TransportEvent>> {
        self.runtime
            .block_on(self.store.get_events_for_message(message_id))
    }

    // ── Keys and pages ───────────────────────────────────────────

    pub fn batch_keys(&self, direction: Direction, batch_id: &str) -> MessageStoreResult<Vec<String>> {
        self.runtime
            .block_on(self.store.batch_keys(direction, batch_id))
    }

    pub fn message_event_keys(&self, message_id: &str) -> MessageStoreResult<Vec<String>> {
        self.runtime
            .block_on(self.store.message_event_keys(message_id))
    }

    pub fn batch_keys_with_addresses(
        &self,
        direction: Direction,
        batch_id: &str,
        range: TimeRange,
        max_results: Option<usize>,
    ) -> MessageStoreResult<FormattedPage> {
        self.runtime.block_on(
            self.store
                .batch_keys_with_addresses(direction, batch_id, range, max_results),
        )
    }

    pub fn batch_keys_with_addresses_reverse(
        &self,
        direction: Direction,
        batch_id: &str,
        range: TimeRange,
        max_results: Option<usize>,
    ) -> MessageStoreResult<FormattedPage> {
        self.runtime.block_on(
            self.store
                .batch_keys_with_addresses_reverse(direction, batch_id, range, max_results),
        )
    }

    pub fn next_page(&self, page: &FormattedPage) -> MessageStoreResult<Option<FormattedPage>> {
        self.runtime.block_on(page.next_page(self.store.manager()))
    }

    pub fn batch_stats(
        &self,
        direction: Direction,
        batch_id: &str,
        range: TimeRange,
    ) -> MessageStoreResult<MessageStats> {
        self.runtime
            .block_on(self.store.batch_stats(direction, batch_id, range, None))
    }

    pub fn get_cached_message_keys_with_timestamps(
        &self,
        direction: Direction,
        batch_id: &str,
        start: i64,
        stop: i64,
    ) -> MessageStoreResult<Vec<(String, NaiveDateTime)>> {
        self.runtime.block_on(
            self.store
                .get_cached_message_keys_with_timestamps(direction, batch_id, start, stop),
        )
    }

    // ── Cache ────────────────────────────────────────────────────

    pub fn needs_reconciliation(&self, batch_id: &str, delta: f64) -> MessageStoreResult<bool> {
        self.runtime
            .block_on(self.store.needs_reconciliation(batch_id, delta))
    }

    pub fn reconcile_cache(
        &self,
        batch_id: &str,
        start_timestamp: Option<NaiveDateTime>,
    ) -> MessageStoreResult<()> {
        self.runtime
            .block_on(self.store.reconcile_cache(batch_id, start_timestamp))
    }

    pub fn find_keys_matching(
        &self,
        direction: Direction,
        batch_id: &str,
        rules: &[MatchRule],
        ttl: Option<Duration>,
        wait: bool,
    ) -> MessageStoreResult<String> {
        self.runtime.block_on(
            self.store
                .find_keys_matching(direction, batch_id, rules, ttl, wait),
        )
    }

    pub fn get_keys_for_token(
        &self,
        batch_id: &str,
        token: &str,
        start: i64,
        stop: i64,
        asc: bool,
    ) -> MessageStoreResult<Vec<String>> {
        self.runtime
            .block_on(self.store.get_keys_for_token(batch_id, token, start, stop, asc))
    }

    pub fn count_keys_for_token(&self, batch_id: &str, token: &str) -> MessageStoreResult<usize> {
        self.runtime
            .block_on(self.store.count_keys_for_token(batch_id, token))
    }

    pub fn is_query_in_progress(&self, batch_id: &str, token: &str) -> MessageStoreResult<bool> {
        self.runtime
            .block_on(self.store.is_query_in_progress(batch_id, token))
    }
}
