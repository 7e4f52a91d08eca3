//! Blocking facade over [`Manager`].
//!
//! Owns a tokio runtime and drives the async manager with `block_on`, so
//! blocking callers and async callers share the same backend and see the
//! same data. Must not be used from inside an async context.

use crate::backend::MatchRule;
use crate::error::{StorageError, StorageResult};
use crate::manager::Manager;
use crate::page::{IndexPage, MapReduceResult, PageOptions};
use futures::StreamExt;
use futures::stream::BoxStream;
use smsgw_model::{Entity, Value};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Builds the runtime used by blocking facades. One worker keeps
/// background tasks progressing between calls.
pub fn blocking_runtime() -> StorageResult<Arc<Runtime>> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(|e| StorageError::Config(format!("failed to start runtime: {e}")))
}

/// A [`Manager`] with blocking methods.
#[derive(Debug, Clone)]
pub struct BlockingManager {
    runtime: Arc<Runtime>,
    manager: Manager,
}

impl BlockingManager {
    pub fn new(manager: Manager) -> StorageResult<Self> {
        Ok(Self::with_runtime(blocking_runtime()?, manager))
    }

    #[must_use]
    pub fn with_runtime(runtime: Arc<Runtime>, manager: Manager) -> Self {
        Self { runtime, manager }
    }

    /// The async manager sharing this facade's backend.
    #[must_use]
    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    #[must_use]
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn store(&self, entity: &mut Entity) -> StorageResult<()> {
        self.runtime.block_on(self.manager.store(entity))
    }

    pub fn load(&self, model: &str, key: &str) -> StorageResult<Option<Entity>> {
        self.runtime.block_on(self.manager.load(model, key))
    }

    pub fn delete(&self, entity: &Entity) -> StorageResult<()> {
        self.runtime.block_on(self.manager.delete(entity))
    }

    pub fn index_keys(
        &self,
        model: &str,
        field: &str,
        value: impl Into<Value>,
        end: Option<Value>,
    ) -> StorageResult<Vec<String>> {
        self.runtime
            .block_on(self.manager.index_keys(model, field, value, end))
    }

    pub fn index_keys_page(
        &self,
        model: &str,
        field: &str,
        value: impl Into<Value>,
        end: Option<Value>,
        options: PageOptions,
    ) -> StorageResult<IndexPage> {
        self.runtime
            .block_on(self.manager.index_keys_page(model, field, value, end, options))
    }

    pub fn next_page(&self, page: &IndexPage) -> StorageResult<Option<IndexPage>> {
        self.runtime.block_on(page.next_page(&self.manager))
    }

    pub fn index_match(
        &self,
        model: &str,
        rules: &[MatchRule],
        field: &str,
        value: impl Into<Value>,
        end: Option<Value>,
    ) -> StorageResult<MapReduceResult> {
        self.runtime
            .block_on(self.manager.index_match(model, rules, field, value, end))
    }

    pub fn all_keys(&self, model: &str) -> StorageResult<Vec<String>> {
        self.runtime.block_on(self.manager.all_keys(model))
    }

    pub fn all_keys_page(&self, model: &str, options: PageOptions) -> StorageResult<IndexPage> {
        self.runtime
            .block_on(self.manager.all_keys_page(model, options))
    }

    pub fn search(&self, model: &str, terms: &[(&str, &str)]) -> StorageResult<Vec<String>> {
        self.runtime.block_on(self.manager.search(model, terms))
    }

    pub fn backlinks(&self, entity: &Entity, name: &str) -> StorageResult<Vec<String>> {
        self.runtime.block_on(self.manager.backlinks(entity, name))
    }

    pub fn load_related(&self, entity: &Entity, field: &str) -> StorageResult<Option<Entity>> {
        self.runtime
            .block_on(self.manager.load_related(entity, field))
    }

    /// Iterates over chunks of loaded entities, fetching each chunk on
    /// demand.
    pub fn load_all_bunches(&self, model: &str, keys: Vec<String>) -> BlockingBunches {
        BlockingBunches {
            runtime: Arc::clone(&self.runtime),
            stream: self.manager.load_all_bunches(model, keys),
        }
    }

    pub fn purge_all(&self) -> StorageResult<()> {
        self.runtime.block_on(self.manager.purge_all())
    }
}

/// Iterator returned by [`BlockingManager::load_all_bunches`].
pub struct BlockingBunches {
    runtime: Arc<Runtime>,
    stream: BoxStream<'static, StorageResult<Vec<Entity>>>,
}

impl Iterator for BlockingBunches {
    type Item = StorageResult<Vec<Entity>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.stream.next())
    }
}
