//! Model-aware access to a [`KvBackend`].
//!
//! # Architecture
//!
//! The [`Manager`] binds a [`SchemaRegistry`] to a backend. It maps each
//! model to a bucket (`bucket_prefix` + the model's bucket), runs model
//! hooks and migrations around every write and read, and translates field
//! values into index terms for queries. It never caches: every call goes
//! to the backend, and "not found" is reported as `None`.
//!
//! Managers are cheap to clone and every clone shares the same backend.

use crate::backend::{BUCKET_INDEX, IndexEntry, IndexQuery, IndexRequest, KvBackend, MatchRule};
use crate::config::ManagerConfig;
use crate::error::{StorageError, StorageResult};
use crate::page::{IndexPage, MapReduceResult, PageOptions};
use futures::future::join_all;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use smsgw_model::{Entity, ModelError, ModelSchema, SchemaRegistry, Value, migrate_record};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Characters with a meaning in the search query syntax.
const SEARCH_SPECIAL: &[char] = &[
    '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\',
    '/', ' ',
];

/// Escapes a term for use in a `field:value` search clause.
#[must_use]
pub fn escape_search_term(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if SEARCH_SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Stores, loads and queries entities of registered models.
#[derive(Clone)]
pub struct Manager {
    backend: Arc<dyn KvBackend>,
    registry: Arc<SchemaRegistry>,
    config: Arc<ManagerConfig>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Manager {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        registry: SchemaRegistry,
        config: ManagerConfig,
    ) -> Self {
        Self {
            backend,
            registry: Arc::new(registry),
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn schema(&self, model: &str) -> StorageResult<Arc<ModelSchema>> {
        Ok(self.registry.get(model)?)
    }

    #[must_use]
    pub fn bucket_name(&self, schema: &ModelSchema) -> String {
        format!("{}{}", self.config.bucket_prefix, schema.bucket())
    }

    fn mapreduce_timeout(&self) -> Duration {
        Duration::from_secs(self.config.mapreduce_timeout_secs)
    }

    /// Creates a new, unsaved entity of `model`.
    pub fn create<I, K, V>(&self, model: &str, key: &str, values: I) -> StorageResult<Entity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        Ok(self.schema(model)?.create(key, values)?)
    }

    // ── Records ──────────────────────────────────────────────────

    /// Writes `entity`. Runs the model's `before_store` hook first, so the
    /// entity reflects any derived fields after the call.
    pub async fn store(&self, entity: &mut Entity) -> StorageResult<()> {
        let schema = Arc::clone(entity.schema());
        if let Some(hooks) = schema.hooks() {
            hooks.before_store(entity)?;
        }
        let bucket = self.bucket_name(&schema);
        let record = match self.config.store_version(schema.name()) {
            Some(target) if target != entity.record().stored_version()? => {
                let (record, path) = migrate_record(
                    schema.name(),
                    schema.migrator(),
                    entity.record().clone(),
                    target,
                )?;
                debug!(model = schema.name(), key = entity.key(), ?path, "migrated record for store");
                record
            }
            _ => entity.record().clone(),
        };
        debug!(bucket = %bucket, key = entity.key(), "storing");
        self.backend.put(&bucket, entity.key(), &record).await
    }

    /// Loads `key`, migrating it to the model's current version. Returns
    /// `None` for missing keys and tombstones.
    pub async fn load(&self, model: &str, key: &str) -> StorageResult<Option<Entity>> {
        let schema = self.schema(model)?;
        let bucket = self.bucket_name(&schema);
        let Some(record) = self.backend.get(&bucket, key).await? else {
            return Ok(None);
        };
        let mut entity = Entity::from_stored(Arc::clone(&schema), key, record)?;
        if entity.was_migrated() {
            debug!(
                model,
                key,
                path = ?entity.migration_path(),
                "migrated record on load"
            );
        }
        if let Some(hooks) = schema.hooks() {
            hooks.after_load(&mut entity)?;
        }
        Ok(Some(entity))
    }

    pub async fn delete(&self, entity: &Entity) -> StorageResult<()> {
        self.delete_key(entity.model_name(), entity.key()).await
    }

    pub async fn delete_key(&self, model: &str, key: &str) -> StorageResult<()> {
        let schema = self.schema(model)?;
        let bucket = self.bucket_name(&schema);
        debug!(bucket = %bucket, key, "deleting");
        self.backend.delete(&bucket, key).await
    }

    // ── Bulk loads ───────────────────────────────────────────────

    /// Loads `keys` in chunks of `load_bunch_size`, fetching each chunk
    /// concurrently. Missing records are dropped; any other failure ends
    /// the chunk with an error.
    pub fn load_all_bunches(
        &self,
        model: &str,
        keys: Vec<String>,
    ) -> BoxStream<'static, StorageResult<Vec<Entity>>> {
        let manager = self.clone();
        let model = model.to_string();
        let chunks: Vec<Vec<String>> = keys
            .chunks(self.config.load_bunch_size.max(1))
            .map(<[String]>::to_vec)
            .collect();
        stream::iter(chunks)
            .then(move |chunk| {
                let manager = manager.clone();
                let model = model.clone();
                async move { manager.load_bunch(&model, &chunk).await }
            })
            .boxed()
    }

    async fn load_bunch(&self, model: &str, keys: &[String]) -> StorageResult<Vec<Entity>> {
        let results = join_all(keys.iter().map(|key| self.load(model, key))).await;
        let mut entities = Vec::with_capacity(results.len());
        for result in results {
            if let Some(entity) = result? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Loads every existing record among `keys`.
    pub async fn load_all(&self, model: &str, keys: Vec<String>) -> StorageResult<Vec<Entity>> {
        self.load_all_bunches(model, keys).try_concat().await
    }

    // ── Index queries ────────────────────────────────────────────

    /// Index name and query for `field` matching `value`, or the range
    /// `value..=end`. Both ends go through the field's index encoding.
    pub fn field_query(
        &self,
        schema: &ModelSchema,
        field: &str,
        value: &Value,
        end: Option<&Value>,
    ) -> StorageResult<(String, IndexQuery)> {
        let (field, index) = schema.indexed_field(field)?;
        let start = field.index_value(value)?;
        let query = match end {
            Some(end) => IndexQuery::range(start, field.index_value(end)?),
            None => IndexQuery::exact(start),
        };
        Ok((index.to_string(), query))
    }

    pub(crate) async fn run_index_page(&self, request: IndexRequest) -> StorageResult<IndexPage> {
        let response = self.backend.index_page(&request).await?;
        debug!(
            bucket = %request.bucket,
            index = %request.index,
            results = response.entries.len(),
            more = response.continuation.is_some(),
            "index page"
        );
        Ok(IndexPage::new(request, response.entries, response.continuation))
    }

    /// Queries an index of `model` by name with a prepared query. Used for
    /// compound indexes whose terms are built by the caller.
    pub async fn query_index(
        &self,
        model: &str,
        index: &str,
        query: IndexQuery,
        options: PageOptions,
    ) -> StorageResult<IndexPage> {
        let schema = self.schema(model)?;
        self.run_index_page(IndexRequest {
            bucket: self.bucket_name(&schema),
            index: index.to_string(),
            query,
            max_results: options.max_results,
            continuation: options.continuation,
            return_terms: options.return_terms,
        })
        .await
    }

    /// Keys whose `field` equals `value`, or lies in `value..=end`. Each key
    /// is listed once even if several of its terms match.
    pub async fn index_keys(
        &self,
        model: &str,
        field: &str,
        value: impl Into<Value>,
        end: Option<Value>,
    ) -> StorageResult<Vec<String>> {
        let page = self
            .index_keys_page(model, field, value, end, PageOptions::default())
            .await?;
        Ok(unique_keys(page.entries()))
    }

    pub async fn index_keys_page(
        &self,
        model: &str,
        field: &str,
        value: impl Into<Value>,
        end: Option<Value>,
        options: PageOptions,
    ) -> StorageResult<IndexPage> {
        let schema = self.schema(model)?;
        let (index, query) = self.field_query(&schema, field, &value.into(), end.as_ref())?;
        self.query_index(model, &index, query, options).await
    }

    /// Exact index lookup returning a [`MapReduceResult`].
    pub async fn index_lookup(
        &self,
        model: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> StorageResult<MapReduceResult> {
        Ok(MapReduceResult::new(
            self.index_keys(model, field, value, None).await?,
        ))
    }

    /// Keys in the index range whose record matches any of `rules`.
    pub async fn index_match(
        &self,
        model: &str,
        rules: &[MatchRule],
        field: &str,
        value: impl Into<Value>,
        end: Option<Value>,
    ) -> StorageResult<MapReduceResult> {
        let schema = self.schema(model)?;
        let (index, query) = self.field_query(&schema, field, &value.into(), end.as_ref())?;
        self.index_match_query(model, rules, &index, query).await
    }

    /// [`index_match`](Self::index_match) over an index by name.
    pub async fn index_match_query(
        &self,
        model: &str,
        rules: &[MatchRule],
        index: &str,
        query: IndexQuery,
    ) -> StorageResult<MapReduceResult> {
        let schema = self.schema(model)?;
        let bucket = self.bucket_name(&schema);
        let keys = tokio::time::timeout(
            self.mapreduce_timeout(),
            self.backend.index_match(&bucket, index, &query, rules),
        )
        .await
        .map_err(|_| StorageError::Timeout(format!("index match on {bucket}/{index}")))??;
        debug!(bucket = %bucket, index, matched = keys.len(), "index match");
        Ok(MapReduceResult::new(keys))
    }

    // ── Bucket listing ───────────────────────────────────────────

    pub async fn all_keys(&self, model: &str) -> StorageResult<Vec<String>> {
        let page = self.all_keys_page(model, PageOptions::default()).await?;
        Ok(page.keys())
    }

    pub async fn all_keys_page(
        &self,
        model: &str,
        options: PageOptions,
    ) -> StorageResult<IndexPage> {
        let schema = self.schema(model)?;
        let bucket = self.bucket_name(&schema);
        self.query_index(model, BUCKET_INDEX, IndexQuery::exact(bucket), options)
            .await
    }

    // ── Search ───────────────────────────────────────────────────

    /// Keys of records whose fields equal every `(field, value)` pair.
    pub async fn search(
        &self,
        model: &str,
        terms: &[(&str, &str)],
    ) -> StorageResult<Vec<String>> {
        if terms.is_empty() {
            return Err(ModelError::Validation("search needs at least one term".into()).into());
        }
        let query = terms
            .iter()
            .map(|(field, value)| {
                format!("{}:{}", escape_search_term(field), escape_search_term(value))
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        self.raw_search(model, &query).await
    }

    /// Runs `query` as given.
    pub async fn raw_search(&self, model: &str, query: &str) -> StorageResult<Vec<String>> {
        let schema = self.schema(model)?;
        let bucket = self.bucket_name(&schema);
        tokio::time::timeout(self.mapreduce_timeout(), self.backend.search(&bucket, query))
            .await
            .map_err(|_| StorageError::Timeout(format!("search on {bucket}")))?
    }

    pub async fn enable_search(&self, model: &str) -> StorageResult<()> {
        let schema = self.schema(model)?;
        let bucket = self.bucket_name(&schema);
        info!(bucket = %bucket, "enabling search");
        self.backend.enable_search(&bucket).await
    }

    // ── Relations ────────────────────────────────────────────────

    /// Keys of records pointing at `entity` through its backlink `name`.
    pub async fn backlinks(&self, entity: &Entity, name: &str) -> StorageResult<Vec<String>> {
        let page = self
            .backlinks_page(entity, name, PageOptions::default())
            .await?;
        Ok(unique_keys(page.entries()))
    }

    pub async fn backlinks_page(
        &self,
        entity: &Entity,
        name: &str,
        options: PageOptions,
    ) -> StorageResult<IndexPage> {
        let backlink = entity.schema().backlink(name)?;
        self.query_index(
            &backlink.model,
            &backlink.index,
            IndexQuery::exact(entity.key()),
            options,
        )
        .await
    }

    /// Loads the target of foreign key `field`, if set and present.
    pub async fn load_related(&self, entity: &Entity, field: &str) -> StorageResult<Option<Entity>> {
        let target = relation_target(entity, field)?;
        match entity.foreign_key(field)? {
            Some(key) => self.load(&target, &key).await,
            None => Ok(None),
        }
    }

    /// Loads the targets of many-to-many `field` in chunks.
    pub fn load_all_related_bunches(
        &self,
        entity: &Entity,
        field: &str,
    ) -> StorageResult<BoxStream<'static, StorageResult<Vec<Entity>>>> {
        let target = relation_target(entity, field)?;
        let keys = entity.related_keys(field)?;
        Ok(self.load_all_bunches(&target, keys))
    }

    // ── Maintenance ──────────────────────────────────────────────

    /// Deletes every record in every registered model's bucket. Meant for
    /// tests running against a dedicated prefix.
    pub async fn purge_all(&self) -> StorageResult<()> {
        let mut buckets = BTreeSet::new();
        for schema in self.registry.models() {
            if !buckets.insert(self.bucket_name(schema)) {
                continue;
            }
            let keys = self.all_keys(schema.name()).await?;
            info!(bucket = %self.bucket_name(schema), keys = keys.len(), "purging bucket");
            for key in keys {
                self.delete_key(schema.name(), &key).await?;
            }
        }
        Ok(())
    }
}

fn relation_target(entity: &Entity, field: &str) -> StorageResult<String> {
    let definition = entity.schema().field(field)?;
    definition.target().map(str::to_string).ok_or_else(|| {
        ModelError::Validation(format!(
            "{}.{field} is not a relation",
            entity.model_name()
        ))
        .into()
    })
}

fn unique_keys(entries: &[IndexEntry]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    entries
        .iter()
        .filter(|e| seen.insert(e.key.as_str()))
        .map(|e| e.key.clone())
        .collect()
}
