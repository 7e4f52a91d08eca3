//! Persistence for the SMS gateway's models.
//!
//! # Architecture
//!
//! ```text
//! Manager / BlockingManager      (model-aware: hooks, migrations, index terms)
//!          │
//!      KvBackend                 (records + secondary indexes)
//!    ┌─────┴──────┐
//! MemoryBackend  RiakHttpBackend
//!
//! CacheStore ── MemoryCacheStore (counters, sets and sorted sets)
//! ```
//!
//! The async [`Manager`] is the primary interface. [`BlockingManager`] runs
//! the same code on an owned runtime for synchronous callers; both can wrap
//! one backend handle and observe the same records.

pub mod backend;
pub mod blocking;
pub mod cache_store;
pub mod config;
mod error;
pub mod manager;
pub mod memory;
pub mod page;
pub mod riak;

pub use backend::{
    BUCKET_INDEX, IndexEntry, IndexQuery, IndexRequest, IndexResponse, KvBackend, MatchRule,
};
pub use blocking::{BlockingBunches, BlockingManager, blocking_runtime};
pub use cache_store::{CacheStore, MemoryCacheStore};
pub use config::{ManagerConfig, RiakConfig};
pub use error::{StorageError, StorageResult};
pub use manager::{Manager, escape_search_term};
pub use memory::MemoryBackend;
pub use page::{IndexPage, MapReduceResult, PageOptions};
pub use riak::RiakHttpBackend;
