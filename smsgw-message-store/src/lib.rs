//! The SMS gateway message store.
//!
//! Records every batch, outbound and inbound message and delivery event,
//! and keeps per-batch statistics in a fast cache.
//!
//! # Architecture
//!
//! ```text
//! MessageStore / BlockingMessageStore
//!     │                     │
//!  Manager              MessageStoreCache
//!  (models, migrators,      │
//!   compound indexes)    CacheStore
//!     │
//!  KvBackend
//! ```
//!
//! - [`models`] declares the stored models. Messages and events carry
//!   compound index fields (`<batch>$<timestamp>$<address>`) recomputed on
//!   every save.
//! - [`migrators`] upgrades records written by older versions on load and
//!   downgrades them on save when a lower store version is configured.
//! - [`MessageStoreCache`] holds key sets, address sets and status counters
//!   per batch. It is an approximation; [`MessageStore::reconcile_cache`]
//!   rebuilds it from the indexes.
//! - Match queries run in the background and park their results in the
//!   cache under a token.

pub mod blocking;
pub mod cache;
pub mod config;
mod error;
pub mod index_page;
pub mod migrators;
pub mod models;
pub mod store;

pub use blocking::BlockingMessageStore;
pub use cache::{Direction, MessageStoreCache, STATUS_FIELDS, query_token, timestamp_score};
pub use config::MessageStoreConfig;
pub use error::{MessageStoreError, MessageStoreResult};
pub use index_page::{FormattedPage, IndexFormat, IndexRow, format_row};
pub use models::registry;
pub use store::{BatchTarget, MessageStats, MessageStore, TimeRange};
