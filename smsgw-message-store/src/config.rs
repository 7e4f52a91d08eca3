//! Message store configuration.

use crate::error::{MessageStoreError, MessageStoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Page size used when a caller does not pass `max_results`.
pub const DEFAULT_MAX_RESULTS: usize = 1000;

/// Number of message keys kept per batch and direction before the cache
/// falls back to counting.
pub const DEFAULT_TRUNCATE_MESSAGE_KEY_COUNT_AT: usize = 2000;

/// Lifetime of stored match-query results.
pub const DEFAULT_QUERY_TTL_SECS: u64 = 86_400;

/// Settings for [`MessageStore`](crate::MessageStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageStoreConfig {
    pub default_max_results: usize,
    pub truncate_message_key_count_at: usize,
    pub default_query_ttl_secs: u64,
    /// Prepended to every cache key, e.g. `message_store`.
    pub cache_prefix: String,
}

impl Default for MessageStoreConfig {
    fn default() -> Self {
        Self {
            default_max_results: DEFAULT_MAX_RESULTS,
            truncate_message_key_count_at: DEFAULT_TRUNCATE_MESSAGE_KEY_COUNT_AT,
            default_query_ttl_secs: DEFAULT_QUERY_TTL_SECS,
            cache_prefix: "message_store".to_string(),
        }
    }
}

impl MessageStoreConfig {
    pub fn from_toml_str(s: &str) -> MessageStoreResult<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| MessageStoreError::Config(format!("invalid message store config: {e}")))?;
        if config.default_max_results == 0 {
            return Err(MessageStoreError::Config(
                "default_max_results must be positive".to_string(),
            ));
        }
        if config.truncate_message_key_count_at == 0 {
            return Err(MessageStoreError::Config(
                "truncate_message_key_count_at must be positive".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> MessageStoreResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MessageStoreError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&contents)?;
        info!(path = %path.display(), "loaded message store config");
        Ok(config)
    }

    #[must_use]
    pub fn query_ttl(&self) -> Duration {
        Duration::from_secs(self.default_query_ttl_secs)
    }
}
