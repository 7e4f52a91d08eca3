//! Manager and backend configuration, loadable from TOML.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Default number of records loaded concurrently by bulk loads.
pub const DEFAULT_LOAD_BUNCH_SIZE: usize = 100;

/// Default timeout for map-reduce and search calls.
pub const DEFAULT_MAPREDUCE_TIMEOUT_SECS: u64 = 240;

/// Settings shared by every manager over one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Prepended to every model bucket name.
    pub bucket_prefix: String,
    /// Records fetched concurrently per chunk of `load_all_bunches`.
    pub load_bunch_size: usize,
    pub mapreduce_timeout_secs: u64,
    /// Version to write per model name. Models not listed are written at
    /// their current version; `None` writes unversioned records.
    pub store_versions: BTreeMap<String, Option<u32>>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            bucket_prefix: String::new(),
            load_bunch_size: DEFAULT_LOAD_BUNCH_SIZE,
            mapreduce_timeout_secs: DEFAULT_MAPREDUCE_TIMEOUT_SECS,
            store_versions: BTreeMap::new(),
        }
    }
}

impl ManagerConfig {
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            bucket_prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(contents: &str) -> StorageResult<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| StorageError::Config(format!("invalid manager config: {e}")))?;
        if config.load_bunch_size == 0 {
            return Err(StorageError::Config("load_bunch_size must be positive".into()));
        }
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| StorageError::Config(format!("failed to read {path:?}: {e}")))?;
        let config = Self::from_toml_str(&contents)?;
        info!("Loaded manager config from {:?}", path);
        Ok(config)
    }

    /// Version records of `model` are written at, if overridden.
    #[must_use]
    pub fn store_version(&self, model: &str) -> Option<Option<u32>> {
        self.store_versions.get(model).copied()
    }
}

/// Connection settings for [`RiakHttpBackend`](crate::RiakHttpBackend).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiakConfig {
    pub base_url: String,
    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
    /// Server-side timeout sent with map-reduce jobs.
    pub mapreduce_timeout_secs: u64,
}

impl Default for RiakConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8098".to_string(),
            timeout_secs: 30,
            mapreduce_timeout_secs: DEFAULT_MAPREDUCE_TIMEOUT_SECS,
        }
    }
}

impl RiakConfig {
    pub fn from_toml_str(contents: &str) -> StorageResult<Self> {
        toml::from_str(contents)
            .map_err(|e| StorageError::Config(format!("invalid riak config: {e}")))
    }
}
