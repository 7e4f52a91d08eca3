//! Index query results.

use crate::backend::{IndexEntry, IndexRequest};
use crate::error::StorageResult;
use crate::manager::Manager;

/// Paging parameters for index queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageOptions {
    /// `None` returns every match in one page.
    pub max_results: Option<usize>,
    pub continuation: Option<String>,
    pub return_terms: bool,
}

impl PageOptions {
    #[must_use]
    pub fn max_results(max_results: usize) -> Self {
        Self {
            max_results: Some(max_results),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_continuation(mut self, continuation: Option<String>) -> Self {
        self.continuation = continuation;
        self
    }

    #[must_use]
    pub fn with_terms(mut self) -> Self {
        self.return_terms = true;
        self
    }
}

/// One page of an index query. Pages hold no server-side resources, so an
/// unfinished scan can simply be dropped.
#[derive(Debug, Clone)]
pub struct IndexPage {
    request: IndexRequest,
    entries: Vec<IndexEntry>,
    continuation: Option<String>,
}

impl IndexPage {
    pub(crate) fn new(
        request: IndexRequest,
        entries: Vec<IndexEntry>,
        continuation: Option<String>,
    ) -> Self {
        Self {
            request,
            entries,
            continuation,
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key.clone()).collect()
    }

    /// `(key, term)` pairs. Terms are only present when requested.
    pub fn terms(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|e| (e.key.as_str(), e.term.as_deref()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn has_next_page(&self) -> bool {
        self.continuation.is_some()
    }

    #[must_use]
    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    /// Fetches the following page, or `None` if this was the last one.
    pub async fn next_page(&self, manager: &Manager) -> StorageResult<Option<IndexPage>> {
        let Some(continuation) = &self.continuation else {
            return Ok(None);
        };
        let mut request = self.request.clone();
        request.continuation = Some(continuation.clone());
        manager.run_index_page(request).await.map(Some)
    }
}

impl IntoIterator for IndexPage {
    type Item = IndexEntry;
    type IntoIter = std::vec::IntoIter<IndexEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Keys produced by a map-reduce style query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapReduceResult {
    keys: Vec<String>,
}

impl MapReduceResult {
    #[must_use]
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }

    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn into_keys(self) -> Vec<String> {
        self.keys
    }
}
