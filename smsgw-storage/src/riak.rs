//! Riak HTTP backend.
//!
//! Talks to a Riak KV node over its HTTP interface:
//!
//! - objects: `/buckets/{bucket}/keys/{key}`, with one `x-riak-index-*`
//!   header per index (values comma-joined)
//! - secondary indexes: `/buckets/{bucket}/index/{index}/{value}` or
//!   `.../{start}/{end}`, paginated with `max_results` and `continuation`
//! - regex matching: a JavaScript map phase posted to `/mapred`
//! - search: `/solr/{bucket}/select`
//!
//! Index values must not contain commas, since the HTTP interface joins
//! multiple values of one index with them.

use crate::backend::{
    IndexEntry, IndexQuery, IndexRequest, IndexResponse, KvBackend, MatchRule,
};
use crate::config::RiakConfig;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value as Json, json};
use smsgw_model::Record;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::debug;

const INDEX_HEADER_PREFIX: &str = "x-riak-index-";

/// Map phase emitting the key of every object with a field matching any
/// rule in `arg`.
const MATCH_MAP_SOURCE: &str = r#"function(value, keyData, arg) {
  if (value.not_found) { return []; }
  var data = JSON.parse(value.values[0].data);
  for (var i = 0; i < arg.length; i++) {
    var rule = arg[i];
    var field = data[rule.key];
    if (field === undefined || field === null) { continue; }
    var flags = rule.flags.replace(/g/g, "");
    if (new RegExp(rule.pattern, flags).test(String(field))) { return [value.key]; }
  }
  return [];
}"#;

#[derive(Debug, Deserialize)]
struct IndexBody {
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    results: Vec<BTreeMap<String, String>>,
    continuation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SolrBody {
    response: SolrResponse,
}

#[derive(Debug, Deserialize)]
struct SolrResponse {
    docs: Vec<SolrDoc>,
}

#[derive(Debug, Deserialize)]
struct SolrDoc {
    id: String,
}

/// Client for a Riak node's HTTP API.
#[derive(Debug, Clone)]
pub struct RiakHttpBackend {
    client: Client,
    base_url: String,
    mapreduce_timeout: Duration,
}

impl RiakHttpBackend {
    pub fn new(config: &RiakConfig) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StorageError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            mapreduce_timeout: Duration::from_secs(config.mapreduce_timeout_secs),
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/buckets/{}/keys/{}",
            self.base_url,
            urlencoding::encode(bucket),
            urlencoding::encode(key)
        )
    }

    fn index_url(&self, bucket: &str, index: &str, query: &IndexQuery) -> String {
        let base = format!(
            "{}/buckets/{}/index/{}",
            self.base_url,
            urlencoding::encode(bucket),
            urlencoding::encode(index)
        );
        match query {
            IndexQuery::Exact { value } => format!("{base}/{}", urlencoding::encode(value)),
            IndexQuery::Range { start, end } => format!(
                "{base}/{}/{}",
                urlencoding::encode(start),
                urlencoding::encode(end)
            ),
        }
    }

    fn index_inputs(bucket: &str, index: &str, query: &IndexQuery) -> Json {
        match query {
            IndexQuery::Exact { value } => {
                json!({"bucket": bucket, "index": index, "key": value})
            }
            IndexQuery::Range { start, end } => {
                json!({"bucket": bucket, "index": index, "start": start, "end": end})
            }
        }
    }
}

/// Collects `x-riak-index-*` headers into index entries.
fn parse_index_headers(headers: &HeaderMap) -> BTreeSet<(String, String)> {
    let mut indexes = BTreeSet::new();
    for (name, value) in headers {
        let Some(index) = name.as_str().strip_prefix(INDEX_HEADER_PREFIX) else {
            continue;
        };
        let Ok(value) = value.to_str() else { continue };
        for v in value.split(',') {
            let v = v.trim();
            if !v.is_empty() {
                indexes.insert((index.to_string(), v.to_string()));
            }
        }
    }
    indexes
}

/// Groups a record's index entries into one comma-joined header per index.
fn index_headers(record: &Record) -> StorageResult<Vec<(String, String)>> {
    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (index, value) in &record.indexes {
        if value.contains(',') {
            return Err(StorageError::Backend(format!(
                "index value {value:?} for {index} contains a comma"
            )));
        }
        grouped.entry(index.as_str()).or_default().push(value.as_str());
    }
    Ok(grouped
        .into_iter()
        .map(|(index, values)| (format!("{INDEX_HEADER_PREFIX}{index}"), values.join(", ")))
        .collect())
}

async fn unexpected(response: reqwest::Response, what: &str) -> StorageError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    StorageError::Backend(format!("{what} failed with {status}: {body}"))
}

#[async_trait]
impl KvBackend for RiakHttpBackend {
    fn name(&self) -> &'static str {
        "riak"
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Option<Record>> {
        debug!(bucket, key, "riak get");
        let response = self
            .client
            .get(self.object_url(bucket, key))
            .header("Accept", "application/json")
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::MULTIPLE_CHOICES => Err(StorageError::Backend(format!(
                "{bucket}/{key} has siblings"
            ))),
            status if status.is_success() => {
                let indexes = parse_index_headers(response.headers());
                let data: Map<String, Json> = response.json().await?;
                Ok(Some(Record { data, indexes }))
            }
            _ => Err(unexpected(response, &format!("GET {bucket}/{key}")).await),
        }
    }

    async fn put(&self, bucket: &str, key: &str, record: &Record) -> StorageResult<()> {
        debug!(bucket, key, "riak put");
        let mut request = self
            .client
            .put(self.object_url(bucket, key))
            .header("Content-Type", "application/json")
            .body(serde_json::to_vec(&record.data)?);
        for (name, value) in index_headers(record)? {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(unexpected(response, &format!("PUT {bucket}/{key}")).await)
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        debug!(bucket, key, "riak delete");
        let response = self.client.delete(self.object_url(bucket, key)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            _ => Err(unexpected(response, &format!("DELETE {bucket}/{key}")).await),
        }
    }

    async fn index_page(&self, request: &IndexRequest) -> StorageResult<IndexResponse> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(max) = request.max_results {
            params.push(("max_results", max.to_string()));
        }
        if let Some(continuation) = &request.continuation {
            params.push(("continuation", continuation.clone()));
        }
        if request.return_terms {
            params.push(("return_terms", "true".to_string()));
        }
        let response = self
            .client
            .get(self.index_url(&request.bucket, &request.index, &request.query))
            .query(&params)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(unexpected(response, &format!("index query on {}", request.index)).await);
        }
        let body: IndexBody = response.json().await?;
        let entries = if body.results.is_empty() {
            let exact = match &request.query {
                IndexQuery::Exact { value } if request.return_terms => Some(value.clone()),
                _ => None,
            };
            body.keys
                .into_iter()
                .map(|key| IndexEntry {
                    key,
                    term: exact.clone(),
                })
                .collect()
        } else {
            body.results
                .into_iter()
                .flat_map(|result| result.into_iter())
                .map(|(term, key)| IndexEntry {
                    key,
                    term: Some(term),
                })
                .collect()
        };
        Ok(IndexResponse {
            entries,
            continuation: body.continuation,
        })
    }

    async fn index_match(
        &self,
        bucket: &str,
        index: &str,
        query: &IndexQuery,
        rules: &[MatchRule],
    ) -> StorageResult<Vec<String>> {
        for rule in rules {
            rule.compile()?;
        }
        let job = json!({
            "inputs": Self::index_inputs(bucket, index, query),
            "query": [{"map": {
                "language": "javascript",
                "source": MATCH_MAP_SOURCE,
                "arg": rules,
                "keep": true,
            }}],
            "timeout": self.mapreduce_timeout.as_millis() as u64,
        });
        debug!(bucket, index, rules = rules.len(), "riak index match");
        let response = self
            .client
            .post(format!("{}/mapred", self.base_url))
            .json(&job)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(unexpected(response, "map-reduce").await);
        }
        let keys: Vec<String> = response.json().await?;
        let mut seen = BTreeSet::new();
        Ok(keys.into_iter().filter(|k| seen.insert(k.clone())).collect())
    }

    async fn search(&self, bucket: &str, query: &str) -> StorageResult<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/solr/{}/select", self.base_url, urlencoding::encode(bucket)))
            .query(&[("q", query), ("wt", "json")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(unexpected(response, "search").await);
        }
        let body: SolrBody = response.json().await?;
        Ok(body.response.docs.into_iter().map(|d| d.id).collect())
    }

    async fn enable_search(&self, bucket: &str) -> StorageResult<()> {
        let props = json!({"props": {
            "search": true,
            "precommit": [{"mod": "riak_search_kv_hook", "fun": "precommit"}],
        }});
        let response = self
            .client
            .put(format!(
                "{}/buckets/{}/props",
                self.base_url,
                urlencoding::encode(bucket)
            ))
            .json(&props)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(unexpected(response, "enable search").await)
        }
    }
}

