use pretty_assertions::assert_eq;
use serde_json::json;
use smsgw_model::Record;
use smsgw_storage::{
    IndexQuery, IndexRequest, KvBackend, MatchRule, RiakConfig, RiakHttpBackend, StorageError,
};
use wiremock::matchers::{body_json, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> RiakHttpBackend {
    RiakHttpBackend::new(&RiakConfig {
        base_url: server.uri(),
        ..RiakConfig::default()
    })
    .unwrap()
}

fn request(query: IndexQuery) -> IndexRequest {
    IndexRequest {
        bucket: "msgs".into(),
        index: "tag_bin".into(),
        query,
        max_results: None,
        continuation: None,
        return_terms: false,
    }
}

// ── Config ───────────────────────────────────────────────────────

#[test]
fn riak_config_default() {
    let cfg = RiakConfig::default();
    assert_eq!(cfg.base_url, "http://127.0.0.1:8098");
    assert_eq!(cfg.timeout_secs, 30);
    assert_eq!(cfg.mapreduce_timeout_secs, 240);
}

#[test]
fn riak_backend_name() {
    let backend = RiakHttpBackend::new(&RiakConfig::default()).unwrap();
    assert_eq!(backend.name(), "riak");
}

// ── Objects ──────────────────────────────────────────────────────

#[tokio::test]
async fn get_parses_body_and_index_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/buckets/msgs/keys/k1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-riak-index-tag_bin", "red, blue")
                .insert_header("x-riak-index-batch_bin", "b1")
                .set_body_json(json!({"name": "alice", "$VERSION": 2})),
        )
        .mount(&server)
        .await;

    let record = backend(&server).get("msgs", "k1").await.unwrap().unwrap();
    assert_eq!(record.data.get("name"), Some(&json!("alice")));
    assert_eq!(record.version(), Some(2));
    let tags: Vec<&str> = record.index_values("tag_bin").collect();
    assert_eq!(tags, vec!["blue", "red"]);
    assert_eq!(record.index_values("batch_bin").collect::<Vec<_>>(), vec!["b1"]);
}

#[tokio::test]
async fn get_missing_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/buckets/msgs/keys/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    assert!(backend(&server).get("msgs", "gone").await.unwrap().is_none());
}

#[tokio::test]
async fn get_with_siblings_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/buckets/msgs/keys/k"))
        .respond_with(ResponseTemplate::new(300))
        .mount(&server)
        .await;
    let err = backend(&server).get("msgs", "k").await.unwrap_err();
    assert!(matches!(err, StorageError::Backend(_)));
}

#[tokio::test]
async fn put_sends_data_and_index_headers() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/buckets/msgs/keys/k1"))
        .and(header_exists("x-riak-index-tag_bin"))
        .and(body_json(json!({"name": "alice"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut record = Record::new();
    record.data.insert("name".into(), json!("alice"));
    record.add_index("tag_bin", "red");
    record.add_index("tag_bin", "blue");
    backend(&server).put("msgs", "k1", &record).await.unwrap();
}

#[tokio::test]
async fn put_rejects_index_values_with_commas() {
    let server = MockServer::start().await;
    let mut record = Record::new();
    record.add_index("tag_bin", "a,b");
    let err = backend(&server).put("msgs", "k1", &record).await.unwrap_err();
    assert!(matches!(err, StorageError::Backend(_)));
}

#[tokio::test]
async fn delete_tolerates_missing_key() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/buckets/msgs/keys/k1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    backend(&server).delete("msgs", "k1").await.unwrap();
}

#[tokio::test]
async fn server_errors_are_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    let err = backend(&server).delete("msgs", "k1").await.unwrap_err();
    assert!(err.to_string().contains("boom"));
}

// ── Secondary indexes ────────────────────────────────────────────

#[tokio::test]
async fn exact_index_page_with_continuation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/buckets/msgs/index/tag_bin/red"))
        .and(query_param("max_results", "2"))
        .and(query_param("continuation", "c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keys": ["k3", "k4"],
            "continuation": "c2",
        })))
        .mount(&server)
        .await;

    let mut req = request(IndexQuery::exact("red"));
    req.max_results = Some(2);
    req.continuation = Some("c1".into());
    let response = backend(&server).index_page(&req).await.unwrap();
    let keys: Vec<&str> = response.entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["k3", "k4"]);
    assert_eq!(response.continuation.as_deref(), Some("c2"));
}

#[tokio::test]
async fn range_index_page_with_terms() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/buckets/msgs/index/tag_bin/a/z"))
        .and(query_param("return_terms", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"blue": "k2"}, {"red": "k1"}],
        })))
        .mount(&server)
        .await;

    let mut req = request(IndexQuery::range("a", "z"));
    req.return_terms = true;
    let response = backend(&server).index_page(&req).await.unwrap();
    let pairs: Vec<(&str, Option<&str>)> = response
        .entries
        .iter()
        .map(|e| (e.key.as_str(), e.term.as_deref()))
        .collect();
    assert_eq!(pairs, vec![("k2", Some("blue")), ("k1", Some("red"))]);
    assert!(response.continuation.is_none());
}

// ── Map-reduce and search ────────────────────────────────────────

#[tokio::test]
async fn index_match_posts_mapreduce_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mapred"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["k1", "k2", "k1"])))
        .expect(1)
        .mount(&server)
        .await;

    let keys = backend(&server)
        .index_match(
            "msgs",
            "tag_bin",
            &IndexQuery::exact("red"),
            &[MatchRule::new("content", "hello", "i")],
        )
        .await
        .unwrap();
    assert_eq!(keys, vec!["k1", "k2"]);
}

#[tokio::test]
async fn index_match_validates_rules_before_sending() {
    let server = MockServer::start().await;
    let err = backend(&server)
        .index_match(
            "msgs",
            "tag_bin",
            &IndexQuery::exact("red"),
            &[MatchRule::new("content", "(", "")],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Backend(_)));
}

#[tokio::test]
async fn search_reads_document_ids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/solr/msgs/select"))
        .and(query_param("q", "name:alice"))
        .and(query_param("wt", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {"numFound": 1, "docs": [{"id": "k1", "name": "alice"}]},
        })))
        .mount(&server)
        .await;
    let keys = backend(&server).search("msgs", "name:alice").await.unwrap();
    assert_eq!(keys, vec!["k1"]);
}

#[tokio::test]
async fn enable_search_installs_precommit_hook() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/buckets/msgs/props"))
        .and(body_json(json!({"props": {
            "search": true,
            "precommit": [{"mod": "riak_search_kv_hook", "fun": "precommit"}],
        }})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    backend(&server).enable_search("msgs").await.unwrap();
}
