use pretty_assertions::assert_eq;
use smsgw_message_store::{MessageStoreConfig, MessageStoreError};
use std::io::Write;
use std::time::Duration;

#[test]
fn defaults() {
    let cfg = MessageStoreConfig::default();
    assert_eq!(cfg.default_max_results, 1000);
    assert_eq!(cfg.truncate_message_key_count_at, 2000);
    assert_eq!(cfg.query_ttl(), Duration::from_secs(86_400));
    assert_eq!(cfg.cache_prefix, "message_store");
}

#[test]
fn from_toml_fills_defaults() {
    let cfg = MessageStoreConfig::from_toml_str(
        r#"
        truncate_message_key_count_at = 50
        cache_prefix = "gateway"
        "#,
    )
    .unwrap();
    assert_eq!(cfg.truncate_message_key_count_at, 50);
    assert_eq!(cfg.cache_prefix, "gateway");
    assert_eq!(cfg.default_max_results, 1000);
}

#[test]
fn rejects_zero_sizes() {
    for toml in ["default_max_results = 0", "truncate_message_key_count_at = 0"] {
        let err = MessageStoreConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, MessageStoreError::Config(_)), "{toml}");
    }
}

#[test]
fn rejects_wrong_types() {
    let err = MessageStoreConfig::from_toml_str("default_query_ttl_secs = \"soon\"").unwrap_err();
    assert!(matches!(err, MessageStoreError::Config(_)));
}

#[test]
fn from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "default_query_ttl_secs = 60").unwrap();
    let cfg = MessageStoreConfig::from_file(file.path()).unwrap();
    assert_eq!(cfg.query_ttl(), Duration::from_secs(60));
}

#[test]
fn missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = MessageStoreConfig::from_file(dir.path().join("store.toml")).unwrap_err();
    assert!(matches!(err, MessageStoreError::Config(_)));
    assert!(!err.is_validation());
}
