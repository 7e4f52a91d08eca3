use pretty_assertions::assert_eq;
use smsgw_storage::{CacheStore, MemoryCacheStore, StorageError};
use std::time::Duration;

// ── Strings and counters ─────────────────────────────────────────

#[tokio::test]
async fn counters_start_at_zero() {
    let cache = MemoryCacheStore::new();
    assert_eq!(cache.incr_by("n", 2).await.unwrap(), 2);
    assert_eq!(cache.incr_by("n", -1).await.unwrap(), 1);
    assert_eq!(cache.get("n").await.unwrap().as_deref(), Some("1"));
}

#[tokio::test]
async fn set_get_delete() {
    let cache = MemoryCacheStore::new();
    cache.set("k", "v").await.unwrap();
    assert!(cache.exists("k").await.unwrap());
    assert!(cache.delete("k").await.unwrap());
    assert!(!cache.delete("k").await.unwrap());
    assert_eq!(cache.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn wrong_type_is_an_error() {
    let cache = MemoryCacheStore::new();
    cache.sadd("s", "a").await.unwrap();
    let err = cache.get("s").await.unwrap_err();
    assert!(matches!(err, StorageError::Cache(msg) if msg.starts_with("WRONGTYPE")));
    cache.set("str", "abc").await.unwrap();
    assert!(cache.incr_by("str", 1).await.is_err());
}

// ── Hashes ───────────────────────────────────────────────────────

#[tokio::test]
async fn hash_counters() {
    let cache = MemoryCacheStore::new();
    cache.hset("h", "sent", "0").await.unwrap();
    cache.hincr_by("h", "sent", 3).await.unwrap();
    cache.hincr_by("h", "ack", 1).await.unwrap();
    let all = cache.hgetall("h").await.unwrap();
    assert_eq!(all.get("sent").map(String::as_str), Some("3"));
    assert_eq!(all.get("ack").map(String::as_str), Some("1"));
    assert_eq!(cache.hget("h", "nack").await.unwrap(), None);
    assert!(cache.hgetall("missing").await.unwrap().is_empty());
}

// ── Sets ─────────────────────────────────────────────────────────

#[tokio::test]
async fn set_membership() {
    let cache = MemoryCacheStore::new();
    assert!(cache.sadd("s", "a").await.unwrap());
    assert!(!cache.sadd("s", "a").await.unwrap());
    cache.sadd("s", "b").await.unwrap();
    assert_eq!(cache.scard("s").await.unwrap(), 2);
    assert!(cache.sismember("s", "b").await.unwrap());
    assert!(!cache.sismember("s", "c").await.unwrap());
}

// ── Sorted sets ──────────────────────────────────────────────────

async fn scored() -> MemoryCacheStore {
    let cache = MemoryCacheStore::new();
    for (member, score) in [("c", 3.0), ("a", 1.0), ("b", 2.0), ("d", 4.0)] {
        cache.zadd("z", member, score).await.unwrap();
    }
    cache
}

fn members(range: Vec<(String, f64)>) -> Vec<String> {
    range.into_iter().map(|(m, _)| m).collect()
}

#[tokio::test]
async fn zrange_orders_by_score() {
    let cache = scored().await;
    assert_eq!(
        members(cache.zrange("z", 0, -1, false).await.unwrap()),
        vec!["a", "b", "c", "d"]
    );
    assert_eq!(
        members(cache.zrange("z", 0, 1, true).await.unwrap()),
        vec!["d", "c"]
    );
    assert_eq!(
        members(cache.zrange("z", -2, 10, false).await.unwrap()),
        vec!["c", "d"]
    );
    assert!(cache.zrange("z", 3, 1, false).await.unwrap().is_empty());
    assert!(cache.zrange("none", 0, -1, false).await.unwrap().is_empty());
}

#[tokio::test]
async fn zadd_rescores_existing_member() {
    let cache = scored().await;
    assert!(!cache.zadd("z", "a", 10.0).await.unwrap());
    assert_eq!(cache.zscore("z", "a").await.unwrap(), Some(10.0));
    assert_eq!(cache.zcard("z").await.unwrap(), 4);
}

#[tokio::test]
async fn zrem_range_by_rank_trims_lowest() {
    let cache = scored().await;
    assert_eq!(cache.zrem_range_by_rank("z", 0, -3).await.unwrap(), 2);
    assert_eq!(
        members(cache.zrange("z", 0, -1, false).await.unwrap()),
        vec!["c", "d"]
    );
}

// ── Expiry ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn keys_expire_after_ttl() {
    let cache = MemoryCacheStore::new();
    cache.set("k", "v").await.unwrap();
    assert!(cache.expire("k", Duration::from_secs(10)).await.unwrap());
    assert!(!cache.expire("missing", Duration::from_secs(10)).await.unwrap());

    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(cache.exists("k").await.unwrap());
    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!cache.exists("k").await.unwrap());
    assert!(cache.keys("").await.unwrap().is_empty());
}

#[tokio::test]
async fn keys_filters_by_prefix() {
    let cache = MemoryCacheStore::new();
    cache.set("batch:1:a", "x").await.unwrap();
    cache.set("batch:1:b", "x").await.unwrap();
    cache.set("batch:2:a", "x").await.unwrap();
    assert_eq!(
        cache.keys("batch:1:").await.unwrap(),
        vec!["batch:1:a", "batch:1:b"]
    );
}
