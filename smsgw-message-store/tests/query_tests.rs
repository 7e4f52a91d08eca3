use chrono::{DateTime, NaiveDateTime};
use pretty_assertions::assert_eq;
use smsgw_message_store::{
    BatchTarget, Direction, MessageStore, MessageStoreConfig, MessageStoreError, query_token,
};
use smsgw_storage::{ManagerConfig, MatchRule, MemoryBackend, MemoryCacheStore};
use smsgw_types::TransportUserMessage;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn message_store() -> MessageStore {
    MessageStore::open(
        Arc::new(MemoryBackend::new()),
        Arc::new(MemoryCacheStore::new()),
        ManagerConfig::default(),
        MessageStoreConfig::default(),
    )
    .unwrap()
}

fn ts(secs: i64) -> NaiveDateTime {
    DateTime::from_timestamp(1_700_000_000 + secs, 0)
        .unwrap()
        .naive_utc()
}

async fn batch_with_contents(store: &MessageStore) -> String {
    let batch_id = store.batch_start(&[], BTreeMap::new()).await.unwrap();
    for (secs, content) in [(1, "hello world"), (2, "goodbye"), (3, "Hello again")] {
        let msg = TransportUserMessage::new("+1", "+27000")
            .with_message_id(format!("m{secs}"))
            .with_content(content)
            .with_timestamp(ts(secs));
        store
            .add_outbound_message(&msg, &BatchTarget::batch(&batch_id))
            .await
            .unwrap();
    }
    batch_id
}

fn hello() -> Vec<MatchRule> {
    vec![MatchRule::new("msg.content", "hello", "i")]
}

// ── Tokens ───────────────────────────────────────────────────────

#[test]
fn tokens_identify_queries() {
    let rules = hello();
    assert_eq!(
        query_token(Direction::Outbound, &rules),
        query_token(Direction::Outbound, &hello())
    );
    assert_ne!(
        query_token(Direction::Outbound, &rules),
        query_token(Direction::Inbound, &rules)
    );
    assert_ne!(
        query_token(Direction::Outbound, &rules),
        query_token(Direction::Outbound, &[MatchRule::new("msg.content", "hello", "")])
    );
    assert_eq!(query_token(Direction::Outbound, &rules).len(), 64);
}

// ── Running queries ──────────────────────────────────────────────

#[tokio::test]
async fn waited_query_stores_results_newest_first() {
    let store = message_store();
    let batch_id = batch_with_contents(&store).await;
    let token = store
        .find_outbound_keys_matching(&batch_id, &hello(), None, true)
        .await
        .unwrap();
    assert_eq!(token, query_token(Direction::Outbound, &hello()));

    assert!(!store.is_query_in_progress(&batch_id, &token).await.unwrap());
    assert_eq!(store.count_keys_for_token(&batch_id, &token).await.unwrap(), 2);
    assert_eq!(
        store
            .get_keys_for_token(&batch_id, &token, 0, -1, false)
            .await
            .unwrap(),
        vec!["m3", "m1"]
    );
    assert_eq!(
        store
            .get_keys_for_token(&batch_id, &token, 0, 0, true)
            .await
            .unwrap(),
        vec!["m1"]
    );
}

#[tokio::test]
async fn background_query_finishes() {
    let store = message_store();
    let batch_id = batch_with_contents(&store).await;
    let token = store
        .find_outbound_keys_matching(&batch_id, &hello(), None, false)
        .await
        .unwrap();

    for _ in 0..1000 {
        if !store.is_query_in_progress(&batch_id, &token).await.unwrap() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(!store.is_query_in_progress(&batch_id, &token).await.unwrap());
    assert_eq!(store.count_keys_for_token(&batch_id, &token).await.unwrap(), 2);
}

#[tokio::test]
async fn any_rule_may_match() {
    let store = message_store();
    let batch_id = batch_with_contents(&store).await;
    let rules = vec![
        MatchRule::new("msg.content", "^good", ""),
        MatchRule::new("msg.content", "again", ""),
    ];
    let token = store
        .find_outbound_keys_matching(&batch_id, &rules, None, true)
        .await
        .unwrap();
    assert_eq!(
        store
            .get_keys_for_token(&batch_id, &token, 0, -1, false)
            .await
            .unwrap(),
        vec!["m3", "m2"]
    );
}

#[tokio::test]
async fn query_is_scoped_to_batch_and_direction() {
    let store = message_store();
    let batch_id = batch_with_contents(&store).await;
    let other = store.batch_start(&[], BTreeMap::new()).await.unwrap();
    let msg = TransportUserMessage::new("+27000", "+1")
        .with_message_id("in1")
        .with_content("hello from a user");
    store
        .add_inbound_message(&msg, &BatchTarget::batch(&other))
        .await
        .unwrap();

    let token = store
        .find_inbound_keys_matching(&batch_id, &hello(), None, true)
        .await
        .unwrap();
    assert_eq!(store.count_keys_for_token(&batch_id, &token).await.unwrap(), 0);

    let token = store
        .find_inbound_keys_matching(&other, &hello(), None, true)
        .await
        .unwrap();
    assert_eq!(
        store
            .get_keys_for_token(&other, &token, 0, -1, false)
            .await
            .unwrap(),
        vec!["in1"]
    );
}

#[tokio::test]
async fn rerun_replaces_results() {
    let store = message_store();
    let batch_id = batch_with_contents(&store).await;
    let token = store
        .find_outbound_keys_matching(&batch_id, &hello(), None, true)
        .await
        .unwrap();
    let msg = TransportUserMessage::new("+1", "+27000")
        .with_message_id("m4")
        .with_content("hello there")
        .with_timestamp(ts(4));
    store
        .add_outbound_message(&msg, &BatchTarget::batch(&batch_id))
        .await
        .unwrap();

    store
        .find_outbound_keys_matching(&batch_id, &hello(), None, true)
        .await
        .unwrap();
    assert_eq!(
        store
            .get_keys_for_token(&batch_id, &token, 0, -1, false)
            .await
            .unwrap(),
        vec!["m4", "m3", "m1"]
    );
}

#[tokio::test]
async fn failed_query_reports_error_and_clears_flag() {
    let store = message_store();
    let batch_id = batch_with_contents(&store).await;
    let rules = vec![MatchRule::new("msg.content", "(unclosed", "")];
    let err = store
        .find_outbound_keys_matching(&batch_id, &rules, None, true)
        .await
        .unwrap_err();
    assert!(matches!(err, MessageStoreError::Storage(_)));

    let token = query_token(Direction::Outbound, &rules);
    assert!(!store.is_query_in_progress(&batch_id, &token).await.unwrap());
    assert_eq!(store.count_keys_for_token(&batch_id, &token).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn results_expire() {
    let store = message_store();
    let batch_id = batch_with_contents(&store).await;
    let token = store
        .find_outbound_keys_matching(&batch_id, &hello(), Some(Duration::from_secs(60)), true)
        .await
        .unwrap();
    assert_eq!(store.count_keys_for_token(&batch_id, &token).await.unwrap(), 2);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(store.count_keys_for_token(&batch_id, &token).await.unwrap(), 0);
    assert!(
        store
            .get_keys_for_token(&batch_id, &token, 0, -1, false)
            .await
            .unwrap()
            .is_empty()
    );
}
