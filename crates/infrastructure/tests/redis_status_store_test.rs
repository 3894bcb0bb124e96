//! 需要Docker：`cargo test -p botfleet-infrastructure -- --ignored`

use botfleet_core::config::StatusStoreConfig;
use botfleet_core::models::{StatsMap, StatusRecord, WorkerStatus};
use botfleet_core::StatusStore;
use botfleet_infrastructure::status_store::RedisStatusStore;
use serde_json::json;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

async fn redis_store() -> (ContainerAsync<Redis>, RedisStatusStore) {
    let container = Redis::default().with_tag("7-alpine").start().await.unwrap();
    let port = container.get_host_port_ipv4(6379).await.unwrap();
    let config = StatusStoreConfig {
        url: format!("redis://127.0.0.1:{port}/0"),
        ..StatusStoreConfig::default()
    };
    let store = RedisStatusStore::connect(&config).await.unwrap();
    (container, store)
}

#[tokio::test]
#[ignore]
async fn status_hash_roundtrip_and_overwrite() {
    let (_container, store) = redis_store().await;
    store.ping().await.unwrap();

    let running = StatusRecord::new(WorkerStatus::Running)
        .with_unit("bot_ABCDEFGH", 8443)
        .with_webhook_url("https://fleet.example.com/workers/webhook/tok");
    store.put_status("tok", &running).await.unwrap();

    let read = store.get_status("tok").await.unwrap().unwrap();
    assert_eq!(read.status, WorkerStatus::Running);
    assert_eq!(read.port, Some(8443));
    assert_eq!(read.name, "bot_ABCDEFGH");

    store
        .put_status("tok", &StatusRecord::new(WorkerStatus::Error).with_error("boom"))
        .await
        .unwrap();
    let read = store.get_status("tok").await.unwrap().unwrap();
    assert_eq!(read.status, WorkerStatus::Error);
    assert_eq!(read.error_text(), Some("boom"));
    assert_eq!(read.port, None);

    assert!(store.get_status("missing").await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn worker_state_json_and_delete() {
    let (_container, store) = redis_store().await;

    let mut state = StatsMap::new();
    state.insert("name".to_string(), json!("EchoBot"));
    state.insert("events_handled".to_string(), json!(4));
    store.put_state("tok", &state).await.unwrap();
    assert_eq!(store.get_state("tok").await.unwrap(), Some(state));

    store
        .put_status("tok", &StatusRecord::new(WorkerStatus::Running))
        .await
        .unwrap();
    store.delete_status("tok").await.unwrap();
    assert!(store.get_status("tok").await.unwrap().is_none());
    assert!(store.get_state("tok").await.unwrap().is_none());
}
