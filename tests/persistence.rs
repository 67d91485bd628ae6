//! Breaker snapshot persistence across process restarts.

use std::sync::Arc;
use std::time::Duration;

use resilience_core::resilience::persistence::SNAPSHOT_SCHEMA_VERSION;
use resilience_core::resilience::{
    Checkpointer, CircuitBreakerRegistry, CircuitState, FileSnapshotStore, SnapshotStore,
};
use resilience_core::{ResilienceConfig, Shutdown};

fn registry() -> CircuitBreakerRegistry {
    CircuitBreakerRegistry::new(ResilienceConfig::default())
}

#[tokio::test]
async fn test_open_breaker_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path());

    let before = registry();
    let breaker = before.get_or_create("orders_db");
    breaker.force_open("replica lag");
    breaker.reset();
    breaker.force_open("replica lag again");
    store.save(&breaker.snapshot()).await.unwrap();

    let after = registry();
    assert_eq!(after.rehydrate(&store).await, 1);

    let restored = after.get("orders_db").unwrap();
    assert_eq!(restored.state(), CircuitState::Open);
    assert_eq!(restored.trips(), 2);
    assert!(!restored.can_execute());
}

#[tokio::test]
async fn test_bad_snapshots_start_closed() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path());

    let source = registry();
    let breaker = source.get_or_create("ledger");
    breaker.force_open("disk full");
    let mut future_layout = serde_json::to_value(breaker.snapshot()).unwrap();
    future_layout["schema_version"] = serde_json::json!(SNAPSHOT_SCHEMA_VERSION + 1);

    tokio::fs::write(dir.path().join("ledger.json"), future_layout.to_string())
        .await
        .unwrap();
    tokio::fs::write(dir.path().join("accounts.json"), b"{\"state\": \"OPEN\"")
        .await
        .unwrap();

    let restarted = registry();
    assert_eq!(restarted.rehydrate(&store).await, 0);
    for name in ["accounts", "ledger"] {
        let breaker = restarted.get(name).unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.trips(), 0);
    }
}

#[tokio::test]
async fn test_missing_directory_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path().join("never-created"));

    assert!(store.list().await.unwrap().is_empty());
    assert_eq!(registry().rehydrate(&store).await, 0);
}

#[tokio::test]
async fn test_checkpointer_flushes_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(dir.path()));

    let breakers = Arc::new(registry());
    breakers.get_or_create("payments_api").force_open("provider outage");
    breakers.get_or_create("search_index");

    let shutdown = Shutdown::new();
    let handle = Checkpointer::new(Arc::clone(&breakers), Arc::clone(&store), Duration::from_secs(3600))
        .spawn(shutdown.subscribe());

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(store.list().await.unwrap(), vec!["payments_api", "search_index"]);
    let snapshot = store.load("payments_api").await.unwrap().unwrap();
    assert_eq!(snapshot.state, CircuitState::Open);
    assert_eq!(snapshot.circuit_breaker_trips, 1);
}
