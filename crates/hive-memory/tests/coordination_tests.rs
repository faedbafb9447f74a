//! Cross-store coordination integration tests
//!
//! These tests exercise the full path a collaboration write takes:
//! coordinator -> transaction context -> adapters, and the read side
//! through the query router. They verify that:
//! - Cross-store commits land in every enlisted adapter
//! - Rollback restores the pre-transaction observable state
//! - Redundant fanout reaches every registered document store
//! - Router records always carry the producing adapter's name

use std::sync::Arc;

use hive_core::{
    HiveError, HiveResult, MemoryItem, MemoryStore, MemoryType, MemoryVector, MetricsRegistry,
    VectorStore,
};
use hive_memory::{
    FlatVectorStore, InMemoryStore, JsonFileStore, MemoryCoordinator, QueryRouter,
    VectorMemoryAdapter,
};
use serde_json::json;
use tempfile::tempdir;

struct Fixture {
    coordinator: MemoryCoordinator,
    kv: Arc<InMemoryStore>,
    vectors: Arc<VectorMemoryAdapter>,
    _dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let metrics = MetricsRegistry::new();

    let kv = Arc::new(InMemoryStore::new(metrics.clone()));
    let json_store = Arc::new(
        JsonFileStore::open(dir.path().join("memory.json"), metrics.clone())
            .await
            .unwrap(),
    );
    let vectors = Arc::new(VectorMemoryAdapter::new(metrics.clone()));
    let flat = Arc::new(
        FlatVectorStore::open(dir.path().join("flat"), metrics.clone())
            .await
            .unwrap(),
    );

    let coordinator = MemoryCoordinator::builder()
        .metrics(metrics)
        .register(json_store.register_as("json"))
        .unwrap()
        .register(kv.clone().register_as("memory"))
        .unwrap()
        .register(vectors.clone().register_as("vector"))
        .unwrap()
        .register(flat.register_as("flat"))
        .unwrap()
        .build();

    Fixture {
        coordinator,
        kv,
        vectors,
        _dir: dir,
    }
}

#[tokio::test]
async fn cross_store_commit_reaches_both_adapters() {
    let fixture = fixture().await;
    let coordinator = &fixture.coordinator;

    coordinator
        .with_transaction(&["memory", "vector"], || async {
            fixture
                .kv
                .store(MemoryItem::new("x", json!("hello"), MemoryType::Working))
                .await?;
            fixture
                .vectors
                .store_vector(MemoryVector::new("x", vec![1.0, 0.0, 0.0]))
                .await?;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(
        fixture.kv.retrieve("x").await.unwrap().unwrap().content,
        json!("hello")
    );
    let record = fixture.vectors.retrieve_vector("x").await.unwrap().unwrap();
    assert_eq!(
        hive_core::embedding_from_metadata(&record.item.metadata),
        Some(vec![1.0, 0.0, 0.0])
    );
}

#[tokio::test]
async fn failed_transaction_restores_snapshot_state() {
    let fixture = fixture().await;
    let coordinator = &fixture.coordinator;

    fixture
        .kv
        .store(MemoryItem::new("x", json!("old"), MemoryType::Working))
        .await
        .unwrap();

    let result: HiveResult<()> = coordinator
        .with_transaction(&["memory"], || async {
            fixture
                .kv
                .store(MemoryItem::new("x", json!("new"), MemoryType::Working))
                .await?;
            Err(HiveError::validation("caller aborted"))
        })
        .await;

    assert!(result.is_err());
    assert_eq!(
        fixture.kv.retrieve("x").await.unwrap().unwrap().content,
        json!("old")
    );
}

#[tokio::test]
async fn fanout_persists_to_primary_and_mirrors() {
    let fixture = fixture().await;
    let coordinator = &fixture.coordinator;

    let task = MemoryItem::new(
        "task-1",
        json!({"description": "write the report"}),
        MemoryType::CollaborationTask,
    );
    coordinator.persist_with_fanout(task).await.unwrap();

    // Primary is the json store; the plain memory store received a mirror
    assert!(fixture.kv.retrieve("task-1").await.unwrap().is_some());
    assert!(coordinator.retrieve("task-1").await.unwrap().is_some());
}

#[tokio::test]
async fn router_source_matches_registry_names() {
    let fixture = fixture().await;
    let coordinator = &fixture.coordinator;

    coordinator
        .update_item(
            "json",
            MemoryItem::new("a", json!("shared phrase"), MemoryType::Working),
        )
        .await
        .unwrap();
    coordinator
        .update_item(
            "memory",
            MemoryItem::new("a", json!("shared phrase"), MemoryType::Working),
        )
        .await
        .unwrap();

    let router = QueryRouter::new(coordinator);
    let grouped = router.cross_store_query("shared", None).await.unwrap();
    for (store, results) in &grouped.by_store {
        for record in &results.records {
            assert_eq!(record.source.as_deref(), Some(store.as_str()));
            assert!(coordinator.registry().contains(store));
        }
    }

    let records = router
        .cascading_query("shared", Some(&["json", "memory"]))
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn search_memory_uses_first_vector_surface() {
    let fixture = fixture().await;
    let coordinator = &fixture.coordinator;

    let embedding = coordinator.embed_text("alpha");
    fixture
        .vectors
        .store_vector(MemoryVector::new("v1", embedding).with_content("alpha"))
        .await
        .unwrap();

    let results = coordinator.search_memory("alpha", 3).await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].item.id, "v1");
}
