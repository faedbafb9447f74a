//! Cross-store transactions with two-phase commit and snapshot fallback.
//!
//! Adapters that expose native transactions are driven through
//! begin/prepare/commit/rollback; adapters without them are covered by a
//! whole-state snapshot taken at begin and restored on rollback. Every
//! phase appends normalized records to an operation log so recovery
//! tooling can reconstruct the intended state changes.
//!
//! Commit is two-phase: flush + prepare on every transactional adapter
//! (any refusal rolls everything back), then flush + commit per adapter.
//! Partial commit failures are logged and surfaced as one structured
//! error naming the committed and failed stores; they are not undone,
//! since rolling back a partially committed multi-store write can deepen
//! the inconsistency.

use std::collections::HashMap;

use hive_core::{
    AdapterEntry, HiveError, HiveResult, MemoryItem, MemoryRecord, MemoryStore, MemoryVector,
    SupportsFlush, TransactionalStore, VectorStore,
};
use uuid::Uuid;

/// Phase recorded in the operation log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationPhase {
    Snapshot,
    Commit,
    Rollback,
}

impl OperationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        }
    }
}

/// One per-store entry in the operation log
#[derive(Debug, Clone)]
pub struct OperationLogEntry {
    pub store: String,
    pub phase: OperationPhase,
    pub records: Vec<MemoryRecord>,
}

struct AdapterSnapshot {
    items: HashMap<String, MemoryItem>,
    vectors: HashMap<String, MemoryVector>,
}

impl AdapterSnapshot {
    fn records(&self, store: &str) -> Vec<MemoryRecord> {
        let mut records: Vec<MemoryRecord> = self
            .items
            .values()
            .cloned()
            .map(|item| MemoryRecord::from_item(item, store))
            .collect();
        records.extend(
            self.vectors
                .values()
                .cloned()
                .map(|vector| MemoryRecord::from_vector(vector, store)),
        );
        records.sort_by(|a, b| a.item.id.cmp(&b.item.id));
        records
    }
}

/// A cross-store transaction over a fixed set of adapters
pub struct TransactionContext {
    entries: Vec<AdapterEntry>,
    transaction_id: String,
    snapshots: HashMap<String, AdapterSnapshot>,
    operations: Vec<OperationLogEntry>,
    finished: bool,
}

impl TransactionContext {
    /// Begin a transaction spanning `entries`, in the given order.
    ///
    /// Rolls back any adapter already started when a later begin fails.
    pub async fn begin(entries: Vec<AdapterEntry>) -> HiveResult<Self> {
        let transaction_id = Uuid::new_v4().to_string();
        tracing::debug!(
            transaction_id = %transaction_id,
            adapters = entries.len(),
            "starting transaction"
        );

        let mut context = Self {
            entries,
            transaction_id,
            snapshots: HashMap::new(),
            operations: Vec::new(),
            finished: false,
        };

        for index in 0..context.entries.len() {
            let entry = context.entries[index].clone();
            let store = entry.name().to_string();
            if let Some(transactional) = entry.transactional() {
                if let Err(error) = transactional
                    .begin_transaction(Some(context.transaction_id.clone()))
                    .await
                {
                    context.rollback().await;
                    return Err(HiveError::transaction_in(
                        context.transaction_id.clone(),
                        format!("failed to start transaction on {store}: {error}"),
                    ));
                }
                context.record(&store, OperationPhase::Snapshot, Vec::new());
            } else {
                match Self::snapshot_adapter(&entry).await {
                    Ok(snapshot) => {
                        tracing::debug!(
                            store = %store,
                            items = snapshot.items.len(),
                            vectors = snapshot.vectors.len(),
                            "created snapshot"
                        );
                        context.record(&store, OperationPhase::Snapshot, snapshot.records(&store));
                        context.snapshots.insert(store, snapshot);
                    }
                    Err(error) => {
                        context.rollback().await;
                        return Err(HiveError::transaction_in(
                            context.transaction_id.clone(),
                            format!("failed to snapshot {store}: {error}"),
                        ));
                    }
                }
            }
        }

        Ok(context)
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Operation log accumulated so far
    pub fn operations(&self) -> &[OperationLogEntry] {
        &self.operations
    }

    fn record(&mut self, store: &str, phase: OperationPhase, records: Vec<MemoryRecord>) {
        self.operations.push(OperationLogEntry {
            store: store.to_string(),
            phase,
            records,
        });
    }

    async fn snapshot_adapter(entry: &AdapterEntry) -> HiveResult<AdapterSnapshot> {
        let mut snapshot = AdapterSnapshot {
            items: HashMap::new(),
            vectors: HashMap::new(),
        };
        let mut enumerable = false;
        if let Some(memory) = entry.memory() {
            enumerable = true;
            for item in memory.get_all().await? {
                snapshot.items.insert(item.id.clone(), item);
            }
        }
        if let Some(vector) = entry.vector() {
            enumerable = true;
            for vector in vector.get_all_vectors().await? {
                snapshot.vectors.insert(vector.id.clone(), vector);
            }
        }
        if !enumerable {
            tracing::warn!(
                store = entry.name(),
                "adapter exposes no snapshot surface; snapshot will be empty"
            );
        }
        Ok(snapshot)
    }

    async fn flush_entry(entry: &AdapterEntry) -> HiveResult<()> {
        if let Some(flush) = entry.flush_support() {
            tracing::debug!(store = entry.name(), "flushing pending writes");
            flush.flush().await?;
        }
        Ok(())
    }

    /// Commit with two-phase protocol.
    ///
    /// Phase 1 flushes and prepares every transactional adapter; any
    /// failure rolls the whole transaction back. Phase 2 flushes and
    /// commits per adapter, recording post-commit snapshots in the
    /// operation log.
    pub async fn commit(&mut self) -> HiveResult<()> {
        if self.finished {
            return Err(HiveError::transaction_in(
                self.transaction_id.clone(),
                "transaction already finished",
            ));
        }
        tracing::debug!(transaction_id = %self.transaction_id, "committing transaction");

        // Phase 1: flush and prepare
        for entry in self.entries.clone() {
            let store = entry.name().to_string();
            let prepare_result: HiveResult<bool> = async {
                Self::flush_entry(&entry).await?;
                match entry.transactional() {
                    Some(transactional) => {
                        transactional.prepare_commit(&self.transaction_id).await
                    }
                    None => Ok(true),
                }
            }
            .await;

            let vote = match prepare_result {
                Ok(vote) => vote,
                Err(error) => {
                    tracing::error!(
                        transaction_id = %self.transaction_id,
                        store = %store,
                        error = %error,
                        "prepare failed"
                    );
                    self.rollback().await;
                    return Err(HiveError::transaction_in(
                        self.transaction_id.clone(),
                        format!("failed to prepare {store}: {error}"),
                    ));
                }
            };
            if !vote {
                self.rollback().await;
                return Err(HiveError::transaction_in(
                    self.transaction_id.clone(),
                    format!("{store} voted against commit"),
                ));
            }
        }

        // Phase 2: flush and commit
        let mut committed: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        for entry in self.entries.clone() {
            let store = entry.name().to_string();
            let commit_result: HiveResult<()> = async {
                Self::flush_entry(&entry).await?;
                if let Some(transactional) = entry.transactional() {
                    transactional
                        .commit_transaction(&self.transaction_id)
                        .await?;
                }
                Ok(())
            }
            .await;

            match commit_result {
                Ok(()) => {
                    committed.push(store.clone());
                    match Self::snapshot_adapter(&entry).await {
                        Ok(snapshot) => {
                            let records = snapshot.records(&store);
                            self.record(&store, OperationPhase::Commit, records);
                        }
                        Err(error) => {
                            tracing::warn!(
                                store = %store,
                                error = %error,
                                "failed to record post-commit snapshot"
                            );
                        }
                    }
                }
                Err(error) => {
                    tracing::error!(
                        transaction_id = %self.transaction_id,
                        store = %store,
                        error = %error,
                        "commit failed"
                    );
                    failed.push(store);
                }
            }
        }

        self.finished = true;

        if !failed.is_empty() {
            // Committed adapters stay committed; surface the split
            tracing::error!(
                transaction_id = %self.transaction_id,
                committed = ?committed,
                failed = ?failed,
                "transaction partially committed"
            );
            return Err(HiveError::Transaction {
                message: format!(
                    "transaction partially committed; failed stores: {}",
                    failed.join(", ")
                ),
                transaction_id: Some(self.transaction_id.clone()),
                committed,
                failed,
            });
        }

        tracing::debug!(transaction_id = %self.transaction_id, "transaction committed");
        Ok(())
    }

    /// Roll back every adapter: native rollback where supported, snapshot
    /// restore elsewhere. Rollback failures are logged, never raised.
    pub async fn rollback(&mut self) {
        if self.finished {
            return;
        }
        tracing::debug!(transaction_id = %self.transaction_id, "rolling back transaction");

        for entry in self.entries.clone() {
            let store = entry.name().to_string();
            if let Some(transactional) = entry.transactional() {
                match transactional
                    .rollback_transaction(&self.transaction_id)
                    .await
                {
                    Ok(_) => {
                        let records = Self::snapshot_adapter(&entry)
                            .await
                            .map(|snapshot| snapshot.records(&store))
                            .unwrap_or_default();
                        self.record(&store, OperationPhase::Rollback, records);
                    }
                    Err(error) => {
                        tracing::error!(
                            transaction_id = %self.transaction_id,
                            store = %store,
                            error = %error,
                            "native rollback failed"
                        );
                    }
                }
            }
        }

        for entry in self.entries.clone() {
            if entry.transactional().is_some() {
                continue;
            }
            let store = entry.name().to_string();
            let Some(snapshot) = self.snapshots.get(&store) else {
                continue;
            };

            let restore: HiveResult<()> = async {
                if let Some(memory) = entry.memory() {
                    for item in memory.get_all().await? {
                        memory.delete(&item.id).await?;
                    }
                    for item in snapshot.items.values() {
                        memory.store(item.clone()).await?;
                    }
                }
                if let Some(vector) = entry.vector() {
                    for existing in vector.get_all_vectors().await? {
                        vector.delete_vector(&existing.id).await?;
                    }
                    for stored in snapshot.vectors.values() {
                        vector.store_vector(stored.clone()).await?;
                    }
                }
                Ok(())
            }
            .await;

            match restore {
                Ok(()) => {
                    let records = snapshot.records(&store);
                    self.record(&store, OperationPhase::Rollback, records);
                }
                Err(error) => {
                    tracing::error!(
                        transaction_id = %self.transaction_id,
                        store = %store,
                        error = %error,
                        "snapshot restore failed"
                    );
                }
            }
        }

        self.finished = true;
        tracing::debug!(transaction_id = %self.transaction_id, "transaction rolled back");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStore;
    use crate::adapters::vector::VectorMemoryAdapter;
    use hive_core::{MemoryType, MetricsRegistry};
    use serde_json::json;
    use std::sync::Arc;

    fn kv(metrics: &MetricsRegistry) -> (Arc<InMemoryStore>, AdapterEntry) {
        let store = Arc::new(InMemoryStore::new(metrics.clone()));
        let entry = store.clone().register_as("memory");
        (store, entry)
    }

    fn vectors(metrics: &MetricsRegistry) -> (Arc<VectorMemoryAdapter>, AdapterEntry) {
        let store = Arc::new(VectorMemoryAdapter::new(metrics.clone()));
        let entry = store.clone().register_as("vector");
        (store, entry)
    }

    #[tokio::test]
    async fn cross_store_commit_is_atomic() {
        let metrics = MetricsRegistry::new();
        let (kv_store, kv_entry) = kv(&metrics);
        let (vector_store, vector_entry) = vectors(&metrics);

        let mut tx = TransactionContext::begin(vec![kv_entry, vector_entry])
            .await
            .unwrap();
        kv_store
            .store(MemoryItem::new("x", json!("hello"), MemoryType::Working))
            .await
            .unwrap();
        vector_store
            .store_vector(MemoryVector::new("x", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            kv_store.retrieve("x").await.unwrap().unwrap().content,
            json!("hello")
        );
        let record = vector_store.retrieve_vector("x").await.unwrap().unwrap();
        assert_eq!(
            hive_core::embedding_from_metadata(&record.item.metadata),
            Some(vec![1.0, 0.0, 0.0])
        );

        let phases: Vec<_> = tx.operations().iter().map(|op| op.phase).collect();
        assert!(phases.contains(&OperationPhase::Snapshot));
        assert!(phases.contains(&OperationPhase::Commit));
    }

    #[tokio::test]
    async fn rollback_restores_snapshot_adapter() {
        let metrics = MetricsRegistry::new();
        let (kv_store, kv_entry) = kv(&metrics);
        kv_store
            .store(MemoryItem::new("x", json!("old"), MemoryType::Working))
            .await
            .unwrap();

        let mut tx = TransactionContext::begin(vec![kv_entry]).await.unwrap();
        kv_store
            .store(MemoryItem::new("x", json!("new"), MemoryType::Working))
            .await
            .unwrap();
        kv_store
            .store(MemoryItem::new("y", json!("extra"), MemoryType::Working))
            .await
            .unwrap();
        tx.rollback().await;

        assert_eq!(
            kv_store.retrieve("x").await.unwrap().unwrap().content,
            json!("old")
        );
        assert!(kv_store.retrieve("y").await.unwrap().is_none());
        assert!(tx
            .operations()
            .iter()
            .any(|op| op.phase == OperationPhase::Rollback && op.store == "memory"));
    }

    #[tokio::test]
    async fn rollback_restores_native_adapter() {
        let metrics = MetricsRegistry::new();
        let (vector_store, vector_entry) = vectors(&metrics);
        vector_store
            .store_vector(MemoryVector::new("keep", vec![1.0]))
            .await
            .unwrap();

        let mut tx = TransactionContext::begin(vec![vector_entry]).await.unwrap();
        vector_store
            .store_vector(MemoryVector::new("temp", vec![2.0]))
            .await
            .unwrap();
        tx.rollback().await;

        assert!(vector_store
            .retrieve_vector("keep")
            .await
            .unwrap()
            .is_some());
        assert!(vector_store
            .retrieve_vector("temp")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn commit_after_finish_is_rejected() {
        let metrics = MetricsRegistry::new();
        let (_, kv_entry) = kv(&metrics);
        let mut tx = TransactionContext::begin(vec![kv_entry]).await.unwrap();
        tx.commit().await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert_eq!(err.error_code(), "MEMORY_TRANSACTION_ERROR");
    }
}
