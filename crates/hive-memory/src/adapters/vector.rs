//! In-memory vector adapter with cosine similarity.
//!
//! Supports two-phase commit directly: `begin_transaction` snapshots the
//! vector set, `prepare_commit` votes, and rollback restores the snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hive_core::{
    cosine_similarity, AdapterEntry, HiveError, HiveResult, MemoryRecord, MemoryVector,
    MetricsRegistry, TransactionalStore, VectorStore, VectorStoreStats,
};
use tokio::sync::RwLock;
use uuid::Uuid;

const STORE_NAME: &str = "vector";

struct Transaction {
    snapshot: HashMap<String, MemoryVector>,
    snapshot_dimension: Option<usize>,
    prepared: bool,
}

#[derive(Default)]
struct State {
    vectors: HashMap<String, MemoryVector>,
    dimension: Option<usize>,
    transactions: HashMap<String, Transaction>,
}

/// Hash-map vector store with cosine ranking
pub struct VectorMemoryAdapter {
    state: Arc<RwLock<State>>,
    metrics: MetricsRegistry,
}

impl VectorMemoryAdapter {
    pub fn new(metrics: MetricsRegistry) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            metrics,
        }
    }

    /// Wrap this store as a registry entry under `name`
    pub fn register_as(self: Arc<Self>, name: &str) -> AdapterEntry {
        AdapterEntry::new(name)
            .with_vector(self.clone())
            .with_transactions(self)
    }
}

fn check_dimension(dimension: &mut Option<usize>, embedding: &[f32]) -> HiveResult<()> {
    match dimension {
        Some(expected) => {
            if embedding.len() != *expected {
                return Err(HiveError::validation(format!(
                    "embedding length {} does not match collection dimension {expected}",
                    embedding.len()
                )));
            }
        }
        None => *dimension = Some(embedding.len()),
    }
    Ok(())
}

#[async_trait]
impl VectorStore for VectorMemoryAdapter {
    async fn store_vector(&self, vector: MemoryVector) -> HiveResult<String> {
        self.metrics.inc_memory("store_vector");
        let mut state = self.state.write().await;
        check_dimension(&mut state.dimension, &vector.embedding)?;
        let id = vector.id.clone();
        state.vectors.insert(id.clone(), vector);
        Ok(id)
    }

    async fn retrieve_vector(&self, vector_id: &str) -> HiveResult<Option<MemoryRecord>> {
        self.metrics.inc_memory("retrieve_vector");
        let state = self.state.read().await;
        Ok(state
            .vectors
            .get(vector_id)
            .cloned()
            .map(|vector| MemoryRecord::from_vector(vector, STORE_NAME)))
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> HiveResult<Vec<MemoryRecord>> {
        self.metrics.inc_memory("similarity_search");
        let state = self.state.read().await;
        let mut scored: Vec<(f32, MemoryVector)> = state
            .vectors
            .values()
            .map(|vector| (cosine_similarity(embedding, &vector.embedding), vector.clone()))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(similarity, vector)| {
                MemoryRecord::from_vector(vector, STORE_NAME).with_similarity(similarity)
            })
            .collect())
    }

    async fn delete_vector(&self, vector_id: &str) -> HiveResult<bool> {
        self.metrics.inc_memory("delete_vector");
        let mut state = self.state.write().await;
        Ok(state.vectors.remove(vector_id).is_some())
    }

    async fn collection_stats(&self) -> HiveResult<VectorStoreStats> {
        let state = self.state.read().await;
        Ok(VectorStoreStats {
            collection_name: STORE_NAME.to_string(),
            vector_count: state.vectors.len(),
            dimension: state.dimension,
            extras: Default::default(),
        })
    }

    async fn get_all_vectors(&self) -> HiveResult<Vec<MemoryVector>> {
        let state = self.state.read().await;
        Ok(state.vectors.values().cloned().collect())
    }
}

#[async_trait]
impl TransactionalStore for VectorMemoryAdapter {
    async fn begin_transaction(&self, transaction_id: Option<String>) -> HiveResult<String> {
        let id = transaction_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut state = self.state.write().await;
        if state.transactions.contains_key(&id) {
            return Err(HiveError::transaction_in(id, "transaction already active"));
        }
        let transaction = Transaction {
            snapshot: state.vectors.clone(),
            snapshot_dimension: state.dimension,
            prepared: false,
        };
        state.transactions.insert(id.clone(), transaction);
        Ok(id)
    }

    async fn prepare_commit(&self, transaction_id: &str) -> HiveResult<bool> {
        let mut state = self.state.write().await;
        match state.transactions.get_mut(transaction_id) {
            Some(transaction) => {
                transaction.prepared = true;
                Ok(true)
            }
            None => Err(HiveError::transaction_in(
                transaction_id.to_string(),
                "prepare requested for unknown transaction",
            )),
        }
    }

    async fn commit_transaction(&self, transaction_id: &str) -> HiveResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.transactions.remove(transaction_id).is_some())
    }

    async fn rollback_transaction(&self, transaction_id: &str) -> HiveResult<bool> {
        let mut state = self.state.write().await;
        let Some(transaction) = state.transactions.remove(transaction_id) else {
            return Ok(false);
        };
        state.vectors = transaction.snapshot;
        state.dimension = transaction.snapshot_dimension;
        Ok(true)
    }

    async fn is_transaction_active(&self, transaction_id: &str) -> bool {
        self.state
            .read()
            .await
            .transactions
            .contains_key(transaction_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> VectorMemoryAdapter {
        VectorMemoryAdapter::new(MetricsRegistry::new())
    }

    #[tokio::test]
    async fn cosine_ranking_orders_results() {
        let store = adapter();
        store
            .store_vector(MemoryVector::new("a", vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .store_vector(MemoryVector::new("b", vec![0.0, 1.0]))
            .await
            .unwrap();
        store
            .store_vector(MemoryVector::new("c", vec![0.7, 0.7]))
            .await
            .unwrap();

        let results = store.similarity_search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].item.id, "a");
        assert_eq!(results[1].item.id, "c");
        assert!(results[0].similarity.unwrap() >= results[1].similarity.unwrap());
    }

    #[tokio::test]
    async fn dimension_fixed_by_first_vector() {
        let store = adapter();
        store
            .store_vector(MemoryVector::new("a", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        let err = store
            .store_vector(MemoryVector::new("b", vec![1.0]))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert_eq!(
            store.collection_stats().await.unwrap().dimension,
            Some(3)
        );
    }

    #[tokio::test]
    async fn two_phase_commit_and_rollback() {
        let store = adapter();
        store
            .store_vector(MemoryVector::new("keep", vec![1.0]))
            .await
            .unwrap();

        let txn = store.begin_transaction(None).await.unwrap();
        store
            .store_vector(MemoryVector::new("temp", vec![2.0]))
            .await
            .unwrap();
        assert!(store.prepare_commit(&txn).await.unwrap());
        assert!(store.rollback_transaction(&txn).await.unwrap());

        assert!(store.retrieve_vector("temp").await.unwrap().is_none());
        assert!(store.retrieve_vector("keep").await.unwrap().is_some());
        assert!(!store.is_transaction_active(&txn).await);
    }

    #[tokio::test]
    async fn records_expose_embedding_metadata() {
        let store = adapter();
        store
            .store_vector(MemoryVector::new("a", vec![0.5, 0.5]).with_content("text"))
            .await
            .unwrap();
        let record = store.retrieve_vector("a").await.unwrap().unwrap();
        assert_eq!(
            hive_core::embedding_from_metadata(&record.item.metadata),
            Some(vec![0.5, 0.5])
        );
        assert_eq!(record.source.as_deref(), Some("vector"));
    }
}
