//! Flat L2 vector index with file persistence.
//!
//! Embeddings live in a dense row matrix persisted as `flat_index.bin`
//! (little-endian: u32 dimension, u32 row count, then f32 rows); per-id
//! entries live in `metadata.json` alongside. Deletes are soft: the entry
//! is flagged `is_deleted` and its row stays in place so positions remain
//! stable. Search scores rows by `1 / (1 + l2_distance)`.
//!
//! Transactions clone the serialized index and the entry map; rollback
//! swaps the clone back in.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};
use hive_core::{
    euclidean_distance, AdapterEntry, HiveError, HiveResult, MemoryMetadata, MemoryRecord,
    MemoryVector, MetricsRegistry, TransactionalStore, VectorStore, VectorStoreStats,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

const STORE_NAME: &str = "flat";
const INDEX_FILE: &str = "flat_index.bin";
const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    embedding: Vec<f32>,
    content: Option<String>,
    metadata: MemoryMetadata,
    created_at: DateTime<Utc>,
    position: usize,
    is_deleted: bool,
}

impl Entry {
    fn to_vector(&self, id: &str) -> MemoryVector {
        MemoryVector {
            id: id.to_string(),
            embedding: self.embedding.clone(),
            content: self.content.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
        }
    }
}

struct Snapshot {
    dimension: Option<usize>,
    rows: Vec<Vec<f32>>,
    entries: HashMap<String, Entry>,
}

#[derive(Default)]
struct State {
    dimension: Option<usize>,
    rows: Vec<Vec<f32>>,
    entries: HashMap<String, Entry>,
    transactions: HashMap<String, Snapshot>,
}

/// Flat L2 index store
pub struct FlatVectorStore {
    base_path: Option<PathBuf>,
    state: Arc<RwLock<State>>,
    metrics: MetricsRegistry,
}

impl FlatVectorStore {
    /// Open (or create) an index directory at `base_path`
    pub async fn open(base_path: impl Into<PathBuf>, metrics: MetricsRegistry) -> HiveResult<Self> {
        let store = if hive_core::env::no_file_persistence() {
            Self::ephemeral(metrics)
        } else {
            let base_path = base_path.into();
            tokio::fs::create_dir_all(&base_path).await.map_err(|e| {
                HiveError::memory_in(
                    STORE_NAME,
                    format!("failed to create directory {}: {e}", base_path.display()),
                )
            })?;
            Self {
                base_path: Some(base_path),
                state: Arc::new(RwLock::new(State::default())),
                metrics,
            }
        };
        store.load().await?;
        Ok(store)
    }

    /// Store that never touches disk
    pub fn ephemeral(metrics: MetricsRegistry) -> Self {
        Self {
            base_path: None,
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

    async fn load(&self) -> HiveResult<()> {
        let Some(base) = &self.base_path else {
            return Ok(());
        };
        let mut state = self.state.write().await;

        let metadata_path = base.join(METADATA_FILE);
        if metadata_path.exists() {
            let raw = tokio::fs::read(&metadata_path).await.map_err(|e| {
                HiveError::memory_in(STORE_NAME, format!("failed to read metadata: {e}"))
            })?;
            state.entries = serde_json::from_slice(&raw).map_err(|e| {
                HiveError::corruption(STORE_NAME, format!("failed to parse metadata: {e}"))
            })?;
        }

        let index_path = base.join(INDEX_FILE);
        if index_path.exists() {
            let raw = tokio::fs::read(&index_path).await.map_err(|e| {
                HiveError::memory_in(STORE_NAME, format!("failed to read index: {e}"))
            })?;
            let (dimension, rows) = decode_index(&raw)?;
            state.dimension = dimension;
            state.rows = rows;
        } else if !state.entries.is_empty() {
            // Rebuild the matrix from entry embeddings when the binary index
            // is missing
            let mut rows = vec![Vec::new(); state.entries.len()];
            for entry in state.entries.values() {
                if entry.position < rows.len() {
                    rows[entry.position] = entry.embedding.clone();
                }
            }
            state.dimension = state.entries.values().next().map(|e| e.embedding.len());
            state.rows = rows;
        }

        Ok(())
    }

    async fn persist(&self, state: &State) -> HiveResult<()> {
        let Some(base) = &self.base_path else {
            return Ok(());
        };

        let index = encode_index(state.dimension, &state.rows);
        tokio::fs::write(base.join(INDEX_FILE), index)
            .await
            .map_err(|e| {
                HiveError::memory_in(STORE_NAME, format!("failed to write index: {e}"))
            })?;

        let metadata = serde_json::to_vec_pretty(&state.entries).map_err(|e| {
            HiveError::memory_in(STORE_NAME, format!("failed to serialize metadata: {e}"))
        })?;
        tokio::fs::write(base.join(METADATA_FILE), metadata)
            .await
            .map_err(|e| {
                HiveError::memory_in(STORE_NAME, format!("failed to write metadata: {e}"))
            })?;
        Ok(())
    }
}

fn encode_index(dimension: Option<usize>, rows: &[Vec<f32>]) -> Vec<u8> {
    let dim = dimension.unwrap_or(0);
    let mut buf = BytesMut::with_capacity(8 + rows.len() * dim * 4);
    buf.put_u32_le(dim as u32);
    buf.put_u32_le(rows.len() as u32);
    for row in rows {
        for value in row {
            buf.put_f32_le(*value);
        }
    }
    buf.to_vec()
}

fn decode_index(raw: &[u8]) -> HiveResult<(Option<usize>, Vec<Vec<f32>>)> {
    let mut buf = raw;
    if buf.remaining() < 8 {
        return Err(HiveError::corruption(STORE_NAME, "index header truncated"));
    }
    let dim = buf.get_u32_le() as usize;
    let count = buf.get_u32_le() as usize;
    if buf.remaining() < dim * count * 4 {
        return Err(HiveError::corruption(STORE_NAME, "index rows truncated"));
    }
    let mut rows = Vec::with_capacity(count);
    for _ in 0..count {
        let mut row = Vec::with_capacity(dim);
        for _ in 0..dim {
            row.push(buf.get_f32_le());
        }
        rows.push(row);
    }
    let dimension = if dim == 0 { None } else { Some(dim) };
    Ok((dimension, rows))
}

#[async_trait]
impl VectorStore for FlatVectorStore {
    async fn store_vector(&self, vector: MemoryVector) -> HiveResult<String> {
        self.metrics.inc_memory("store_vector");
        let mut state = self.state.write().await;

        match state.dimension {
            Some(expected) if vector.embedding.len() != expected => {
                return Err(HiveError::validation(format!(
                    "embedding length {} does not match collection dimension {expected}",
                    vector.embedding.len()
                )));
            }
            None => state.dimension = Some(vector.embedding.len()),
            _ => {}
        }

        let id = vector.id.clone();
        let position = match state.entries.get(&id) {
            Some(existing) => {
                let position = existing.position;
                state.rows[position] = vector.embedding.clone();
                position
            }
            None => {
                state.rows.push(vector.embedding.clone());
                state.rows.len() - 1
            }
        };
        state.entries.insert(
            id.clone(),
            Entry {
                embedding: vector.embedding,
                content: vector.content,
                metadata: vector.metadata,
                created_at: vector.created_at,
                position,
                is_deleted: false,
            },
        );
        self.persist(&state).await?;
        Ok(id)
    }

    async fn retrieve_vector(&self, vector_id: &str) -> HiveResult<Option<MemoryRecord>> {
        self.metrics.inc_memory("retrieve_vector");
        let state = self.state.read().await;
        Ok(state
            .entries
            .get(vector_id)
            .filter(|entry| !entry.is_deleted)
            .map(|entry| MemoryRecord::from_vector(entry.to_vector(vector_id), STORE_NAME)))
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> HiveResult<Vec<MemoryRecord>> {
        self.metrics.inc_memory("similarity_search");
        let state = self.state.read().await;
        let mut scored: Vec<(f32, String)> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_deleted)
            .map(|(id, entry)| {
                let distance = euclidean_distance(embedding, &state.rows[entry.position]);
                (1.0 / (1.0 + distance), id.clone())
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(similarity, id)| {
                let entry = &state.entries[&id];
                MemoryRecord::from_vector(entry.to_vector(&id), STORE_NAME)
                    .with_similarity(similarity)
            })
            .collect())
    }

    async fn delete_vector(&self, vector_id: &str) -> HiveResult<bool> {
        self.metrics.inc_memory("delete_vector");
        let mut state = self.state.write().await;
        let deleted = match state.entries.get_mut(vector_id) {
            Some(entry) if !entry.is_deleted => {
                entry.is_deleted = true;
                true
            }
            _ => false,
        };
        if deleted {
            self.persist(&state).await?;
        }
        Ok(deleted)
    }

    async fn collection_stats(&self) -> HiveResult<VectorStoreStats> {
        let state = self.state.read().await;
        let live = state.entries.values().filter(|e| !e.is_deleted).count();
        let mut extras = std::collections::BTreeMap::new();
        extras.insert(
            "deleted_count".to_string(),
            hive_core::MetadataValue::Int((state.entries.len() - live) as i64),
        );
        Ok(VectorStoreStats {
            collection_name: STORE_NAME.to_string(),
            vector_count: live,
            dimension: state.dimension,
            extras,
        })
    }

    async fn get_all_vectors(&self) -> HiveResult<Vec<MemoryVector>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_deleted)
            .map(|(id, entry)| entry.to_vector(id))
            .collect())
    }
}

#[async_trait]
impl TransactionalStore for FlatVectorStore {
    async fn begin_transaction(&self, transaction_id: Option<String>) -> HiveResult<String> {
        let id = transaction_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut state = self.state.write().await;
        if state.transactions.contains_key(&id) {
            return Err(HiveError::transaction_in(id, "transaction already active"));
        }
        let snapshot = Snapshot {
            dimension: state.dimension,
            rows: state.rows.clone(),
            entries: state.entries.clone(),
        };
        state.transactions.insert(id.clone(), snapshot);
        Ok(id)
    }

    async fn commit_transaction(&self, transaction_id: &str) -> HiveResult<bool> {
        let mut state = self.state.write().await;
        if state.transactions.remove(transaction_id).is_none() {
            return Ok(false);
        }
        self.persist(&state).await?;
        Ok(true)
    }

    async fn rollback_transaction(&self, transaction_id: &str) -> HiveResult<bool> {
        let mut state = self.state.write().await;
        let Some(snapshot) = state.transactions.remove(transaction_id) else {
            return Ok(false);
        };
        state.dimension = snapshot.dimension;
        state.rows = snapshot.rows;
        state.entries = snapshot.entries;
        self.persist(&state).await?;
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
