//! Relational adapter backed by a single-file SQLite database.
//!
//! Two tables: `memory_items` and `memory_vectors`. Metadata and embeddings
//! serialize into TEXT columns as JSON. Vector similarity is computed
//! in-process over the stored embeddings (Euclidean distance mapped to
//! `1 / (1 + d)`); there is no index-accelerated path. Database calls are
//! synchronous and should be treated as blocking points.

use chrono::{DateTime, Utc};
use hive_core::{
    dumps, euclidean_distance, loads, AdapterEntry, HiveError, HiveResult, MemoryItem,
    MemoryRecord, MemoryStore, MemoryType, MemoryVector, MetricsRegistry, SearchQuery,
    VectorStore, VectorStoreStats,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

const STORE_NAME: &str = "sqlite";

fn sql_err(e: rusqlite::Error) -> HiveError {
    HiveError::memory_in(STORE_NAME, e.to_string())
}

/// Single-file relational store for items and vectors
pub struct SqliteStore {
    conn: Mutex<Connection>,
    dimension: Mutex<Option<usize>>,
    metrics: MetricsRegistry,
}

impl SqliteStore {
    /// Open (or create) a database file at `path`
    pub fn open(path: impl AsRef<Path>, metrics: MetricsRegistry) -> HiveResult<Self> {
        let conn = if hive_core::env::no_file_persistence() {
            Connection::open_in_memory().map_err(sql_err)?
        } else {
            Connection::open(path).map_err(sql_err)?
        };
        Self::from_connection(conn, metrics)
    }

    /// Database held entirely in memory
    pub fn in_memory(metrics: MetricsRegistry) -> HiveResult<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::from_connection(conn, metrics)
    }

    fn from_connection(conn: Connection, metrics: MetricsRegistry) -> HiveResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memory_items (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                memory_type TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS memory_vectors (
                id TEXT PRIMARY KEY,
                content TEXT,
                embedding TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )
        .map_err(sql_err)?;

        // An existing collection fixes the dimension before any writes
        let dimension: Option<usize> = conn
            .query_row(
                "SELECT embedding FROM memory_vectors LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(sql_err)?
            .and_then(|text| serde_json::from_str::<Vec<f32>>(&text).ok())
            .map(|embedding| embedding.len());

        Ok(Self {
            conn: Mutex::new(conn),
            dimension: Mutex::new(dimension),
            metrics,
        })
    }

    /// Wrap this store as a registry entry under `name`
    pub fn register_as(self: Arc<Self>, name: &str) -> AdapterEntry {
        AdapterEntry::new(name)
            .with_memory(self.clone())
            .with_vector(self)
    }

    fn row_to_item(
        id: String,
        content: String,
        memory_type: String,
        metadata: String,
        created_at: String,
    ) -> HiveResult<MemoryItem> {
        Ok(MemoryItem {
            id,
            content: serde_json::from_str(&content)
                .map_err(|e| HiveError::corruption(STORE_NAME, format!("bad content column: {e}")))?,
            memory_type: MemoryType::parse(&memory_type).unwrap_or(MemoryType::LongTerm),
            metadata: loads(&metadata)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|parsed| parsed.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    fn row_to_vector(
        id: String,
        content: Option<String>,
        embedding: String,
        metadata: String,
        created_at: String,
    ) -> HiveResult<MemoryVector> {
        Ok(MemoryVector {
            id,
            embedding: serde_json::from_str(&embedding).map_err(|e| {
                HiveError::corruption(STORE_NAME, format!("bad embedding column: {e}"))
            })?,
            content,
            metadata: loads(&metadata)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|parsed| parsed.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    fn all_items(&self) -> HiveResult<Vec<MemoryItem>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, content, memory_type, metadata, created_at FROM memory_items")
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(sql_err)?;
        let mut items = Vec::new();
        for row in rows {
            let (id, content, memory_type, metadata, created_at) = row.map_err(sql_err)?;
            items.push(Self::row_to_item(
                id, content, memory_type, metadata, created_at,
            )?);
        }
        Ok(items)
    }

    fn all_vectors(&self) -> HiveResult<Vec<MemoryVector>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, content, embedding, metadata, created_at FROM memory_vectors")
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(sql_err)?;
        let mut vectors = Vec::new();
        for row in rows {
            let (id, content, embedding, metadata, created_at) = row.map_err(sql_err)?;
            vectors.push(Self::row_to_vector(
                id, content, embedding, metadata, created_at,
            )?);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn store(&self, item: MemoryItem) -> HiveResult<String> {
        self.metrics.inc_memory("store");
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO memory_items (id, content, memory_type, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                item.id,
                item.content.to_string(),
                item.memory_type.as_str(),
                dumps(&item.metadata),
                item.created_at.to_rfc3339(),
            ],
        )
        .map_err(sql_err)?;
        Ok(item.id)
    }

    async fn retrieve(&self, item_id: &str) -> HiveResult<Option<MemoryItem>> {
        self.metrics.inc_memory("retrieve");
        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT id, content, memory_type, metadata, created_at
                 FROM memory_items WHERE id = ?1",
                params![item_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(sql_err)?
        };
        match row {
            Some((id, content, memory_type, metadata, created_at)) => Ok(Some(
                Self::row_to_item(id, content, memory_type, metadata, created_at)?,
            )),
            None => Ok(None),
        }
    }

    async fn search(&self, query: &SearchQuery) -> HiveResult<Vec<MemoryRecord>> {
        self.metrics.inc_memory("search");
        let mut records: Vec<MemoryRecord> = self
            .all_items()?
            .into_iter()
            .filter(|item| query.matches(item))
            .map(|item| MemoryRecord::from_item(item, STORE_NAME))
            .collect();
        records.sort_by(|a, b| a.item.id.cmp(&b.item.id));
        Ok(records)
    }

    async fn delete(&self, item_id: &str) -> HiveResult<bool> {
        self.metrics.inc_memory("delete");
        let conn = self.conn.lock();
        let affected = conn
            .execute("DELETE FROM memory_items WHERE id = ?1", params![item_id])
            .map_err(sql_err)?;
        Ok(affected > 0)
    }

    async fn get_all(&self) -> HiveResult<Vec<MemoryItem>> {
        self.all_items()
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn store_vector(&self, vector: MemoryVector) -> HiveResult<String> {
        self.metrics.inc_memory("store_vector");
        {
            let mut dimension = self.dimension.lock();
            match *dimension {
                Some(expected) if vector.embedding.len() != expected => {
                    return Err(HiveError::validation(format!(
                        "embedding length {} does not match collection dimension {expected}",
                        vector.embedding.len()
                    )));
                }
                None => *dimension = Some(vector.embedding.len()),
                _ => {}
            }
        }
        let embedding = serde_json::to_string(&vector.embedding)
            .map_err(|e| HiveError::memory_in(STORE_NAME, format!("bad embedding: {e}")))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO memory_vectors (id, content, embedding, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                vector.id,
                vector.content,
                embedding,
                dumps(&vector.metadata),
                vector.created_at.to_rfc3339(),
            ],
        )
        .map_err(sql_err)?;
        Ok(vector.id)
    }

    async fn retrieve_vector(&self, vector_id: &str) -> HiveResult<Option<MemoryRecord>> {
        self.metrics.inc_memory("retrieve_vector");
        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT id, content, embedding, metadata, created_at
                 FROM memory_vectors WHERE id = ?1",
                params![vector_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(sql_err)?
        };
        match row {
            Some((id, content, embedding, metadata, created_at)) => {
                let vector =
                    Self::row_to_vector(id, content, embedding, metadata, created_at)?;
                Ok(Some(MemoryRecord::from_vector(vector, STORE_NAME)))
            }
            None => Ok(None),
        }
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> HiveResult<Vec<MemoryRecord>> {
        self.metrics.inc_memory("similarity_search");
        let mut scored: Vec<(f32, MemoryVector)> = self
            .all_vectors()?
            .into_iter()
            .map(|vector| {
                let distance = euclidean_distance(embedding, &vector.embedding);
                (1.0 / (1.0 + distance), vector)
            })
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
        let conn = self.conn.lock();
        let affected = conn
            .execute(
                "DELETE FROM memory_vectors WHERE id = ?1",
                params![vector_id],
            )
            .map_err(sql_err)?;
        Ok(affected > 0)
    }

    async fn collection_stats(&self) -> HiveResult<VectorStoreStats> {
        let count: usize = {
            let conn = self.conn.lock();
            conn.query_row("SELECT COUNT(*) FROM memory_vectors", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(sql_err)? as usize
        };
        Ok(VectorStoreStats {
            collection_name: STORE_NAME.to_string(),
            vector_count: count,
            dimension: *self.dimension.lock(),
            extras: Default::default(),
        })
    }

    async fn get_all_vectors(&self) -> HiveResult<Vec<MemoryVector>> {
        self.all_vectors()
    }
}
