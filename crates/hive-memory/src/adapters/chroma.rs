//! Remote vector collection adapter speaking the Chroma HTTP API.
//!
//! Every network call runs under the adapter's retry policy and circuit
//! breaker; callers see `CIRCUIT_OPEN` once the remote has failed enough
//! times. Transactions snapshot the full vector set; rollback deletes the
//! current contents and re-adds the snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hive_core::{
    from_serializable, to_serializable, AdapterEntry, ErrorKind, HiveError, HiveResult,
    MemoryRecord, MemoryVector, MetricsRegistry, TransactionalStore, VectorStore,
    VectorStoreStats,
};
use hive_reliability::{retry, CircuitBreaker, RetryPolicy};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

const STORE_NAME: &str = "chroma";

/// Remote collection client
pub struct ChromaVectorStore {
    client: reqwest::Client,
    base_url: String,
    collection_name: String,
    collection_id: RwLock<Option<String>>,
    breaker: Arc<CircuitBreaker>,
    retry_policy: RetryPolicy<Value>,
    transactions: RwLock<HashMap<String, Vec<MemoryVector>>>,
    dimension: RwLock<Option<usize>>,
    metrics: MetricsRegistry,
}

impl ChromaVectorStore {
    pub fn new(
        base_url: impl Into<String>,
        collection_name: impl Into<String>,
        metrics: MetricsRegistry,
    ) -> Self {
        let breaker = Arc::new(
            CircuitBreaker::new(metrics.clone())
                .with_failure_threshold(5)
                .with_recovery_timeout(Duration::from_secs(30)),
        );
        let retry_policy = RetryPolicy::new()
            .max_retries(3)
            .initial_delay(Duration::from_millis(200))
            .max_delay(Duration::from_secs(5))
            .retryable_kinds(vec![ErrorKind::Memory]);
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection_name: collection_name.into(),
            collection_id: RwLock::new(None),
            breaker,
            retry_policy,
            transactions: RwLock::new(HashMap::new()),
            dimension: RwLock::new(None),
            metrics,
        }
    }

    /// Wrap this store as a registry entry under `name`
    pub fn register_as(self: Arc<Self>, name: &str) -> AdapterEntry {
        AdapterEntry::new(name)
            .with_vector(self.clone())
            .with_transactions(self)
    }

    async fn post(&self, operation: &str, path: &str, body: Value) -> HiveResult<Value> {
        self.metrics.inc_provider(operation);
        let url = format!("{}{path}", self.base_url);
        retry(operation, &self.retry_policy, &self.metrics, || {
            let request = self.client.post(&url).json(&body);
            self.breaker.call(operation, async move {
                let response = request.send().await.map_err(|e| {
                    HiveError::memory_in(STORE_NAME, format!("request failed: {e}"))
                })?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(HiveError::memory_in(
                        STORE_NAME,
                        format!("remote returned {status}: {text}"),
                    ));
                }
                if status == reqwest::StatusCode::NO_CONTENT {
                    return Ok(Value::Null);
                }
                response.json::<Value>().await.or(Ok(Value::Null))
            })
        })
        .await
    }

    async fn collection_id(&self) -> HiveResult<String> {
        if let Some(id) = self.collection_id.read().await.clone() {
            return Ok(id);
        }
        let response = self
            .post(
                "chroma_create_collection",
                "/api/v1/collections",
                json!({ "name": self.collection_name, "get_or_create": true }),
            )
            .await?;
        let id = response
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                HiveError::memory_in(STORE_NAME, "collection response is missing an id")
            })?
            .to_string();
        *self.collection_id.write().await = Some(id.clone());
        Ok(id)
    }

    fn vector_to_payload(vector: &MemoryVector) -> (Value, Value) {
        let mut metadata = to_serializable(&vector.metadata);
        metadata.insert(
            "created_at".to_string(),
            Value::String(vector.created_at.to_rfc3339()),
        );
        let document = vector
            .content
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null);
        (Value::Object(metadata), document)
    }

    fn payload_to_vector(
        id: String,
        embedding: Vec<f32>,
        metadata: Option<&Value>,
        document: Option<&Value>,
    ) -> MemoryVector {
        let mut fields = metadata
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let created_at = fields
            .remove("created_at")
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
            .map(|parsed| parsed.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        MemoryVector {
            id,
            embedding,
            content: document.and_then(Value::as_str).map(str::to_string),
            metadata: from_serializable(&fields),
            created_at,
        }
    }

    fn parse_get_response(response: &Value) -> Vec<MemoryVector> {
        let ids = response
            .get("ids")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let embeddings = response
            .get("embeddings")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let metadatas = response
            .get("metadatas")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let documents = response
            .get("documents")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        ids.iter()
            .enumerate()
            .filter_map(|(i, id)| {
                let id = id.as_str()?.to_string();
                let embedding: Vec<f32> = embeddings
                    .get(i)
                    .and_then(Value::as_array)
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(Value::as_f64)
                            .map(|v| v as f32)
                            .collect()
                    })
                    .unwrap_or_default();
                Some(Self::payload_to_vector(
                    id,
                    embedding,
                    metadatas.get(i),
                    documents.get(i),
                ))
            })
            .collect()
    }

    async fn fetch_all(&self) -> HiveResult<Vec<MemoryVector>> {
        let collection = self.collection_id().await?;
        let response = self
            .post(
                "chroma_get",
                &format!("/api/v1/collections/{collection}/get"),
                json!({ "include": ["embeddings", "metadatas", "documents"] }),
            )
            .await?;
        Ok(Self::parse_get_response(&response))
    }

    async fn upsert(&self, vectors: &[MemoryVector]) -> HiveResult<()> {
        if vectors.is_empty() {
            return Ok(());
        }
        let collection = self.collection_id().await?;
        let mut ids = Vec::new();
        let mut embeddings = Vec::new();
        let mut metadatas = Vec::new();
        let mut documents = Vec::new();
        for vector in vectors {
            let (metadata, document) = Self::vector_to_payload(vector);
            ids.push(Value::String(vector.id.clone()));
            embeddings.push(json!(vector.embedding));
            metadatas.push(metadata);
            documents.push(document);
        }
        self.post(
            "chroma_upsert",
            &format!("/api/v1/collections/{collection}/upsert"),
            json!({
                "ids": ids,
                "embeddings": embeddings,
                "metadatas": metadatas,
                "documents": documents,
            }),
        )
        .await?;
        Ok(())
    }

    async fn delete_ids(&self, ids: &[String]) -> HiveResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let collection = self.collection_id().await?;
        self.post(
            "chroma_delete",
            &format!("/api/v1/collections/{collection}/delete"),
            json!({ "ids": ids }),
        )
        .await?;
        Ok(())
    }

    /// Run `f` inside a transaction: commit on success, restore the
    /// pre-transaction vector set on failure.
    pub async fn with_transaction<T, F, Fut>(&self, f: F) -> HiveResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = HiveResult<T>>,
    {
        let transaction_id = self.begin_transaction(None).await?;
        match f().await {
            Ok(value) => {
                self.commit_transaction(&transaction_id).await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = self.rollback_transaction(&transaction_id).await {
                    tracing::error!(
                        transaction_id,
                        error = %rollback_error,
                        "chroma rollback failed"
                    );
                }
                Err(error)
            }
        }
    }
}

#[async_trait]
impl VectorStore for ChromaVectorStore {
    async fn store_vector(&self, vector: MemoryVector) -> HiveResult<String> {
        self.metrics.inc_memory("store_vector");
        {
            let mut dimension = self.dimension.write().await;
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
        let id = vector.id.clone();
        self.upsert(std::slice::from_ref(&vector)).await?;
        Ok(id)
    }

    async fn retrieve_vector(&self, vector_id: &str) -> HiveResult<Option<MemoryRecord>> {
        self.metrics.inc_memory("retrieve_vector");
        let collection = self.collection_id().await?;
        let response = self
            .post(
                "chroma_get",
                &format!("/api/v1/collections/{collection}/get"),
                json!({
                    "ids": [vector_id],
                    "include": ["embeddings", "metadatas", "documents"],
                }),
            )
            .await?;
        Ok(Self::parse_get_response(&response)
            .into_iter()
            .next()
            .map(|vector| MemoryRecord::from_vector(vector, STORE_NAME)))
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> HiveResult<Vec<MemoryRecord>> {
        self.metrics.inc_memory("similarity_search");
        let collection = self.collection_id().await?;
        let response = self
            .post(
                "chroma_query",
                &format!("/api/v1/collections/{collection}/query"),
                json!({
                    "query_embeddings": [embedding],
                    "n_results": top_k,
                    "include": ["embeddings", "metadatas", "documents", "distances"],
                }),
            )
            .await?;

        // Query responses nest one list per query embedding
        let first = |key: &str| -> Value {
            response
                .get(key)
                .and_then(Value::as_array)
                .and_then(|lists| lists.first())
                .cloned()
                .unwrap_or(Value::Array(Vec::new()))
        };
        let flattened = json!({
            "ids": first("ids"),
            "embeddings": first("embeddings"),
            "metadatas": first("metadatas"),
            "documents": first("documents"),
        });
        let distances: Vec<f64> = first("distances")
            .as_array()
            .map(|values| values.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();

        Ok(Self::parse_get_response(&flattened)
            .into_iter()
            .enumerate()
            .map(|(i, vector)| {
                let similarity = distances
                    .get(i)
                    .map(|distance| (1.0 / (1.0 + distance)) as f32);
                let mut record = MemoryRecord::from_vector(vector, STORE_NAME);
                record.similarity = similarity;
                record
            })
            .collect())
    }

    async fn delete_vector(&self, vector_id: &str) -> HiveResult<bool> {
        self.metrics.inc_memory("delete_vector");
        let existed = self.retrieve_vector(vector_id).await?.is_some();
        if existed {
            self.delete_ids(&[vector_id.to_string()]).await?;
        }
        Ok(existed)
    }

    async fn collection_stats(&self) -> HiveResult<VectorStoreStats> {
        let vectors = self.fetch_all().await?;
        Ok(VectorStoreStats {
            collection_name: self.collection_name.clone(),
            vector_count: vectors.len(),
            dimension: *self.dimension.read().await,
            extras: Default::default(),
        })
    }

    async fn get_all_vectors(&self) -> HiveResult<Vec<MemoryVector>> {
        self.fetch_all().await
    }
}

#[async_trait]
impl TransactionalStore for ChromaVectorStore {
    async fn begin_transaction(&self, transaction_id: Option<String>) -> HiveResult<String> {
        let id = transaction_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let snapshot = self.fetch_all().await?;
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&id) {
            return Err(HiveError::transaction_in(id, "transaction already active"));
        }
        transactions.insert(id.clone(), snapshot);
        Ok(id)
    }

    async fn commit_transaction(&self, transaction_id: &str) -> HiveResult<bool> {
        Ok(self
            .transactions
            .write()
            .await
            .remove(transaction_id)
            .is_some())
    }

    async fn rollback_transaction(&self, transaction_id: &str) -> HiveResult<bool> {
        let snapshot = {
            let mut transactions = self.transactions.write().await;
            transactions.remove(transaction_id)
        };
        let Some(snapshot) = snapshot else {
            return Ok(false);
        };
        let current_ids: Vec<String> = self
            .fetch_all()
            .await?
            .into_iter()
            .map(|vector| vector.id)
            .collect();
        self.delete_ids(&current_ids).await?;
        self.upsert(&snapshot).await?;
        Ok(true)
    }

    async fn is_transaction_active(&self, transaction_id: &str) -> bool {
        self.transactions.read().await.contains_key(transaction_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_response_parsing_handles_parallel_arrays() {
        let response = json!({
            "ids": ["a", "b"],
            "embeddings": [[1.0, 0.0], [0.0, 1.0]],
            "metadatas": [{"kind": "x", "created_at": "2024-01-01T00:00:00+00:00"}, null],
            "documents": ["first", null],
        });
        let vectors = ChromaVectorStore::parse_get_response(&response);
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].id, "a");
        assert_eq!(vectors[0].embedding, vec![1.0, 0.0]);
        assert_eq!(vectors[0].content.as_deref(), Some("first"));
        assert!(vectors[1].content.is_none());
    }

    #[test]
    fn payload_round_trip_keeps_metadata() {
        let mut vector = MemoryVector::new("a", vec![0.5]);
        vector
            .metadata
            .insert("kind".to_string(), "note".into());
        let (metadata, document) = ChromaVectorStore::vector_to_payload(&vector);
        let rebuilt = ChromaVectorStore::payload_to_vector(
            "a".to_string(),
            vec![0.5],
            Some(&metadata),
            Some(&document),
        );
        assert_eq!(rebuilt.metadata, vector.metadata);
    }
}
