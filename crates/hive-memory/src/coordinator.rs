//! Memory coordinator.
//!
//! Owns the adapter registry, metrics, error logger, and embedding
//! function; drives cross-store transactions; and manages the queued
//! update fanout that gives collaboration entities best-effort redundancy
//! across every registered store. The registry is immutable once the
//! coordinator is built.

use std::sync::Arc;
use std::time::Duration;

use hive_core::{
    AdapterEntry, Embedder, HiveError, HiveResult, MemoryItem, MemoryMetadata, MemoryRecord,
    MemoryRegistry, MemoryStore, MetadataValue, MetricsRegistry, SupportsFlush, VectorStore,
};
use hive_reliability::{retry, RetryPolicy};
use tokio::sync::Mutex;

use crate::error_logger::MemoryErrorLogger;
use crate::transaction::TransactionContext;

/// Primary-store preference for collaboration entities, most preferred
/// first; falls back to the first registered adapter.
const PRIMARY_STORE_PREFERENCE: [&str; 3] = ["json", "graph", "sled"];

/// Builder for [`MemoryCoordinator`]
pub struct MemoryCoordinatorBuilder {
    registry: MemoryRegistry,
    metrics: MetricsRegistry,
    embedder: Embedder,
    error_logger: Option<Arc<MemoryErrorLogger>>,
}

impl Default for MemoryCoordinatorBuilder {
    fn default() -> Self {
        Self {
            registry: MemoryRegistry::new(),
            metrics: MetricsRegistry::new(),
            embedder: Embedder::default(),
            error_logger: None,
        }
    }
}

impl MemoryCoordinatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn embedder(mut self, embedder: Embedder) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn error_logger(mut self, logger: Arc<MemoryErrorLogger>) -> Self {
        self.error_logger = Some(logger);
        self
    }

    pub fn register(mut self, entry: AdapterEntry) -> HiveResult<Self> {
        self.registry.register(entry)?;
        Ok(self)
    }

    pub fn build(self) -> MemoryCoordinator {
        MemoryCoordinator {
            registry: self.registry,
            metrics: self.metrics,
            embedder: self.embedder,
            error_logger: self
                .error_logger
                .unwrap_or_else(|| Arc::new(MemoryErrorLogger::default())),
            queue: Mutex::new(Vec::new()),
        }
    }
}

/// Top-level owner of the adapter registry
pub struct MemoryCoordinator {
    registry: MemoryRegistry,
    metrics: MetricsRegistry,
    embedder: Embedder,
    error_logger: Arc<MemoryErrorLogger>,
    queue: Mutex<Vec<(String, MemoryItem)>>,
}

impl MemoryCoordinator {
    pub fn builder() -> MemoryCoordinatorBuilder {
        MemoryCoordinatorBuilder::new()
    }

    pub fn registry(&self) -> &MemoryRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn error_logger(&self) -> &Arc<MemoryErrorLogger> {
        &self.error_logger
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        self.metrics.inc_provider("embed");
        self.embedder.embed(text)
    }

    fn entry(&self, store: &str) -> HiveResult<&AdapterEntry> {
        self.registry
            .get(store)
            .ok_or_else(|| HiveError::memory(format!("adapter '{store}' is not registered")))
    }

    fn error_context(item_id: &str) -> MemoryMetadata {
        let mut context = MemoryMetadata::new();
        context.insert("item_id".to_string(), MetadataValue::Text(item_id.into()));
        context
    }

    /// Write an item directly to the named store
    pub async fn update_item(&self, store: &str, item: MemoryItem) -> HiveResult<String> {
        let entry = self.entry(store)?;
        let memory = entry.memory().ok_or_else(|| {
            HiveError::memory_in(store, "adapter does not accept document writes")
        })?;
        let item_id = item.id.clone();
        match memory.store(item).await {
            Ok(id) => Ok(id),
            Err(error) => {
                self.error_logger
                    .log_error("store", store, &error, Self::error_context(&item_id));
                Err(error)
            }
        }
    }

    /// Queue an item for a later [`flush_updates`] pass
    pub async fn queue_update(&self, store: &str, item: MemoryItem) {
        self.queue.lock().await.push((store.to_string(), item));
    }

    /// Number of queued updates awaiting a flush
    pub async fn queued_updates(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Drain the update queue in insertion order and flush the touched
    /// stores. Individual write failures are logged and skipped; the
    /// first error is surfaced after the whole queue has been attempted.
    pub async fn flush_updates(&self) -> HiveResult<()> {
        let drained: Vec<(String, MemoryItem)> = {
            let mut queue = self.queue.lock().await;
            queue.drain(..).collect()
        };

        let mut touched: Vec<String> = Vec::new();
        let mut first_error: Option<HiveError> = None;
        for (store, item) in drained {
            match self.update_item(&store, item).await {
                Ok(_) => {
                    if !touched.contains(&store) {
                        touched.push(store);
                    }
                }
                Err(error) => {
                    tracing::warn!(store = %store, error = %error, "queued update failed");
                    first_error.get_or_insert(error);
                }
            }
        }

        for store in touched {
            if let Some(entry) = self.registry.get(&store) {
                if let Some(flush) = entry.flush_support() {
                    if let Err(error) = flush.flush().await {
                        tracing::warn!(store = %store, error = %error, "flush failed");
                        first_error.get_or_insert(error);
                    }
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Retrieve an item by id, trying adapters in registration order
    pub async fn retrieve(&self, item_id: &str) -> HiveResult<Option<MemoryItem>> {
        for entry in self.registry.entries() {
            let Some(memory) = entry.memory() else {
                continue;
            };
            match memory.retrieve(item_id).await {
                Ok(Some(item)) => return Ok(Some(item)),
                Ok(None) => {}
                Err(error) => {
                    self.error_logger.log_error(
                        "retrieve",
                        entry.name(),
                        &error,
                        Self::error_context(item_id),
                    );
                }
            }
        }
        Ok(None)
    }

    /// Embed `text` and run a similarity search against the first adapter
    /// exposing a vector surface
    pub async fn search_memory(&self, text: &str, top_k: usize) -> HiveResult<Vec<MemoryRecord>> {
        let embedding = self.embed_text(text);
        for entry in self.registry.entries() {
            if let Some(vector) = entry.vector() {
                return vector.similarity_search(&embedding, top_k).await;
            }
        }
        Ok(Vec::new())
    }

    /// Begin a transaction over the named stores, in registry order
    pub async fn begin_transaction(&self, stores: &[&str]) -> HiveResult<TransactionContext> {
        let mut entries = Vec::with_capacity(stores.len());
        for store in stores {
            entries.push(self.entry(store)?.clone());
        }
        TransactionContext::begin(entries).await
    }

    /// Run `f` inside a transaction over `stores`: commit on success, roll
    /// back and propagate the error otherwise.
    pub async fn with_transaction<T, F, Fut>(&self, stores: &[&str], f: F) -> HiveResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = HiveResult<T>>,
    {
        let mut tx = self.begin_transaction(stores).await?;
        match f().await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(error) => {
                tx.rollback().await;
                Err(error)
            }
        }
    }

    /// Preferred destination for collaboration entities
    pub fn primary_collaboration_store(&self) -> Option<&str> {
        for name in PRIMARY_STORE_PREFERENCE {
            if self.registry.contains(name) {
                return Some(name);
            }
        }
        self.registry.first_name()
    }

    /// Persist a collaboration entity: transactional write to the primary
    /// store with bounded retry, then best-effort fanout to every other
    /// registered store. Secondary failures are logged, never fatal.
    pub async fn persist_with_fanout(&self, item: MemoryItem) -> HiveResult<String> {
        let primary = self
            .primary_collaboration_store()
            .ok_or_else(|| HiveError::memory("no adapters registered"))?
            .to_string();

        let policy: RetryPolicy<String> = RetryPolicy::new()
            .max_retries(3)
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(2));

        let stored_id = retry("persist_with_fanout", &policy, &self.metrics, || {
            let item = item.clone();
            let primary = primary.clone();
            async move {
                self.with_transaction(&[primary.as_str()], || async {
                    self.update_item(&primary, item.clone()).await
                })
                .await
            }
        })
        .await?;

        for entry in self.registry.entries() {
            if entry.name() == primary || entry.memory().is_none() {
                continue;
            }
            self.queue_update(entry.name(), item.clone()).await;
            tracing::debug!(
                store = entry.name(),
                item_id = %item.id,
                "queued redundant copy"
            );
        }
        if let Err(error) = self.flush_updates().await {
            tracing::warn!(
                item_id = %item.id,
                error = %error,
                "redundant fanout partially failed"
            );
        }

        Ok(stored_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStore;
    use crate::adapters::vector::VectorMemoryAdapter;
    use hive_core::MemoryType;
    use serde_json::json;

    fn coordinator() -> (MemoryCoordinator, Arc<InMemoryStore>, Arc<InMemoryStore>) {
        let metrics = MetricsRegistry::new();
        let a = Arc::new(InMemoryStore::new(metrics.clone()));
        let b = Arc::new(InMemoryStore::new(metrics.clone()));
        let vectors = Arc::new(VectorMemoryAdapter::new(metrics.clone()));
        let coordinator = MemoryCoordinator::builder()
            .metrics(metrics)
            .register(a.clone().register_as("json"))
            .unwrap()
            .register(b.clone().register_as("memory"))
            .unwrap()
            .register(vectors.register_as("vector"))
            .unwrap()
            .build();
        (coordinator, a, b)
    }

    fn item(id: &str) -> MemoryItem {
        MemoryItem::new(id, json!("payload"), MemoryType::CollaborationTask)
    }

    #[tokio::test]
    async fn update_and_retrieve_through_registry() {
        let (coordinator, _, _) = coordinator();
        coordinator.update_item("json", item("a")).await.unwrap();
        assert!(coordinator.retrieve("a").await.unwrap().is_some());
        assert!(coordinator.retrieve("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_store_is_an_error() {
        let (coordinator, _, _) = coordinator();
        let err = coordinator
            .update_item("bogus", item("a"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "MEMORY_STORE_ERROR");
    }

    #[tokio::test]
    async fn queued_updates_flush_in_order() {
        let (coordinator, a, _) = coordinator();
        coordinator.queue_update("json", item("first")).await;
        coordinator.queue_update("json", item("second")).await;
        assert_eq!(coordinator.queued_updates().await, 2);
        coordinator.flush_updates().await.unwrap();
        assert_eq!(coordinator.queued_updates().await, 0);
        assert_eq!(a.len().await, 2);
    }

    #[tokio::test]
    async fn fanout_reaches_every_document_store() {
        let (coordinator, a, b) = coordinator();
        let id = coordinator.persist_with_fanout(item("task-1")).await.unwrap();
        assert_eq!(id, "task-1");
        assert!(a.retrieve("task-1").await.unwrap().is_some());
        assert!(b.retrieve("task-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn primary_preference_follows_order() {
        let (coordinator, _, _) = coordinator();
        assert_eq!(coordinator.primary_collaboration_store(), Some("json"));

        let metrics = MetricsRegistry::new();
        let only = Arc::new(InMemoryStore::new(metrics.clone()));
        let coordinator = MemoryCoordinator::builder()
            .metrics(metrics)
            .register(only.register_as("memory"))
            .unwrap()
            .build();
        assert_eq!(coordinator.primary_collaboration_store(), Some("memory"));
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_closure_error() {
        let (coordinator, a, _) = coordinator();
        coordinator.update_item("json", item("x")).await.unwrap();

        let result: HiveResult<()> = coordinator
            .with_transaction(&["json"], || async {
                coordinator
                    .update_item(
                        "json",
                        MemoryItem::new("x", json!("changed"), MemoryType::Working),
                    )
                    .await?;
                Err(HiveError::validation("abort"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(
            a.retrieve("x").await.unwrap().unwrap().content,
            json!("payload")
        );
    }
}
