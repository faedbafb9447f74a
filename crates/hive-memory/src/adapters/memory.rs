//! In-memory key-value adapter.
//!
//! The development and test default. Holds no native transaction support;
//! the coordinator covers it with whole-state snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hive_core::{
    AdapterEntry, HiveResult, MemoryItem, MemoryRecord, MemoryStore, MetricsRegistry, SearchQuery,
};
use tokio::sync::RwLock;

/// Ephemeral hash-map store
pub struct InMemoryStore {
    items: Arc<RwLock<HashMap<String, MemoryItem>>>,
    metrics: MetricsRegistry,
}

impl InMemoryStore {
    pub fn new(metrics: MetricsRegistry) -> Self {
        Self {
            items: Arc::new(RwLock::new(HashMap::new())),
            metrics,
        }
    }

    /// Wrap this store as a registry entry under `name`
    pub fn register_as(self: Arc<Self>, name: &str) -> AdapterEntry {
        AdapterEntry::new(name).with_memory(self)
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn store(&self, item: MemoryItem) -> HiveResult<String> {
        self.metrics.inc_memory("store");
        let id = item.id.clone();
        self.items.write().await.insert(id.clone(), item);
        Ok(id)
    }

    async fn retrieve(&self, item_id: &str) -> HiveResult<Option<MemoryItem>> {
        self.metrics.inc_memory("retrieve");
        Ok(self.items.read().await.get(item_id).cloned())
    }

    async fn search(&self, query: &SearchQuery) -> HiveResult<Vec<MemoryRecord>> {
        self.metrics.inc_memory("search");
        let items = self.items.read().await;
        Ok(items
            .values()
            .filter(|item| query.matches(item))
            .cloned()
            .map(|item| MemoryRecord::from_item(item, "memory"))
            .collect())
    }

    async fn delete(&self, item_id: &str) -> HiveResult<bool> {
        self.metrics.inc_memory("delete");
        Ok(self.items.write().await.remove(item_id).is_some())
    }

    async fn get_all(&self) -> HiveResult<Vec<MemoryItem>> {
        Ok(self.items.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::MemoryType;
    use serde_json::json;

    fn store() -> InMemoryStore {
        InMemoryStore::new(MetricsRegistry::new())
    }

    #[tokio::test]
    async fn store_retrieve_delete() {
        let store = store();
        let item = MemoryItem::new("a", json!("hello"), MemoryType::Working);
        assert_eq!(store.store(item).await.unwrap(), "a");
        assert!(store.retrieve("a").await.unwrap().is_some());
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.retrieve("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn restore_replaces_existing_id() {
        let store = store();
        store
            .store(MemoryItem::new("a", json!("old"), MemoryType::Working))
            .await
            .unwrap();
        store
            .store(MemoryItem::new("a", json!("new"), MemoryType::Working))
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.retrieve("a").await.unwrap().unwrap().content,
            json!("new")
        );
    }

    #[tokio::test]
    async fn search_filters_and_tags_source() {
        let store = store();
        store
            .store(MemoryItem::new("a", json!("alpha"), MemoryType::Working))
            .await
            .unwrap();
        store
            .store(MemoryItem::new("b", json!("beta"), MemoryType::LongTerm))
            .await
            .unwrap();

        let records = store.search(&SearchQuery::content("alp")).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].item.id, "a");
        assert_eq!(records[0].source.as_deref(), Some("memory"));
    }
}
