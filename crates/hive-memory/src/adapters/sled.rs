//! Embedded key-value adapter backed by sled.
//!
//! Two trees: `items` holds JSON blobs (optionally encrypted) keyed by id,
//! and `meta_index` holds scan keys for filtered search:
//! `content:<id>`, `memory_type:<type>:<id>`, and
//! `metadata:<key>:<value>:<id>`. Explicit transactions are tracked by id;
//! mutations issued while a transaction is active record their prior state
//! and rollback replays the log in reverse.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use hive_core::{
    AdapterEntry, HiveError, HiveResult, MemoryItem, MemoryRecord, MemoryStore, MetricsRegistry,
    SearchQuery, SupportsFlush, TransactionalStore,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[cfg(feature = "encryption")]
use crate::crypto::PayloadCipher;

const STORE_NAME: &str = "sled";
const ITEMS_TREE: &str = "items";
const INDEX_TREE: &str = "meta_index";

enum Change {
    Stored {
        id: String,
        prior: Option<MemoryItem>,
    },
    Deleted {
        prior: MemoryItem,
    },
}

fn sled_err(e: sled::Error) -> HiveError {
    HiveError::memory_in(STORE_NAME, e.to_string())
}

/// Embedded KV store with a metadata index tree
pub struct SledStore {
    db: sled::Db,
    items: sled::Tree,
    index: sled::Tree,
    #[cfg(feature = "encryption")]
    cipher: Option<PayloadCipher>,
    transactions: Arc<RwLock<HashMap<String, Vec<Change>>>>,
    metrics: MetricsRegistry,
}

impl SledStore {
    /// Open (or create) a database directory at `path`
    pub fn open(path: impl AsRef<Path>, metrics: MetricsRegistry) -> HiveResult<Self> {
        let db = if hive_core::env::no_file_persistence() {
            sled::Config::new()
                .temporary(true)
                .open()
                .map_err(sled_err)?
        } else {
            sled::open(path).map_err(sled_err)?
        };
        Self::from_db(db, metrics)
    }

    /// Database held entirely in temporary storage
    pub fn ephemeral(metrics: MetricsRegistry) -> HiveResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(sled_err)?;
        Self::from_db(db, metrics)
    }

    fn from_db(db: sled::Db, metrics: MetricsRegistry) -> HiveResult<Self> {
        let items = db.open_tree(ITEMS_TREE).map_err(sled_err)?;
        let index = db.open_tree(INDEX_TREE).map_err(sled_err)?;
        Ok(Self {
            db,
            items,
            index,
            #[cfg(feature = "encryption")]
            cipher: None,
            transactions: Arc::new(RwLock::new(HashMap::new())),
            metrics,
        })
    }

    /// Enable payload encryption for item blobs
    #[cfg(feature = "encryption")]
    pub fn with_encryption_key(mut self, key_material: &[u8]) -> Self {
        self.cipher = Some(PayloadCipher::new(key_material));
        self
    }

    /// Wrap this store as a registry entry under `name`
    pub fn register_as(self: Arc<Self>, name: &str) -> AdapterEntry {
        AdapterEntry::new(name)
            .with_memory(self.clone())
            .with_transactions(self.clone())
            .with_flush(self)
    }

    fn encode(&self, plaintext: Vec<u8>) -> HiveResult<Vec<u8>> {
        #[cfg(feature = "encryption")]
        if let Some(cipher) = &self.cipher {
            return cipher.encrypt(&plaintext);
        }
        Ok(plaintext)
    }

    fn decode(&self, raw: Vec<u8>) -> HiveResult<Vec<u8>> {
        #[cfg(feature = "encryption")]
        if let Some(cipher) = &self.cipher {
            return cipher.decrypt(&raw);
        }
        Ok(raw)
    }

    fn is_encrypted(&self) -> bool {
        #[cfg(feature = "encryption")]
        {
            self.cipher.is_some()
        }
        #[cfg(not(feature = "encryption"))]
        {
            false
        }
    }

    fn index_keys(item: &MemoryItem) -> Vec<String> {
        let mut keys = vec![
            format!("content:{}", item.id),
            format!("memory_type:{}:{}", item.memory_type.as_str(), item.id),
        ];
        for (field, value) in &item.metadata {
            keys.push(format!(
                "metadata:{field}:{}:{}",
                value.to_json(),
                item.id
            ));
        }
        keys
    }

    fn load_item(&self, raw: sled::IVec) -> HiveResult<MemoryItem> {
        let plain = self.decode(raw.to_vec())?;
        serde_json::from_slice(&plain)
            .map_err(|e| HiveError::corruption(STORE_NAME, format!("bad item blob: {e}")))
    }

    fn get_item(&self, item_id: &str) -> HiveResult<Option<MemoryItem>> {
        match self.items.get(item_id.as_bytes()).map_err(sled_err)? {
            Some(raw) => Ok(Some(self.load_item(raw)?)),
            None => Ok(None),
        }
    }

    /// Write an item and its index keys, without transaction bookkeeping
    fn put_item(&self, item: &MemoryItem) -> HiveResult<()> {
        if let Some(prior) = self.get_item(&item.id)? {
            for key in Self::index_keys(&prior) {
                self.index.remove(key.as_bytes()).map_err(sled_err)?;
            }
        }
        let blob = self.encode(
            serde_json::to_vec(item)
                .map_err(|e| HiveError::memory_in(STORE_NAME, format!("serialize failed: {e}")))?,
        )?;
        self.items
            .insert(item.id.as_bytes(), blob)
            .map_err(sled_err)?;
        for key in Self::index_keys(item) {
            // The content key carries the searchable text unless payloads
            // are encrypted
            let payload: Vec<u8> = if key.starts_with("content:") && !self.is_encrypted() {
                item.content_text().into_bytes()
            } else {
                Vec::new()
            };
            self.index.insert(key.as_bytes(), payload).map_err(sled_err)?;
        }
        Ok(())
    }

    /// Remove an item and its index keys, without transaction bookkeeping
    fn remove_item(&self, item_id: &str) -> HiveResult<Option<MemoryItem>> {
        let Some(prior) = self.get_item(item_id)? else {
            return Ok(None);
        };
        for key in Self::index_keys(&prior) {
            self.index.remove(key.as_bytes()).map_err(sled_err)?;
        }
        self.items.remove(item_id.as_bytes()).map_err(sled_err)?;
        Ok(Some(prior))
    }

    async fn record_change(&self, change: impl Fn() -> Change) {
        let mut transactions = self.transactions.write().await;
        for log in transactions.values_mut() {
            log.push(change());
        }
    }

    fn ids_with_prefix(&self, prefix: &str) -> HiveResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in self.index.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry.map_err(sled_err)?;
            let key = String::from_utf8_lossy(&key);
            if let Some(id) = key.rsplit(':').next() {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl MemoryStore for SledStore {
    async fn store(&self, item: MemoryItem) -> HiveResult<String> {
        self.metrics.inc_memory("store");
        let prior = self.get_item(&item.id)?;
        self.record_change(|| Change::Stored {
            id: item.id.clone(),
            prior: prior.clone(),
        })
        .await;
        self.put_item(&item)?;
        Ok(item.id)
    }

    async fn retrieve(&self, item_id: &str) -> HiveResult<Option<MemoryItem>> {
        self.metrics.inc_memory("retrieve");
        self.get_item(item_id)
    }

    async fn search(&self, query: &SearchQuery) -> HiveResult<Vec<MemoryRecord>> {
        self.metrics.inc_memory("search");

        let candidates: Vec<MemoryItem> = if let Some(memory_type) = query.memory_type {
            let ids = self.ids_with_prefix(&format!("memory_type:{}:", memory_type.as_str()))?;
            ids.into_iter()
                .filter_map(|id| self.get_item(&id).ok().flatten())
                .collect()
        } else if let Some((field, value)) = query.metadata.iter().next() {
            let ids =
                self.ids_with_prefix(&format!("metadata:{field}:{}:", value.to_json()))?;
            ids.into_iter()
                .filter_map(|id| self.get_item(&id).ok().flatten())
                .collect()
        } else {
            let mut items = Vec::new();
            for entry in self.items.iter() {
                let (_, raw) = entry.map_err(sled_err)?;
                items.push(self.load_item(raw)?);
            }
            items
        };

        let mut records: Vec<MemoryRecord> = candidates
            .into_iter()
            .filter(|item| query.matches(item))
            .map(|item| MemoryRecord::from_item(item, STORE_NAME))
            .collect();
        records.sort_by(|a, b| a.item.id.cmp(&b.item.id));
        Ok(records)
    }

    async fn delete(&self, item_id: &str) -> HiveResult<bool> {
        self.metrics.inc_memory("delete");
        let Some(prior) = self.remove_item(item_id)? else {
            return Ok(false);
        };
        self.record_change(|| Change::Deleted {
            prior: prior.clone(),
        })
        .await;
        Ok(true)
    }

    async fn get_all(&self) -> HiveResult<Vec<MemoryItem>> {
        let mut items = Vec::new();
        for entry in self.items.iter() {
            let (_, raw) = entry.map_err(sled_err)?;
            items.push(self.load_item(raw)?);
        }
        Ok(items)
    }
}

#[async_trait]
impl TransactionalStore for SledStore {
    async fn begin_transaction(&self, transaction_id: Option<String>) -> HiveResult<String> {
        let id = transaction_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&id) {
            return Err(HiveError::transaction_in(id, "transaction already active"));
        }
        transactions.insert(id.clone(), Vec::new());
        tracing::debug!(transaction_id = %id, "sled transaction started");
        Ok(id)
    }

    async fn commit_transaction(&self, transaction_id: &str) -> HiveResult<bool> {
        let mut transactions = self.transactions.write().await;
        if transactions.remove(transaction_id).is_none() {
            return Ok(false);
        }
        drop(transactions);
        self.db.flush().map_err(sled_err)?;
        tracing::debug!(transaction_id, "sled transaction committed");
        Ok(true)
    }

    async fn rollback_transaction(&self, transaction_id: &str) -> HiveResult<bool> {
        let mut transactions = self.transactions.write().await;
        let Some(log) = transactions.remove(transaction_id) else {
            return Ok(false);
        };
        drop(transactions);
        for change in log.into_iter().rev() {
            match change {
                Change::Stored { id, prior } => match prior {
                    Some(item) => self.put_item(&item)?,
                    None => {
                        self.remove_item(&id)?;
                    }
                },
                Change::Deleted { prior } => self.put_item(&prior)?,
            }
        }
        self.db.flush().map_err(sled_err)?;
        tracing::debug!(transaction_id, "sled transaction rolled back");
        Ok(true)
    }

    async fn is_transaction_active(&self, transaction_id: &str) -> bool {
        self.transactions.read().await.contains_key(transaction_id)
    }
}

#[async_trait]
impl SupportsFlush for SledStore {
    async fn flush(&self) -> HiveResult<()> {
        self.db.flush().map_err(sled_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::{MemoryMetadata, MemoryType, MetadataValue};
    use serde_json::json;

    fn store() -> SledStore {
        SledStore::ephemeral(MetricsRegistry::new()).unwrap()
    }

    fn item(id: &str, memory_type: MemoryType, owner: &str) -> MemoryItem {
        let mut metadata = MemoryMetadata::new();
        metadata.insert("owner".to_string(), MetadataValue::Text(owner.into()));
        MemoryItem::new(id, json!(format!("content of {id}")), memory_type)
            .with_metadata(metadata)
    }

    #[tokio::test]
    async fn store_retrieve_delete() {
        let store = store();
        store
            .store(item("a", MemoryType::Working, "alice"))
            .await
            .unwrap();
        assert!(store.retrieve("a").await.unwrap().is_some());
        assert!(store.delete("a").await.unwrap());
        assert!(store.retrieve("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_type_index_scan() {
        let store = store();
        store
            .store(item("a", MemoryType::Working, "alice"))
            .await
            .unwrap();
        store
            .store(item("b", MemoryType::LongTerm, "bob"))
            .await
            .unwrap();

        let records = store
            .search(&SearchQuery::memory_type(MemoryType::Working))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].item.id, "a");
    }

    #[tokio::test]
    async fn metadata_index_scan() {
        let store = store();
        store
            .store(item("a", MemoryType::Working, "alice"))
            .await
            .unwrap();
        store
            .store(item("b", MemoryType::Working, "bob"))
            .await
            .unwrap();

        let query = SearchQuery::default().with_metadata_field("owner", "bob");
        let records = store.search(&query).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].item.id, "b");
    }

    #[tokio::test]
    async fn restore_updates_index() {
        let store = store();
        store
            .store(item("a", MemoryType::Working, "alice"))
            .await
            .unwrap();
        store
            .store(item("a", MemoryType::LongTerm, "carol"))
            .await
            .unwrap();

        assert!(store
            .search(&SearchQuery::memory_type(MemoryType::Working))
            .await
            .unwrap()
            .is_empty());
        let records = store
            .search(&SearchQuery::default().with_metadata_field("owner", "carol"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn rollback_restores_prior_state() {
        let store = store();
        store
            .store(item("x", MemoryType::Working, "alice"))
            .await
            .unwrap();

        let txn = store.begin_transaction(None).await.unwrap();
        store
            .store(item("x", MemoryType::LongTerm, "mallory"))
            .await
            .unwrap();
        store
            .store(item("y", MemoryType::Working, "bob"))
            .await
            .unwrap();
        store.delete("x").await.unwrap();
        assert!(store.rollback_transaction(&txn).await.unwrap());

        let restored = store.retrieve("x").await.unwrap().unwrap();
        assert_eq!(restored.memory_type, MemoryType::Working);
        assert!(store.retrieve("y").await.unwrap().is_none());
    }
}
