//! JSON document file store.
//!
//! Persists one JSON document per store:
//! `{"version": "1.0", "updated_at": ..., "items": [...]}`. The prior file
//! is copied to `<path>.bak` before every write. Optional behaviors:
//! version tracking (prior items land in a `<stem>.versions.json` side
//! store keyed `"{id}_v{n}"`) and symmetric payload encryption (the file
//! holds the ciphertext of the document; the key is supplied at
//! construction and never logged).
//!
//! Transactions are change logs: every mutation issued while a transaction
//! is active records its prior state, and rollback replays the log in
//! reverse. Commit discards the log and persists.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hive_core::{
    AdapterEntry, HiveError, HiveResult, MemoryItem, MemoryMetadata, MemoryRecord, MemoryStore,
    MetadataValue, MetricsRegistry, SearchQuery, SupportsFlush, TransactionalStore,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

#[cfg(feature = "encryption")]
use crate::crypto::PayloadCipher;

const STORE_NAME: &str = "json";
const FILE_FORMAT_VERSION: &str = "1.0";

/// One entry in the version history of an item
#[derive(Debug, Clone, PartialEq)]
pub struct VersionEntry {
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    pub content_summary: String,
    pub metadata: MemoryMetadata,
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: String,
    updated_at: DateTime<Utc>,
    items: Vec<MemoryItem>,
}

#[derive(Serialize, Deserialize)]
struct VersionsFile {
    version: String,
    updated_at: DateTime<Utc>,
    items: HashMap<String, MemoryItem>,
}

#[derive(Debug)]
enum Change {
    Stored {
        id: String,
        prior: Option<MemoryItem>,
        version_added: Option<String>,
    },
    Deleted {
        prior: MemoryItem,
    },
}

#[derive(Default, Debug)]
struct State {
    items: HashMap<String, MemoryItem>,
    versions: HashMap<String, MemoryItem>,
    cache: HashMap<String, MemoryItem>,
    transactions: HashMap<String, Vec<Change>>,
}

/// Construction options
#[derive(Default)]
pub struct JsonFileStoreOptions {
    pub version_tracking: bool,
    /// Key material enabling payload encryption (requires the `encryption`
    /// feature)
    pub encryption_key: Option<Vec<u8>>,
}

/// Single-file JSON document store
pub struct JsonFileStore {
    path: Option<PathBuf>,
    versions_path: Option<PathBuf>,
    version_tracking: bool,
    #[cfg(feature = "encryption")]
    cipher: Option<PayloadCipher>,
    state: Arc<RwLock<State>>,
    metrics: MetricsRegistry,
}

impl std::fmt::Debug for JsonFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFileStore")
            .field("path", &self.path)
            .field("versions_path", &self.versions_path)
            .field("version_tracking", &self.version_tracking)
            .field("state", &self.state)
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl JsonFileStore {
    /// Open (or create) a store file at `path`
    pub async fn open(path: impl Into<PathBuf>, metrics: MetricsRegistry) -> HiveResult<Self> {
        Self::with_options(path, JsonFileStoreOptions::default(), metrics).await
    }

    pub async fn with_options(
        path: impl Into<PathBuf>,
        options: JsonFileStoreOptions,
        metrics: MetricsRegistry,
    ) -> HiveResult<Self> {
        #[cfg(not(feature = "encryption"))]
        if options.encryption_key.is_some() {
            return Err(HiveError::config(
                "payload encryption requires the `encryption` feature",
            ));
        }

        let path = path.into();
        let store = if hive_core::env::no_file_persistence() {
            Self::build(None, options, metrics)
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        HiveError::memory_in(
                            STORE_NAME,
                            format!("failed to create directory {}: {e}", parent.display()),
                        )
                    })?;
                }
            }
            Self::build(Some(path), options, metrics)
        };
        store.load().await?;
        Ok(store)
    }

    /// Store that never touches disk
    pub fn ephemeral(metrics: MetricsRegistry) -> Self {
        Self::build(None, JsonFileStoreOptions::default(), metrics)
    }

    fn build(path: Option<PathBuf>, options: JsonFileStoreOptions, metrics: MetricsRegistry) -> Self {
        let versions_path = path.as_ref().map(versions_path_for);
        Self {
            path,
            versions_path,
            version_tracking: options.version_tracking,
            #[cfg(feature = "encryption")]
            cipher: options
                .encryption_key
                .as_deref()
                .map(PayloadCipher::new),
            state: Arc::new(RwLock::new(State::default())),
            metrics,
        }
    }

    /// Wrap this store as a registry entry under `name`
    pub fn register_as(self: Arc<Self>, name: &str) -> AdapterEntry {
        AdapterEntry::new(name)
            .with_memory(self.clone())
            .with_transactions(self.clone())
            .with_flush(self)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
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

    async fn load(&self) -> HiveResult<()> {
        let mut state = self.state.write().await;

        if let Some(path) = &self.path {
            if path.exists() {
                let raw = tokio::fs::read(path).await.map_err(|e| {
                    HiveError::memory_in(
                        STORE_NAME,
                        format!("failed to read {}: {e}", path.display()),
                    )
                })?;
                if !raw.is_empty() {
                    let plain = self.decode(raw)?;
                    let file: StoreFile = serde_json::from_slice(&plain).map_err(|e| {
                        HiveError::corruption(
                            STORE_NAME,
                            format!("failed to parse {}: {e}", path.display()),
                        )
                    })?;
                    state.items = file
                        .items
                        .into_iter()
                        .map(|item| (item.id.clone(), item))
                        .collect();
                }
            }
        }

        if let Some(path) = &self.versions_path {
            if path.exists() {
                let raw = tokio::fs::read(path).await.map_err(|e| {
                    HiveError::memory_in(
                        STORE_NAME,
                        format!("failed to read {}: {e}", path.display()),
                    )
                })?;
                if !raw.is_empty() {
                    let plain = self.decode(raw)?;
                    let file: VersionsFile = serde_json::from_slice(&plain).map_err(|e| {
                        HiveError::corruption(
                            STORE_NAME,
                            format!("failed to parse {}: {e}", path.display()),
                        )
                    })?;
                    state.versions = file.items;
                }
            }
        }

        Ok(())
    }

    async fn persist(&self, state: &State) -> HiveResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        // Keep the prior file as a backup before overwriting
        if path.exists() {
            let backup = backup_path_for(path);
            if let Err(e) = tokio::fs::copy(path, &backup).await {
                tracing::warn!(path = %path.display(), error = %e, "failed to write backup file");
            }
        }

        let mut items: Vec<&MemoryItem> = state.items.values().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        let file = StoreFile {
            version: FILE_FORMAT_VERSION.to_string(),
            updated_at: Utc::now(),
            items: items.into_iter().cloned().collect(),
        };
        let plain = serde_json::to_vec_pretty(&file)
            .map_err(|e| HiveError::memory_in(STORE_NAME, format!("failed to serialize: {e}")))?;
        let payload = self.encode(plain)?;
        tokio::fs::write(path, payload).await.map_err(|e| {
            HiveError::memory_in(STORE_NAME, format!("failed to write {}: {e}", path.display()))
        })?;

        if let Some(versions_path) = &self.versions_path {
            if self.version_tracking || !state.versions.is_empty() {
                let file = VersionsFile {
                    version: FILE_FORMAT_VERSION.to_string(),
                    updated_at: Utc::now(),
                    items: state.versions.clone(),
                };
                let plain = serde_json::to_vec_pretty(&file).map_err(|e| {
                    HiveError::memory_in(STORE_NAME, format!("failed to serialize versions: {e}"))
                })?;
                let payload = self.encode(plain)?;
                tokio::fs::write(versions_path, payload).await.map_err(|e| {
                    HiveError::memory_in(
                        STORE_NAME,
                        format!("failed to write {}: {e}", versions_path.display()),
                    )
                })?;
            }
        }

        Ok(())
    }

    /// Retrieve a specific version of an item
    pub async fn retrieve_version(&self, item_id: &str, version: i64) -> Option<MemoryItem> {
        let state = self.state.read().await;
        if let Some(current) = state.items.get(item_id) {
            if item_version(current) == version {
                return Some(current.clone());
            }
        }
        state.versions.get(&version_key(item_id, version)).cloned()
    }

    /// Version history for an item, oldest first, deduplicated by version
    pub async fn get_history(&self, item_id: &str) -> Vec<VersionEntry> {
        let state = self.state.read().await;
        let mut by_version: HashMap<i64, VersionEntry> = HashMap::new();

        let prefix = format!("{item_id}_v");
        for (key, item) in &state.versions {
            if key.starts_with(&prefix) {
                let entry = version_entry(item);
                by_version.entry(entry.version).or_insert(entry);
            }
        }
        if let Some(current) = state.items.get(item_id) {
            let entry = version_entry(current);
            by_version.insert(entry.version, entry);
        }

        let mut history: Vec<VersionEntry> = by_version.into_values().collect();
        history.sort_by_key(|entry| entry.version);
        history
    }
}

fn versions_path_for(path: &PathBuf) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "store".to_string());
    path.with_file_name(format!("{stem}.versions.json"))
}

fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "store.json".to_string());
    name.push_str(".bak");
    path.with_file_name(name)
}

fn version_key(item_id: &str, version: i64) -> String {
    format!("{item_id}_v{version}")
}

fn item_version(item: &MemoryItem) -> i64 {
    item.metadata
        .get("version")
        .and_then(MetadataValue::as_i64)
        .unwrap_or(1)
}

fn version_entry(item: &MemoryItem) -> VersionEntry {
    let mut summary = item.content_text();
    if summary.len() > 100 {
        summary.truncate(100);
    }
    VersionEntry {
        version: item_version(item),
        timestamp: item.created_at,
        content_summary: summary,
        metadata: item.metadata.clone(),
    }
}

fn record_change(state: &mut State, change: impl Fn() -> Change) {
    // Every active transaction observes the mutation
    let txn_ids: Vec<String> = state.transactions.keys().cloned().collect();
    for txn_id in txn_ids {
        if let Some(log) = state.transactions.get_mut(&txn_id) {
            log.push(change());
        }
    }
}

#[async_trait]
impl MemoryStore for JsonFileStore {
    async fn store(&self, mut item: MemoryItem) -> HiveResult<String> {
        self.metrics.inc_memory("store");
        let id = item.id.clone();
        let mut state = self.state.write().await;

        let prior = state.items.get(&id).cloned();
        let mut version_added = None;

        if self.version_tracking {
            match &prior {
                Some(existing) => {
                    let prior_version = item_version(existing);
                    let key = version_key(&id, prior_version);
                    state.versions.insert(key.clone(), existing.clone());
                    version_added = Some(key);
                    item.metadata.insert(
                        "version".to_string(),
                        MetadataValue::Int(prior_version + 1),
                    );
                }
                None => {
                    item.metadata
                        .entry("version".to_string())
                        .or_insert(MetadataValue::Int(1));
                }
            }
        }

        record_change(&mut state, || Change::Stored {
            id: id.clone(),
            prior: prior.clone(),
            version_added: version_added.clone(),
        });

        state.cache.remove(&id);
        state.items.insert(id.clone(), item);
        self.persist(&state).await?;
        Ok(id)
    }

    async fn retrieve(&self, item_id: &str) -> HiveResult<Option<MemoryItem>> {
        self.metrics.inc_memory("retrieve");
        {
            let state = self.state.read().await;
            if let Some(cached) = state.cache.get(item_id) {
                self.metrics.inc_memory("cache_hit");
                return Ok(Some(cached.clone()));
            }
        }
        let mut state = self.state.write().await;
        match state.items.get(item_id).cloned() {
            Some(item) => {
                state.cache.insert(item_id.to_string(), item.clone());
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    async fn search(&self, query: &SearchQuery) -> HiveResult<Vec<MemoryRecord>> {
        self.metrics.inc_memory("search");
        let state = self.state.read().await;
        let mut records: Vec<MemoryRecord> = state
            .items
            .values()
            .filter(|item| query.matches(item))
            .cloned()
            .map(|item| MemoryRecord::from_item(item, STORE_NAME))
            .collect();
        records.sort_by(|a, b| a.item.id.cmp(&b.item.id));
        Ok(records)
    }

    async fn delete(&self, item_id: &str) -> HiveResult<bool> {
        self.metrics.inc_memory("delete");
        let mut state = self.state.write().await;
        let Some(prior) = state.items.remove(item_id) else {
            return Ok(false);
        };
        record_change(&mut state, || Change::Deleted {
            prior: prior.clone(),
        });
        state.cache.remove(item_id);
        self.persist(&state).await?;
        Ok(true)
    }

    async fn get_all(&self) -> HiveResult<Vec<MemoryItem>> {
        let state = self.state.read().await;
        Ok(state.items.values().cloned().collect())
    }
}

#[async_trait]
impl TransactionalStore for JsonFileStore {
    async fn begin_transaction(&self, transaction_id: Option<String>) -> HiveResult<String> {
        let id = transaction_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut state = self.state.write().await;
        if state.transactions.contains_key(&id) {
            return Err(HiveError::transaction_in(
                id.clone(),
                "transaction already active",
            ));
        }
        state.transactions.insert(id.clone(), Vec::new());
        tracing::debug!(transaction_id = %id, "json store transaction started");
        Ok(id)
    }

    async fn commit_transaction(&self, transaction_id: &str) -> HiveResult<bool> {
        let mut state = self.state.write().await;
        if state.transactions.remove(transaction_id).is_none() {
            return Ok(false);
        }
        self.persist(&state).await?;
        tracing::debug!(transaction_id, "json store transaction committed");
        Ok(true)
    }

    async fn rollback_transaction(&self, transaction_id: &str) -> HiveResult<bool> {
        let mut state = self.state.write().await;
        let Some(log) = state.transactions.remove(transaction_id) else {
            return Ok(false);
        };
        for change in log.into_iter().rev() {
            match change {
                Change::Stored {
                    id,
                    prior,
                    version_added,
                } => {
                    match prior {
                        Some(item) => {
                            state.items.insert(id.clone(), item);
                        }
                        None => {
                            state.items.remove(&id);
                        }
                    }
                    if let Some(key) = version_added {
                        state.versions.remove(&key);
                    }
                    state.cache.remove(&id);
                }
                Change::Deleted { prior } => {
                    state.cache.remove(&prior.id);
                    state.items.insert(prior.id.clone(), prior);
                }
            }
        }
        self.persist(&state).await?;
        tracing::debug!(transaction_id, "json store transaction rolled back");
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

#[async_trait]
impl SupportsFlush for JsonFileStore {
    async fn flush(&self) -> HiveResult<()> {
        let state = self.state.read().await;
        self.persist(&state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::MemoryType;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    async fn open(path: &Path) -> JsonFileStore {
        JsonFileStore::open(path, MetricsRegistry::new())
            .await
            .unwrap()
    }

    fn item(id: &str, content: Value) -> MemoryItem {
        MemoryItem::new(id, content, MemoryType::Working)
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.json");
        {
            let store = open(&path).await;
            store.store(item("a", json!("hello"))).await.unwrap();
        }
        let store = open(&path).await;
        assert_eq!(
            store.retrieve("a").await.unwrap().unwrap().content,
            json!("hello")
        );
    }

    #[tokio::test]
    async fn keeps_backup_of_prior_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.json");
        let store = open(&path).await;
        store.store(item("a", json!(1))).await.unwrap();
        store.store(item("b", json!(2))).await.unwrap();
        assert!(dir.path().join("memory.json.bak").exists());
    }

    #[tokio::test]
    async fn rollback_restores_prior_state() {
        let dir = tempdir().unwrap();
        let store = open(&dir.path().join("memory.json")).await;
        store.store(item("x", json!("old"))).await.unwrap();

        let txn = store.begin_transaction(None).await.unwrap();
        store.store(item("x", json!("new"))).await.unwrap();
        store.store(item("y", json!("extra"))).await.unwrap();
        store.delete("x").await.unwrap();
        assert!(store.rollback_transaction(&txn).await.unwrap());

        assert_eq!(
            store.retrieve("x").await.unwrap().unwrap().content,
            json!("old")
        );
        assert!(store.retrieve("y").await.unwrap().is_none());
        assert!(!store.is_transaction_active(&txn).await);
    }

    #[tokio::test]
    async fn commit_keeps_changes() {
        let dir = tempdir().unwrap();
        let store = open(&dir.path().join("memory.json")).await;
        let txn = store.begin_transaction(Some("t1".into())).await.unwrap();
        store.store(item("x", json!("value"))).await.unwrap();
        assert!(store.commit_transaction(&txn).await.unwrap());
        assert!(store.retrieve("x").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn version_tracking_builds_gap_free_history() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::with_options(
            dir.path().join("memory.json"),
            JsonFileStoreOptions {
                version_tracking: true,
                encryption_key: None,
            },
            MetricsRegistry::new(),
        )
        .await
        .unwrap();

        store.store(item("doc", json!("v1"))).await.unwrap();
        store.store(item("doc", json!("v2"))).await.unwrap();
        store.store(item("doc", json!("v3"))).await.unwrap();

        let history = store.get_history("doc").await;
        let versions: Vec<i64> = history.iter().map(|entry| entry.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);

        let v2 = store.retrieve_version("doc", 2).await.unwrap();
        assert_eq!(v2.content, json!("v2"));
        let current = store.retrieve("doc").await.unwrap().unwrap();
        assert_eq!(item_version(&current), 3);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported_as_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();
        let err = JsonFileStore::open(&path, MetricsRegistry::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "MEMORY_CORRUPTION");
    }

    #[cfg(feature = "encryption")]
    #[tokio::test]
    async fn encrypted_store_round_trips_and_hides_plaintext() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.json");
        let options = || JsonFileStoreOptions {
            version_tracking: false,
            encryption_key: Some(b"secret".to_vec()),
        };
        {
            let store =
                JsonFileStore::with_options(&path, options(), MetricsRegistry::new())
                    .await
                    .unwrap();
            store.store(item("a", json!("classified"))).await.unwrap();
        }
        let raw = tokio::fs::read(&path).await.unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("classified"));

        let store = JsonFileStore::with_options(&path, options(), MetricsRegistry::new())
            .await
            .unwrap();
        assert_eq!(
            store.retrieve("a").await.unwrap().unwrap().content,
            json!("classified")
        );
    }
}
