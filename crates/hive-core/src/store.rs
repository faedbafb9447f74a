//! Adapter contract and registry.
//!
//! Adapters implement whichever capability traits their backend supports.
//! Rather than probing methods at runtime, each adapter is registered as an
//! [`AdapterEntry`] whose capability slots are filled explicitly; the
//! coordinator matches on the slots it needs. The registry preserves
//! insertion order, which fixes the cross-adapter iteration order during
//! transactions.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::dto::{MemoryItem, MemoryRecord, MemoryType, MemoryVector};
use crate::error::{HiveError, HiveResult};
use crate::metadata::{MemoryMetadata, MetadataValue};

/// Structured query accepted by every `MemoryStore` search implementation.
///
/// Recognized fields are `content` (substring), `memory_type` (exact), and
/// `metadata.<field>` (exact after normalization). Unrecognized fields are
/// retained and reduce the query to false.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub content: Option<String>,
    pub memory_type: Option<MemoryType>,
    pub metadata: MemoryMetadata,
    unknown: Vec<String>,
}

impl SearchQuery {
    /// Free-text content query
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn memory_type(memory_type: MemoryType) -> Self {
        Self {
            memory_type: Some(memory_type),
            ..Self::default()
        }
    }

    pub fn with_metadata_field(
        mut self,
        field: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Self {
        self.metadata.insert(field.into(), value.into());
        self
    }

    /// Parse a structured query mapping
    pub fn from_fields(fields: &serde_json::Map<String, Value>) -> Self {
        let mut query = Self::default();
        for (key, value) in fields {
            match key.as_str() {
                "content" => {
                    if let Some(text) = value.as_str() {
                        query.content = Some(text.to_string());
                    }
                }
                "memory_type" => {
                    query.memory_type = value.as_str().and_then(MemoryType::parse);
                    if query.memory_type.is_none() {
                        query.unknown.push(key.clone());
                    }
                }
                other => {
                    if let Some(field) = other.strip_prefix("metadata.") {
                        query
                            .metadata
                            .insert(field.to_string(), MetadataValue::from_json(value.clone()));
                    } else {
                        query.unknown.push(key.clone());
                    }
                }
            }
        }
        query
    }

    /// Whether an item satisfies every predicate in the query
    pub fn matches(&self, item: &MemoryItem) -> bool {
        if !self.unknown.is_empty() {
            return false;
        }
        if let Some(expected) = self.memory_type {
            if item.memory_type != expected {
                return false;
            }
        }
        if let Some(needle) = &self.content {
            if !item.content_text().contains(needle.as_str()) {
                return false;
            }
        }
        for (field, expected) in &self.metadata {
            match item.metadata.get(field) {
                Some(actual) if actual == expected => {}
                _ => return false,
            }
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.memory_type.is_none()
            && self.metadata.is_empty()
            && self.unknown.is_empty()
    }
}

/// Statistics describing a vector collection
#[derive(Debug, Clone, Default)]
pub struct VectorStoreStats {
    pub collection_name: String,
    pub vector_count: usize,
    pub dimension: Option<usize>,
    pub extras: BTreeMap<String, MetadataValue>,
}

/// Key-value / document storage capability
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Store an item, replacing any existing item with the same id
    async fn store(&self, item: MemoryItem) -> HiveResult<String>;

    async fn retrieve(&self, item_id: &str) -> HiveResult<Option<MemoryItem>>;

    async fn search(&self, query: &SearchQuery) -> HiveResult<Vec<MemoryRecord>>;

    /// Delete an item; returns false when the id was absent
    async fn delete(&self, item_id: &str) -> HiveResult<bool>;

    /// Enumerate the full observable state, used for snapshots
    async fn get_all(&self) -> HiveResult<Vec<MemoryItem>>;
}

/// Embedding storage capability
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store a vector, replacing any existing vector with the same id.
    ///
    /// The first vector stored fixes the collection dimension; vectors with
    /// a different length are rejected with a validation error.
    async fn store_vector(&self, vector: MemoryVector) -> HiveResult<String>;

    async fn retrieve_vector(&self, vector_id: &str) -> HiveResult<Option<MemoryRecord>>;

    async fn similarity_search(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> HiveResult<Vec<MemoryRecord>>;

    async fn delete_vector(&self, vector_id: &str) -> HiveResult<bool>;

    async fn collection_stats(&self) -> HiveResult<VectorStoreStats>;

    /// Enumerate all live vectors, used for snapshots
    async fn get_all_vectors(&self) -> HiveResult<Vec<MemoryVector>>;
}

/// Native transaction capability
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Begin a transaction; a caller-supplied id is honored when given
    async fn begin_transaction(&self, transaction_id: Option<String>) -> HiveResult<String>;

    /// First phase of a two-phase commit. Defaults to a no-op vote of yes.
    async fn prepare_commit(&self, _transaction_id: &str) -> HiveResult<bool> {
        Ok(true)
    }

    async fn commit_transaction(&self, transaction_id: &str) -> HiveResult<bool>;

    async fn rollback_transaction(&self, transaction_id: &str) -> HiveResult<bool>;

    async fn is_transaction_active(&self, transaction_id: &str) -> bool;
}

/// Pending-write flush capability
#[async_trait]
pub trait SupportsFlush: Send + Sync {
    async fn flush(&self) -> HiveResult<()>;
}

/// One registered adapter with its capability slots
#[derive(Clone)]
pub struct AdapterEntry {
    name: String,
    memory: Option<Arc<dyn MemoryStore>>,
    vector: Option<Arc<dyn VectorStore>>,
    transactional: Option<Arc<dyn TransactionalStore>>,
    flush: Option<Arc<dyn SupportsFlush>>,
}

impl AdapterEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            memory: None,
            vector: None,
            transactional: None,
            flush: None,
        }
    }

    pub fn with_memory(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(store);
        self
    }

    pub fn with_vector(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector = Some(store);
        self
    }

    pub fn with_transactions(mut self, store: Arc<dyn TransactionalStore>) -> Self {
        self.transactional = Some(store);
        self
    }

    pub fn with_flush(mut self, store: Arc<dyn SupportsFlush>) -> Self {
        self.flush = Some(store);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn memory(&self) -> Option<&Arc<dyn MemoryStore>> {
        self.memory.as_ref()
    }

    pub fn vector(&self) -> Option<&Arc<dyn VectorStore>> {
        self.vector.as_ref()
    }

    pub fn transactional(&self) -> Option<&Arc<dyn TransactionalStore>> {
        self.transactional.as_ref()
    }

    pub fn flush_support(&self) -> Option<&Arc<dyn SupportsFlush>> {
        self.flush.as_ref()
    }
}

impl std::fmt::Debug for AdapterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterEntry")
            .field("name", &self.name)
            .field("memory", &self.memory.is_some())
            .field("vector", &self.vector.is_some())
            .field("transactional", &self.transactional.is_some())
            .field("flush", &self.flush.is_some())
            .finish()
    }
}

/// Ordered mapping from short store name to adapter entry.
///
/// Built once at startup; the coordinator treats it as read-only while
/// transactions are in flight.
#[derive(Debug, Default, Clone)]
pub struct MemoryRegistry {
    entries: Vec<AdapterEntry>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: AdapterEntry) -> HiveResult<()> {
        if self.entries.iter().any(|e| e.name() == entry.name()) {
            return Err(HiveError::config(format!(
                "adapter '{}' is already registered",
                entry.name()
            )));
        }
        tracing::debug!(adapter = entry.name(), "registered memory adapter");
        self.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&AdapterEntry> {
        self.entries.iter().find(|entry| entry.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Adapter names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(AdapterEntry::name).collect()
    }

    /// Entries in registration order
    pub fn entries(&self) -> impl Iterator<Item = &AdapterEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First registered adapter name, used as the last-resort primary store
    pub fn first_name(&self) -> Option<&str> {
        self.entries.first().map(AdapterEntry::name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn search_query_matches_content_type_and_metadata() {
        let item = MemoryItem::new("1", json!("hello world"), MemoryType::Working)
            .with_metadata(MemoryMetadata::from([(
                "owner".to_string(),
                MetadataValue::Text("alice".into()),
            )]));

        assert!(SearchQuery::content("world").matches(&item));
        assert!(!SearchQuery::content("absent").matches(&item));
        assert!(SearchQuery::memory_type(MemoryType::Working).matches(&item));
        assert!(!SearchQuery::memory_type(MemoryType::LongTerm).matches(&item));
        assert!(SearchQuery::default()
            .with_metadata_field("owner", "alice")
            .matches(&item));
        assert!(!SearchQuery::default()
            .with_metadata_field("owner", "bob")
            .matches(&item));
    }

    #[test]
    fn unknown_fields_reduce_to_false() {
        let mut fields = serde_json::Map::new();
        fields.insert("content".to_string(), json!("hello"));
        fields.insert("bogus".to_string(), json!(1));
        let query = SearchQuery::from_fields(&fields);

        let item = MemoryItem::new("1", json!("hello"), MemoryType::Working);
        assert!(!query.matches(&item));
    }

    #[test]
    fn from_fields_parses_metadata_prefix() {
        let mut fields = serde_json::Map::new();
        fields.insert("metadata.owner".to_string(), json!("alice"));
        let query = SearchQuery::from_fields(&fields);
        assert_eq!(
            query.metadata.get("owner"),
            Some(&MetadataValue::Text("alice".into()))
        );
    }

    #[test]
    fn registry_preserves_insertion_order_and_rejects_duplicates() {
        let mut registry = MemoryRegistry::new();
        registry.register(AdapterEntry::new("json")).unwrap();
        registry.register(AdapterEntry::new("graph")).unwrap();
        assert_eq!(registry.names(), vec!["json", "graph"]);
        assert_eq!(registry.first_name(), Some("json"));
        assert!(registry.register(AdapterEntry::new("json")).is_err());
    }
}
