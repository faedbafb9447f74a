//! Memory DTOs exchanged across adapter boundaries.
//!
//! `MemoryItem` and `MemoryVector` are the storage-side shapes; once data
//! leaves a store boundary it travels as a `MemoryRecord`, which adds the
//! originating store name and an optional similarity score. Aggregation
//! layers wrap records in `MemoryQueryResults` (one store) or
//! `GroupedMemoryResults` (many stores).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HiveError, HiveResult};
use crate::metadata::{coerce_metadata, to_serializable, MemoryMetadata, MetadataValue};

/// Semantic category of a memory artefact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    ShortTerm,
    LongTerm,
    Working,
    TeamState,
    ConsensusResult,
    CollaborationTask,
    CollaborationMessage,
    PeerReview,
    CollaborationTeam,
    Context,
    Knowledge,
    Error,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
            Self::Working => "working",
            Self::TeamState => "team_state",
            Self::ConsensusResult => "consensus_result",
            Self::CollaborationTask => "collaboration_task",
            Self::CollaborationMessage => "collaboration_message",
            Self::PeerReview => "peer_review",
            Self::CollaborationTeam => "collaboration_team",
            Self::Context => "context",
            Self::Knowledge => "knowledge",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "short_term" => Some(Self::ShortTerm),
            "long_term" => Some(Self::LongTerm),
            "working" => Some(Self::Working),
            "team_state" => Some(Self::TeamState),
            "consensus_result" => Some(Self::ConsensusResult),
            "collaboration_task" => Some(Self::CollaborationTask),
            "collaboration_message" => Some(Self::CollaborationMessage),
            "peer_review" => Some(Self::PeerReview),
            "collaboration_team" => Some(Self::CollaborationTeam),
            "context" => Some(Self::Context),
            "knowledge" => Some(Self::Knowledge),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single memory artefact owned by a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub content: Value,
    pub memory_type: MemoryType,
    #[serde(default)]
    pub metadata: MemoryMetadata,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl MemoryItem {
    pub fn new(id: impl Into<String>, content: Value, memory_type: MemoryType) -> Self {
        Self {
            id: id.into(),
            content,
            memory_type,
            metadata: MemoryMetadata::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: MemoryMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Content rendered as text for substring search and embedding
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// An embedding with optional source content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryVector {
    pub id: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: MemoryMetadata,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl MemoryVector {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            embedding,
            content: None,
            metadata: MemoryMetadata::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_metadata(mut self, metadata: MemoryMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Normalized record returned from store-agnostic search APIs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub item: MemoryItem,
    #[serde(default)]
    pub similarity: Option<f32>,
    #[serde(default)]
    pub source: Option<String>,
    /// Retrieval-side metadata, distinct from the item's own metadata
    #[serde(default)]
    pub metadata: MemoryMetadata,
}

impl MemoryRecord {
    pub fn from_item(item: MemoryItem, source: impl Into<String>) -> Self {
        Self {
            item,
            similarity: None,
            source: Some(source.into()),
            metadata: MemoryMetadata::new(),
        }
    }

    /// Materialize a vector as a record. The embedding lands in the item
    /// metadata under `embedding` so rerankers can recover it.
    pub fn from_vector(vector: MemoryVector, source: impl Into<String>) -> Self {
        let mut metadata = vector.metadata;
        metadata.insert(
            "embedding".to_string(),
            MetadataValue::List(
                vector
                    .embedding
                    .iter()
                    .map(|value| MetadataValue::Float(f64::from(*value)))
                    .collect(),
            ),
        );
        let item = MemoryItem {
            id: vector.id,
            content: vector
                .content
                .map(Value::String)
                .unwrap_or(Value::Null),
            memory_type: MemoryType::Knowledge,
            metadata,
            created_at: vector.created_at,
        };
        Self {
            item,
            similarity: None,
            source: Some(source.into()),
            metadata: MemoryMetadata::new(),
        }
    }

    pub fn with_similarity(mut self, similarity: f32) -> Self {
        self.similarity = Some(similarity);
        self
    }

    pub fn id(&self) -> &str {
        &self.item.id
    }
}

/// Results returned by querying a single memory store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryQueryResults {
    pub store: String,
    pub records: Vec<MemoryRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MemoryMetadata>,
}

/// Aggregated search response combining several stores
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupedMemoryResults {
    pub by_store: BTreeMap<String, MemoryQueryResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined: Option<Vec<MemoryRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MemoryMetadata>,
}

impl GroupedMemoryResults {
    /// Flatten all per-store records, preserving store iteration order
    pub fn all_records(&self) -> Vec<MemoryRecord> {
        self.by_store
            .values()
            .flat_map(|results| results.records.iter().cloned())
            .collect()
    }
}

/// Field-name overrides used when assembling records from raw rows
#[derive(Debug, Clone)]
pub struct RowOptions {
    pub metadata_field: String,
    pub similarity_field: String,
    pub source_field: String,
    pub default_source: Option<String>,
}

impl Default for RowOptions {
    fn default() -> Self {
        Self {
            metadata_field: "metadata".to_string(),
            similarity_field: "similarity".to_string(),
            source_field: "source".to_string(),
            default_source: None,
        }
    }
}

impl RowOptions {
    pub fn with_default_source(source: impl Into<String>) -> Self {
        Self {
            default_source: Some(source.into()),
            ..Self::default()
        }
    }
}

fn coerce_similarity(value: &Value) -> Option<f32> {
    match value {
        Value::Number(number) => number.as_f64().map(|f| f as f32),
        Value::String(text) => text.parse::<f32>().ok(),
        _ => None,
    }
}

/// Build a [`MemoryRecord`] from a serialized row payload.
///
/// Rows come back from persistence layers as JSON objects; metadata may be a
/// nested object or a JSON-encoded string (text columns), and similarity and
/// source fields are optional.
pub fn record_from_row(
    row: &serde_json::Map<String, Value>,
    options: &RowOptions,
) -> HiveResult<MemoryRecord> {
    let id = row
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| HiveError::validation("row payload is missing an id"))?
        .to_string();

    let content = row.get("content").cloned().unwrap_or(Value::Null);
    let memory_type = row
        .get("memory_type")
        .and_then(Value::as_str)
        .and_then(MemoryType::parse)
        .unwrap_or(MemoryType::LongTerm);

    let metadata = row
        .get(&options.metadata_field)
        .and_then(coerce_metadata)
        .unwrap_or_default();

    let created_at = row
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let similarity = row
        .get(&options.similarity_field)
        .and_then(coerce_similarity);

    let source = row
        .get(&options.source_field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| options.default_source.clone());

    let item = MemoryItem {
        id,
        content,
        memory_type,
        metadata,
        created_at,
    };

    Ok(MemoryRecord {
        item,
        similarity,
        source,
        metadata: MemoryMetadata::new(),
    })
}

/// Serialize a record into a persistence-friendly row
pub fn row_from_record(record: &MemoryRecord, options: &RowOptions) -> serde_json::Map<String, Value> {
    let mut row = serde_json::Map::new();
    row.insert("id".to_string(), Value::String(record.item.id.clone()));
    row.insert("content".to_string(), record.item.content.clone());
    row.insert(
        "memory_type".to_string(),
        Value::String(record.item.memory_type.as_str().to_string()),
    );
    row.insert(
        options.metadata_field.clone(),
        Value::Object(to_serializable(&record.item.metadata)),
    );
    row.insert(
        "created_at".to_string(),
        Value::String(record.item.created_at.to_rfc3339()),
    );
    if let Some(similarity) = record.similarity {
        row.insert(
            options.similarity_field.clone(),
            Value::from(f64::from(similarity)),
        );
    }
    if let Some(source) = &record.source {
        row.insert(options.source_field.clone(), Value::String(source.clone()));
    }
    row
}

/// Shape raw rows into a single store's query results
pub fn query_results_from_rows(
    store: &str,
    rows: &[serde_json::Map<String, Value>],
    total: Option<usize>,
    latency_ms: Option<f64>,
) -> HiveResult<MemoryQueryResults> {
    let options = RowOptions::with_default_source(store);
    let records = rows
        .iter()
        .map(|row| record_from_row(row, &options))
        .collect::<HiveResult<Vec<_>>>()?;
    Ok(MemoryQueryResults {
        store: store.to_string(),
        records,
        total,
        latency_ms,
        metadata: None,
    })
}

/// Wrap adapter-produced records, filling in the store as default source
pub fn query_results_from_records(store: &str, records: Vec<MemoryRecord>) -> MemoryQueryResults {
    let records = records
        .into_iter()
        .map(|mut record| {
            if record.source.is_none() {
                record.source = Some(store.to_string());
            }
            record
        })
        .collect();
    MemoryQueryResults {
        store: store.to_string(),
        records,
        total: None,
        latency_ms: None,
        metadata: None,
    }
}

/// Drop duplicate records, keyed by `(source, id)`, preserving order
pub fn deduplicate_records(records: Vec<MemoryRecord>) -> Vec<MemoryRecord> {
    let mut seen = std::collections::HashSet::new();
    let mut unique = Vec::with_capacity(records.len());
    for record in records {
        let key = (
            record.source.clone().unwrap_or_default(),
            record.item.id.clone(),
        );
        if seen.insert(key) {
            unique.push(record);
        }
    }
    unique
}

/// Convenience accessor for an embedding stashed in record metadata
pub fn embedding_from_metadata(metadata: &MemoryMetadata) -> Option<Vec<f32>> {
    match metadata.get("embedding")? {
        MetadataValue::List(values) => {
            let mut embedding = Vec::with_capacity(values.len());
            for value in values {
                embedding.push(value.as_f64()? as f32);
            }
            Some(embedding)
        }
        MetadataValue::Text(text) => serde_json::from_str::<Vec<f32>>(text).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_from_row_decodes_serialized_metadata() {
        let mut row = serde_json::Map::new();
        row.insert("id".to_string(), json!("item-1"));
        row.insert("content".to_string(), json!("hello"));
        row.insert("memory_type".to_string(), json!("working"));
        row.insert("metadata".to_string(), json!(r#"{"kind":"note"}"#));
        row.insert("similarity".to_string(), json!(0.5));

        let record = record_from_row(&row, &RowOptions::with_default_source("json")).unwrap();
        assert_eq!(record.item.id, "item-1");
        assert_eq!(record.item.memory_type, MemoryType::Working);
        assert_eq!(
            record.item.metadata["kind"],
            MetadataValue::Text("note".into())
        );
        assert_eq!(record.similarity, Some(0.5));
        assert_eq!(record.source.as_deref(), Some("json"));
    }

    #[test]
    fn record_from_row_requires_id() {
        let row = serde_json::Map::new();
        assert!(record_from_row(&row, &RowOptions::default()).is_err());
    }

    #[test]
    fn row_round_trip_preserves_fields() {
        let item = MemoryItem::new("x", json!({"v": 1}), MemoryType::LongTerm);
        let record = MemoryRecord::from_item(item, "memory").with_similarity(0.9);
        let options = RowOptions::default();
        let row = row_from_record(&record, &options);
        let rebuilt = record_from_row(&row, &options).unwrap();
        assert_eq!(rebuilt.item.id, "x");
        assert_eq!(rebuilt.similarity, Some(0.9));
        assert_eq!(rebuilt.source.as_deref(), Some("memory"));
    }

    #[test]
    fn deduplicate_keys_on_source_and_id() {
        let item = MemoryItem::new("a", json!(1), MemoryType::LongTerm);
        let records = vec![
            MemoryRecord::from_item(item.clone(), "json"),
            MemoryRecord::from_item(item.clone(), "json"),
            MemoryRecord::from_item(item, "graph"),
        ];
        let unique = deduplicate_records(records);
        assert_eq!(unique.len(), 2);
    }

    #[test]
    fn embedding_from_metadata_handles_lists_and_strings() {
        let mut metadata = MemoryMetadata::new();
        metadata.insert(
            "embedding".to_string(),
            MetadataValue::List(vec![
                MetadataValue::Float(1.0),
                MetadataValue::Int(0),
            ]),
        );
        assert_eq!(embedding_from_metadata(&metadata), Some(vec![1.0, 0.0]));

        metadata.insert("embedding".to_string(), "[0.5,0.5]".into());
        assert_eq!(embedding_from_metadata(&metadata), Some(vec![0.5, 0.5]));
    }

    #[test]
    fn memory_type_string_forms_are_stable() {
        for ty in [
            MemoryType::ShortTerm,
            MemoryType::CollaborationTask,
            MemoryType::PeerReview,
            MemoryType::TeamState,
        ] {
            assert_eq!(MemoryType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(MemoryType::parse("bogus"), None);
    }
}
