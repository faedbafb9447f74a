//! Graph adapter over an in-process triple store.
//!
//! Items are typed `memory:MemoryItem` and vectors `memory:MemoryVector`
//! under the `hive:`/`memory:` namespaces. Metadata hangs off a blank node
//! linked by `memory:hasMetadata`; embeddings serialize as JSON strings
//! under `memory:embedding`. The graph persists as a sorted Turtle file.
//!
//! Transaction methods are accepted no-ops (the protocol is honored but no
//! isolation is provided); when the graph is enlisted in a coordinator
//! transaction it is covered by whole-state snapshots instead.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hive_core::{
    cosine_similarity, AdapterEntry, HiveError, HiveResult, MemoryItem, MemoryMetadata,
    MemoryRecord, MemoryStore, MemoryType, MemoryVector, MetadataValue, MetricsRegistry,
    SearchQuery, TransactionalStore, VectorStore, VectorStoreStats,
};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

const STORE_NAME: &str = "graph";
const GRAPH_FILE: &str = "graph.ttl";

const RDF_TYPE: &str = "rdf:type";
const ITEM_TYPE: &str = "memory:MemoryItem";
const VECTOR_TYPE: &str = "memory:MemoryVector";
const PRED_ID: &str = "memory:id";
const PRED_CONTENT: &str = "memory:content";
const PRED_MEMORY_TYPE: &str = "memory:memoryType";
const PRED_CREATED_AT: &str = "memory:createdAt";
const PRED_HAS_METADATA: &str = "memory:hasMetadata";
const PRED_EMBEDDING: &str = "memory:embedding";
const META_PREFIX: &str = "memory:meta:";
const REL_PREFIX: &str = "memory:rel:";

fn item_uri(id: &str) -> String {
    format!("memory:item:{id}")
}

fn vector_uri(id: &str) -> String {
    format!("memory:vector:{id}")
}

fn meta_node(subject: &str) -> String {
    format!("_:meta:{subject}")
}

fn uri_to_item_id(uri: &str) -> Option<&str> {
    uri.strip_prefix("memory:item:")
}

/// Object position of a triple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    Resource(String),
    Literal(String),
}

/// One statement in the graph
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: Node,
}

/// Pattern with optional positions; `None` matches anything
#[derive(Debug, Clone, Default)]
pub struct TriplePattern {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<String>,
}

impl TriplePattern {
    fn matches(&self, triple: &Triple) -> bool {
        if let Some(subject) = &self.subject {
            if &triple.subject != subject {
                return false;
            }
        }
        if let Some(predicate) = &self.predicate {
            if &triple.predicate != predicate {
                return false;
            }
        }
        if let Some(object) = &self.object {
            let rendered = match &triple.object {
                Node::Resource(uri) => uri,
                Node::Literal(text) => text,
            };
            if rendered != object {
                return false;
            }
        }
        true
    }
}

/// Edge direction relative to the queried item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outgoing => "outgoing",
            Self::Incoming => "incoming",
        }
    }
}

/// One relationship touching an item
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipInfo {
    pub relationship: String,
    pub direction: Direction,
    pub related_id: String,
}

/// Edge list view of a neighborhood
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subgraph {
    pub nodes: Vec<String>,
    pub edges: Vec<SubgraphEdge>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubgraphEdge {
    pub source: String,
    pub relationship: String,
    pub target: String,
}

#[derive(Default)]
struct State {
    triples: HashSet<Triple>,
}

/// Triple-backed graph store
pub struct GraphStore {
    path: Option<PathBuf>,
    state: Arc<RwLock<State>>,
    metrics: MetricsRegistry,
}

impl GraphStore {
    /// Open (or create) a graph file under `base_path`
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
                path: Some(base_path.join(GRAPH_FILE)),
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
            path: None,
            state: Arc::new(RwLock::new(State::default())),
            metrics,
        }
    }

    /// Wrap this store as a registry entry under `name`.
    ///
    /// The transactional capability is deliberately left unfilled so the
    /// coordinator snapshots graph state for rollback instead of trusting
    /// the no-op transaction methods.
    pub fn register_as(self: Arc<Self>, name: &str) -> AdapterEntry {
        AdapterEntry::new(name)
            .with_memory(self.clone())
            .with_vector(self)
    }

    async fn load(&self) -> HiveResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            HiveError::memory_in(STORE_NAME, format!("failed to read {}: {e}", path.display()))
        })?;
        let mut state = self.state.write().await;
        state.triples = parse_turtle(&text)
            .map_err(|e| HiveError::corruption(STORE_NAME, format!("bad turtle file: {e}")))?;
        Ok(())
    }

    async fn persist(&self, state: &State) -> HiveResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = serialize_turtle(&state.triples);
        tokio::fs::write(path, text).await.map_err(|e| {
            HiveError::memory_in(STORE_NAME, format!("failed to write {}: {e}", path.display()))
        })
    }

    fn remove_subject(state: &mut State, subject: &str) {
        let meta = meta_node(subject);
        state
            .triples
            .retain(|t| t.subject != subject && t.subject != meta);
    }

    fn literal_of(state: &State, subject: &str, predicate: &str) -> Option<String> {
        state.triples.iter().find_map(|t| {
            if t.subject == subject && t.predicate == predicate {
                match &t.object {
                    Node::Literal(text) => Some(text.clone()),
                    Node::Resource(_) => None,
                }
            } else {
                None
            }
        })
    }

    fn metadata_of(state: &State, subject: &str) -> MemoryMetadata {
        let meta = meta_node(subject);
        let mut metadata = MemoryMetadata::new();
        for triple in &state.triples {
            if triple.subject == meta {
                if let Some(key) = triple.predicate.strip_prefix(META_PREFIX) {
                    if let Node::Literal(text) = &triple.object {
                        let value = serde_json::from_str::<Value>(text)
                            .map(MetadataValue::from_json)
                            .unwrap_or_else(|_| MetadataValue::Text(text.clone()));
                        metadata.insert(key.to_string(), value);
                    }
                }
            }
        }
        metadata
    }

    fn insert_metadata(state: &mut State, subject: &str, metadata: &MemoryMetadata) {
        if metadata.is_empty() {
            return;
        }
        let meta = meta_node(subject);
        state.triples.insert(Triple {
            subject: subject.to_string(),
            predicate: PRED_HAS_METADATA.to_string(),
            object: Node::Resource(meta.clone()),
        });
        for (key, value) in metadata {
            state.triples.insert(Triple {
                subject: meta.clone(),
                predicate: format!("{META_PREFIX}{key}"),
                object: Node::Literal(value.to_json().to_string()),
            });
        }
    }

    fn item_from_triples(state: &State, uri: &str) -> Option<MemoryItem> {
        let id = Self::literal_of(state, uri, PRED_ID)?;
        let content = Self::literal_of(state, uri, PRED_CONTENT)
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or(Value::Null);
        let memory_type = Self::literal_of(state, uri, PRED_MEMORY_TYPE)
            .and_then(|text| MemoryType::parse(&text))
            .unwrap_or(MemoryType::LongTerm);
        let created_at = Self::literal_of(state, uri, PRED_CREATED_AT)
            .and_then(|text| DateTime::parse_from_rfc3339(&text).ok())
            .map(|parsed| parsed.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Some(MemoryItem {
            id,
            content,
            memory_type,
            metadata: Self::metadata_of(state, uri),
            created_at,
        })
    }

    fn vector_from_triples(state: &State, uri: &str) -> Option<MemoryVector> {
        let id = Self::literal_of(state, uri, PRED_ID)?;
        let embedding: Vec<f32> = Self::literal_of(state, uri, PRED_EMBEDDING)
            .and_then(|text| serde_json::from_str(&text).ok())?;
        let content = Self::literal_of(state, uri, PRED_CONTENT);
        let created_at = Self::literal_of(state, uri, PRED_CREATED_AT)
            .and_then(|text| DateTime::parse_from_rfc3339(&text).ok())
            .map(|parsed| parsed.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Some(MemoryVector {
            id,
            embedding,
            content,
            metadata: Self::metadata_of(state, uri),
            created_at,
        })
    }

    fn subjects_of_type(state: &State, type_uri: &str) -> Vec<String> {
        let mut subjects: Vec<String> = state
            .triples
            .iter()
            .filter(|t| {
                t.predicate == RDF_TYPE && t.object == Node::Resource(type_uri.to_string())
            })
            .map(|t| t.subject.clone())
            .collect();
        subjects.sort();
        subjects
    }

    // ------------------------------------------------------------------
    // Relationship utilities
    // ------------------------------------------------------------------

    /// Link two items with a named relationship
    pub async fn create_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        relationship: &str,
    ) -> HiveResult<()> {
        let mut state = self.state.write().await;
        state.triples.insert(Triple {
            subject: item_uri(source_id),
            predicate: format!("{REL_PREFIX}{relationship}"),
            object: Node::Resource(item_uri(target_id)),
        });
        self.persist(&state).await
    }

    /// Remove a relationship; returns false when it did not exist
    pub async fn delete_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        relationship: &str,
    ) -> HiveResult<bool> {
        let mut state = self.state.write().await;
        let triple = Triple {
            subject: item_uri(source_id),
            predicate: format!("{REL_PREFIX}{relationship}"),
            object: Node::Resource(item_uri(target_id)),
        };
        let removed = state.triples.remove(&triple);
        if removed {
            self.persist(&state).await?;
        }
        Ok(removed)
    }

    /// Item ids related to `item_id` through any relationship, either
    /// direction, deduplicated
    pub async fn find_related_items(&self, item_id: &str) -> Vec<String> {
        let uri = item_uri(item_id);
        let state = self.state.read().await;
        let mut related = Vec::new();
        let mut seen = HashSet::new();
        for triple in &state.triples {
            if !triple.predicate.starts_with(REL_PREFIX) {
                continue;
            }
            if triple.subject == uri {
                if let Node::Resource(target) = &triple.object {
                    if let Some(id) = uri_to_item_id(target) {
                        if seen.insert(id.to_string()) {
                            related.push(id.to_string());
                        }
                    }
                }
            } else if triple.object == Node::Resource(uri.clone()) {
                if let Some(id) = uri_to_item_id(&triple.subject) {
                    if seen.insert(id.to_string()) {
                        related.push(id.to_string());
                    }
                }
            }
        }
        related.sort();
        related
    }

    /// All `(source, target)` id pairs connected by `relationship`
    pub async fn find_items_by_relationship(&self, relationship: &str) -> Vec<(String, String)> {
        let predicate = format!("{REL_PREFIX}{relationship}");
        let state = self.state.read().await;
        let mut pairs: Vec<(String, String)> = state
            .triples
            .iter()
            .filter(|t| t.predicate == predicate)
            .filter_map(|t| {
                let source = uri_to_item_id(&t.subject)?;
                let target = match &t.object {
                    Node::Resource(uri) => uri_to_item_id(uri)?,
                    Node::Literal(_) => return None,
                };
                Some((source.to_string(), target.to_string()))
            })
            .collect();
        pairs.sort();
        pairs
    }

    /// Every relationship touching `item_id` with its direction
    pub async fn get_item_relationships(&self, item_id: &str) -> Vec<RelationshipInfo> {
        let uri = item_uri(item_id);
        let state = self.state.read().await;
        let mut infos = Vec::new();
        for triple in &state.triples {
            let Some(name) = triple.predicate.strip_prefix(REL_PREFIX) else {
                continue;
            };
            if triple.subject == uri {
                if let Node::Resource(target) = &triple.object {
                    if let Some(id) = uri_to_item_id(target) {
                        infos.push(RelationshipInfo {
                            relationship: name.to_string(),
                            direction: Direction::Outgoing,
                            related_id: id.to_string(),
                        });
                    }
                }
            } else if triple.object == Node::Resource(uri.clone()) {
                if let Some(id) = uri_to_item_id(&triple.subject) {
                    infos.push(RelationshipInfo {
                        relationship: name.to_string(),
                        direction: Direction::Incoming,
                        related_id: id.to_string(),
                    });
                }
            }
        }
        infos.sort_by(|a, b| {
            (&a.relationship, &a.related_id).cmp(&(&b.relationship, &b.related_id))
        });
        infos
    }

    /// Match a triple pattern, returning subject/predicate/object bindings
    pub async fn query_graph_pattern(
        &self,
        pattern: &TriplePattern,
    ) -> Vec<BTreeMap<String, String>> {
        let state = self.state.read().await;
        let mut rows: Vec<BTreeMap<String, String>> = state
            .triples
            .iter()
            .filter(|triple| pattern.matches(triple))
            .map(|triple| {
                let mut row = BTreeMap::new();
                row.insert("subject".to_string(), triple.subject.clone());
                row.insert("predicate".to_string(), triple.predicate.clone());
                let object = match &triple.object {
                    Node::Resource(uri) => uri.clone(),
                    Node::Literal(text) => text.clone(),
                };
                row.insert("object".to_string(), object);
                row
            })
            .collect();
        rows.sort();
        rows
    }

    /// Breadth-first neighborhood of `center_id` bounded by `depth`
    pub async fn get_subgraph(&self, center_id: &str, depth: usize) -> Subgraph {
        let state = self.state.read().await;

        let mut edges_by_node: HashMap<String, Vec<SubgraphEdge>> = HashMap::new();
        for triple in &state.triples {
            let Some(name) = triple.predicate.strip_prefix(REL_PREFIX) else {
                continue;
            };
            let (Some(source), Node::Resource(target_uri)) =
                (uri_to_item_id(&triple.subject), &triple.object)
            else {
                continue;
            };
            let Some(target) = uri_to_item_id(target_uri) else {
                continue;
            };
            let edge = SubgraphEdge {
                source: source.to_string(),
                relationship: name.to_string(),
                target: target.to_string(),
            };
            edges_by_node
                .entry(source.to_string())
                .or_default()
                .push(edge.clone());
            edges_by_node.entry(target.to_string()).or_default().push(edge);
        }

        let mut nodes = Vec::new();
        let mut visited = HashSet::new();
        let mut edges = Vec::new();
        let mut edge_set = HashSet::new();
        let mut frontier = VecDeque::new();
        frontier.push_back((center_id.to_string(), 0usize));
        visited.insert(center_id.to_string());

        while let Some((node, level)) = frontier.pop_front() {
            nodes.push(node.clone());
            if level >= depth {
                continue;
            }
            for edge in edges_by_node.get(&node).into_iter().flatten() {
                let key = (
                    edge.source.clone(),
                    edge.relationship.clone(),
                    edge.target.clone(),
                );
                if edge_set.insert(key) {
                    edges.push(edge.clone());
                }
                let neighbor = if edge.source == node {
                    &edge.target
                } else {
                    &edge.source
                };
                if visited.insert(neighbor.clone()) {
                    frontier.push_back((neighbor.clone(), level + 1));
                }
            }
        }

        edges.sort_by(|a, b| {
            (&a.source, &a.relationship, &a.target).cmp(&(&b.source, &b.relationship, &b.target))
        });
        Subgraph { nodes, edges }
    }
}

// ----------------------------------------------------------------------
// Turtle serialization
// ----------------------------------------------------------------------

fn escape_literal(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}

fn unescape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn node_token(node: &str) -> String {
    if node.starts_with("_:") {
        node.to_string()
    } else {
        format!("<{node}>")
    }
}

fn serialize_turtle(triples: &HashSet<Triple>) -> String {
    let mut lines: Vec<String> = triples
        .iter()
        .map(|triple| {
            let object = match &triple.object {
                Node::Resource(uri) => node_token(uri),
                Node::Literal(text) => format!("\"{}\"", escape_literal(text)),
            };
            format!(
                "{} {} {} .",
                node_token(&triple.subject),
                node_token(&triple.predicate),
                object
            )
        })
        .collect();
    lines.sort();
    let mut out = String::from("# hive memory graph\n");
    out.push_str(&lines.join("\n"));
    out.push('\n');
    out
}

fn parse_node_token(token: &str) -> Result<String, String> {
    if let Some(stripped) = token.strip_prefix('<') {
        stripped
            .strip_suffix('>')
            .map(str::to_string)
            .ok_or_else(|| format!("unterminated uri token: {token}"))
    } else if token.starts_with("_:") {
        Ok(token.to_string())
    } else {
        Err(format!("unrecognized node token: {token}"))
    }
}

fn parse_turtle(text: &str) -> Result<HashSet<Triple>, String> {
    let mut triples = HashSet::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("@prefix") {
            continue;
        }
        let line = line
            .strip_suffix('.')
            .ok_or_else(|| format!("statement missing terminator: {line}"))?
            .trim_end();

        let (subject_token, rest) = line
            .split_once(' ')
            .ok_or_else(|| format!("statement missing predicate: {line}"))?;
        let (predicate_token, object_token) = rest
            .trim_start()
            .split_once(' ')
            .ok_or_else(|| format!("statement missing object: {line}"))?;
        let object_token = object_token.trim();

        let object = if let Some(stripped) = object_token.strip_prefix('"') {
            let inner = stripped
                .strip_suffix('"')
                .ok_or_else(|| format!("unterminated literal: {line}"))?;
            Node::Literal(unescape_literal(inner))
        } else {
            Node::Resource(parse_node_token(object_token)?)
        };

        triples.insert(Triple {
            subject: parse_node_token(subject_token)?,
            predicate: parse_node_token(predicate_token)?,
            object,
        });
    }
    Ok(triples)
}

// ----------------------------------------------------------------------
// Store trait implementations
// ----------------------------------------------------------------------

#[async_trait]
impl MemoryStore for GraphStore {
    async fn store(&self, item: MemoryItem) -> HiveResult<String> {
        self.metrics.inc_memory("store");
        let uri = item_uri(&item.id);
        let mut state = self.state.write().await;
        Self::remove_subject(&mut state, &uri);

        state.triples.insert(Triple {
            subject: uri.clone(),
            predicate: RDF_TYPE.to_string(),
            object: Node::Resource(ITEM_TYPE.to_string()),
        });
        state.triples.insert(Triple {
            subject: uri.clone(),
            predicate: PRED_ID.to_string(),
            object: Node::Literal(item.id.clone()),
        });
        state.triples.insert(Triple {
            subject: uri.clone(),
            predicate: PRED_CONTENT.to_string(),
            object: Node::Literal(item.content.to_string()),
        });
        state.triples.insert(Triple {
            subject: uri.clone(),
            predicate: PRED_MEMORY_TYPE.to_string(),
            object: Node::Literal(item.memory_type.as_str().to_string()),
        });
        state.triples.insert(Triple {
            subject: uri.clone(),
            predicate: PRED_CREATED_AT.to_string(),
            object: Node::Literal(item.created_at.to_rfc3339()),
        });
        Self::insert_metadata(&mut state, &uri, &item.metadata);

        self.persist(&state).await?;
        Ok(item.id)
    }

    async fn retrieve(&self, item_id: &str) -> HiveResult<Option<MemoryItem>> {
        self.metrics.inc_memory("retrieve");
        let state = self.state.read().await;
        Ok(Self::item_from_triples(&state, &item_uri(item_id)))
    }

    async fn search(&self, query: &SearchQuery) -> HiveResult<Vec<MemoryRecord>> {
        self.metrics.inc_memory("search");
        let state = self.state.read().await;
        let records = Self::subjects_of_type(&state, ITEM_TYPE)
            .into_iter()
            .filter_map(|uri| Self::item_from_triples(&state, &uri))
            .filter(|item| query.matches(item))
            .map(|item| MemoryRecord::from_item(item, STORE_NAME))
            .collect();
        Ok(records)
    }

    async fn delete(&self, item_id: &str) -> HiveResult<bool> {
        self.metrics.inc_memory("delete");
        let uri = item_uri(item_id);
        let mut state = self.state.write().await;
        let existed = state.triples.iter().any(|t| t.subject == uri);
        if !existed {
            return Ok(false);
        }
        Self::remove_subject(&mut state, &uri);
        // Relationships pointing at the item disappear with it
        state
            .triples
            .retain(|t| t.object != Node::Resource(uri.clone()));
        self.persist(&state).await?;
        Ok(true)
    }

    async fn get_all(&self) -> HiveResult<Vec<MemoryItem>> {
        let state = self.state.read().await;
        Ok(Self::subjects_of_type(&state, ITEM_TYPE)
            .into_iter()
            .filter_map(|uri| Self::item_from_triples(&state, &uri))
            .collect())
    }
}

#[async_trait]
impl VectorStore for GraphStore {
    async fn store_vector(&self, vector: MemoryVector) -> HiveResult<String> {
        self.metrics.inc_memory("store_vector");
        let uri = vector_uri(&vector.id);
        let mut state = self.state.write().await;
        Self::remove_subject(&mut state, &uri);

        state.triples.insert(Triple {
            subject: uri.clone(),
            predicate: RDF_TYPE.to_string(),
            object: Node::Resource(VECTOR_TYPE.to_string()),
        });
        state.triples.insert(Triple {
            subject: uri.clone(),
            predicate: PRED_ID.to_string(),
            object: Node::Literal(vector.id.clone()),
        });
        let embedding_json = serde_json::to_string(&vector.embedding)
            .map_err(|e| HiveError::memory_in(STORE_NAME, format!("bad embedding: {e}")))?;
        state.triples.insert(Triple {
            subject: uri.clone(),
            predicate: PRED_EMBEDDING.to_string(),
            object: Node::Literal(embedding_json),
        });
        if let Some(content) = &vector.content {
            state.triples.insert(Triple {
                subject: uri.clone(),
                predicate: PRED_CONTENT.to_string(),
                object: Node::Literal(content.clone()),
            });
        }
        state.triples.insert(Triple {
            subject: uri.clone(),
            predicate: PRED_CREATED_AT.to_string(),
            object: Node::Literal(vector.created_at.to_rfc3339()),
        });
        Self::insert_metadata(&mut state, &uri, &vector.metadata);

        self.persist(&state).await?;
        Ok(vector.id)
    }

    async fn retrieve_vector(&self, vector_id: &str) -> HiveResult<Option<MemoryRecord>> {
        self.metrics.inc_memory("retrieve_vector");
        let state = self.state.read().await;
        Ok(Self::vector_from_triples(&state, &vector_uri(vector_id))
            .map(|vector| MemoryRecord::from_vector(vector, STORE_NAME)))
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> HiveResult<Vec<MemoryRecord>> {
        self.metrics.inc_memory("similarity_search");
        let state = self.state.read().await;
        let mut scored: Vec<(f32, MemoryVector)> = Self::subjects_of_type(&state, VECTOR_TYPE)
            .into_iter()
            .filter_map(|uri| Self::vector_from_triples(&state, &uri))
            .map(|vector| (cosine_similarity(embedding, &vector.embedding), vector))
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
        let uri = vector_uri(vector_id);
        let mut state = self.state.write().await;
        let existed = state.triples.iter().any(|t| t.subject == uri);
        if !existed {
            return Ok(false);
        }
        Self::remove_subject(&mut state, &uri);
        self.persist(&state).await?;
        Ok(true)
    }

    async fn collection_stats(&self) -> HiveResult<VectorStoreStats> {
        let state = self.state.read().await;
        let subjects = Self::subjects_of_type(&state, VECTOR_TYPE);
        let dimension = subjects
            .first()
            .and_then(|uri| Self::vector_from_triples(&state, uri))
            .map(|vector| vector.embedding.len());
        Ok(VectorStoreStats {
            collection_name: STORE_NAME.to_string(),
            vector_count: subjects.len(),
            dimension,
            extras: Default::default(),
        })
    }

    async fn get_all_vectors(&self) -> HiveResult<Vec<MemoryVector>> {
        let state = self.state.read().await;
        Ok(Self::subjects_of_type(&state, VECTOR_TYPE)
            .into_iter()
            .filter_map(|uri| Self::vector_from_triples(&state, &uri))
            .collect())
    }
}

#[async_trait]
impl TransactionalStore for GraphStore {
    async fn begin_transaction(&self, transaction_id: Option<String>) -> HiveResult<String> {
        Ok(transaction_id.unwrap_or_else(|| Uuid::new_v4().to_string()))
    }

    async fn commit_transaction(&self, _transaction_id: &str) -> HiveResult<bool> {
        Ok(true)
    }

    async fn rollback_transaction(&self, _transaction_id: &str) -> HiveResult<bool> {
        Ok(true)
    }

    async fn is_transaction_active(&self, _transaction_id: &str) -> bool {
        false
    }
}
