//! Typed data-transfer objects for collaboration workflows.
//!
//! Every DTO serializes through serde with a `dto_type` tag injected at
//! the top level; deserialization tolerates a missing tag by defaulting to
//! [`AgentPayload`], which is how legacy agent content is carried. Maps at
//! DTO boundaries are `BTreeMap`s, so emitted keys are always sorted.

use std::collections::BTreeMap;

use hive_core::{HiveError, HiveResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Content payload attached to an agent message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Unrecognized mapping fields are preserved here instead of dropped
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl AgentPayload {
    pub fn summary(text: impl Into<String>) -> Self {
        Self {
            summary: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn value(payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::default()
        }
    }
}

/// Task header exchanged across component boundaries
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// Consensus method used to resolve a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusMethod {
    Majority,
    Weighted,
    Synthesis,
    Consensus,
}

/// One agent's recorded position
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentOpinion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opinion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// A disagreement between two agents
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConflictRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_a: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_b: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opinion_a: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opinion_b: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale_a: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale_b: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_score: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// Synthesized resolution produced from several opinions
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SynthesisArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_points: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expertise_weights: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_resolution_method: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub readability_score: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// Outcome of a consensus-building round
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<ConsensusMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub achieved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agent_opinions: Vec<AgentOpinion>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictRecord>,
    #[serde(default)]
    pub conflicts_identified: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub majority_opinion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stakeholder_explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl ConsensusOutcome {
    /// Apply the structural invariants: opinions and conflicts sorted
    /// deterministically, participants derived from opinion agents when
    /// not supplied, and the conflict count matching the conflict list.
    pub fn normalized(mut self) -> Self {
        self.agent_opinions.sort_by(|a, b| {
            (a.agent_id.as_deref(), a.timestamp.as_deref())
                .cmp(&(b.agent_id.as_deref(), b.timestamp.as_deref()))
        });
        self.conflicts.sort_by(|a, b| {
            (a.conflict_id.as_deref(), a.agent_a.as_deref())
                .cmp(&(b.conflict_id.as_deref(), b.agent_a.as_deref()))
        });

        let mut seen = std::collections::HashSet::new();
        if self.participants.is_empty() {
            self.participants = self
                .agent_opinions
                .iter()
                .filter_map(|opinion| opinion.agent_id.clone())
                .filter(|agent| seen.insert(agent.clone()))
                .collect();
        } else {
            self.participants.retain(|agent| seen.insert(agent.clone()));
        }

        if !self.conflicts.is_empty() && self.conflicts_identified != self.conflicts.len() {
            self.conflicts_identified = self.conflicts.len();
        }
        self
    }
}

/// Decision recorded by one reviewer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReviewDecision {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// Serializable summary of a peer-review cycle
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PeerReviewRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ReviewDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reviewers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// Routing hint naming the adapter and channel an entity syncs through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySyncPort {
    #[serde(default = "MemorySyncPort::default_adapter")]
    pub adapter: String,
    #[serde(default = "MemorySyncPort::default_channel")]
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, Value>,
}

impl Default for MemorySyncPort {
    fn default() -> Self {
        Self {
            adapter: Self::default_adapter(),
            channel: Self::default_channel(),
            priority: None,
            options: BTreeMap::new(),
        }
    }
}

impl MemorySyncPort {
    fn default_adapter() -> String {
        "conversation".to_string()
    }

    fn default_channel() -> String {
        "default".to_string()
    }
}

/// Normalize a JSON value into a sync port when possible
pub fn ensure_memory_sync_port(value: &Value) -> Option<MemorySyncPort> {
    match value {
        Value::Object(_) => serde_json::from_value(value.clone()).ok(),
        _ => None,
    }
}

/// Tagged union of every collaboration DTO
#[derive(Debug, Clone, PartialEq)]
pub enum CollaborationDto {
    AgentPayload(AgentPayload),
    TaskDescriptor(TaskDescriptor),
    ConsensusOutcome(ConsensusOutcome),
    ReviewDecision(ReviewDecision),
    PeerReviewRecord(PeerReviewRecord),
}

impl CollaborationDto {
    pub fn dto_type(&self) -> &'static str {
        match self {
            Self::AgentPayload(_) => "AgentPayload",
            Self::TaskDescriptor(_) => "TaskDescriptor",
            Self::ConsensusOutcome(_) => "ConsensusOutcome",
            Self::ReviewDecision(_) => "ReviewDecision",
            Self::PeerReviewRecord(_) => "PeerReviewRecord",
        }
    }

    /// Serialize with the `dto_type` tag injected
    pub fn to_value(&self) -> Value {
        let mut value = match self {
            Self::AgentPayload(dto) => json!(dto),
            Self::TaskDescriptor(dto) => json!(dto),
            Self::ConsensusOutcome(dto) => json!(dto),
            Self::ReviewDecision(dto) => json!(dto),
            Self::PeerReviewRecord(dto) => json!(dto),
        };
        if let Value::Object(map) = &mut value {
            map.insert(
                "dto_type".to_string(),
                Value::String(self.dto_type().to_string()),
            );
        }
        value
    }

    /// Deserialize a tagged mapping. A missing tag falls back to
    /// [`AgentPayload`] so legacy agent content is not lost.
    pub fn from_value(value: &Value) -> HiveResult<Self> {
        let Value::Object(map) = value else {
            return Err(HiveError::validation(
                "collaboration payload must be a mapping",
            ));
        };
        let tag = map.get("dto_type").and_then(Value::as_str);
        let parse_err =
            |e: serde_json::Error| HiveError::validation(format!("bad collaboration DTO: {e}"));
        match tag {
            None | Some("AgentPayload") => Ok(Self::AgentPayload(
                serde_json::from_value(strip_tag(value)).map_err(parse_err)?,
            )),
            Some("TaskDescriptor") => Ok(Self::TaskDescriptor(
                serde_json::from_value(strip_tag(value)).map_err(parse_err)?,
            )),
            Some("ConsensusOutcome") => Ok(Self::ConsensusOutcome(
                serde_json::from_value::<ConsensusOutcome>(strip_tag(value))
                    .map_err(parse_err)?
                    .normalized(),
            )),
            Some("ReviewDecision") => Ok(Self::ReviewDecision(
                serde_json::from_value(strip_tag(value)).map_err(parse_err)?,
            )),
            Some("PeerReviewRecord") => Ok(Self::PeerReviewRecord(
                serde_json::from_value(strip_tag(value)).map_err(parse_err)?,
            )),
            Some(other) => Err(HiveError::validation(format!("unknown dto_type '{other}'"))),
        }
    }
}

fn strip_tag(value: &Value) -> Value {
    let mut value = value.clone();
    if let Value::Object(map) = &mut value {
        map.remove("dto_type");
    }
    value
}

/// Message content in any of its accepted shapes
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    Record(CollaborationDto),
    Summary(String),
    Scalar(Value),
    List(Vec<MessagePayload>),
}

/// Accept any JSON content shape and classify it
pub fn ensure_payload(content: &Value) -> MessagePayload {
    match content {
        Value::Object(_) => match CollaborationDto::from_value(content) {
            Ok(dto) => MessagePayload::Record(dto),
            Err(_) => MessagePayload::Scalar(content.clone()),
        },
        Value::String(text) => MessagePayload::Summary(text.clone()),
        Value::Array(items) => MessagePayload::List(items.iter().map(ensure_payload).collect()),
        other => MessagePayload::Scalar(other.clone()),
    }
}

/// Normalize arbitrary message content into an [`AgentPayload`].
///
/// Mappings deserialize (a missing tag defaults to AgentPayload, another
/// DTO's fields are preserved under `payload`), strings become the
/// summary, scalars and sequences land in `payload`.
pub fn ensure_agent_payload(content: &Value) -> AgentPayload {
    match ensure_payload(content) {
        MessagePayload::Record(CollaborationDto::AgentPayload(payload)) => payload,
        MessagePayload::Record(dto) => AgentPayload::value(dto.to_value()),
        MessagePayload::Summary(text) => AgentPayload::summary(text),
        MessagePayload::Scalar(Value::Null) => AgentPayload::default(),
        MessagePayload::Scalar(value) => AgentPayload::value(value),
        MessagePayload::List(_) => AgentPayload::value(content.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dto_round_trip_keeps_tag() {
        let dto = CollaborationDto::TaskDescriptor(TaskDescriptor {
            task_id: Some("t-1".into()),
            summary: Some("do the thing".into()),
            ..Default::default()
        });
        let value = dto.to_value();
        assert_eq!(value["dto_type"], "TaskDescriptor");
        assert_eq!(CollaborationDto::from_value(&value).unwrap(), dto);
    }

    #[test]
    fn missing_tag_defaults_to_agent_payload() {
        let value = json!({"summary": "legacy content", "role": "worker"});
        let dto = CollaborationDto::from_value(&value).unwrap();
        match dto {
            CollaborationDto::AgentPayload(payload) => {
                assert_eq!(payload.summary.as_deref(), Some("legacy content"));
                assert_eq!(payload.role.as_deref(), Some("worker"));
            }
            other => panic!("expected AgentPayload, got {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let value = json!({"dto_type": "Mystery"});
        assert!(CollaborationDto::from_value(&value).is_err());
    }

    #[test]
    fn consensus_participants_derive_from_opinions() {
        let outcome = ConsensusOutcome {
            agent_opinions: vec![
                AgentOpinion {
                    agent_id: Some("beta".into()),
                    opinion: Some("no".into()),
                    ..Default::default()
                },
                AgentOpinion {
                    agent_id: Some("alpha".into()),
                    opinion: Some("yes".into()),
                    ..Default::default()
                },
                AgentOpinion {
                    agent_id: Some("alpha".into()),
                    opinion: Some("yes again".into()),
                    ..Default::default()
                },
            ],
            conflicts: vec![ConflictRecord {
                conflict_id: Some("c1".into()),
                agent_a: Some("alpha".into()),
                agent_b: Some("beta".into()),
                ..Default::default()
            }],
            ..Default::default()
        }
        .normalized();

        assert_eq!(outcome.participants, vec!["alpha", "beta"]);
        assert_eq!(outcome.conflicts_identified, 1);
        // Opinions sorted by agent then timestamp
        assert_eq!(outcome.agent_opinions[0].agent_id.as_deref(), Some("alpha"));
    }

    #[test]
    fn serialized_keys_are_sorted() {
        let dto = CollaborationDto::AgentPayload(AgentPayload {
            summary: Some("s".into()),
            agent_id: Some("a".into()),
            role: Some("r".into()),
            ..Default::default()
        });
        let serialized = serde_json::to_string(&dto.to_value()).unwrap();
        let agent_pos = serialized.find("agent_id").unwrap();
        let role_pos = serialized.find("role").unwrap();
        let summary_pos = serialized.find("summary").unwrap();
        assert!(agent_pos < role_pos && role_pos < summary_pos);
    }

    #[test]
    fn ensure_agent_payload_accepts_all_shapes() {
        assert_eq!(
            ensure_agent_payload(&json!("hello")).summary.as_deref(),
            Some("hello")
        );
        assert_eq!(
            ensure_agent_payload(&json!(42)).payload,
            Some(json!(42))
        );
        assert_eq!(
            ensure_agent_payload(&json!([1, 2])).payload,
            Some(json!([1, 2]))
        );
        let from_map = ensure_agent_payload(&json!({"summary": "mapped"}));
        assert_eq!(from_map.summary.as_deref(), Some("mapped"));
        assert_eq!(ensure_agent_payload(&Value::Null), AgentPayload::default());
    }

    #[test]
    fn sync_port_applies_defaults() {
        let port = ensure_memory_sync_port(&json!({"priority": "high"})).unwrap();
        assert_eq!(port.adapter, "conversation");
        assert_eq!(port.channel, "default");
        assert_eq!(port.priority.as_deref(), Some("high"));
        assert!(ensure_memory_sync_port(&json!("nope")).is_none());
    }
}
