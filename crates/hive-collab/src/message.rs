//! Agent messaging: the message DTO and the priority-aware message log.
//!
//! Messages carry a normalized [`AgentPayload`] and are persisted with
//! at-least-once semantics: re-storing the same message id replaces the
//! record, so replay is idempotent. The log orders history by priority
//! (high before normal before low, insertion order within a band) and
//! optionally persists to a JSON file, which the no-file-persistence
//! switch suppresses.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use hive_core::{HiveError, HiveResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dto::{ensure_agent_payload, AgentPayload};

/// Types of messages exchanged between agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskAssignment,
    TaskResult,
    Question,
    Answer,
    Feedback,
    Suggestion,
    StatusUpdate,
    InformationRequest,
    ReviewRequest,
    DecisionRequest,
    Notification,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskAssignment => "task_assignment",
            Self::TaskResult => "task_result",
            Self::Question => "question",
            Self::Answer => "answer",
            Self::Feedback => "feedback",
            Self::Suggestion => "suggestion",
            Self::StatusUpdate => "status_update",
            Self::InformationRequest => "information_request",
            Self::ReviewRequest => "review_request",
            Self::DecisionRequest => "decision_request",
            Self::Notification => "notification",
            Self::Error => "error",
        }
    }
}

/// A message exchanged between agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub message_type: MessageType,
    pub payload: AgentPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_task_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    /// Build a message, normalizing `content` into an [`AgentPayload`]
    pub fn new(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        message_type: MessageType,
        content: &Value,
        related_task_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            message_type,
            payload: ensure_agent_payload(content),
            related_task_id,
            timestamp: Utc::now(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: &Value) -> HiveResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| HiveError::validation(format!("bad agent message: {e}")))
    }

    fn priority(&self) -> Priority {
        match self
            .payload
            .attributes
            .get("priority")
            .and_then(Value::as_str)
        {
            Some("high") => Priority::High,
            Some("low") => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Priority {
    High,
    Normal,
    Low,
}

#[derive(Default, Serialize, Deserialize)]
struct LogFile {
    messages: Vec<AgentMessage>,
}

#[derive(Default)]
struct LogState {
    by_id: HashMap<String, AgentMessage>,
    history: Vec<String>,
}

/// Priority-ordered message history with optional file persistence
pub struct MessageLog {
    path: Option<PathBuf>,
    state: Mutex<LogState>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl MessageLog {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(LogState::default()),
        }
    }

    /// Log backed by a JSON file; existing history is loaded eagerly
    pub fn open(path: impl Into<PathBuf>) -> HiveResult<Self> {
        if hive_core::env::no_file_persistence() {
            return Ok(Self::in_memory());
        }
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    HiveError::memory(format!(
                        "failed to create directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let mut state = LogState::default();
        if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                HiveError::memory(format!("failed to read {}: {e}", path.display()))
            })?;
            if !raw.trim().is_empty() {
                let file: LogFile = serde_json::from_str(&raw).map_err(|e| {
                    HiveError::corruption("message-log", format!("bad log file: {e}"))
                })?;
                for message in file.messages {
                    state.history.push(message.id.clone());
                    state.by_id.insert(message.id.clone(), message);
                }
            }
        }

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    fn save(&self, state: &LogState) {
        let Some(path) = &self.path else {
            return;
        };
        let messages: Vec<AgentMessage> = state
            .history
            .iter()
            .filter_map(|id| state.by_id.get(id))
            .cloned()
            .collect();
        let file = LogFile { messages };
        match serde_json::to_vec_pretty(&file) {
            Ok(payload) => {
                if let Err(e) = std::fs::write(path, payload) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to persist message log");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize message log"),
        }
    }

    /// Record a message, placing it in the history by priority.
    ///
    /// Re-adding an id replaces the stored message in place.
    pub fn add(&self, message: AgentMessage) {
        let mut state = self.state.lock();
        let replaces = state.by_id.contains_key(&message.id);
        if !replaces {
            let position = match message.priority() {
                Priority::High => 0,
                Priority::Normal => state
                    .history
                    .iter()
                    .filter(|id| {
                        state
                            .by_id
                            .get(*id)
                            .map(|m| m.priority() == Priority::High)
                            .unwrap_or(false)
                    })
                    .count(),
                Priority::Low => state.history.len(),
            };
            let id = message.id.clone();
            state.history.insert(position, id);
        }
        state.by_id.insert(message.id.clone(), message);
        self.save(&state);
    }

    pub fn get(&self, message_id: &str) -> Option<AgentMessage> {
        self.state.lock().by_id.get(message_id).cloned()
    }

    /// History in priority order
    pub fn all(&self) -> Vec<AgentMessage> {
        let state = self.state.lock();
        state
            .history
            .iter()
            .filter_map(|id| state.by_id.get(id))
            .cloned()
            .collect()
    }

    /// Filtered history: by participating agent, message type, and
    /// earliest timestamp
    pub fn get_messages(
        &self,
        agent: Option<&str>,
        message_type: Option<MessageType>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<AgentMessage> {
        self.all()
            .into_iter()
            .filter(|message| {
                agent.map_or(true, |agent| {
                    message.sender_id == agent || message.recipient_id == agent
                })
            })
            .filter(|message| message_type.map_or(true, |ty| message.message_type == ty))
            .filter(|message| since.map_or(true, |since| message.timestamp >= since))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(sender: &str, priority: Option<&str>) -> AgentMessage {
        let content = match priority {
            Some(priority) => json!({"summary": "s", "priority": priority}),
            None => json!("plain"),
        };
        AgentMessage::new(sender, "recipient", MessageType::StatusUpdate, &content, None)
    }

    #[test]
    fn priority_orders_history() {
        let log = MessageLog::in_memory();
        log.add(message("normal-1", None));
        log.add(message("low-1", Some("low")));
        log.add(message("high-1", Some("high")));
        log.add(message("normal-2", None));

        let senders: Vec<String> = log.all().into_iter().map(|m| m.sender_id).collect();
        assert_eq!(senders, vec!["high-1", "normal-1", "normal-2", "low-1"]);
    }

    #[test]
    fn replay_is_idempotent() {
        let log = MessageLog::in_memory();
        let mut msg = message("a", None);
        log.add(msg.clone());
        msg.payload.summary = Some("updated".into());
        log.add(msg.clone());

        assert_eq!(log.len(), 1);
        assert_eq!(
            log.get(&msg.id).unwrap().payload.summary.as_deref(),
            Some("updated")
        );
    }

    #[test]
    fn filters_by_agent_and_type() {
        let log = MessageLog::in_memory();
        log.add(AgentMessage::new(
            "alice",
            "bob",
            MessageType::Question,
            &json!("q"),
            None,
        ));
        log.add(AgentMessage::new(
            "bob",
            "carol",
            MessageType::Answer,
            &json!("a"),
            None,
        ));

        assert_eq!(log.get_messages(Some("bob"), None, None).len(), 2);
        assert_eq!(log.get_messages(Some("alice"), None, None).len(), 1);
        assert_eq!(
            log.get_messages(None, Some(MessageType::Answer), None)
                .len(),
            1
        );
        assert!(log
            .get_messages(Some("alice"), Some(MessageType::Answer), None)
            .is_empty());
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        let id;
        {
            let log = MessageLog::open(&path).unwrap();
            let msg = message("alice", None);
            id = msg.id.clone();
            log.add(msg);
        }
        let log = MessageLog::open(&path).unwrap();
        assert_eq!(log.len(), 1);
        assert!(log.get(&id).is_some());
    }

    #[test]
    fn message_value_round_trip() {
        let msg = AgentMessage::new(
            "alice",
            "bob",
            MessageType::ReviewRequest,
            &json!({"summary": "please review"}),
            Some("task-1".into()),
        );
        let rebuilt = AgentMessage::from_value(&msg.to_value()).unwrap();
        assert_eq!(rebuilt, msg);
    }
}
