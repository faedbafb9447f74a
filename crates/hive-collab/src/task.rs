//! Collaboration tasks and their state machine.
//!
//! Allowed transitions: PENDING -> ASSIGNED -> IN_PROGRESS ->
//! {COMPLETED | FAILED}; BLOCKED is reachable from ASSIGNED or
//! IN_PROGRESS. Anything else is rejected with a validation error.
//! Working copies hold ids (subtasks, dependencies, messages), never
//! owning pointers; traversal resolves through the coordinator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hive_core::{HiveError, HiveResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dto::{MemorySyncPort, TaskDescriptor};

/// Lifecycle state of a collaboration task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }

    /// Whether the state machine admits `self -> to`
    pub fn can_transition(&self, to: TaskState) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Assigned)
                | (Self::Assigned, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
                | (Self::Assigned, Self::Blocked)
                | (Self::InProgress, Self::Blocked)
        )
    }
}

/// A unit of work assignable to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationTask {
    pub id: String,
    pub task_type: String,
    pub description: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Subtask ids, insertion-ordered
    #[serde(default)]
    pub subtasks: Vec<String>,
    /// Ids of tasks that must complete before this one
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Message ids attached to this task, insertion-ordered
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_port: Option<MemorySyncPort>,
    pub descriptor: TaskDescriptor,
}

fn default_priority() -> i32 {
    1
}

impl CollaborationTask {
    pub fn new(
        task_type: impl Into<String>,
        description: impl Into<String>,
        inputs: BTreeMap<String, Value>,
    ) -> Self {
        let now = Utc::now();
        let mut task = Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            description: description.into(),
            inputs,
            required_capabilities: Vec::new(),
            parent_task_id: None,
            priority: default_priority(),
            state: TaskState::Pending,
            assigned_agent_id: None,
            result: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            subtasks: Vec::new(),
            dependencies: Vec::new(),
            messages: Vec::new(),
            sync_port: None,
            descriptor: TaskDescriptor::default(),
        };
        task.refresh_descriptor();
        task
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.required_capabilities = capabilities;
        self.refresh_descriptor();
        self
    }

    pub fn with_parent(mut self, parent_task_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self.refresh_descriptor();
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Merge a caller-supplied descriptor, then resync the derived fields
    pub fn with_descriptor(mut self, descriptor: TaskDescriptor) -> Self {
        if let Some(summary) = descriptor.summary {
            self.descriptor.summary = Some(summary);
        }
        if let Some(description) = descriptor.description {
            self.description = description;
        }
        self.descriptor.tags = descriptor.tags;
        for (key, value) in descriptor.metadata {
            if key == "sync_port" || key == "memory_sync_port" {
                self.sync_port = crate::dto::ensure_memory_sync_port(&value);
            } else {
                self.descriptor.metadata.insert(key, value);
            }
        }
        self.refresh_descriptor();
        self
    }

    /// Move to `to`, enforcing the state machine and updating timestamps
    pub fn transition(&mut self, to: TaskState) -> HiveResult<()> {
        if !self.state.can_transition(to) {
            return Err(HiveError::validation(format!(
                "invalid task transition {} -> {}",
                self.state.as_str(),
                to.as_str()
            )));
        }
        self.state = to;
        self.updated_at = Utc::now();
        match to {
            TaskState::InProgress => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            TaskState::Completed | TaskState::Failed => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }
        self.refresh_descriptor();
        Ok(())
    }

    pub fn add_subtask(&mut self, subtask_id: impl Into<String>) {
        self.subtasks.push(subtask_id.into());
        self.updated_at = Utc::now();
    }

    pub fn add_dependency(&mut self, task_id: impl Into<String>) {
        let task_id = task_id.into();
        if !self.dependencies.contains(&task_id) {
            self.dependencies.push(task_id);
        }
    }

    pub fn add_message(&mut self, message_id: impl Into<String>) {
        self.messages.push(message_id.into());
        self.updated_at = Utc::now();
    }

    /// Synchronize the descriptor with the current task state
    pub fn refresh_descriptor(&mut self) {
        self.descriptor.task_id = Some(self.id.clone());
        if self.descriptor.summary.is_none() {
            self.descriptor.summary = Some(self.description.clone());
        }
        self.descriptor.description = Some(self.description.clone());
        self.descriptor.status = Some(self.state.as_str().to_string());
        self.descriptor.assignee = self.assigned_agent_id.clone();
        self.descriptor.metadata.insert(
            "priority".to_string(),
            Value::from(i64::from(self.priority)),
        );
        self.descriptor.metadata.insert(
            "task_type".to_string(),
            Value::String(self.task_type.clone()),
        );
        if let Some(port) = &self.sync_port {
            self.descriptor.metadata.insert(
                "sync_port".to_string(),
                serde_json::to_value(port).unwrap_or(Value::Null),
            );
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: &Value) -> HiveResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| HiveError::validation(format!("bad collaboration task: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task() -> CollaborationTask {
        CollaborationTask::new("analysis", "inspect the logs", BTreeMap::new())
    }

    #[test]
    fn happy_path_transitions() {
        let mut task = task();
        assert_eq!(task.state, TaskState::Pending);
        task.transition(TaskState::Assigned).unwrap();
        task.transition(TaskState::InProgress).unwrap();
        assert!(task.started_at.is_some());
        task.transition(TaskState::Completed).unwrap();
        assert!(task.completed_at.is_some());
        assert_eq!(task.descriptor.status.as_deref(), Some("completed"));
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut task = task();
        assert_eq!(
            task.transition(TaskState::InProgress).unwrap_err().error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            task.transition(TaskState::Completed).unwrap_err().error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            task.transition(TaskState::Blocked).unwrap_err().error_code(),
            "VALIDATION_ERROR"
        );

        task.transition(TaskState::Assigned).unwrap();
        assert!(task.clone().transition(TaskState::Blocked).is_ok());
        task.transition(TaskState::InProgress).unwrap();
        assert!(task.clone().transition(TaskState::Blocked).is_ok());
        task.transition(TaskState::Failed).unwrap();
        assert!(task.transition(TaskState::Assigned).is_err());
    }

    #[test]
    fn descriptor_tracks_task_fields() {
        let mut task = task().with_priority(4);
        task.assigned_agent_id = Some("agent-1".into());
        task.refresh_descriptor();

        assert_eq!(task.descriptor.task_id.as_deref(), Some(task.id.as_str()));
        assert_eq!(task.descriptor.assignee.as_deref(), Some("agent-1"));
        assert_eq!(task.descriptor.metadata["priority"], json!(4));
        assert_eq!(task.descriptor.metadata["task_type"], json!("analysis"));
    }

    #[test]
    fn descriptor_sync_port_is_extracted() {
        let descriptor = TaskDescriptor {
            metadata: BTreeMap::from([(
                "sync_port".to_string(),
                json!({"adapter": "graph", "channel": "tasks"}),
            )]),
            ..Default::default()
        };
        let task = task().with_descriptor(descriptor);
        let port = task.sync_port.as_ref().unwrap();
        assert_eq!(port.adapter, "graph");
        assert_eq!(port.channel, "tasks");
        // The descriptor re-serializes the extracted port
        assert!(task.descriptor.metadata.contains_key("sync_port"));
    }

    #[test]
    fn value_round_trip() {
        let mut task = task().with_capabilities(vec!["rust".into()]);
        task.add_subtask("sub-1");
        task.add_message("msg-1");
        let rebuilt = CollaborationTask::from_value(&task.to_value()).unwrap();
        assert_eq!(rebuilt, task);
    }

    #[test]
    fn ordering_preserved_for_lists() {
        let mut task = task();
        for i in 0..5 {
            task.add_subtask(format!("sub-{i}"));
            task.add_message(format!("msg-{i}"));
        }
        assert_eq!(task.subtasks[0], "sub-0");
        assert_eq!(task.subtasks[4], "sub-4");
        assert_eq!(task.messages[2], "msg-2");
    }
}
