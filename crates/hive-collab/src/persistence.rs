//! Bridging collaboration entities and the memory subsystem.
//!
//! Entities convert into `MemoryItem`s with an `entity_type` metadata tag
//! and type-specific routing metadata, then persist through the
//! coordinator's primary-store-plus-fanout path. Conversion back is
//! type-checked against the tag, so a replayed or mirrored record always
//! reconstructs as the entity kind that produced it.

use hive_core::{HiveError, HiveResult, MemoryItem, MemoryType, MetadataValue};
use hive_memory::MemoryCoordinator;

use crate::message::AgentMessage;
use crate::task::CollaborationTask;

const ENTITY_TYPE_KEY: &str = "entity_type";

/// Convert a task into its persisted form
pub fn task_to_item(task: &CollaborationTask) -> MemoryItem {
    let mut item = MemoryItem::new(
        task.id.clone(),
        task.to_value(),
        MemoryType::CollaborationTask,
    );
    item.metadata.insert(
        ENTITY_TYPE_KEY.to_string(),
        MetadataValue::Text("CollaborationTask".into()),
    );
    item.metadata.insert(
        "task_type".to_string(),
        MetadataValue::Text(task.task_type.clone()),
    );
    item.metadata.insert(
        "status".to_string(),
        MetadataValue::Text(task.state.as_str().into()),
    );
    if let Some(parent) = &task.parent_task_id {
        item.metadata.insert(
            "parent_task_id".to_string(),
            MetadataValue::Text(parent.clone()),
        );
    }
    item
}

/// Convert a message into its persisted form
pub fn message_to_item(message: &AgentMessage) -> MemoryItem {
    let mut item = MemoryItem::new(
        message.id.clone(),
        message.to_value(),
        MemoryType::CollaborationMessage,
    );
    item.metadata.insert(
        ENTITY_TYPE_KEY.to_string(),
        MetadataValue::Text("AgentMessage".into()),
    );
    item.metadata.insert(
        "message_type".to_string(),
        MetadataValue::Text(message.message_type.as_str().into()),
    );
    item.metadata.insert(
        "sender_id".to_string(),
        MetadataValue::Text(message.sender_id.clone()),
    );
    item.metadata.insert(
        "recipient_id".to_string(),
        MetadataValue::Text(message.recipient_id.clone()),
    );
    if let Some(task_id) = &message.related_task_id {
        item.metadata.insert(
            "related_task_id".to_string(),
            MetadataValue::Text(task_id.clone()),
        );
    }
    item
}

fn entity_type(item: &MemoryItem) -> Option<&str> {
    item.metadata.get(ENTITY_TYPE_KEY).and_then(MetadataValue::as_str)
}

/// Rebuild a task from its persisted form
pub fn task_from_item(item: &MemoryItem) -> HiveResult<CollaborationTask> {
    match entity_type(item) {
        Some("CollaborationTask") => CollaborationTask::from_value(&item.content),
        other => Err(HiveError::validation(format!(
            "item {} is not a collaboration task (entity_type: {other:?})",
            item.id
        ))),
    }
}

/// Rebuild a message from its persisted form
pub fn message_from_item(item: &MemoryItem) -> HiveResult<AgentMessage> {
    match entity_type(item) {
        Some("AgentMessage") => AgentMessage::from_value(&item.content),
        other => Err(HiveError::validation(format!(
            "item {} is not an agent message (entity_type: {other:?})",
            item.id
        ))),
    }
}

/// Persist a task through the coordinator with fanout redundancy
pub async fn store_task(
    coordinator: &MemoryCoordinator,
    task: &CollaborationTask,
) -> HiveResult<String> {
    coordinator.persist_with_fanout(task_to_item(task)).await
}

/// Persist a message through the coordinator with fanout redundancy
pub async fn store_message(
    coordinator: &MemoryCoordinator,
    message: &AgentMessage,
) -> HiveResult<String> {
    coordinator
        .persist_with_fanout(message_to_item(message))
        .await
}

/// Load a task by id through the coordinator
pub async fn load_task(
    coordinator: &MemoryCoordinator,
    task_id: &str,
) -> HiveResult<Option<CollaborationTask>> {
    match coordinator.retrieve(task_id).await? {
        Some(item) => Ok(Some(task_from_item(&item)?)),
        None => Ok(None),
    }
}

/// Load a message by id through the coordinator
pub async fn load_message(
    coordinator: &MemoryCoordinator,
    message_id: &str,
) -> HiveResult<Option<AgentMessage>> {
    match coordinator.retrieve(message_id).await? {
        Some(item) => Ok(Some(message_from_item(&item)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn task_round_trips_through_item() {
        let mut task =
            CollaborationTask::new("analysis", "inspect the logs", BTreeMap::new())
                .with_parent("parent-1");
        task.add_dependency("dep-1");
        let item = task_to_item(&task);

        assert_eq!(item.memory_type, MemoryType::CollaborationTask);
        assert_eq!(
            item.metadata["parent_task_id"],
            MetadataValue::Text("parent-1".into())
        );

        let rebuilt = task_from_item(&item).unwrap();
        assert_eq!(rebuilt, task);
    }

    #[test]
    fn message_round_trips_through_item() {
        let message = AgentMessage::new(
            "alice",
            "bob",
            MessageType::Feedback,
            &json!("looks good"),
            Some("task-9".into()),
        );
        let item = message_to_item(&message);
        assert_eq!(item.memory_type, MemoryType::CollaborationMessage);
        let rebuilt = message_from_item(&item).unwrap();
        assert_eq!(rebuilt, message);
    }

    #[test]
    fn wrong_entity_type_is_rejected() {
        let message = AgentMessage::new("a", "b", MessageType::Question, &json!("q"), None);
        let item = message_to_item(&message);
        assert!(task_from_item(&item).is_err());
    }
}
