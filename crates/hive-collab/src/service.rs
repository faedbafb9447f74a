//! Collaboration entity service.
//!
//! Registers agents and teams, creates and assigns tasks, executes task
//! workflows over a dependency DAG, and routes messages between agents.
//! All writes persist through the memory coordinator when one is
//! attached: task state changes run inside a transaction covering the
//! stores that host tasks, and messages fan out to every registered store
//! with best-effort redundancy.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use hive_core::{HiveError, HiveResult, MemoryItem, MemoryType, MetadataValue};
use hive_memory::MemoryCoordinator;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::dto::TaskDescriptor;
use crate::message::{AgentMessage, MessageLog, MessageType};
use crate::persistence::{message_to_item, store_message, task_from_item, task_to_item};
use crate::task::{CollaborationTask, TaskState};

/// An agent that can take part in collaboration workflows
#[async_trait]
pub trait CollaborativeAgent: Send + Sync {
    fn id(&self) -> &str;

    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    fn expertise(&self) -> Vec<String> {
        Vec::new()
    }

    /// Handle a task-execution or review request
    async fn process(&self, request: Value) -> HiveResult<Value>;

    /// Produce a revised work product from reviewer feedback
    async fn revise(&self, _request: Value) -> HiveResult<Option<Value>> {
        Ok(None)
    }
}

/// Handler registered for a task type, used instead of the assigned
/// agent's `process`
pub type TaskHandler =
    Arc<dyn Fn(CollaborationTask) -> BoxFuture<'static, HiveResult<Value>> + Send + Sync>;

/// Materialized team record stored under `collaboration_team`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamState {
    pub id: String,
    pub name: String,
    pub member_ids: Vec<String>,
    pub roles: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub research_personas: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// System for enabling collaboration between specialized agents
pub struct CollaborationService {
    agents: RwLock<Vec<Arc<dyn CollaborativeAgent>>>,
    teams: RwLock<HashMap<String, TeamState>>,
    tasks: RwLock<HashMap<String, CollaborationTask>>,
    handlers: RwLock<HashMap<String, TaskHandler>>,
    message_log: MessageLog,
    coordinator: Option<Arc<MemoryCoordinator>>,
}

impl Default for CollaborationService {
    fn default() -> Self {
        Self::new()
    }
}

impl CollaborationService {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(Vec::new()),
            teams: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            message_log: MessageLog::in_memory(),
            coordinator: None,
        }
    }

    /// Attach a coordinator so entities persist across stores
    pub fn with_coordinator(mut self, coordinator: Arc<MemoryCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn with_message_log(mut self, message_log: MessageLog) -> Self {
        self.message_log = message_log;
        self
    }

    pub fn message_log(&self) -> &MessageLog {
        &self.message_log
    }

    pub fn coordinator(&self) -> Option<&Arc<MemoryCoordinator>> {
        self.coordinator.as_ref()
    }

    // ------------------------------------------------------------------
    // Agents and teams
    // ------------------------------------------------------------------

    /// Register an agent; returns its stable id
    pub async fn register_agent(&self, agent: Arc<dyn CollaborativeAgent>) -> String {
        let id = agent.id().to_string();
        tracing::info!(
            agent = %id,
            capabilities = ?agent.capabilities(),
            "registered agent"
        );
        self.agents.write().await.push(agent);
        id
    }

    pub async fn agent(&self, agent_id: &str) -> Option<Arc<dyn CollaborativeAgent>> {
        self.agents
            .read()
            .await
            .iter()
            .find(|agent| agent.id() == agent_id)
            .cloned()
    }

    /// Create a team from registered agents and persist its state record
    pub async fn create_team(
        &self,
        team_id: impl Into<String>,
        agent_ids: Vec<String>,
    ) -> HiveResult<TeamState> {
        let team_id = team_id.into();
        let agents = self.agents.read().await;
        let mut member_ids = Vec::new();
        let mut roles = BTreeMap::new();
        for agent_id in &agent_ids {
            if !agents.iter().any(|agent| agent.id() == agent_id) {
                return Err(HiveError::collaboration(format!(
                    "agent {agent_id} is not registered"
                )));
            }
            let role = if member_ids.is_empty() { "lead" } else { "member" };
            roles.insert(agent_id.clone(), role.to_string());
            member_ids.push(agent_id.clone());
        }
        drop(agents);

        let now = Utc::now();
        let team = TeamState {
            id: team_id.clone(),
            name: format!("team-{team_id}"),
            member_ids,
            roles,
            research_personas: hive_core::env::research_personas(),
            created_at: now,
            updated_at: now,
        };

        if let Some(coordinator) = &self.coordinator {
            let mut item = MemoryItem::new(
                team.id.clone(),
                serde_json::to_value(&team)
                    .map_err(|e| HiveError::internal(format!("team serialization: {e}")))?,
                MemoryType::CollaborationTeam,
            );
            item.metadata.insert(
                "entity_type".to_string(),
                MetadataValue::Text("Team".into()),
            );
            coordinator.persist_with_fanout(item).await?;
        }

        self.teams.write().await.insert(team_id, team.clone());
        tracing::info!(team = %team.id, members = team.member_ids.len(), "created team");
        Ok(team)
    }

    pub async fn team(&self, team_id: &str) -> Option<TeamState> {
        self.teams.read().await.get(team_id).cloned()
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Register a handler for a task type
    pub async fn register_task_handler<F, Fut>(&self, task_type: &str, handler: F)
    where
        F: Fn(CollaborationTask) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HiveResult<Value>> + Send + 'static,
    {
        let handler: TaskHandler = Arc::new(move |task| Box::pin(handler(task)));
        self.handlers
            .write()
            .await
            .insert(task_type.to_string(), handler);
        tracing::info!(task_type, "registered task handler");
    }

    /// Create a task; a known parent gains the new task as a subtask
    #[allow(clippy::too_many_arguments)]
    pub async fn create_task(
        &self,
        task_type: &str,
        description: &str,
        inputs: BTreeMap<String, Value>,
        required_capabilities: Vec<String>,
        parent_task_id: Option<String>,
        priority: i32,
        descriptor: Option<TaskDescriptor>,
    ) -> HiveResult<CollaborationTask> {
        let mut task = CollaborationTask::new(task_type, description, inputs)
            .with_capabilities(required_capabilities)
            .with_priority(priority);
        if let Some(descriptor) = descriptor {
            task = task.with_descriptor(descriptor);
        }
        if let Some(parent_id) = parent_task_id {
            task = task.with_parent(parent_id.clone());
            if let Some(mut parent) = self.get_task(&parent_id).await {
                parent.add_subtask(task.id.clone());
                self.persist_task(&parent).await?;
                self.tasks
                    .write()
                    .await
                    .insert(parent.id.clone(), parent);
            }
        }

        self.persist_task(&task).await?;
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        tracing::info!(task = %task.id, task_type, "created task");
        Ok(task)
    }

    /// Fetch a task from the working set, falling back to the coordinator
    pub async fn get_task(&self, task_id: &str) -> Option<CollaborationTask> {
        if let Some(task) = self.tasks.read().await.get(task_id).cloned() {
            return Some(task);
        }
        let coordinator = self.coordinator.as_ref()?;
        match coordinator.retrieve(task_id).await {
            Ok(Some(item)) => match task_from_item(&item) {
                Ok(task) => {
                    self.tasks
                        .write()
                        .await
                        .insert(task.id.clone(), task.clone());
                    Some(task)
                }
                Err(error) => {
                    tracing::warn!(task = task_id, error = %error, "stored item is not a task");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(task = task_id, error = %error, "task lookup failed");
                None
            }
        }
    }

    /// Stores that host task records: the primary collaboration store,
    /// plus the graph store when registered
    fn task_stores<'a>(&self, coordinator: &'a MemoryCoordinator) -> Vec<&'a str> {
        let mut stores = Vec::new();
        if let Some(primary) = coordinator.primary_collaboration_store() {
            stores.push(primary);
        }
        if coordinator.registry().contains("graph") && !stores.contains(&"graph") {
            stores.push("graph");
        }
        stores
    }

    /// Write a task to every task-hosting store inside one transaction
    async fn persist_task(&self, task: &CollaborationTask) -> HiveResult<()> {
        let Some(coordinator) = &self.coordinator else {
            return Ok(());
        };
        let stores = self.task_stores(coordinator);
        if stores.is_empty() {
            return Ok(());
        }
        let item = task_to_item(task);
        coordinator
            .with_transaction(&stores, || async {
                for store in &stores {
                    coordinator.update_item(store, item.clone()).await?;
                }
                Ok(())
            })
            .await
    }

    /// Assign a task to an explicit agent, or to the first registered
    /// agent whose capabilities cover the requirements
    pub async fn assign_task(
        &self,
        task_id: &str,
        agent_id: Option<&str>,
    ) -> HiveResult<String> {
        let mut task = self
            .get_task(task_id)
            .await
            .ok_or_else(|| HiveError::collaboration(format!("task {task_id} not found")))?;

        if task.state != TaskState::Pending {
            return Err(HiveError::collaboration(format!(
                "task {task_id} is already assigned or finished"
            )));
        }

        let chosen = match agent_id {
            Some(agent_id) => {
                self.agent(agent_id).await.ok_or_else(|| {
                    HiveError::collaboration(format!("agent {agent_id} not found"))
                })?;
                agent_id.to_string()
            }
            None => self
                .find_best_agent(&task)
                .await
                .ok_or_else(|| {
                    HiveError::collaboration(format!("no suitable agent for task {task_id}"))
                })?,
        };

        task.assigned_agent_id = Some(chosen.clone());
        task.transition(TaskState::Assigned)?;
        self.persist_task(&task).await?;
        self.tasks.write().await.insert(task.id.clone(), task);
        tracing::info!(task = task_id, agent = %chosen, "assigned task");
        Ok(chosen)
    }

    /// First registered agent whose capabilities are a superset of the
    /// task requirements; ties break by registration order
    async fn find_best_agent(&self, task: &CollaborationTask) -> Option<String> {
        let agents = self.agents.read().await;
        agents
            .iter()
            .find(|agent| {
                let capabilities: HashSet<String> =
                    agent.capabilities().into_iter().collect();
                task.required_capabilities
                    .iter()
                    .all(|required| capabilities.contains(required))
            })
            .map(|agent| agent.id().to_string())
    }

    /// Execute an assigned task through its handler or its agent
    pub async fn execute_task(&self, task_id: &str) -> HiveResult<Value> {
        let mut task = self
            .get_task(task_id)
            .await
            .ok_or_else(|| HiveError::collaboration(format!("task {task_id} not found")))?;

        if task.state != TaskState::Assigned {
            return Err(HiveError::collaboration(format!(
                "task {task_id} is not assigned"
            )));
        }
        let agent_id = task
            .assigned_agent_id
            .clone()
            .ok_or_else(|| HiveError::collaboration("assigned task has no agent"))?;
        let agent = self
            .agent(&agent_id)
            .await
            .ok_or_else(|| HiveError::collaboration(format!("agent {agent_id} not found")))?;

        task.transition(TaskState::InProgress)?;
        self.persist_task(&task).await?;
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());

        let handler = self.handlers.read().await.get(&task.task_type).cloned();
        let outcome = match handler {
            Some(handler) => handler(task.clone()).await,
            None => {
                let request = json!({
                    "task_id": task.id,
                    "task_type": task.task_type,
                    "description": task.description,
                    "inputs": task.inputs,
                });
                agent.process(request).await
            }
        };

        match outcome {
            Ok(result) => {
                task.result = Some(result.clone());
                task.transition(TaskState::Completed)?;
                self.persist_task(&task).await?;
                self.tasks.write().await.insert(task.id.clone(), task);
                tracing::info!(task = task_id, "task completed");
                Ok(result)
            }
            Err(error) => {
                task.result = Some(json!({ "error": error.to_string() }));
                task.transition(TaskState::Failed)?;
                self.persist_task(&task).await?;
                self.tasks.write().await.insert(task.id.clone(), task);
                tracing::error!(task = task_id, error = %error, "task failed");
                Err(error)
            }
        }
    }

    /// Execute a workflow of tasks in dependency order.
    ///
    /// Tasks run once all their dependencies have executed; a round with
    /// no executable task means the dependency graph has a cycle.
    pub async fn execute_workflow(
        &self,
        tasks: Vec<CollaborationTask>,
    ) -> HiveResult<BTreeMap<String, Value>> {
        {
            let mut map = self.tasks.write().await;
            for task in &tasks {
                map.insert(task.id.clone(), task.clone());
            }
        }

        let dependency_graph: HashMap<String, HashSet<String>> = tasks
            .iter()
            .map(|task| {
                (
                    task.id.clone(),
                    task.dependencies.iter().cloned().collect(),
                )
            })
            .collect();

        let mut executed: HashSet<String> = HashSet::new();
        let mut results = BTreeMap::new();

        while executed.len() < tasks.len() {
            let executable: Vec<String> = tasks
                .iter()
                .filter(|task| !executed.contains(&task.id))
                .filter(|task| {
                    dependency_graph
                        .get(&task.id)
                        .map(|deps| deps.iter().all(|dep| executed.contains(dep)))
                        .unwrap_or(true)
                })
                .map(|task| task.id.clone())
                .collect();

            if executable.is_empty() {
                return Err(HiveError::collaboration(
                    "circular dependency detected in workflow",
                ));
            }

            for task_id in executable {
                let outcome: HiveResult<Value> = async {
                    self.assign_task(&task_id, None).await?;
                    self.execute_task(&task_id).await
                }
                .await;
                let value = match outcome {
                    Ok(result) => json!({ "success": true, "result": result }),
                    Err(error) => {
                        tracing::warn!(task = %task_id, error = %error, "workflow task failed");
                        json!({ "success": false, "error": error.to_string() })
                    }
                };
                results.insert(task_id.clone(), value);
                executed.insert(task_id);
            }
        }

        Ok(results)
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Send a message between agents, persisting it and linking it to a
    /// related task when one is named
    pub async fn send_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        message_type: MessageType,
        content: &Value,
        related_task_id: Option<String>,
    ) -> HiveResult<AgentMessage> {
        let message = AgentMessage::new(
            sender_id,
            recipient_id,
            message_type,
            content,
            related_task_id.clone(),
        );
        self.message_log.add(message.clone());

        let related_task = match &related_task_id {
            Some(task_id) => self.get_task(task_id).await,
            None => None,
        };

        match (&self.coordinator, related_task) {
            (Some(coordinator), Some(mut task)) => {
                task.add_message(message.id.clone());
                let stores = self.task_stores(coordinator);
                let message_item = message_to_item(&message);
                let task_item = task_to_item(&task);

                if !stores.is_empty() {
                    // Message and task-list update land atomically
                    coordinator
                        .with_transaction(&stores, || async {
                            coordinator
                                .update_item(stores[0], message_item.clone())
                                .await?;
                            for store in &stores {
                                coordinator.update_item(store, task_item.clone()).await?;
                            }
                            Ok(())
                        })
                        .await?;

                    // Best-effort mirrors for the message itself
                    for entry in coordinator.registry().entries() {
                        if entry.memory().is_some() && !stores.contains(&entry.name()) {
                            coordinator
                                .queue_update(entry.name(), message_item.clone())
                                .await;
                        }
                    }
                    if let Err(error) = coordinator.flush_updates().await {
                        tracing::warn!(
                            message = %message.id,
                            error = %error,
                            "message fanout partially failed"
                        );
                    }
                }
                self.tasks.write().await.insert(task.id.clone(), task);
            }
            (Some(coordinator), None) => {
                if let Some(task_id) = &related_task_id {
                    tracing::warn!(task = %task_id, "related task not found for message");
                }
                store_message(coordinator, &message).await?;
            }
            (None, Some(mut task)) => {
                task.add_message(message.id.clone());
                self.tasks.write().await.insert(task.id.clone(), task);
            }
            (None, None) => {}
        }

        tracing::info!(
            message = %message.id,
            sender = sender_id,
            recipient = recipient_id,
            "sent message"
        );
        Ok(message)
    }
}
