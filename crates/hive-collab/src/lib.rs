//! Hive Collab - Collaboration entity layer
//!
//! Typed DTOs for agent payloads, tasks, consensus outcomes, and peer
//! reviews; the collaboration entity service (agents, teams, tasks,
//! workflow DAG execution, messaging); and the peer review cycle engine.
//! Entities persist through the memory coordinator with per-entity
//! primary-store routing and best-effort redundant fanout.

pub mod dto;
pub mod message;
pub mod peer_review;
pub mod persistence;
pub mod service;
pub mod task;

pub use dto::{
    ensure_agent_payload, ensure_memory_sync_port, ensure_payload, AgentOpinion, AgentPayload,
    CollaborationDto, ConflictRecord, ConsensusMethod, ConsensusOutcome, MemorySyncPort,
    MessagePayload, PeerReviewRecord, ReviewDecision, SynthesisArtifact, TaskDescriptor,
};
pub use message::{AgentMessage, MessageLog, MessageType};
pub use peer_review::{
    run_peer_review, DialecticalNote, FinalizedReview, PeerReview, PeerReviewWorkflow,
    ReviewAggregate, ReviewFeedback, ReviewMessenger, ReviewOutcome, ReviewParticipant,
    ReviewStatus, QUALITY_THRESHOLD,
};
pub use persistence::{
    load_message, load_task, message_from_item, message_to_item, store_message, store_task,
    task_from_item, task_to_item,
};
pub use service::{CollaborationService, CollaborativeAgent, TaskHandler, TeamState};
pub use task::{CollaborationTask, TaskState};
