//! Error hierarchy for the Hive memory core.
//!
//! Every adapter converts OS/library failures into this hierarchy at its
//! boundary; callers never see raw backend errors. Each variant carries a
//! stable `error_code` so retry policies, dashboards, and the memory error
//! logger can key on it across adapters.

use serde_json::{json, Value};
use thiserror::Error;

/// Result type used throughout the workspace
pub type HiveResult<T> = Result<T, HiveError>;

/// Broad failure classes used for retry-policy matching.
///
/// Policy maps match on the kind of an error rather than its concrete
/// variant, mirroring subclass matching in exception-based systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Validation, configuration, bad arguments. Never retried.
    UserInput,
    /// Internal invariants violated or resources exhausted. Fatal.
    System,
    /// Store-specific I/O, missing items, transaction failures.
    Memory,
    /// Data corruption detected in a store. Fatal.
    Corruption,
    /// Circuit open / bulkhead full. Never retried by the same guard.
    Reliability,
    /// Role assignment, consensus, team misconfiguration.
    Collaboration,
}

/// Unified error type for the Hive workspace
#[derive(Debug, Clone, Error)]
pub enum HiveError {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("memory store error: {message}")]
    MemoryStore {
        message: String,
        store: Option<String>,
    },

    #[error("memory item not found: {item_id}")]
    ItemNotFound { item_id: String },

    #[error("memory transaction error: {message}")]
    Transaction {
        message: String,
        transaction_id: Option<String>,
        /// Stores that committed before the failure was observed
        committed: Vec<String>,
        /// Stores whose commit failed
        failed: Vec<String>,
    },

    #[error("memory corruption in {store}: {message}")]
    Corruption { message: String, store: String },

    #[error("circuit breaker for {function} is open")]
    CircuitOpen {
        function: String,
        recovery_remaining_ms: u64,
    },

    #[error("circuit breaker open for store {store}")]
    BreakerOpen { store: String },

    #[error("bulkhead for {function} is full")]
    BulkheadFull {
        function: String,
        active_calls: usize,
        queued_calls: usize,
    },

    #[error("collaboration error: {message}")]
    Collaboration { message: String },

    #[error("consensus error: {message}")]
    Consensus { message: String },

    #[error("peer review error: {message}")]
    PeerReview { message: String },

    #[error("adapter {name} unavailable: {reason}")]
    AdapterUnavailable { name: String, reason: String },
}

impl HiveError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn memory(message: impl Into<String>) -> Self {
        Self::MemoryStore {
            message: message.into(),
            store: None,
        }
    }

    pub fn memory_in(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MemoryStore {
            message: message.into(),
            store: Some(store.into()),
        }
    }

    pub fn not_found(item_id: impl Into<String>) -> Self {
        Self::ItemNotFound {
            item_id: item_id.into(),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction_id: None,
            committed: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn transaction_in(
        transaction_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction_id: Some(transaction_id.into()),
            committed: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn corruption(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
            store: store.into(),
        }
    }

    pub fn collaboration(message: impl Into<String>) -> Self {
        Self::Collaboration {
            message: message.into(),
        }
    }

    pub fn consensus(message: impl Into<String>) -> Self {
        Self::Consensus {
            message: message.into(),
        }
    }

    pub fn peer_review(message: impl Into<String>) -> Self {
        Self::PeerReview {
            message: message.into(),
        }
    }

    pub fn adapter_unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AdapterUnavailable {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code surfaced upward
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
            Self::MemoryStore { .. } => "MEMORY_STORE_ERROR",
            Self::ItemNotFound { .. } => "MEMORY_ITEM_NOT_FOUND",
            Self::Transaction { .. } => "MEMORY_TRANSACTION_ERROR",
            Self::Corruption { .. } => "MEMORY_CORRUPTION",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::BreakerOpen { .. } => "CIRCUIT_BREAKER_OPEN_ERROR",
            Self::BulkheadFull { .. } => "BULKHEAD_FULL",
            Self::Collaboration { .. } => "COLLABORATION_ERROR",
            Self::Consensus { .. } => "CONSENSUS_ERROR",
            Self::PeerReview { .. } => "PEER_REVIEW_CONSENSUS",
            Self::AdapterUnavailable { .. } => "ADAPTER_UNAVAILABLE",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::Configuration { .. } => ErrorKind::UserInput,
            Self::Internal { .. } | Self::AdapterUnavailable { .. } => ErrorKind::System,
            Self::MemoryStore { .. } | Self::ItemNotFound { .. } | Self::Transaction { .. } => {
                ErrorKind::Memory
            }
            Self::Corruption { .. } => ErrorKind::Corruption,
            Self::CircuitOpen { .. } | Self::BreakerOpen { .. } | Self::BulkheadFull { .. } => {
                ErrorKind::Reliability
            }
            Self::Collaboration { .. } | Self::Consensus { .. } | Self::PeerReview { .. } => {
                ErrorKind::Collaboration
            }
        }
    }

    /// Whether the default retry policy may re-attempt after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Memory)
    }

    /// Variant-specific detail payload for structured logging
    pub fn details(&self) -> Value {
        match self {
            Self::MemoryStore { store, .. } => json!({ "store": store }),
            Self::ItemNotFound { item_id } => json!({ "item_id": item_id }),
            Self::Transaction {
                transaction_id,
                committed,
                failed,
                ..
            } => json!({
                "transaction_id": transaction_id,
                "committed": committed,
                "failed": failed,
            }),
            Self::Corruption { store, .. } => json!({ "store": store }),
            Self::CircuitOpen {
                function,
                recovery_remaining_ms,
            } => json!({
                "function": function,
                "recovery_time_remaining_ms": recovery_remaining_ms,
            }),
            Self::BreakerOpen { store } => json!({ "store": store }),
            Self::BulkheadFull {
                function,
                active_calls,
                queued_calls,
            } => json!({
                "function": function,
                "current_calls": active_calls,
                "queue_size": queued_calls,
            }),
            Self::AdapterUnavailable { name, reason } => {
                json!({ "adapter": name, "reason": reason })
            }
            _ => Value::Null,
        }
    }

    /// Structured representation for log sinks
    pub fn to_value(&self) -> Value {
        json!({
            "error_type": self.type_name(),
            "error_code": self.error_code(),
            "message": self.to_string(),
            "details": self.details(),
        })
    }

    /// Short variant name used by the error logger summaries
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "Validation",
            Self::Configuration { .. } => "Configuration",
            Self::Internal { .. } => "Internal",
            Self::MemoryStore { .. } => "MemoryStore",
            Self::ItemNotFound { .. } => "ItemNotFound",
            Self::Transaction { .. } => "Transaction",
            Self::Corruption { .. } => "Corruption",
            Self::CircuitOpen { .. } => "CircuitOpen",
            Self::BreakerOpen { .. } => "BreakerOpen",
            Self::BulkheadFull { .. } => "BulkheadFull",
            Self::Collaboration { .. } => "Collaboration",
            Self::Consensus { .. } => "Consensus",
            Self::PeerReview { .. } => "PeerReview",
            Self::AdapterUnavailable { .. } => "AdapterUnavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(HiveError::memory("x").error_code(), "MEMORY_STORE_ERROR");
        assert_eq!(
            HiveError::not_found("a").error_code(),
            "MEMORY_ITEM_NOT_FOUND"
        );
        assert_eq!(
            HiveError::transaction("t").error_code(),
            "MEMORY_TRANSACTION_ERROR"
        );
        assert_eq!(
            HiveError::corruption("json", "bad file").error_code(),
            "MEMORY_CORRUPTION"
        );
        assert_eq!(
            HiveError::CircuitOpen {
                function: "f".into(),
                recovery_remaining_ms: 10,
            }
            .error_code(),
            "CIRCUIT_OPEN"
        );
    }

    #[test]
    fn retryability_follows_kind() {
        assert!(HiveError::memory("transient").is_retryable());
        assert!(!HiveError::validation("bad input").is_retryable());
        assert!(!HiveError::corruption("json", "torn write").is_retryable());
        assert!(!HiveError::BulkheadFull {
            function: "f".into(),
            active_calls: 1,
            queued_calls: 1,
        }
        .is_retryable());
    }

    #[test]
    fn to_value_carries_code_and_details() {
        let err = HiveError::BulkheadFull {
            function: "store".into(),
            active_calls: 10,
            queued_calls: 5,
        };
        let value = err.to_value();
        assert_eq!(value["error_code"], "BULKHEAD_FULL");
        assert_eq!(value["details"]["current_calls"], 10);
    }
}
