//! Runtime counters for memory and reliability operations.
//!
//! A single `MetricsRegistry` handle is created by the coordinator and passed
//! to every collaborator; there are no global counters. Handles are cheap to
//! clone and safe to share across tasks. Increments are per-counter atomic
//! but carry no cross-counter ordering guarantee.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

/// Final disposition of one pass through a retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// A failed attempt that will be retried
    Attempt,
    /// The call returned successfully
    Success,
    /// Retries exhausted
    Failure,
    /// Policy refused to retry
    Abort,
    /// Reserved legacy key for invalid-result retries
    Invalid,
    /// A result predicate treated a successful return as a failure
    Predicate,
}

impl RetryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attempt => "attempt",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Abort => "abort",
            Self::Invalid => "invalid",
            Self::Predicate => "predicate",
        }
    }
}

#[derive(Default, Debug)]
struct Counters {
    memory: DashMap<String, u64>,
    provider: DashMap<String, u64>,
    retry: DashMap<String, u64>,
    retry_count: DashMap<String, u64>,
    retry_error: DashMap<String, u64>,
    retry_condition: DashMap<String, u64>,
    retry_stat: DashMap<String, u64>,
    circuit_state: DashMap<String, u64>,
}

/// Shared counter registry
#[derive(Clone, Default, Debug)]
pub struct MetricsRegistry {
    counters: Arc<Counters>,
}

fn bump(map: &DashMap<String, u64>, key: impl Into<String>) {
    *map.entry(key.into()).or_insert(0) += 1;
}

fn snapshot(map: &DashMap<String, u64>) -> BTreeMap<String, u64> {
    map.iter()
        .map(|entry| (entry.key().clone(), *entry.value()))
        .collect()
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a memory store operation (`store`, `retrieve`, ...)
    pub fn inc_memory(&self, op: &str) {
        bump(&self.counters.memory, op);
    }

    /// Record a provider-side operation (embedding, remote calls)
    pub fn inc_provider(&self, op: &str) {
        bump(&self.counters.provider, op);
    }

    /// Record a retry loop outcome
    pub fn inc_retry(&self, outcome: RetryOutcome) {
        bump(&self.counters.retry, outcome.as_str());
    }

    /// Record a retry attempt against a specific function
    pub fn inc_retry_count(&self, function: &str) {
        bump(&self.counters.retry_count, function);
    }

    /// Record a retry-relevant error by its type name
    pub fn inc_retry_error(&self, error_type: &str) {
        bump(&self.counters.retry_error, error_type);
    }

    /// Record a condition or predicate evaluation, keyed `name:trigger|suppress`
    pub fn inc_retry_condition(&self, name: &str, triggered: bool) {
        let outcome = if triggered { "trigger" } else { "suppress" };
        bump(&self.counters.retry_condition, format!("{name}:{outcome}"));
    }

    /// Record a per-function retry phase, keyed `function:phase`
    pub fn inc_retry_stat(&self, function: &str, phase: &str) {
        bump(&self.counters.retry_stat, format!("{function}:{phase}"));
    }

    /// Record a circuit breaker state observation, keyed `function:state`
    pub fn inc_circuit_state(&self, function: &str, state: &str) {
        bump(&self.counters.circuit_state, format!("{function}:{state}"));
    }

    pub fn memory_metrics(&self) -> BTreeMap<String, u64> {
        snapshot(&self.counters.memory)
    }

    pub fn provider_metrics(&self) -> BTreeMap<String, u64> {
        snapshot(&self.counters.provider)
    }

    pub fn retry_metrics(&self) -> BTreeMap<String, u64> {
        snapshot(&self.counters.retry)
    }

    pub fn retry_count_metrics(&self) -> BTreeMap<String, u64> {
        snapshot(&self.counters.retry_count)
    }

    pub fn retry_error_metrics(&self) -> BTreeMap<String, u64> {
        snapshot(&self.counters.retry_error)
    }

    pub fn retry_condition_metrics(&self) -> BTreeMap<String, u64> {
        snapshot(&self.counters.retry_condition)
    }

    pub fn retry_stat_metrics(&self) -> BTreeMap<String, u64> {
        snapshot(&self.counters.retry_stat)
    }

    pub fn circuit_state_metrics(&self) -> BTreeMap<String, u64> {
        snapshot(&self.counters.circuit_state)
    }

    /// Clear every counter. Intended for test isolation.
    pub fn reset(&self) {
        self.counters.memory.clear();
        self.counters.provider.clear();
        self.counters.retry.clear();
        self.counters.retry_count.clear();
        self.counters.retry_error.clear();
        self.counters.retry_condition.clear();
        self.counters.retry_stat.clear();
        self.counters.circuit_state.clear();
    }
}
