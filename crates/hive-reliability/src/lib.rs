//! Hive Reliability - Graceful degradation primitives
//!
//! Retry with exponential backoff, fallback execution, circuit breaking,
//! and bulkhead isolation. All primitives report into a shared
//! [`hive_core::MetricsRegistry`] and surface failures through the
//! workspace error hierarchy, so an open circuit or a saturated bulkhead
//! is an error variant rather than control flow.

pub mod bulkhead;
pub mod circuit_breaker;
pub mod fallback;
pub mod retry;

pub use bulkhead::Bulkhead;
pub use circuit_breaker::{BreakerState, CircuitBreaker, StateHook};
pub use fallback::{with_fallback, FallbackHandler, FallbackPolicy};
pub use retry::{
    retry, ErrorPredicate, ErrorRetryRule, RetryCondition, RetryPolicy, StatusCarrier,
    ANONYMOUS_CONDITION,
};
