//! Fallback execution for graceful degradation.
//!
//! `with_fallback` swaps in a secondary operation when the primary fails
//! with a matching error and every fallback condition holds.
//! `FallbackHandler` additionally inspects successful results: a triggered
//! result predicate invokes the fallback as if the primary had failed.

use std::future::Future;
use std::sync::Arc;

use hive_core::{ErrorKind, HiveError, HiveResult, MetricsRegistry, RetryOutcome};

use crate::circuit_breaker::CircuitBreaker;
use crate::retry::{ErrorPredicate, RetryCondition, ANONYMOUS_CONDITION};

/// Configuration for [`with_fallback`]
#[derive(Clone, Default)]
pub struct FallbackPolicy {
    /// Error kinds that trigger the fallback; `None` catches everything
    catch_kinds: Option<Vec<ErrorKind>>,
    should_fallback: Option<ErrorPredicate>,
    conditions: Vec<(Option<String>, RetryCondition)>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl FallbackPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catch_kinds(mut self, kinds: Vec<ErrorKind>) -> Self {
        self.catch_kinds = Some(kinds);
        self
    }

    pub fn should_fallback(
        mut self,
        predicate: impl Fn(&HiveError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_fallback = Some(Arc::new(predicate));
        self
    }

    pub fn condition(mut self, name: Option<String>, condition: RetryCondition) -> Self {
        self.conditions.push((name, condition));
        self
    }

    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    fn matches(&self, error: &HiveError) -> bool {
        match &self.catch_kinds {
            None => true,
            Some(kinds) => kinds.contains(&error.kind()),
        }
    }

    fn conditions_hold(&self, function: &str, error: &HiveError) -> bool {
        for (name, condition) in &self.conditions {
            if !evaluate_condition(condition, error) {
                tracing::warn!(
                    function,
                    condition = name.as_deref().unwrap_or(ANONYMOUS_CONDITION),
                    "skipping fallback due to condition"
                );
                return false;
            }
        }
        true
    }
}

fn evaluate_condition(condition: &RetryCondition, error: &HiveError) -> bool {
    match condition {
        RetryCondition::MessageContains(needle) => error.to_string().contains(needle.as_str()),
        RetryCondition::Kind(kind) => error.kind() == *kind,
        RetryCondition::Predicate(predicate) => predicate(error),
    }
}

/// Run `primary`; when it fails with a matching error and every condition
/// holds, run `fallback` instead. Non-matching errors propagate unchanged.
pub async fn with_fallback<T, P, PF, F, FF>(
    function: &str,
    policy: &FallbackPolicy,
    primary: P,
    fallback: F,
) -> HiveResult<T>
where
    P: FnOnce() -> PF,
    PF: Future<Output = HiveResult<T>>,
    F: FnOnce() -> FF,
    FF: Future<Output = HiveResult<T>>,
{
    let outcome = match &policy.circuit_breaker {
        Some(breaker) => breaker.call(function, primary()).await,
        None => primary().await,
    };

    match outcome {
        Ok(result) => Ok(result),
        Err(error) => {
            if !policy.matches(&error) {
                return Err(error);
            }
            if let Some(should_fallback) = &policy.should_fallback {
                if !should_fallback(&error) {
                    return Err(error);
                }
            }
            if !policy.conditions_hold(function, &error) {
                return Err(error);
            }
            tracing::warn!(function, error = %error, "using fallback");
            fallback().await
        }
    }
}

type ResultPredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Fallback driven by result predicates as well as errors
pub struct FallbackHandler<T> {
    predicates: Vec<(Option<String>, ResultPredicate<T>)>,
    track_metrics: bool,
}

impl<T> Default for FallbackHandler<T> {
    fn default() -> Self {
        Self {
            predicates: Vec::new(),
            track_metrics: true,
        }
    }
}

impl<T> FallbackHandler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn predicate(
        mut self,
        name: Option<String>,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicates.push((name, Arc::new(predicate)));
        self
    }

    pub fn track_metrics(mut self, track: bool) -> Self {
        self.track_metrics = track;
        self
    }

    fn record_predicates(&self, metrics: &MetricsRegistry, result: &T) -> bool {
        let mut triggered = false;
        for (name, predicate) in &self.predicates {
            let hit = predicate(result);
            if self.track_metrics {
                metrics.inc_retry_condition(
                    &format!(
                        "predicate:{}",
                        name.as_deref().unwrap_or(ANONYMOUS_CONDITION)
                    ),
                    hit,
                );
            }
            triggered |= hit;
        }
        triggered
    }

    /// Run `primary`, falling back on error or on a triggered predicate.
    ///
    /// The fallback result is recorded against the predicates for
    /// observability but is returned as-is; there is no second fallback.
    pub async fn call<P, PF, F, FF>(
        &self,
        function: &str,
        metrics: &MetricsRegistry,
        primary: P,
        fallback: F,
    ) -> HiveResult<T>
    where
        P: FnOnce() -> PF,
        PF: Future<Output = HiveResult<T>>,
        F: FnOnce() -> FF,
        FF: Future<Output = HiveResult<T>>,
    {
        match primary().await {
            Err(error) => {
                if self.track_metrics {
                    metrics.inc_retry(RetryOutcome::Attempt);
                    metrics.inc_retry_count(function);
                    metrics.inc_retry_error(error.type_name());
                    metrics.inc_retry_stat(function, "attempt");
                }
                tracing::warn!(function, error = %error, "primary failed, using fallback");
                let result = fallback().await?;
                if self.track_metrics {
                    metrics.inc_retry(RetryOutcome::Success);
                    metrics.inc_retry_stat(function, "success");
                }
                self.record_predicates(metrics, &result);
                Ok(result)
            }
            Ok(result) => {
                if self.record_predicates(metrics, &result) {
                    if self.track_metrics {
                        metrics.inc_retry(RetryOutcome::Predicate);
                        metrics.inc_retry_error("RetryPredicate");
                        metrics.inc_retry_count(function);
                        metrics.inc_retry_stat(function, "attempt");
                    }
                    let result = fallback().await?;
                    if self.track_metrics {
                        metrics.inc_retry(RetryOutcome::Success);
                        metrics.inc_retry_stat(function, "success");
                    }
                    self.record_predicates(metrics, &result);
                    return Ok(result);
                }
                if self.track_metrics {
                    metrics.inc_retry(RetryOutcome::Success);
                    metrics.inc_retry_stat(function, "success");
                }
                Ok(result)
            }
        }
    }
}
