//! Retry with exponential backoff.
//!
//! The retry loop is driven by matching on `Result` values rather than by
//! catching exceptions: the operation is an async closure returning
//! `HiveResult<T>`, and the policy decides after each failure (or after a
//! predicate-rejected success) whether another attempt is allowed. A
//! `CIRCUIT_OPEN` error aborts the loop immediately regardless of policy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hive_core::{ErrorKind, HiveError, HiveResult, MetricsRegistry, RetryOutcome};
use rand::Rng;

use crate::circuit_breaker::CircuitBreaker;

/// Metrics label used for unnamed conditions and predicates
pub const ANONYMOUS_CONDITION: &str = "<anonymous>";

pub type ErrorPredicate = Arc<dyn Fn(&HiveError) -> bool + Send + Sync>;
pub type AttemptCallback = Arc<dyn Fn(&HiveError, u32) -> bool + Send + Sync>;
pub type RetryObserver = Arc<dyn Fn(&HiveError, u32, Duration) + Send + Sync>;

/// A per-error condition that must hold for the retry loop to continue
#[derive(Clone)]
pub enum RetryCondition {
    /// Substring that must appear in the error message
    MessageContains(String),
    /// Error kind the failure must match
    Kind(ErrorKind),
    /// Arbitrary predicate over the error
    Predicate(ErrorPredicate),
}

impl RetryCondition {
    fn evaluate(&self, error: &HiveError) -> bool {
        match self {
            Self::MessageContains(needle) => error.to_string().contains(needle.as_str()),
            Self::Kind(kind) => error.kind() == *kind,
            Self::Predicate(predicate) => predicate(error),
        }
    }
}

/// Per-error-kind retry override; the first matching rule wins
#[derive(Debug, Clone, Copy)]
pub struct ErrorRetryRule {
    pub retry: bool,
    pub max_retries: Option<u32>,
}

impl ErrorRetryRule {
    pub fn allow() -> Self {
        Self {
            retry: true,
            max_retries: None,
        }
    }

    pub fn deny() -> Self {
        Self {
            retry: false,
            max_retries: None,
        }
    }

    pub fn allow_up_to(max_retries: u32) -> Self {
        Self {
            retry: true,
            max_retries: Some(max_retries),
        }
    }
}

/// Results that expose an HTTP-style status code can use integer predicates
pub trait StatusCarrier {
    fn status_code(&self) -> Option<u16>;
}

type ResultPredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Retry policy for [`retry`]
pub struct RetryPolicy<T> {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
    pub max_delay: Duration,
    /// Error kinds that may be retried; `None` retries everything
    retryable_kinds: Option<Vec<ErrorKind>>,
    should_retry: Option<ErrorPredicate>,
    conditions: Vec<(Option<String>, RetryCondition)>,
    condition_callbacks: Vec<(Option<String>, AttemptCallback)>,
    result_predicates: Vec<(Option<String>, ResultPredicate<T>)>,
    retry_on_result: Option<ResultPredicate<T>>,
    error_retry_map: Vec<(ErrorKind, ErrorRetryRule)>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    on_retry: Option<RetryObserver>,
    pub track_metrics: bool,
}

impl<T> Default for RetryPolicy<T> {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            exponential_base: 2.0,
            jitter: true,
            max_delay: Duration::from_secs(60),
            retryable_kinds: None,
            should_retry: None,
            conditions: Vec::new(),
            condition_callbacks: Vec::new(),
            result_predicates: Vec::new(),
            retry_on_result: None,
            error_retry_map: Vec::new(),
            circuit_breaker: None,
            on_retry: None,
            track_metrics: true,
        }
    }
}

impl<T> Clone for RetryPolicy<T> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            exponential_base: self.exponential_base,
            jitter: self.jitter,
            max_delay: self.max_delay,
            retryable_kinds: self.retryable_kinds.clone(),
            should_retry: self.should_retry.clone(),
            conditions: self.conditions.clone(),
            condition_callbacks: self.condition_callbacks.clone(),
            result_predicates: self.result_predicates.clone(),
            retry_on_result: self.retry_on_result.clone(),
            error_retry_map: self.error_retry_map.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
            on_retry: self.on_retry.clone(),
            track_metrics: self.track_metrics,
        }
    }
}

impl<T> RetryPolicy<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn exponential_base(mut self, base: f64) -> Self {
        self.exponential_base = base;
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn retryable_kinds(mut self, kinds: Vec<ErrorKind>) -> Self {
        self.retryable_kinds = Some(kinds);
        self
    }

    pub fn should_retry(
        mut self,
        predicate: impl Fn(&HiveError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    pub fn condition(mut self, condition: RetryCondition) -> Self {
        self.conditions.push((None, condition));
        self
    }

    pub fn named_condition(mut self, name: impl Into<String>, condition: RetryCondition) -> Self {
        self.conditions.push((Some(name.into()), condition));
        self
    }

    pub fn condition_callback(
        mut self,
        name: Option<String>,
        callback: impl Fn(&HiveError, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.condition_callbacks.push((name, Arc::new(callback)));
        self
    }

    /// Predicate over successful results; a hit is treated as a failure
    pub fn result_predicate(
        mut self,
        name: Option<String>,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.result_predicates.push((name, Arc::new(predicate)));
        self
    }

    pub fn retry_on_result(
        mut self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_on_result = Some(Arc::new(predicate));
        self
    }

    pub fn error_rule(mut self, kind: ErrorKind, rule: ErrorRetryRule) -> Self {
        self.error_retry_map.push((kind, rule));
        self
    }

    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn on_retry(
        mut self,
        observer: impl Fn(&HiveError, u32, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    pub fn track_metrics(mut self, track: bool) -> Self {
        self.track_metrics = track;
        self
    }
}

impl<T: StatusCarrier> RetryPolicy<T> {
    /// Integer predicate comparing the result's HTTP status code
    pub fn status_predicate(self, name: impl Into<String>, code: u16) -> Self {
        self.result_predicate(Some(name.into()), move |result: &T| {
            result.status_code() == Some(code)
        })
    }
}

fn next_delay(current: Duration, base: f64, jitter: bool, max: Duration) -> Duration {
    let factor = if jitter {
        rand::thread_rng().gen_range(0.5..1.5)
    } else {
        1.0
    };
    let next = current.as_secs_f64() * base * factor;
    Duration::from_secs_f64(next.min(max.as_secs_f64()))
}

fn condition_label(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or(ANONYMOUS_CONDITION)
}

/// Execute `op` under `policy`, retrying with exponential backoff.
///
/// `function` names the operation for metrics and logs. Every attempt,
/// success, abort, failure, and predicate trigger is recorded against the
/// supplied metrics registry when `track_metrics` is on.
pub async fn retry<T, F, Fut>(
    function: &str,
    policy: &RetryPolicy<T>,
    metrics: &MetricsRegistry,
    mut op: F,
) -> HiveResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HiveResult<T>>,
{
    let track = policy.track_metrics;
    let mut attempts: u32 = 0;
    let mut delay = policy.initial_delay;

    let record_abort = |error: &HiveError| {
        if track {
            metrics.inc_retry(RetryOutcome::Abort);
            metrics.inc_retry_error(error.type_name());
            metrics.inc_retry_stat(function, "abort");
        }
    };

    loop {
        let outcome = match &policy.circuit_breaker {
            Some(breaker) => breaker.call(function, op()).await,
            None => op().await,
        };

        match outcome {
            Ok(result) => {
                let mut triggered = false;
                if let Some(predicate) = &policy.retry_on_result {
                    triggered |= predicate(&result);
                }
                for (name, predicate) in &policy.result_predicates {
                    let hit = predicate(&result);
                    if track {
                        metrics.inc_retry_condition(
                            &format!("predicate:{}", condition_label(name)),
                            hit,
                        );
                    }
                    triggered |= hit;
                }

                if !triggered {
                    if track {
                        metrics.inc_retry(RetryOutcome::Success);
                        metrics.inc_retry_stat(function, "success");
                    }
                    return Ok(result);
                }

                attempts += 1;
                if attempts > policy.max_retries {
                    if track {
                        metrics.inc_retry(RetryOutcome::Failure);
                        metrics.inc_retry_error("RetryPredicate");
                        metrics.inc_retry_stat(function, "failure");
                    }
                    return Err(HiveError::internal(format!(
                        "result predicate still rejecting {function} after {attempts} attempts"
                    )));
                }
                if track {
                    metrics.inc_retry(RetryOutcome::Predicate);
                    metrics.inc_retry_error("RetryPredicate");
                    metrics.inc_retry_count(function);
                    metrics.inc_retry_stat(function, "attempt");
                }
                delay = next_delay(delay, policy.exponential_base, policy.jitter, policy.max_delay);
                tracing::warn!(
                    function,
                    attempt = attempts,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after result predicate trigger"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                let mut effective_max = policy.max_retries;
                let mut rule_decision: Option<bool> = None;
                for (kind, rule) in &policy.error_retry_map {
                    if error.kind() == *kind {
                        rule_decision = Some(rule.retry);
                        if let Some(max) = rule.max_retries {
                            effective_max = max;
                        }
                        if track {
                            metrics
                                .inc_retry_condition(&format!("policy:{kind:?}"), rule.retry);
                        }
                        break;
                    }
                }

                let retry_allowed = match rule_decision {
                    Some(decision) => decision,
                    None => match &policy.retryable_kinds {
                        None => true,
                        Some(kinds) => kinds.contains(&error.kind()),
                    },
                };

                // An open circuit always wins over the retry policy
                if error.error_code() == "CIRCUIT_OPEN" {
                    tracing::warn!(function, "circuit open - aborting retries");
                    record_abort(&error);
                    return Err(error);
                }

                if !retry_allowed {
                    record_abort(&error);
                    return Err(error);
                }

                if let Some(should_retry) = &policy.should_retry {
                    if !should_retry(&error) {
                        tracing::warn!(function, "not retrying due to should_retry policy");
                        record_abort(&error);
                        return Err(error);
                    }
                }

                let mut conditions_hold = true;
                for (name, condition) in &policy.conditions {
                    let hit = condition.evaluate(&error);
                    if track {
                        metrics.inc_retry_condition(condition_label(name), hit);
                    }
                    if !hit {
                        conditions_hold = false;
                    }
                }
                if !conditions_hold {
                    tracing::warn!(function, "not retrying due to retry conditions");
                    record_abort(&error);
                    return Err(error);
                }

                let mut callbacks_hold = true;
                for (name, callback) in &policy.condition_callbacks {
                    let hit = callback(&error, attempts);
                    if track {
                        metrics.inc_retry_condition(condition_label(name), hit);
                    }
                    if !hit {
                        callbacks_hold = false;
                    }
                }
                if !callbacks_hold {
                    tracing::warn!(function, "not retrying due to condition callbacks");
                    record_abort(&error);
                    return Err(error);
                }

                attempts += 1;
                if attempts > effective_max {
                    tracing::error!(
                        function,
                        max_retries = effective_max,
                        error = %error,
                        "maximum retry attempts exceeded"
                    );
                    if track {
                        metrics.inc_retry(RetryOutcome::Failure);
                        metrics.inc_retry_error(error.type_name());
                        metrics.inc_retry_stat(function, "failure");
                    }
                    return Err(error);
                }

                delay = next_delay(delay, policy.exponential_base, policy.jitter, policy.max_delay);
                tracing::warn!(
                    function,
                    attempt = attempts,
                    max_retries = effective_max,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retry attempt scheduled"
                );
                if track {
                    metrics.inc_retry(RetryOutcome::Attempt);
                    metrics.inc_retry_count(function);
                    metrics.inc_retry_error(error.type_name());
                    metrics.inc_retry_stat(function, "attempt");
                }
                if let Some(observer) = &policy.on_retry {
                    observer(&error, attempts, delay);
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}
