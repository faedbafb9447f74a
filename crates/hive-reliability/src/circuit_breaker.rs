//! Circuit breaker for preventing cascading failures.
//!
//! The breaker has three states:
//! - CLOSED: normal operation, all calls pass through
//! - OPEN: failure threshold exceeded, calls fail fast
//! - HALF_OPEN: recovery window elapsed, a limited number of test calls pass
//!
//! State transitions are serialized by a mutex so racing callers observe a
//! consistent path through the state machine. The lock is never held across
//! the guarded call itself.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hive_core::{ErrorKind, HiveError, HiveResult, MetricsRegistry};
use parking_lot::Mutex;

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Hook invoked on a state transition, with the guarded function's name
pub type StateHook = Arc<dyn Fn(&str) + Send + Sync>;

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    test_calls_remaining: u32,
}

/// Circuit breaker configuration and state
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    test_calls: u32,
    /// Error kinds that count as failures; `None` counts every error
    failure_kinds: Option<Vec<ErrorKind>>,
    on_open: Option<StateHook>,
    on_close: Option<StateHook>,
    on_half_open: Option<StateHook>,
    metrics: MetricsRegistry,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(metrics: MetricsRegistry) -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            test_calls: 1,
            failure_kinds: None,
            on_open: None,
            on_close: None,
            on_half_open: None,
            metrics,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                test_calls_remaining: 0,
            }),
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_test_calls(mut self, test_calls: u32) -> Self {
        self.test_calls = test_calls;
        self
    }

    pub fn with_failure_kinds(mut self, kinds: Vec<ErrorKind>) -> Self {
        self.failure_kinds = Some(kinds);
        self
    }

    pub fn on_open(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(hook));
        self
    }

    pub fn on_close(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(hook));
        self
    }

    pub fn on_half_open(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_half_open = Some(Arc::new(hook));
        self
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Reset to the initial CLOSED state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.test_calls_remaining = 0;
        tracing::info!("circuit breaker reset to initial state");
    }

    fn counts_as_failure(&self, error: &HiveError) -> bool {
        match &self.failure_kinds {
            None => true,
            Some(kinds) => kinds.contains(&error.kind()),
        }
    }

    fn run_hook(hook: &Option<StateHook>, function: &str) {
        if let Some(hook) = hook {
            // Hooks are best-effort observers; a panicking hook must not
            // poison the breaker.
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(function))).is_err() {
                tracing::warn!(function, "circuit breaker state hook panicked");
            }
        }
    }

    /// Run a guarded call.
    ///
    /// Fast-fails with `CIRCUIT_OPEN` while the breaker is open. The call
    /// that finds the recovery window elapsed transitions to HALF_OPEN and
    /// is itself admitted as a test call.
    pub async fn call<T, Fut>(&self, function: &str, fut: Fut) -> HiveResult<T>
    where
        Fut: Future<Output = HiveResult<T>>,
    {
        {
            let mut inner = self.inner.lock();
            if inner.state == BreakerState::Open {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.recovery_timeout);
                if elapsed >= self.recovery_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.test_calls_remaining = self.test_calls;
                    drop(inner);
                    self.metrics
                        .inc_circuit_state(function, BreakerState::HalfOpen.as_str());
                    tracing::info!(
                        function,
                        "circuit breaker transitioned from OPEN to HALF_OPEN"
                    );
                    Self::run_hook(&self.on_half_open, function);
                } else {
                    let remaining = self.recovery_timeout - elapsed;
                    drop(inner);
                    self.metrics
                        .inc_circuit_state(function, BreakerState::Open.as_str());
                    tracing::warn!(function, "circuit breaker is OPEN, failing fast");
                    return Err(HiveError::CircuitOpen {
                        function: function.to_string(),
                        recovery_remaining_ms: remaining.as_millis() as u64,
                    });
                }
            }
        }

        match fut.await {
            Ok(result) => {
                let mut closed = false;
                {
                    let mut inner = self.inner.lock();
                    if inner.state == BreakerState::HalfOpen {
                        inner.test_calls_remaining = inner.test_calls_remaining.saturating_sub(1);
                        if inner.test_calls_remaining == 0 {
                            inner.state = BreakerState::Closed;
                            inner.failure_count = 0;
                            closed = true;
                        }
                    }
                }
                if closed {
                    self.metrics
                        .inc_circuit_state(function, BreakerState::Closed.as_str());
                    tracing::info!(
                        function,
                        "circuit breaker transitioned from HALF_OPEN to CLOSED"
                    );
                    Self::run_hook(&self.on_close, function);
                }
                Ok(result)
            }
            Err(error) => {
                if self.counts_as_failure(&error) {
                    let mut opened = false;
                    {
                        let mut inner = self.inner.lock();
                        inner.failure_count += 1;
                        inner.last_failure = Some(Instant::now());
                        if inner.state == BreakerState::HalfOpen
                            || (inner.state == BreakerState::Closed
                                && inner.failure_count >= self.failure_threshold)
                        {
                            inner.state = BreakerState::Open;
                            opened = true;
                        }
                    }
                    if opened {
                        self.metrics
                            .inc_circuit_state(function, BreakerState::Open.as_str());
                        tracing::warn!(
                            function,
                            error = %error,
                            "circuit breaker transitioned to OPEN"
                        );
                        Self::run_hook(&self.on_open, function);
                    }
                }
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(MetricsRegistry::new())
            .with_failure_threshold(threshold)
            .with_recovery_timeout(timeout)
    }

    async fn failing(cb: &CircuitBreaker) -> HiveResult<u32> {
        cb.call("op", async { Err(HiveError::memory("boom")) }).await
    }

    async fn succeeding(cb: &CircuitBreaker) -> HiveResult<u32> {
        cb.call("op", async { Ok(7) }).await
    }

    #[tokio::test]
    async fn opens_after_threshold_and_fails_fast() {
        let cb = breaker(2, Duration::from_secs(60));

        assert!(failing(&cb).await.is_err());
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(failing(&cb).await.is_err());
        assert_eq!(cb.state(), BreakerState::Open);

        let err = succeeding(&cb).await.unwrap_err();
        assert_eq!(err.error_code(), "CIRCUIT_OPEN");
    }

    #[tokio::test]
    async fn recovers_through_half_open() {
        let cb = breaker(1, Duration::from_millis(20));
        assert!(failing(&cb).await.is_err());
        assert_eq!(cb.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        // The first call after the window is admitted as a test call
        assert_eq!(succeeding(&cb).await.unwrap(), 7);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(10));
        assert!(failing(&cb).await.is_err());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(failing(&cb).await.is_err());
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn hooks_fire_on_transitions() {
        let opened = Arc::new(AtomicUsize::new(0));
        let observed = opened.clone();
        let cb = CircuitBreaker::new(MetricsRegistry::new())
            .with_failure_threshold(1)
            .on_open(move |_| {
                observed.fetch_add(1, Ordering::SeqCst);
            });
        assert!(failing(&cb).await.is_err());
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_matching_errors_do_not_trip() {
        let cb = CircuitBreaker::new(MetricsRegistry::new())
            .with_failure_threshold(1)
            .with_failure_kinds(vec![ErrorKind::Memory]);
        let err = cb
            .call("op", async {
                Err::<(), _>(HiveError::validation("bad input"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert_eq!(cb.state(), BreakerState::Closed);
    }
}
