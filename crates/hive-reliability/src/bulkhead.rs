//! Bulkhead for isolating failures.
//!
//! A semaphore bounds concurrent executions; callers that find the
//! semaphore taken wait in a bounded FIFO queue. When both are saturated,
//! calls fail fast with `BULKHEAD_FULL`. The bulkhead is safe to share
//! across threads and tasks.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hive_core::{HiveError, HiveResult};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

/// Concurrency limiter with a bounded waiting queue
pub struct Bulkhead {
    max_concurrent_calls: usize,
    max_queue_size: usize,
    semaphore: Arc<Semaphore>,
    queue_size: Mutex<usize>,
    active_calls: AtomicUsize,
}

impl Bulkhead {
    pub fn new(max_concurrent_calls: usize, max_queue_size: usize) -> Self {
        Self {
            max_concurrent_calls,
            max_queue_size,
            semaphore: Arc::new(Semaphore::new(max_concurrent_calls)),
            queue_size: Mutex::new(0),
            active_calls: AtomicUsize::new(0),
        }
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.max_concurrent_calls
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// Currently executing calls
    pub fn active_calls(&self) -> usize {
        self.active_calls.load(Ordering::SeqCst)
    }

    /// Callers currently waiting for a permit
    pub fn queued_calls(&self) -> usize {
        *self.queue_size.lock()
    }

    /// Execute `fut` under the bulkhead.
    ///
    /// Fails fast with `BULKHEAD_FULL` when all permits are taken and the
    /// waiting queue is at capacity.
    pub async fn call<T, Fut>(&self, function: &str, fut: Fut) -> HiveResult<T>
    where
        Fut: Future<Output = HiveResult<T>>,
    {
        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                {
                    let mut queued = self.queue_size.lock();
                    if *queued >= self.max_queue_size {
                        let active = self.active_calls();
                        tracing::warn!(
                            function,
                            active_calls = active,
                            queued_calls = *queued,
                            "bulkhead is full, rejecting call"
                        );
                        return Err(HiveError::BulkheadFull {
                            function: function.to_string(),
                            active_calls: active,
                            queued_calls: *queued,
                        });
                    }
                    *queued += 1;
                }
                tracing::debug!(function, "queuing call behind bulkhead");
                let acquired = self.semaphore.clone().acquire_owned().await;
                {
                    let mut queued = self.queue_size.lock();
                    *queued = queued.saturating_sub(1);
                }
                acquired.map_err(|_| {
                    HiveError::internal(format!("bulkhead semaphore closed for {function}"))
                })?
            }
        };

        self.active_calls.fetch_add(1, Ordering::SeqCst);
        let result = fut.await;
        self.active_calls.fetch_sub(1, Ordering::SeqCst);
        drop(permit);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn executes_within_capacity() {
        let bulkhead = Bulkhead::new(2, 1);
        let result = bulkhead.call("op", async { Ok(1) }).await.unwrap();
        assert_eq!(result, 1);
        assert_eq!(bulkhead.active_calls(), 0);
    }

    #[tokio::test]
    async fn rejects_when_saturated() {
        let bulkhead = Arc::new(Bulkhead::new(1, 0));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let holder = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move {
                bulkhead
                    .call("op", async move {
                        let _ = release_rx.await;
                        Ok(1)
                    })
                    .await
            })
        };

        // Give the holder time to take the permit
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bulkhead.active_calls(), 1);

        let err = bulkhead.call("op", async { Ok(2) }).await.unwrap_err();
        assert_eq!(err.error_code(), "BULKHEAD_FULL");

        release_tx.send(()).unwrap();
        assert_eq!(holder.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn queued_caller_runs_after_release() {
        let bulkhead = Arc::new(Bulkhead::new(1, 1));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let holder = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move {
                bulkhead
                    .call("op", async move {
                        let _ = release_rx.await;
                        Ok(1)
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;

        let queued = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move { bulkhead.call("op", async { Ok(2) }).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bulkhead.queued_calls(), 1);

        release_tx.send(()).unwrap();
        assert_eq!(queued.await.unwrap().unwrap(), 2);
        assert_eq!(holder.await.unwrap().unwrap(), 1);
        assert_eq!(bulkhead.queued_calls(), 0);
        assert_eq!(bulkhead.active_calls(), 0);
    }

    #[tokio::test]
    async fn in_flight_never_exceeds_limit() {
        let bulkhead = Arc::new(Bulkhead::new(2, 8));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let bulkhead = bulkhead.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let inner_peak = peak.clone();
                let observer = bulkhead.clone();
                bulkhead
                    .call("op", async move {
                        let now = observer.active_calls();
                        inner_peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
