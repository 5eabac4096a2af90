//! Blocking call pool
//!
//! Long-running foreign calls (stream I/O, protocol negotiation, discovery
//! iteration) run on tokio's blocking threads so a stalled peer never parks
//! a process's executor thread. A semaphore bounds how many may be in flight.

use crate::error::{BridgeError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, trace};

#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub calls_started: AtomicU64,
    pub calls_completed: AtomicU64,
    pub calls_failed: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    metrics: Arc<PoolMetrics>,
}

impl BlockingPool {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            metrics: Arc::new(PoolMetrics::default()),
        }
    }

    /// Run `call` on a blocking thread and wait for it.
    ///
    /// The caller's process identity is not visible inside `call`.
    pub async fn run<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| BridgeError::runtime(format!("{operation}: {e}")))?;

        self.metrics.calls_started.fetch_add(1, Ordering::Relaxed);
        trace!(operation, "Running blocking foreign call");

        let joined = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            call()
        })
        .await;

        match joined {
            Ok(result) => {
                self.metrics.calls_completed.fetch_add(1, Ordering::Relaxed);
                result
            }
            Err(e) => {
                self.metrics.calls_failed.fetch_add(1, Ordering::Relaxed);
                error!(operation, error = %e, "Blocking foreign call did not complete");
                Err(BridgeError::runtime(format!("{operation}: {e}")))
            }
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_value() {
        let pool = BlockingPool::new(2);
        let value = pool.run("add", || Ok(2 + 2)).await.unwrap();

        assert_eq!(value, 4);
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.metrics().calls_completed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_runtime_error() {
        let pool = BlockingPool::new(1);
        let result = pool.run("explode", || -> Result<()> { panic!("boom") }).await;

        assert!(matches!(result, Err(BridgeError::Runtime { .. })));
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let pool = BlockingPool::new(1);
        let slow = pool.clone();

        let first = tokio::spawn(async move {
            slow.run("sleep", || {
                std::thread::sleep(Duration::from_millis(50));
                Ok(())
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.available(), 0);
        first.await.unwrap().unwrap();
        assert_eq!(pool.available(), 1);
    }
}
