//! Paced work queue for the heaviest provider operation
//!
//! Submitting a magnet and reading back its file list is admitted one task at
//! a time (by default) with a fixed pause after each task, so the aggregate
//! traffic of this process stays under provider-side rate limits.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::debug;

/// Configuration for a serialized queue
#[derive(Debug, Clone)]
pub struct ScanQueueConfig {
    /// Maximum tasks running at once
    pub max_concurrent: usize,
    /// Pause held after each task before the next one is admitted
    pub task_delay: Duration,
}

impl Default for ScanQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            task_delay: Duration::from_millis(300),
        }
    }
}

/// Bounded, paced admission for provider calls
#[derive(Clone)]
pub struct SerializedQueue {
    semaphore: Arc<Semaphore>,
    config: ScanQueueConfig,
    completed: Arc<AtomicU64>,
    name: String,
}

impl SerializedQueue {
    pub fn new(name: &str, config: ScanQueueConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            completed: Arc::new(AtomicU64::new(0)),
            name: name.to_string(),
        }
    }

    /// Run `operation` once a slot is free. The slot stays taken through the
    /// post-task pause.
    pub async fn run<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        // The semaphore is owned here and never closed
        let _permit = self.semaphore.acquire().await.ok();
        debug!(queue = %self.name, "Admitted task");

        let result = operation().await;

        if self.config.task_delay > Duration::ZERO {
            tokio::time::sleep(self.config.task_delay).await;
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
        debug!(queue = %self.name, "Released slot");
        result
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            max_concurrent: self.config.max_concurrent.max(1),
            available_permits: self.semaphore.available_permits(),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub max_concurrent: usize,
    pub available_permits: usize,
    pub completed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[tokio::test]
    async fn test_single_worker_never_overlaps() {
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let queue = SerializedQueue::new(
            "test",
            ScanQueueConfig {
                max_concurrent: 1,
                task_delay: Duration::from_millis(1),
            },
        );

        let mut handles = vec![];
        for _ in 0..6 {
            let r = running.clone();
            let m = max_seen.clone();
            let q = queue.clone();
            handles.push(tokio::spawn(async move {
                q.run(|| async {
                    let current = r.fetch_add(1, Ordering::SeqCst) + 1;
                    m.fetch_max(current, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    r.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().completed, 6);
        assert_eq!(queue.stats().available_permits, 1);
    }

    #[tokio::test]
    async fn test_pause_spaces_tasks() {
        let queue = SerializedQueue::new(
            "paced",
            ScanQueueConfig {
                max_concurrent: 1,
                task_delay: Duration::from_millis(30),
            },
        );
        let start = Instant::now();
        let a = queue.run(|| async { 1 });
        let b = queue.run(|| async { 2 });
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a + b, 3);
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let queue = SerializedQueue::new(
            "clamped",
            ScanQueueConfig {
                max_concurrent: 0,
                task_delay: Duration::ZERO,
            },
        );
        assert_eq!(queue.stats().max_concurrent, 1);
    }
}
