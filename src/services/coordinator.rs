//! Request coordination: singleflight deduplication plus the paced scan queue
//!
//! The coordinator is constructed once per process and handed to the
//! resolution facade. It owns every piece of shared mutable state involved in
//! talking to providers: the in-flight maps and the serialized queue.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::debrid::{DebridError, DebridResult, RemoteFile, ResolvedStream};
use super::queues::{QueueStats, ScanQueueConfig, SerializedQueue};

type SharedResult<T> = Shared<BoxFuture<'static, DebridResult<T>>>;

struct InFlight<T> {
    generation: u64,
    result: SharedResult<T>,
}

type InFlightMap<T> = Arc<Mutex<HashMap<String, InFlight<T>>>>;

/// Removes the in-flight entry when the work finishes, panics included
struct EntryGuard<T> {
    map: InFlightMap<T>,
    key: String,
    generation: u64,
}

impl<T> Drop for EntryGuard<T> {
    fn drop(&mut self) {
        let mut map = self.map.lock();
        // A newer flight may already own the key
        if map
            .get(&self.key)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            map.remove(&self.key);
        }
    }
}

/// Outcome of a coordinated call
#[derive(Debug, Clone)]
pub struct Flight<T> {
    pub result: DebridResult<T>,
    /// Whether this caller started the work (as opposed to joining it)
    pub leader: bool,
}

/// Shares one execution among all concurrent callers with the same key.
///
/// The work runs on its own task, so a caller that gives up does not cancel
/// it for the others.
pub struct SingleFlight<T> {
    inflight: InFlightMap<T>,
    next_generation: AtomicU64,
    name: &'static str,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            name,
        }
    }

    /// Join the flight for `key`, starting it with `make` if none is running
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> Flight<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DebridResult<T>> + Send + 'static,
    {
        let (result, leader) = {
            let mut map = self.inflight.lock();
            match map.get(key) {
                Some(existing) => {
                    debug!(flight = self.name, key = %key, "Joining in-flight work");
                    (existing.result.clone(), false)
                }
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let guard = EntryGuard {
                        map: Arc::clone(&self.inflight),
                        key: key.to_string(),
                        generation,
                    };
                    let work = make();
                    let handle = tokio::spawn(async move {
                        let _guard = guard;
                        work.await
                    });

                    let name = self.name;
                    let result = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(e) => {
                                warn!(flight = name, error = %e, "In-flight task aborted");
                                Err(DebridError::Internal(format!("{} task failed: {}", name, e)))
                            }
                        }
                    }
                    .boxed()
                    .shared();

                    map.insert(
                        key.to_string(),
                        InFlight {
                            generation,
                            result: result.clone(),
                        },
                    );
                    debug!(flight = self.name, key = %key, "Started in-flight work");
                    (result, true)
                }
            }
        };

        Flight {
            result: result.await,
            leader,
        }
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inflight.lock().contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.inflight.lock().len()
    }
}

/// Process-wide coordinator for provider traffic
pub struct RequestCoordinator {
    scans: SingleFlight<Vec<RemoteFile>>,
    streams: SingleFlight<Option<ResolvedStream>>,
    queue: SerializedQueue,
}

impl RequestCoordinator {
    pub fn new(queue_config: ScanQueueConfig) -> Self {
        Self {
            scans: SingleFlight::new("pack_scan"),
            streams: SingleFlight::new("stream"),
            queue: SerializedQueue::new("scan", queue_config),
        }
    }

    /// Run a full file-list scan for `info_hash`: at most one per hash at a
    /// time, admitted through the serialized queue.
    pub async fn scan<F, Fut>(&self, info_hash: &str, scan: F) -> Flight<Vec<RemoteFile>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = DebridResult<Vec<RemoteFile>>> + Send + 'static,
    {
        let queue = self.queue.clone();
        self.scans
            .run(info_hash, move || async move { queue.run(scan).await })
            .await
    }

    /// Deduplicate concurrent single-stream resolutions sharing `key`
    pub async fn stream<F, Fut>(&self, key: &str, resolve: F) -> Flight<Option<ResolvedStream>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DebridResult<Option<ResolvedStream>>> + Send + 'static,
    {
        self.streams.run(key, resolve).await
    }

    pub fn is_scanning(&self, info_hash: &str) -> bool {
        self.scans.is_in_flight(info_hash)
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }
}

impl Default for RequestCoordinator {
    fn default() -> Self {
        Self::new(ScanQueueConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::debrid::DebridServiceKind;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn fast_coordinator() -> Arc<RequestCoordinator> {
        Arc::new(RequestCoordinator::new(ScanQueueConfig {
            max_concurrent: 1,
            task_delay: Duration::ZERO,
        }))
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let flights: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new("test"));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let flights = flights.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flights
                    .run("key", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(7)
                    })
                    .await
            }));
        }

        let mut leaders = 0;
        for h in handles {
            let flight = h.await.unwrap();
            assert_eq!(flight.result, Ok(7));
            if flight.leader {
                leaders += 1;
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
        assert_eq!(flights.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_flight_releases_key() {
        let flights: SingleFlight<u32> = SingleFlight::new("test");

        let first = flights
            .run("hash", || async {
                Err(DebridError::Transient {
                    service: DebridServiceKind::RealDebrid,
                    message: "boom".into(),
                })
            })
            .await;
        assert!(first.result.is_err());
        assert!(!flights.is_in_flight("hash"));

        let second = flights.run("hash", || async { Ok(1) }).await;
        assert!(second.leader);
        assert_eq!(second.result, Ok(1));
    }

    #[tokio::test]
    async fn test_panicking_flight_releases_key() {
        let flights: SingleFlight<u32> = SingleFlight::new("test");
        let flight = flights
            .run("hash", || async { panic!("scan exploded") })
            .await;
        assert!(matches!(flight.result, Err(DebridError::Internal(_))));
        assert!(!flights.is_in_flight("hash"));
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let flights: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new("test"));
        let calls = Arc::new(AtomicUsize::new(0));
        let (a, b) = tokio::join!(
            flights.run("a", {
                let calls = calls.clone();
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            }),
            flights.run("b", {
                let calls = calls.clone();
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(2)
                }
            }),
        );
        assert!(a.leader && b.leader);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_scan_goes_through_queue() {
        let coordinator = fast_coordinator();
        let flight = coordinator
            .scan("abc", || async { Ok(vec![RemoteFile::new(0, "a.mkv", 10)]) })
            .await;
        assert_eq!(flight.result.unwrap().len(), 1);
        assert_eq!(coordinator.queue_stats().completed, 1);
        assert!(!coordinator.is_scanning("abc"));
    }
}
