//! Per-device request queue (C3): bounds how many calls against a
//! single device are in flight at once, preserving FIFO order for
//! callers of `publishMessage`.
//!
//! State machine per device-queue (§4.3): `idle` -> (first enqueue) ->
//! `draining`: pop up to `batchSize`, await all, sleep `batchDelay` if
//! more remain, else back to `idle`. The delay only ever separates one
//! batch's dispatch from the next — the first batch of a wave always
//! starts immediately.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, Notify, Semaphore};
use tokio::time::Instant;

pub const DEFAULT_BATCH_SIZE: usize = 1;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 200;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

struct DeviceLane {
    queue: Mutex<VecDeque<BoxFuture<()>>>,
    notify: Notify,
    semaphore: Arc<Semaphore>,
}

/// Serialises (or bounded-parallelises) calls per device uuid.
///
/// When disabled, `enqueue` runs the closure inline with no batching —
/// useful for tests and for the `LAN_HTTP_FIRST_ONLY_GET` fast path
/// where queueing would only add latency.
pub struct RequestQueue {
    batch_size: usize,
    batch_delay: Duration,
    enabled: bool,
    lanes: Mutex<HashMap<String, Arc<DeviceLane>>>,
}

impl RequestQueue {
    pub fn new(batch_size: usize, batch_delay_ms: u64, enabled: bool) -> Self {
        Self {
            batch_size: batch_size.max(1),
            batch_delay: Duration::from_millis(batch_delay_ms),
            enabled,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    async fn lane_for(&self, uuid: &str) -> Arc<DeviceLane> {
        let mut lanes = self.lanes.lock().await;
        if let Some(lane) = lanes.get(uuid) {
            return lane.clone();
        }
        let lane = Arc::new(DeviceLane {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            semaphore: Arc::new(Semaphore::new(self.batch_size)),
        });
        lanes.insert(uuid.to_string(), lane.clone());
        tokio::spawn(drive_lane(lane.clone(), self.batch_size, self.batch_delay));
        lane
    }

    /// Run `call` respecting this device's batching (§4.3). Returns
    /// whatever `call` resolves to.
    pub async fn enqueue<T, F>(&self, uuid: &str, call: F) -> T
    where
        F: FnOnce() -> BoxFuture<T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.enabled {
            return call().await;
        }

        let lane = self.lane_for(uuid).await;
        let (tx, rx) = oneshot::channel::<T>();
        let job: BoxFuture<()> = Box::pin(async move {
            let result = call().await;
            let _ = tx.send(result);
        });

        lane.queue.lock().await.push_back(job);
        lane.notify.notify_one();

        rx.await.expect("device lane dropped job before completion")
    }

    /// Remove a device's lane entirely; queued callers already holding
    /// a permit are unaffected, new enrollees get a fresh lane.
    pub async fn clear_queue(&self, uuid: &str) {
        self.lanes.lock().await.remove(uuid);
    }

    pub async fn available_permits(&self, uuid: &str) -> usize {
        self.lane_for(uuid).await.semaphore.available_permits()
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE, DEFAULT_BATCH_DELAY_MS, true)
    }
}

/// Background driver for one device's lane (mirrors `meross_mqtt::pool`'s
/// per-domain event loop task): waits for work, then drains it in
/// batches of up to `batch_size`, sleeping `batch_delay` between
/// batches rather than before every call.
async fn drive_lane(lane: Arc<DeviceLane>, batch_size: usize, batch_delay: Duration) {
    loop {
        loop {
            if !lane.queue.lock().await.is_empty() {
                break;
            }
            lane.notify.notified().await;
        }

        // idle -> draining
        let mut next_deadline: Option<Instant> = None;
        loop {
            let batch: Vec<BoxFuture<()>> = {
                let mut queue = lane.queue.lock().await;
                let mut batch = Vec::with_capacity(batch_size);
                for _ in 0..batch_size {
                    match queue.pop_front() {
                        Some(job) => batch.push(job),
                        None => break,
                    }
                }
                batch
            };
            if batch.is_empty() {
                break;
            }

            let mut handles = Vec::with_capacity(batch.len());
            for job in batch {
                let permit = lane
                    .semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("lane semaphore is never closed");
                handles.push(tokio::spawn(async move {
                    job.await;
                    drop(permit);
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }

            let more_remain = !lane.queue.lock().await.is_empty();
            if !more_remain {
                break;
            }
            if batch_delay > Duration::ZERO {
                // The delay is a fixed cadence from the previous
                // deadline, not a fresh `D` measured off this batch's
                // own completion time — a batch that finishes well
                // inside `D` doesn't push later batches out further.
                let deadline = next_deadline.unwrap_or_else(Instant::now) + batch_delay;
                tokio::time::sleep_until(deadline).await;
                next_deadline = Some(deadline);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn disabled_queue_runs_inline_without_delay() {
        let queue = RequestQueue::new(1, 5_000, false);
        let started = std::time::Instant::now();
        let result = queue.enqueue("u1", || Box::pin(async { 42 })).await;
        assert_eq!(result, 42);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn batch_size_one_serialises_calls_on_same_device() {
        let queue = Arc::new(RequestQueue::new(1, 0, true));
        let concurrent = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let queue = queue.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue("u1", move || {
                        Box::pin(async move {
                            let n = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(n, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            concurrent.fetch_sub(1, Ordering::SeqCst);
                        })
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_batch_of_a_wave_dispatches_without_delay() {
        let queue = RequestQueue::new(2, 5_000, true);
        let started = Instant::now();
        let result = queue
            .enqueue("u1", || {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    7
                })
            })
            .await;
        assert_eq!(result, 7);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn distinct_devices_do_not_share_a_lane() {
        let queue = RequestQueue::new(1, 0, true);
        assert_eq!(queue.available_permits("u1").await, 1);
        assert_eq!(queue.available_permits("u2").await, 1);
    }

    #[tokio::test]
    async fn clear_queue_drops_the_lane() {
        let queue = RequestQueue::new(1, 0, true);
        let _ = queue.available_permits("u1").await;
        queue.clear_queue("u1").await;
        assert_eq!(queue.available_permits("u1").await, 1);
    }
}
