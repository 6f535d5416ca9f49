//! Queue Manager (C3): one bounded FIFO per destination server plus its companion
//! Device-State Tracker (C4), the overflow policy, and the per-device replacement rule.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cot::CotEvent;
use crate::config::{OverflowStrategy, QueueConfig};
use crate::error::QueueError;
use crate::tracker::DeviceStateTracker;

/// A single queued event: `(uid, event_time, xml_bytes)`.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueEntry {
    pub uid: String,
    pub event_time: DateTime<Utc>,
    pub xml_bytes: Bytes,
}

impl From<&CotEvent> for QueueEntry {
    fn from(event: &CotEvent) -> Self {
        QueueEntry {
            uid: event.uid().to_string(),
            event_time: event.event_time(),
            xml_bytes: event.xml_bytes().clone(),
        }
    }
}

/// Point-in-time statistics for one destination's queue.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QueueStats {
    pub size: usize,
    pub events_queued_total: u64,
    pub events_dropped_total: u64,
    pub events_replaced_total: u64,
    pub last_enqueue_time: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Counters {
    queued_total: AtomicU64,
    dropped_total: AtomicU64,
    replaced_total: AtomicU64,
}

struct Inner {
    entries: VecDeque<QueueEntry>,
    tracker: DeviceStateTracker,
    last_enqueue_time: Option<DateTime<Utc>>,
}

/// One destination's queue, tracker, and the synchronization primitives that coordinate
/// producers (Stream Workers) and the single consumer (its Transmission Worker) without
/// busy-waiting.
pub struct DestinationQueue {
    config: QueueConfig,
    inner: Mutex<Inner>,
    not_empty: Notify,
    not_full: Notify,
    counters: Counters,
    shutdown: CancellationToken,
}

impl DestinationQueue {
    fn new(config: QueueConfig) -> Self {
        DestinationQueue {
            config,
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                tracker: DeviceStateTracker::new(),
                last_enqueue_time: None,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            counters: Counters::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Applies the replacement/admission rule for one batch of events.
    async fn enqueue_with_replacement(&self, events: &[CotEvent]) -> Result<(), QueueError> {
        for event in events {
            self.enqueue_one(event).await?;
        }
        Ok(())
    }

    async fn enqueue_one(&self, event: &CotEvent) -> Result<(), QueueError> {
        let entry = QueueEntry::from(event);

        loop {
            let mut guard = self.inner.lock().await;

            if !guard.tracker.should_accept(&entry.uid, entry.event_time) {
                debug!(uid = %entry.uid, "dropping stale event");
                return Ok(());
            }

            // Replacement rule: a device never has more than one entry waiting. A replacement
            // doesn't grow the queue, so it never needs to go through the overflow path below.
            let has_existing_entry = guard.entries.iter().any(|e| e.uid == entry.uid);
            let resulting_len = if has_existing_entry {
                guard.entries.len()
            } else {
                guard.entries.len() + 1
            };

            if resulting_len > self.config.max_size {
                match self.config.overflow_strategy {
                    OverflowStrategy::DropOldest => {}
                    OverflowStrategy::DropNewest => {
                        self.counters.dropped_total.fetch_add(1, Ordering::Relaxed);
                        return Err(QueueError::Full);
                    }
                    OverflowStrategy::Block => {
                        // Register as a waiter while still holding the lock, so a consumer that
                        // drains and calls `not_full.notify_waiters()` right after we release it
                        // can never slip through unseen.
                        let notified = self.not_full.notified();
                        tokio::pin!(notified);
                        notified.as_mut().enable();
                        drop(guard);
                        tokio::select! {
                            _ = notified => {}
                            _ = self.shutdown.cancelled() => return Err(QueueError::Cancelled),
                        }
                        continue;
                    }
                }
            }

            remove_entry_by_uid(&mut guard.entries, &entry.uid);
            guard.entries.push_back(entry.clone());
            guard
                .tracker
                .record(&entry.uid, entry.event_time, event.lat(), event.lon());
            guard.last_enqueue_time = Some(entry.event_time);
            self.counters.queued_total.fetch_add(1, Ordering::Relaxed);
            if has_existing_entry {
                self.counters.replaced_total.fetch_add(1, Ordering::Relaxed);
            }

            if guard.entries.len() > self.config.max_size {
                debug_assert!(matches!(self.config.overflow_strategy, OverflowStrategy::DropOldest));
                guard.entries.pop_front();
                self.counters.dropped_total.fetch_add(1, Ordering::Relaxed);
            }

            drop(guard);
            self.not_empty.notify_one();
            return Ok(());
        }
    }

    async fn dequeue_batch(&self, max_n: usize, batch_timeout_ms: u64) -> Vec<QueueEntry> {
        {
            let mut guard = self.inner.lock().await;
            if !guard.entries.is_empty() {
                return drain(&mut guard.entries, max_n, &self.not_full);
            }
        }

        let wait = timeout(
            std::time::Duration::from_millis(batch_timeout_ms),
            self.wait_for_entry(),
        )
        .await;
        if wait.is_err() {
            return Vec::new();
        }

        let mut guard = self.inner.lock().await;
        drain(&mut guard.entries, max_n, &self.not_full)
    }

    async fn wait_for_entry(&self) {
        tokio::select! {
            _ = self.not_empty.notified() => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    /// Puts `entries` back at the head of the queue, in their original order, without replaying
    /// admission or replacement (they were already accepted once). Used by the Transmission
    /// Worker to recover a batch that failed to write when `overflow_strategy == block` (spec
    /// §4.5 step 3); under any other overflow strategy the batch is dropped instead, by design.
    async fn requeue_at_head(&self, entries: Vec<QueueEntry>) {
        if entries.is_empty() {
            return;
        }
        let mut guard = self.inner.lock().await;
        for entry in entries.into_iter().rev() {
            guard.entries.push_front(entry);
        }
        drop(guard);
        self.not_empty.notify_one();
    }

    async fn flush(&self, hard_reset: bool) {
        let mut guard = self.inner.lock().await;
        guard.entries.clear();
        if hard_reset {
            guard.tracker.clear();
        }
        drop(guard);
        self.not_full.notify_waiters();
    }

    async fn stats(&self) -> QueueStats {
        let guard = self.inner.lock().await;
        QueueStats {
            size: guard.entries.len(),
            events_queued_total: self.counters.queued_total.load(Ordering::Relaxed),
            events_dropped_total: self.counters.dropped_total.load(Ordering::Relaxed),
            events_replaced_total: self.counters.replaced_total.load(Ordering::Relaxed),
            last_enqueue_time: guard.last_enqueue_time,
        }
    }

    /// Sweeps the device-state tracker for entries older than `horizon`, freeing memory held
    /// by devices that have stopped reporting.
    async fn evict_stale_devices(&self, now: DateTime<Utc>, horizon: chrono::Duration) -> Vec<String> {
        let mut guard = self.inner.lock().await;
        guard.tracker.evict_older_than(now, horizon)
    }
}

fn remove_entry_by_uid(entries: &mut VecDeque<QueueEntry>, uid: &str) -> bool {
    if let Some(pos) = entries.iter().position(|e| e.uid == uid) {
        entries.remove(pos);
        true
    } else {
        false
    }
}

fn drain(entries: &mut VecDeque<QueueEntry>, max_n: usize, not_full: &Notify) -> Vec<QueueEntry> {
    let n = max_n.min(entries.len());
    let batch: Vec<QueueEntry> = entries.drain(..n).collect();
    if !batch.is_empty() {
        not_full.notify_waiters();
    }
    batch
}

/// Owns the set of per-destination queues. This is the component the Stream Workers (C2) and
/// Transmission Workers (C5) both talk to, but never to each other directly.
#[derive(Default)]
pub struct QueueManager {
    queues: RwLock<HashMap<String, Arc<DestinationQueue>>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: calling this again for an existing `server_id` is a no-op.
    pub async fn create_queue(&self, server_id: &str, config: QueueConfig) {
        let mut queues = self.queues.write().await;
        queues
            .entry(server_id.to_string())
            .or_insert_with(|| Arc::new(DestinationQueue::new(config)));
    }

    /// Idempotent: removing a queue that doesn't exist is a no-op. Any producer blocked on this
    /// queue under `overflow_strategy == block` is cancelled.
    pub async fn delete_queue(&self, server_id: &str) {
        let mut queues = self.queues.write().await;
        if let Some(queue) = queues.remove(server_id) {
            queue.shutdown.cancel();
        }
    }

    fn queue_handle(&self, queues: &HashMap<String, Arc<DestinationQueue>>, server_id: &str) -> Result<Arc<DestinationQueue>, QueueError> {
        queues
            .get(server_id)
            .cloned()
            .ok_or_else(|| QueueError::UnknownDestination(server_id.to_string()))
    }

    pub async fn enqueue_with_replacement(&self, events: &[CotEvent], server_id: &str) -> Result<(), QueueError> {
        let queue = {
            let queues = self.queues.read().await;
            self.queue_handle(&queues, server_id)?
        };
        queue.enqueue_with_replacement(events).await
    }

    pub async fn dequeue_batch(&self, server_id: &str, max_n: usize) -> Result<Vec<QueueEntry>, QueueError> {
        let queue = {
            let queues = self.queues.read().await;
            self.queue_handle(&queues, server_id)?
        };
        let timeout_ms = queue.config.batch_timeout_ms;
        Ok(queue.dequeue_batch(max_n, timeout_ms).await)
    }

    pub async fn flush(&self, server_id: &str, hard_reset: bool) -> Result<(), QueueError> {
        let queue = {
            let queues = self.queues.read().await;
            self.queue_handle(&queues, server_id)?
        };
        queue.flush(hard_reset).await;
        Ok(())
    }

    /// Re-admits a previously-dequeued batch at the head of `server_id`'s queue, bypassing
    /// admission/replacement: recovering a failed write under `overflow_strategy == block`
    /// without losing the batch.
    pub async fn requeue_at_head(&self, server_id: &str, entries: Vec<QueueEntry>) -> Result<(), QueueError> {
        let queue = {
            let queues = self.queues.read().await;
            self.queue_handle(&queues, server_id)?
        };
        queue.requeue_at_head(entries).await;
        Ok(())
    }

    /// The configured overflow strategy for `server_id`'s queue, consulted by the Transmission
    /// Worker to decide whether a failed write's batch should be recovered or dropped.
    pub async fn overflow_strategy(&self, server_id: &str) -> Result<OverflowStrategy, QueueError> {
        let queue = {
            let queues = self.queues.read().await;
            self.queue_handle(&queues, server_id)?
        };
        Ok(queue.config.overflow_strategy)
    }

    pub async fn stats(&self, server_id: &str) -> Result<QueueStats, QueueError> {
        let queue = {
            let queues = self.queues.read().await;
            self.queue_handle(&queues, server_id)?
        };
        Ok(queue.stats().await)
    }

    pub async fn evict_stale_devices(
        &self,
        server_id: &str,
        now: DateTime<Utc>,
        horizon: chrono::Duration,
    ) -> Result<Vec<String>, QueueError> {
        let queue = {
            let queues = self.queues.read().await;
            self.queue_handle(&queues, server_id)?
        };
        Ok(queue.evict_stale_devices(now, horizon).await)
    }

    /// All currently-registered destination ids, used by the periodic queue-stats logger
    /// and the eviction sweep.
    pub async fn destination_ids(&self) -> Vec<String> {
        self.queues.read().await.keys().cloned().collect()
    }
}
