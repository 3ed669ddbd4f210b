// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batch queue shared by extraction tasks and the draining loop.
//!
//! # Design
//!
//! ```text
//! source A ──put(Record)..put(End)──┐
//!                                   ├──▶ BatchQueue ──next_batch()──▶ Batch ──▶ targets
//! source B ──put(Record)..put(End)──┘    (FIFO per producer)
//! ```
//!
//! The queue is unbounded, so `put` never suspends. `get` suspends until an
//! item is available. Items from different sources interleave freely; each
//! source's own items keep their order up to its `End`.

use crate::adapter::{BatchItem, Record};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Item carried by the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    /// A record tagged with its source id.
    Record(BatchItem),
    /// One source finished emitting for this phase run.
    End,
}

impl QueueItem {
    pub fn record(source_id: impl Into<String>, record: Record) -> Self {
        Self::Record(BatchItem::new(source_id, record))
    }
}

/// Items drained from the queue in one cycle.
#[derive(Debug, Default)]
pub struct Batch {
    /// Records in queue order, at most `batch_size` of them.
    pub items: Vec<BatchItem>,
    /// Number of `End` markers consumed while collecting (0 or 1).
    pub ends: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Unbounded multi-producer queue with a suspending `get`.
#[derive(Debug, Default)]
pub struct BatchQueue {
    items: Mutex<VecDeque<QueueItem>>,
    available: Notify,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue wrapped for sharing between tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueueItem>> {
        // A panicking holder cannot leave the deque half-updated.
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue an item. Never blocks.
    pub fn put(&self, item: QueueItem) {
        self.lock().push_back(item);
        self.available.notify_one();
    }

    /// Dequeue an item if one is ready.
    pub fn try_get(&self) -> Option<QueueItem> {
        self.lock().pop_front()
    }

    /// Dequeue an item, suspending until one is available.
    pub async fn get(&self) -> QueueItem {
        loop {
            let notified = self.available.notified();
            if let Some(item) = self.try_get() {
                return item;
            }
            notified.await;
        }
    }

    /// Suspend until the queue holds at least one item, without taking it.
    pub async fn wait_for_item(&self) {
        loop {
            let notified = self.available.notified();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop everything queued. Returns the number of items discarded.
    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let discarded = items.len();
        items.clear();
        discarded
    }

    /// Collect up to `batch_size` records.
    ///
    /// Returns an empty batch immediately when the queue is empty. Otherwise
    /// keeps taking items (suspending on `get` if producers are slower than
    /// the drain) until the cap is hit or an `End` is consumed. The `End` is
    /// counted in [`Batch::ends`] but never included in the items.
    pub async fn next_batch(&self, batch_size: usize) -> Batch {
        let mut batch = Batch::default();
        if self.is_empty() {
            return batch;
        }

        while batch.items.len() < batch_size {
            match self.get().await {
                QueueItem::End => {
                    batch.ends += 1;
                    break;
                }
                QueueItem::Record(item) => batch.items.push(item),
            }
        }
        batch
    }
}

/// Enqueues a source's `End` marker when dropped.
///
/// Held by each extraction task so the marker is emitted on success, on
/// failure, on panic and on abort alike.
pub struct EndMarker {
    queue: Arc<BatchQueue>,
}

impl EndMarker {
    pub fn new(queue: Arc<BatchQueue>) -> Self {
        Self { queue }
    }
}

impl Drop for EndMarker {
    fn drop(&mut self) {
        self.queue.put(QueueItem::End);
    }
}
