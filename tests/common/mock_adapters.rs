//! Recording mock adapters for testing.
//!
//! Sources emit deterministic records and can fail or panic part-way
//! through extraction. Targets record every batch and transaction call
//! and can fail any step on demand. The history mock wraps
//! `MemoryHistory` and records calls.

use aggregator_engine::adapter::{
    AdapterError, BatchItem, BoxFuture, History, Record, RecordStream, Source, Target,
};
use aggregator_engine::history::MemoryHistory;
use aggregator_engine::window::DateWindow;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// The record a mock source emits at position `n`.
pub fn record(source_id: &str, n: usize) -> Record {
    json!({ "source": source_id, "n": n })
}

enum Step {
    Emit(Record),
    Fail,
    Panic,
}

/// Mock source emitting `count` records per extraction.
///
/// # Example
/// ```rust,ignore
/// let source = MockSource::flaky("api", 6, 1).shared();
///
/// // First extraction emits 3 records then fails, later ones succeed.
/// let phase = Phase::new("p", vec![source.clone()], targets);
///
/// assert_eq!(source.extract_calls(), 2);
/// ```
pub struct MockSource {
    id: String,
    count: usize,
    /// Extract calls that fail half-way through, counted from the first
    failing_extracts: usize,
    /// Panic half-way through instead of failing
    panics: bool,
    purge_fails: AtomicBool,
    extract_calls: AtomicUsize,
    purge_calls: AtomicUsize,
}

impl MockSource {
    /// Source that always succeeds.
    pub fn new(id: &str, count: usize) -> Self {
        Self {
            id: id.to_string(),
            count,
            failing_extracts: 0,
            panics: false,
            purge_fails: AtomicBool::new(false),
            extract_calls: AtomicUsize::new(0),
            purge_calls: AtomicUsize::new(0),
        }
    }

    /// Source whose every extraction fails half-way through.
    pub fn failing(id: &str, count: usize) -> Self {
        Self::flaky(id, count, usize::MAX)
    }

    /// Source whose first `failures` extractions fail half-way through.
    pub fn flaky(id: &str, count: usize, failures: usize) -> Self {
        Self {
            failing_extracts: failures,
            ..Self::new(id, count)
        }
    }

    /// Source that panics half-way through every extraction.
    pub fn panicking(id: &str, count: usize) -> Self {
        Self {
            panics: true,
            ..Self::new(id, count)
        }
    }

    /// Make purge() fail.
    pub fn with_failing_purge(self) -> Self {
        self.purge_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }

    pub fn purge_calls(&self) -> usize {
        self.purge_calls.load(Ordering::SeqCst)
    }

    fn steps(&self, fail: bool) -> Vec<Step> {
        let mut steps: Vec<Step> = (0..self.count)
            .map(|n| Step::Emit(record(&self.id, n)))
            .collect();
        if self.panics {
            steps.truncate(self.count / 2);
            steps.push(Step::Panic);
        } else if fail {
            steps.truncate(self.count / 2);
            steps.push(Step::Fail);
        }
        steps
    }
}

impl Source for MockSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn extract(&self, _window: DateWindow) -> RecordStream<'_> {
        let call = self.extract_calls.fetch_add(1, Ordering::SeqCst);
        let steps = self.steps(call < self.failing_extracts);
        let id = self.id.clone();

        stream::iter(steps)
            .map(move |step| match step {
                Step::Emit(record) => Ok(record),
                Step::Fail => Err(AdapterError::new(format!("{} page fetch failed", id))),
                Step::Panic => panic!("{} exploded", id),
            })
            .boxed()
    }

    fn purge(&self, _window: DateWindow) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.purge_calls.fetch_add(1, Ordering::SeqCst);
            if self.purge_fails.load(Ordering::SeqCst) {
                return Err(AdapterError::new(format!("{} purge refused", self.id)));
            }
            Ok(())
        })
    }
}

/// A recorded transaction call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnCall {
    Start,
    Commit,
    Rollback,
}

/// Mock target that records every batch and transaction call.
pub struct MockTarget {
    name: String,
    /// Successfully injected batches
    batches: RwLock<Vec<Vec<BatchItem>>>,
    /// Overwrite flag of every inject() call
    overwrites: RwLock<Vec<bool>>,
    txn_calls: RwLock<Vec<TxnCall>>,
    /// Counter for inject calls
    inject_count: AtomicUsize,
    /// Fail only this inject call (0-indexed)
    fail_inject_at: AtomicUsize,
    fail_all_injects: AtomicBool,
    panic_on_inject: AtomicBool,
    fail_start: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
}

impl MockTarget {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            batches: RwLock::new(Vec::new()),
            overwrites: RwLock::new(Vec::new()),
            txn_calls: RwLock::new(Vec::new()),
            inject_count: AtomicUsize::new(0),
            fail_inject_at: AtomicUsize::new(usize::MAX),
            fail_all_injects: AtomicBool::new(false),
            panic_on_inject: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            fail_rollback: AtomicBool::new(false),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    // =========================================================================
    // Failure Configuration
    // =========================================================================

    /// Fail the n-th inject() call (0-indexed, counted across attempts).
    pub fn fail_inject_at(&self, n: usize) {
        self.fail_inject_at.store(n, Ordering::SeqCst);
    }

    /// Fail every inject() call.
    pub fn fail_all_injects(&self) {
        self.fail_all_injects.store(true, Ordering::SeqCst);
    }

    /// Panic inside every inject() call.
    pub fn panic_on_inject(&self) {
        self.panic_on_inject.store(true, Ordering::SeqCst);
    }

    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn fail_commit(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_rollback(&self) {
        self.fail_rollback.store(true, Ordering::SeqCst);
    }

    // =========================================================================
    // Query Methods
    // =========================================================================

    /// Get all successfully injected batches.
    pub async fn batches(&self) -> Vec<Vec<BatchItem>> {
        self.batches.read().await.clone()
    }

    /// Sizes of the successfully injected batches, in order.
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.batches.read().await.iter().map(Vec::len).collect()
    }

    /// Every successfully injected item, flattened.
    pub async fn injected(&self) -> Vec<BatchItem> {
        self.batches.read().await.iter().flatten().cloned().collect()
    }

    /// Number of inject() calls, failed ones included.
    pub fn inject_calls(&self) -> usize {
        self.inject_count.load(Ordering::SeqCst)
    }

    pub async fn overwrites(&self) -> Vec<bool> {
        self.overwrites.read().await.clone()
    }

    /// Get all recorded transaction calls.
    pub async fn txn_calls(&self) -> Vec<TxnCall> {
        self.txn_calls.read().await.clone()
    }

    /// Count of one kind of transaction call.
    pub async fn count(&self, call: TxnCall) -> usize {
        self.txn_calls.read().await.iter().filter(|c| **c == call).count()
    }

    async fn transaction(&self, call: TxnCall, fail: &AtomicBool) -> Result<(), AdapterError> {
        self.txn_calls.write().await.push(call);
        if fail.load(Ordering::SeqCst) {
            return Err(AdapterError::new(format!("{} {:?} refused", self.name, call)));
        }
        Ok(())
    }
}

impl Target for MockTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_transaction(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.transaction(TxnCall::Start, &self.fail_start))
    }

    fn commit_transaction(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.transaction(TxnCall::Commit, &self.fail_commit))
    }

    fn rollback_transaction(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.transaction(TxnCall::Rollback, &self.fail_rollback))
    }

    fn inject<'a>(&'a self, batch: &'a [BatchItem], overwrite: bool) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let call = self.inject_count.fetch_add(1, Ordering::SeqCst);
            self.overwrites.write().await.push(overwrite);

            if self.panic_on_inject.load(Ordering::SeqCst) {
                panic!("{} exploded", self.name);
            }
            if self.fail_all_injects.load(Ordering::SeqCst)
                || call == self.fail_inject_at.load(Ordering::SeqCst)
            {
                return Err(AdapterError::new(format!("{} bulk rejected", self.name)));
            }

            self.batches.write().await.push(batch.to_vec());
            Ok(())
        })
    }
}

/// History ledger that records calls and can fail on demand.
#[derive(Default)]
pub struct MockHistory {
    inner: MemoryHistory,
    calls: RwLock<Vec<&'static str>>,
    fail_exists: AtomicBool,
    fail_add_entry: AtomicBool,
    fail_commit: AtomicBool,
}

impl MockHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn ledger(&self) -> &MemoryHistory {
        &self.inner
    }

    pub async fn calls(&self) -> Vec<&'static str> {
        self.calls.read().await.clone()
    }

    pub fn fail_exists(&self) {
        self.fail_exists.store(true, Ordering::SeqCst);
    }

    pub fn fail_add_entry(&self) {
        self.fail_add_entry.store(true, Ordering::SeqCst);
    }

    pub fn fail_commit(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    async fn record(&self, call: &'static str, fail: &AtomicBool) -> Result<(), AdapterError> {
        self.calls.write().await.push(call);
        if fail.load(Ordering::SeqCst) {
            return Err(AdapterError::new(format!("history {} unavailable", call)));
        }
        Ok(())
    }
}

impl History for MockHistory {
    fn exists<'a>(&'a self, source_id: &'a str, window: DateWindow) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.record("exists", &self.fail_exists).await?;
            self.inner.exists(source_id, window).await
        })
    }

    fn add_entry<'a>(
        &'a self,
        source_ids: &'a [String],
        window: DateWindow,
        count: u64,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.record("add_entry", &self.fail_add_entry).await?;
            self.inner.add_entry(source_ids, window, count).await
        })
    }

    fn start_transaction(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.calls.write().await.push("start");
            self.inner.start_transaction().await
        })
    }

    fn commit_transaction(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.record("commit", &self.fail_commit).await?;
            self.inner.commit_transaction().await
        })
    }

    fn rollback_transaction(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.calls.write().await.push("rollback");
            self.inner.rollback_transaction().await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn window() -> DateWindow {
        DateWindow::single(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    #[tokio::test]
    async fn test_flaky_source_fails_then_recovers() {
        let source = MockSource::flaky("api", 4, 1);

        let first: Vec<_> = source.extract(window()).collect().await;
        assert_eq!(first.len(), 3);
        assert!(first[2].is_err());

        let second: Vec<_> = source.extract(window()).collect().await;
        assert_eq!(second.len(), 4);
        assert!(second.iter().all(Result::is_ok));
        assert_eq!(source.extract_calls(), 2);
    }

    #[tokio::test]
    async fn test_target_fail_inject_at() {
        let target = MockTarget::new("es");
        target.fail_inject_at(1);
        let batch = vec![BatchItem::new("api", record("api", 0))];

        assert!(target.inject(&batch, false).await.is_ok());
        assert!(target.inject(&batch, false).await.is_err());
        assert!(target.inject(&batch, true).await.is_ok());

        assert_eq!(target.inject_calls(), 3);
        assert_eq!(target.batch_sizes().await, vec![1, 1]);
        assert_eq!(target.overwrites().await, vec![false, false, true]);
    }
}
