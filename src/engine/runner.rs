// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Phase runner: one atomic extract/inject pass over a phase.
//!
//! # Flow
//!
//! ```text
//!  exists? ──yes──▶ AlreadyDone (nothing opened)
//!     │no
//!     ▼
//!  open targets + history
//!     │
//!     ├──▶ extract task per source ──put──▶ BatchQueue
//!     │                                        │
//!     │    drain loop ◀──next_batch────────────┘
//!     │        │
//!     │        └──▶ inject task per target (same batch), await all
//!     │
//!     ├── any error collected ──▶ cancel extractors, rollback, RunError
//!     ▼
//!  add_entry ──▶ commit targets ──▶ commit history
//! ```
//!
//! Extraction and injection failures never cross task boundaries as
//! errors. They land in the [`ErrorCollector`], which the drain loop checks
//! after every batch.

use crate::adapter::{AdapterError, BatchItem, History, Source, Target};
use crate::collector::ErrorCollector;
use crate::engine::transaction::PhaseTransactions;
use crate::engine::types::PhaseReport;
use crate::error::{EngineError, FailureKind, Result, RunErrors};
use crate::metrics;
use crate::phase::Phase;
use crate::queue::{BatchQueue, EndMarker, QueueItem};
use crate::window::DateWindow;
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Runs single phase attempts against a shared queue and error collector.
pub(crate) struct PhaseRunner {
    queue: Arc<BatchQueue>,
    errors: Arc<ErrorCollector>,
    history: Arc<dyn History>,
    batch_size: usize,
    force: bool,
    count_end_markers: bool,
}

/// Tallies kept by the drain loop.
#[derive(Debug, Default)]
struct DrainCounts {
    ends: usize,
    records: u64,
    pushed: u64,
    batches: u64,
}

impl PhaseRunner {
    pub(crate) fn new(
        queue: Arc<BatchQueue>,
        errors: Arc<ErrorCollector>,
        history: Arc<dyn History>,
        batch_size: usize,
        force: bool,
        count_end_markers: bool,
    ) -> Self {
        Self {
            queue,
            errors,
            history,
            batch_size,
            force,
            count_end_markers,
        }
    }

    pub(crate) fn history(&self) -> &Arc<dyn History> {
        &self.history
    }

    /// Run one attempt of `phase` over `window`.
    ///
    /// Either every target and the ledger commit, or everything opened is
    /// rolled back and the error is returned.
    #[instrument(skip_all, fields(phase = %phase.name(), window = %window))]
    pub(crate) async fn run_phase(&self, phase: &Phase, window: DateWindow) -> Result<PhaseReport> {
        let started = Instant::now();
        self.errors.reset();
        metrics::record_phase_attempt(phase.name());

        if !self.force {
            if let Err(e) = self.check_not_done(phase, window).await {
                let outcome = if e.is_already_done() { "already_done" } else { "failed" };
                metrics::record_phase_outcome(phase.name(), outcome, started.elapsed());
                return Err(e);
            }
        }

        let txn = PhaseTransactions::new(phase.targets(), self.history.as_ref());
        if let Err(e) = txn.open().await {
            metrics::record_phase_outcome(phase.name(), "failed", started.elapsed());
            return Err(e);
        }

        let mut extractors = JoinSet::new();
        for source in phase.sources() {
            extractors.spawn(extract_source(
                Arc::clone(source),
                window,
                Arc::clone(&self.queue),
                Arc::clone(&self.errors),
            ));
        }

        let mut counts = DrainCounts::default();
        let sources = phase.sources().len();
        while counts.ends < sources || !self.queue.is_empty() {
            tokio::task::yield_now().await;
            if self.queue.is_empty() {
                self.queue.wait_for_item().await;
            }

            let batch = self.queue.next_batch(self.batch_size).await;
            counts.ends += batch.ends;
            if self.count_end_markers {
                counts.pushed += batch.ends as u64;
            }

            if !batch.is_empty() {
                let size = batch.len() as u64;
                counts.records += size;
                counts.pushed += size;
                counts.batches += 1;
                self.inject_batch(phase.targets(), batch.items).await;
                metrics::record_queue_depth(self.queue.size());
            }

            if !self.errors.is_empty() {
                return Err(self.abort(phase, &txn, &mut extractors, started).await);
            }
        }

        // Every End is in, so the extractors are finishing or done.
        while let Some(joined) = extractors.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Extraction task did not complete");
            }
        }
        if !self.errors.is_empty() {
            return Err(self.abort(phase, &txn, &mut extractors, started).await);
        }

        let source_ids = phase.source_ids();
        if let Err(e) = self.history.add_entry(&source_ids, window, counts.pushed).await {
            error!(error = %e, "Failed to add history entry");
            let rollback_failures = txn.rollback().await;
            metrics::record_rollback(phase.name());
            metrics::record_phase_outcome(phase.name(), "rolled_back", started.elapsed());
            if !rollback_failures.is_empty() {
                warn!(failures = rollback_failures.len(), "Rollback incomplete");
            }
            return Err(EngineError::AddEntry {
                error: e,
                rollback_failures,
            });
        }

        if let Err(e) = txn.commit().await {
            metrics::record_phase_outcome(phase.name(), "commit_failed", started.elapsed());
            return Err(e);
        }

        let duration = started.elapsed();
        metrics::record_phase_outcome(phase.name(), "committed", duration);
        metrics::record_phase_pushed(phase.name(), counts.pushed);
        info!(
            records = counts.records,
            pushed = counts.pushed,
            batches = counts.batches,
            duration_ms = duration.as_millis() as u64,
            "Phase committed"
        );

        Ok(PhaseReport {
            phase: phase.name().to_string(),
            records: counts.records,
            pushed: counts.pushed,
            batches: counts.batches,
            attempts: 1,
            duration,
        })
    }

    /// Fail with `AlreadyDone` if any source has an overlapping entry.
    async fn check_not_done(&self, phase: &Phase, window: DateWindow) -> Result<()> {
        for source in phase.sources() {
            let source_id = source.id();
            if self.history.exists(source_id, window).await? {
                info!(source_id, "Already done, skipping phase");
                return Err(EngineError::AlreadyDone {
                    source_id: source_id.to_string(),
                    window,
                });
            }
        }
        Ok(())
    }

    /// Deliver one batch to every target concurrently and wait for all.
    async fn inject_batch(&self, targets: &[Arc<dyn Target>], items: Vec<BatchItem>) {
        let batch: Arc<[BatchItem]> = items.into();
        let mut tasks = JoinSet::new();

        for target in targets {
            let target = Arc::clone(target);
            let batch = Arc::clone(&batch);
            let errors = Arc::clone(&self.errors);
            let overwrite = self.force;

            tasks.spawn(async move {
                let started = Instant::now();
                let outcome =
                    AssertUnwindSafe(async { target.inject(&batch, overwrite).await })
                        .catch_unwind()
                        .await;
                match outcome {
                    Ok(Ok(())) => {
                        metrics::record_batch_injected(target.name(), batch.len(), started.elapsed());
                    }
                    Ok(Err(e)) => errors.push(FailureKind::Inject, target.name(), e),
                    Err(panic) => errors.push(
                        FailureKind::Inject,
                        target.name(),
                        AdapterError::new(panic_message(panic.as_ref())),
                    ),
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Injection task did not complete");
            }
        }
    }

    /// Cancel outstanding extraction, roll back, and build the run error.
    async fn abort(
        &self,
        phase: &Phase,
        txn: &PhaseTransactions<'_>,
        extractors: &mut JoinSet<()>,
        started: Instant,
    ) -> EngineError {
        extractors.shutdown().await;

        let mut errors = RunErrors::new(self.errors.snapshot());
        errors.rollback_failures = txn.rollback().await;

        metrics::record_rollback(phase.name());
        metrics::record_phase_outcome(phase.name(), "rolled_back", started.elapsed());
        error!(
            extract_errors = errors.count(FailureKind::Extract),
            inject_errors = errors.count(FailureKind::Inject),
            rollback_failures = errors.rollback_failures.len(),
            "Phase rolled back"
        );

        EngineError::Run(errors)
    }
}

/// Pump one source into the queue.
///
/// The end marker is dropped last, after any failure has been collected,
/// so the drain loop sees the error no later than the source's `End`.
async fn extract_source(
    source: Arc<dyn Source>,
    window: DateWindow,
    queue: Arc<BatchQueue>,
    errors: Arc<ErrorCollector>,
) {
    let _end = EndMarker::new(Arc::clone(&queue));
    let source_id = source.id().to_string();

    let pump = async {
        let mut records = source.extract(window);
        let mut count = 0u64;
        while let Some(record) = records.next().await {
            queue.put(QueueItem::record(source_id.as_str(), record?));
            count += 1;
            // Enqueueing is a suspension point, so sources interleave.
            tokio::task::yield_now().await;
        }
        Ok::<u64, AdapterError>(count)
    };

    match AssertUnwindSafe(pump).catch_unwind().await {
        Ok(Ok(count)) => {
            metrics::record_records_extracted(&source_id, count);
            debug!(source_id = %source_id, records = count, "Extraction finished");
        }
        Ok(Err(e)) => errors.push(FailureKind::Extract, source_id.as_str(), e),
        Err(panic) => errors.push(
            FailureKind::Extract,
            source_id.as_str(),
            AdapterError::new(panic_message(panic.as_ref())),
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    format!("panicked: {}", message)
}
