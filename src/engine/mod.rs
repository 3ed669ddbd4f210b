// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Aggregation engine orchestrator.
//!
//! Ties together:
//! - The ordered phases and their adapters via [`crate::phase::Phase`]
//! - One atomic attempt per phase via the phase runner
//! - Bounded retry via [`crate::resilience::with_retry`]
//! - The best-effort purge pass
//!
//! # Lifecycle of a run
//!
//! 1. Resets the error collector
//! 2. Runs each selected phase in order, each wrapped in retry, failing
//!    fast if the queue was not drained by the previous phase
//! 3. Runs the purge pass over every source of the selected phases,
//!    also wrapped in retry
//!
//! Runs are serialized: a second `execute()` waits for the first.

mod runner;
mod transaction;
mod types;

pub use types::{EngineState, PhaseReport, PurgeReport, RunSummary};

use crate::adapter::History;
use crate::collector::ErrorCollector;
use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorRecord, Result};
use crate::metrics;
use crate::phase::{select_phases, Phase};
use crate::queue::BatchQueue;
use crate::resilience::{with_retry, RetryConfig};
use crate::window::DateWindow;
use futures::FutureExt;
use runner::PhaseRunner;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// The aggregation engine.
///
/// Owns the phases, the shared batch queue and error collector, and the
/// history ledger used for idempotency.
pub struct Engine {
    /// Phases in configured order
    phases: Vec<Phase>,

    config: EngineConfig,

    /// Retry policy for phases and the purge pass
    retry: RetryConfig,

    /// Shared between extraction tasks and the drain loop
    queue: Arc<BatchQueue>,

    /// Failures of the current phase attempt
    errors: Arc<ErrorCollector>,

    runner: PhaseRunner,

    /// Engine state (broadcast to watchers)
    state_tx: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    state_rx: watch::Receiver<EngineState>,

    /// Held for the duration of `execute()`
    run_lock: Mutex<()>,
}

impl Engine {
    /// Create an engine over `phases`, recording into `history`.
    ///
    /// Fails if the configuration is invalid or names an unknown phase.
    pub fn new(phases: Vec<Phase>, history: Arc<dyn History>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        select_phases(&phases, config.phases.as_deref())?;

        let queue = BatchQueue::shared();
        let errors = ErrorCollector::shared();
        let runner = PhaseRunner::new(
            Arc::clone(&queue),
            Arc::clone(&errors),
            history,
            config.batch_size,
            config.force,
            config.count_end_markers,
        );
        let (state_tx, state_rx) = watch::channel(EngineState::Idle);

        Ok(Self {
            phases,
            retry: config.retry_config(),
            config,
            queue,
            errors,
            runner,
            state_tx,
            state_rx,
            run_lock: Mutex::new(()),
        })
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn history(&self) -> &Arc<dyn History> {
        self.runner.history()
    }

    /// The batch queue shared with extraction tasks.
    pub fn queue(&self) -> &Arc<BatchQueue> {
        &self.queue
    }

    /// Failures collected by the most recent phase attempt.
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.errors.snapshot()
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
        metrics::set_engine_state(&state.to_string());
    }

    /// Run every selected phase for `window`, then purge.
    ///
    /// Returns the integer status `0` on success. Fails with the last
    /// error of the first phase that could not be committed.
    pub async fn run(&self, window: DateWindow, purge_only: bool) -> Result<i32> {
        Ok(self.execute(window, purge_only).await?.status())
    }

    /// Run every selected phase for `window`, then purge, and report.
    ///
    /// With `purge_only` the phases are skipped and only the purge pass
    /// runs.
    pub async fn execute(&self, window: DateWindow, purge_only: bool) -> Result<RunSummary> {
        let _running = self.run_lock.lock().await;
        let started = Instant::now();
        self.errors.reset();

        let selected = select_phases(&self.phases, self.config.phases.as_deref())?;
        info!(
            window = %window,
            phases = selected.len(),
            purge_only,
            force = self.config.force,
            "Starting run"
        );

        let result = self.execute_selected(&selected, window, purge_only).await;
        match &result {
            Ok(summary) => {
                self.set_state(EngineState::Finished);
                info!(
                    phases = summary.phases.len(),
                    records = summary.total_records(),
                    purge_failures = summary.purge.failed.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Run finished"
                );
            }
            Err(e) => {
                self.set_state(EngineState::Failed);
                error!(error = %e, "Run failed");
            }
        }
        result
    }

    async fn execute_selected(
        &self,
        selected: &[&Phase],
        window: DateWindow,
        purge_only: bool,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        if !purge_only {
            self.set_state(EngineState::Running);
            for phase in selected {
                summary.phases.push(self.run_with_retry(phase, window).await?);
            }
        }

        self.set_state(EngineState::Purging);
        let engine = self;
        summary.purge = with_retry(&self.retry, &self.queue, "purge", move |_| async move {
            Ok::<_, EngineError>(engine.purge(selected, window).await)
        })
        .await?;

        Ok(summary)
    }

    async fn run_with_retry(&self, phase: &Phase, window: DateWindow) -> Result<PhaseReport> {
        let queued = self.queue.size();
        if queued > 0 {
            return Err(EngineError::QueueNotEmpty(queued));
        }

        let attempts = AtomicUsize::new(0);
        let attempts_ref = &attempts;
        let runner = &self.runner;
        let operation = format!("phase {}", phase.name());

        let mut report = with_retry(&self.retry, &self.queue, &operation, move |attempt| {
            attempts_ref.store(attempt, Ordering::Relaxed);
            runner.run_phase(phase, window)
        })
        .await?;

        report.attempts = attempts.load(Ordering::Relaxed);
        Ok(report)
    }

    /// Ask every source of `phases` to purge `window`.
    ///
    /// A failing source is logged and skipped; the pass never fails.
    async fn purge(&self, phases: &[&Phase], window: DateWindow) -> PurgeReport {
        let mut report = PurgeReport::default();

        for phase in phases {
            for source in phase.sources() {
                let source_id = source.id();
                report.attempted += 1;

                let outcome = AssertUnwindSafe(async { source.purge(window).await })
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {
                        metrics::record_purge(source_id, true);
                        debug!(phase = %phase.name(), source_id, "Purged");
                    }
                    Ok(Err(e)) => {
                        metrics::record_purge(source_id, false);
                        warn!(phase = %phase.name(), source_id, error = %e, "Purge failed");
                        report.failed.push(source_id.to_string());
                    }
                    Err(_) => {
                        metrics::record_purge(source_id, false);
                        warn!(phase = %phase.name(), source_id, "Purge panicked");
                        report.failed.push(source_id.to_string());
                    }
                }
            }
        }

        report
    }
}
