// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Phase attempts, outcomes and duration
//! - Records extracted per source
//! - Batches and items injected per target
//! - Extract/inject failures, rollbacks and retries
//! - Purge outcomes
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `aggregator_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Histograms track distributions (duration, size)
//!
//! Installing a recorder is up to the embedding application; without one
//! these calls are no-ops.

use crate::error::FailureKind;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record the start of a phase attempt.
pub fn record_phase_attempt(phase: &str) {
    counter!("aggregator_phase_attempts_total", "phase" => phase.to_string()).increment(1);
}

/// Record the outcome of a phase attempt.
pub fn record_phase_outcome(phase: &str, outcome: &str, duration: Duration) {
    counter!(
        "aggregator_phase_outcomes_total",
        "phase" => phase.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("aggregator_phase_duration_seconds", "phase" => phase.to_string())
        .record(duration.as_secs_f64());
}

/// Record the count stored in a committed history entry.
pub fn record_phase_pushed(phase: &str, pushed: u64) {
    counter!("aggregator_phase_pushed_total", "phase" => phase.to_string()).increment(pushed);
}

/// Record records read from a source.
pub fn record_records_extracted(source_id: &str, count: u64) {
    counter!("aggregator_records_extracted_total", "source_id" => source_id.to_string())
        .increment(count);
}

/// Record one batch delivered to a target.
pub fn record_batch_injected(target: &str, size: usize, duration: Duration) {
    counter!("aggregator_batches_injected_total", "target" => target.to_string()).increment(1);
    counter!("aggregator_items_injected_total", "target" => target.to_string())
        .increment(size as u64);
    histogram!("aggregator_inject_duration_seconds", "target" => target.to_string())
        .record(duration.as_secs_f64());
}

/// Record a captured extract or inject failure.
pub fn record_task_failure(kind: FailureKind, adapter: &str) {
    let kind = match kind {
        FailureKind::Extract => "extract",
        FailureKind::Inject => "inject",
    };
    counter!(
        "aggregator_task_failures_total",
        "kind" => kind,
        "adapter" => adapter.to_string()
    )
    .increment(1);
}

/// Record a phase rollback.
pub fn record_rollback(phase: &str) {
    counter!("aggregator_rollbacks_total", "phase" => phase.to_string()).increment(1);
}

/// Record a failed transaction call on a participant.
pub fn record_transaction_failure(stage: &str, participant: &str) {
    counter!(
        "aggregator_transaction_failures_total",
        "stage" => stage.to_string(),
        "participant" => participant.to_string()
    )
    .increment(1);
}

/// Record a retried operation.
pub fn record_retry(operation: &str) {
    counter!("aggregator_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Record a purge call for one source.
pub fn record_purge(source_id: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "aggregator_purges_total",
        "source_id" => source_id.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record an engine state transition.
pub fn set_engine_state(state: &str) {
    counter!("aggregator_engine_state_transitions_total", "state" => state.to_string()).increment(1);
}

/// Record the current queue depth.
pub fn record_queue_depth(depth: usize) {
    gauge!("aggregator_queue_depth").set(depth as f64);
}
