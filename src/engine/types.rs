// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine state and run reports.
//!
//! # State Transitions
//!
//! ```text
//!          execute()            phases done
//! Idle ──────────────→ Running ─────────────→ Purging ──→ Finished
//!  │                      │                      │
//!  │ (purge_only)         │ (phase failed)       │ (purge failed)
//!  └───→ Purging          └──────→ Failed ←──────┘
//! ```
//!
//! `Finished` and `Failed` go back to `Running`/`Purging` on the next
//! `execute()`.

use std::time::Duration;

/// State of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created, nothing executed yet.
    Idle,

    /// Running phases in configured order.
    Running,

    /// Running the purge pass.
    Purging,

    /// Last execution succeeded.
    Finished,

    /// Last execution failed after retries.
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "Idle"),
            EngineState::Running => write!(f, "Running"),
            EngineState::Purging => write!(f, "Purging"),
            EngineState::Finished => write!(f, "Finished"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Outcome of one committed phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseReport {
    pub phase: String,
    /// Records delivered to the targets.
    pub records: u64,
    /// Count written to the history entry.
    pub pushed: u64,
    /// Number of non-empty batches injected.
    pub batches: u64,
    /// Attempts used, including the successful one.
    pub attempts: usize,
    pub duration: Duration,
}

/// Outcome of the purge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Purge calls made.
    pub attempted: usize,
    /// Ids of the sources whose purge failed.
    pub failed: Vec<String>,
}

/// Outcome of a full engine execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub phases: Vec<PhaseReport>,
    pub purge: PurgeReport,
}

impl RunSummary {
    /// Process exit status for a successful run.
    pub fn status(&self) -> i32 {
        0
    }

    /// Records delivered across every phase.
    pub fn total_records(&self) -> u64 {
        self.phases.iter().map(|p| p.records).sum()
    }
}
