// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the aggregation engine.
//!
//! Failures raised inside extraction and injection tasks never cross task
//! boundaries as errors. They are captured as [`ErrorRecord`]s in the
//! [`ErrorCollector`](crate::collector::ErrorCollector) and surface from the
//! phase runner as a single aggregated [`EngineError::Run`].
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `AlreadyDone` | No | Idempotency guard tripped for a source/window |
//! | `Run` | Yes | One or more extract/inject failures in a phase attempt |
//! | `Transaction` | Yes | Opening or committing transactions failed |
//! | `History` | Yes | History ledger operation failed |
//! | `AddEntry` | Yes | Recording the phase in the ledger failed; rolled back |
//! | `HistoryStore` | Yes | SQLite error in the durable ledger |
//! | `QueueNotEmpty` | No | Queue not drained before starting a phase |
//! | `Config` | No | Configuration invalid |

use crate::adapter::AdapterError;
use crate::window::DateWindow;
use std::fmt;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Which side of the pipeline a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// A source failed while producing records.
    Extract,
    /// A target failed while accepting a batch.
    Inject,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Extract => write!(f, "ExtractError"),
            FailureKind::Inject => write!(f, "InjectError"),
        }
    }
}

/// One failure captured during a phase attempt.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub kind: FailureKind,
    /// Source id or target name.
    pub adapter: String,
    pub error: AdapterError,
}

impl ErrorRecord {
    pub fn new(kind: FailureKind, adapter: impl Into<String>, error: AdapterError) -> Self {
        Self {
            kind,
            adapter: adapter.into(),
            error,
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}. error: {}", self.kind, self.adapter, self.error)
    }
}

/// Transaction step that failed on a target or on the history ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStage {
    Start,
    Commit,
    Rollback,
}

impl fmt::Display for TransactionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStage::Start => write!(f, "start"),
            TransactionStage::Commit => write!(f, "commit"),
            TransactionStage::Rollback => write!(f, "rollback"),
        }
    }
}

/// A transaction call that failed on one participant.
#[derive(Debug, Clone)]
pub struct TransactionFailure {
    pub stage: TransactionStage,
    /// Target name, or `"history"` for the ledger.
    pub participant: String,
    pub error: AdapterError,
}

impl fmt::Display for TransactionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed on {}: {}",
            self.stage, self.participant, self.error
        )
    }
}

/// Every failure collected during one failed phase attempt.
///
/// Rollback failures that happened while undoing the attempt are carried
/// alongside the primary failures rather than discarded.
#[derive(Debug, Clone, Default)]
pub struct RunErrors {
    pub errors: Vec<ErrorRecord>,
    pub rollback_failures: Vec<TransactionFailure>,
}

impl RunErrors {
    pub fn new(errors: Vec<ErrorRecord>) -> Self {
        Self {
            errors,
            rollback_failures: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Count of failures of the given kind.
    pub fn count(&self, kind: FailureKind) -> usize {
        self.errors.iter().filter(|e| e.kind == kind).count()
    }
}

impl fmt::Display for RunErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failures\n\n", self.errors.len())?;
        for (index, record) in self.errors.iter().enumerate() {
            writeln!(f, "{}. {}", index + 1, record)?;
        }
        if !self.rollback_failures.is_empty() {
            write!(f, "\n{} rollback failures\n\n", self.rollback_failures.len())?;
            for (index, failure) in self.rollback_failures.iter().enumerate() {
                writeln!(f, "{}. {}", index + 1, failure)?;
            }
        }
        Ok(())
    }
}

fn join_failures(failures: &[TransactionFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn rollback_suffix(failures: &[TransactionFailure]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!(" (rollback incomplete: {})", join_failures(failures))
    }
}

/// Errors that can occur while running phases.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A source already has a history entry overlapping the window.
    ///
    /// Never retried: running again would double-ingest the window.
    #[error("Already done: {source_id} for {window}")]
    AlreadyDone { source_id: String, window: DateWindow },

    /// Extraction or injection failures collected during one attempt.
    ///
    /// The attempt's transactions have been rolled back.
    #[error("{0}")]
    Run(RunErrors),

    /// Opening or committing transactions failed.
    #[error("Transaction {stage} failed: {}", join_failures(.failures))]
    Transaction {
        stage: TransactionStage,
        failures: Vec<TransactionFailure>,
    },

    /// Recording the phase in the ledger failed after every record was
    /// delivered. The attempt has been rolled back.
    #[error("Adding history entry failed: {error}{}", rollback_suffix(.rollback_failures))]
    AddEntry {
        error: AdapterError,
        rollback_failures: Vec<TransactionFailure>,
    },

    /// History ledger reported a failure outside of a transaction call.
    #[error("History error: {0}")]
    History(String),

    /// SQLite error in the durable history ledger.
    #[error("History store error: {0}")]
    HistoryStore(#[from] sqlx::Error),

    /// The batch queue still holds items from a previous phase.
    #[error("The queue still has {0} elements")]
    QueueNotEmpty(usize),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Check if a failed operation should be attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::AlreadyDone { .. } => false,
            Self::Run(_) => true,
            Self::Transaction { .. } => true,
            Self::AddEntry { .. } => true,
            Self::History(_) => true,
            Self::HistoryStore(_) => true,
            Self::QueueNotEmpty(_) => false,
            Self::Config(_) => false,
        }
    }

    /// Check if this is the idempotency guard.
    pub fn is_already_done(&self) -> bool {
        matches!(self, Self::AlreadyDone { .. })
    }

    /// Aggregated phase failures, if this is a run error.
    pub fn run_errors(&self) -> Option<&RunErrors> {
        match self {
            Self::Run(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<AdapterError> for EngineError {
    fn from(e: AdapterError) -> Self {
        Self::History(e.to_string())
    }
}
