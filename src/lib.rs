// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Aggregator Engine
//!
//! A transactional phase-execution engine for multi-source, multi-target
//! batch pipelines.
//!
//! ## Architecture
//!
//! A run walks an ordered list of phases. Each phase pairs a set of sources
//! with a set of targets and is committed or rolled back as a whole:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              Engine                                  │
//! │                                                                      │
//! │  for each phase (with retry):                                        │
//! │                                                                      │
//! │  ┌──────────┐   put    ┌────────────┐  batch   ┌──────────────────┐  │
//! │  │ Source A │────────►│            │────────►│ Target 1 ─┐       │  │
//! │  ├──────────┤         │ BatchQueue │         │ Target 2 ─┤ inject│  │
//! │  │ Source B │────────►│            │         │ Target n ─┘       │  │
//! │  └──────────┘   End   └────────────┘         └──────────────────┘  │
//! │        │                                              │              │
//! │        └──── ErrorCollector ◄─────────────────────────┘              │
//! │                   │                                                  │
//! │                   ▼                                                  │
//! │       empty: add history entry, commit all                           │
//! │       non-empty: roll back all, RunError                             │
//! │                                                                      │
//! │  then: purge pass over every source                                  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The history ledger makes phases idempotent: a phase whose sources
//! already have an entry overlapping the window fails with `AlreadyDone`
//! before any transaction is opened, unless the run is forced.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use aggregator_engine::{DateWindow, Engine, EngineConfig, MemoryHistory, NoOpTarget, Phase};
//! use std::sync::Arc;
//!
//! # async fn example(sources: Vec<Arc<dyn aggregator_engine::Source>>) -> aggregator_engine::Result<()> {
//! let phase = Phase::new("downloads", sources, vec![Arc::new(NoOpTarget)]);
//! let engine = Engine::new(vec![phase], Arc::new(MemoryHistory::new()), EngineConfig::default())?;
//!
//! let window = DateWindow::from_name_today("yesterday")?;
//! let status = engine.run(window, false).await?;
//! assert_eq!(status, 0);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod metrics;
pub mod phase;
pub mod queue;
pub mod resilience;
pub mod window;

// Re-exports for convenience
pub use adapter::{
    AdapterError, AdapterResult, BatchItem, BoxFuture, History, NoOpTarget, Record, RecordStream,
    Source, Target,
};
pub use collector::ErrorCollector;
pub use config::{EngineConfig, HistoryConfig};
pub use engine::{Engine, EngineState, PhaseReport, PurgeReport, RunSummary};
pub use error::{EngineError, ErrorRecord, FailureKind, Result, RunErrors};
pub use history::{HistoryEntry, MemoryHistory, SqliteHistory};
pub use phase::Phase;
pub use queue::{Batch, BatchQueue, EndMarker, QueueItem};
pub use resilience::{with_retry, RetryConfig};
pub use window::DateWindow;
