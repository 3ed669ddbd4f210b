// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Source, target and history capability traits.
//!
//! The engine drives concrete plugins (API readers, search-index writers,
//! history databases) only through these traits. This keeps plugins
//! swappable and lets tests substitute recording mocks.
//!
//! # Example
//!
//! ```rust,no_run
//! use aggregator_engine::adapter::{AdapterResult, BatchItem, BoxFuture, RecordStream, Source, Target};
//! use aggregator_engine::window::DateWindow;
//! use futures::stream::{self, StreamExt};
//! use serde_json::json;
//!
//! struct Fixed;
//!
//! impl Source for Fixed {
//!     fn id(&self) -> &str {
//!         "fixed"
//!     }
//!
//!     fn extract(&self, _window: DateWindow) -> RecordStream<'_> {
//!         stream::iter(vec![Ok(json!({"downloads": 1}))]).boxed()
//!     }
//! }
//!
//! struct Printer;
//!
//! impl Target for Printer {
//!     fn name(&self) -> &str {
//!         "printer"
//!     }
//!
//!     fn inject<'a>(&'a self, batch: &'a [BatchItem], _overwrite: bool) -> BoxFuture<'a, ()> {
//!         Box::pin(async move {
//!             println!("{} items", batch.len());
//!             Ok(())
//!         })
//!     }
//! }
//! ```

use crate::window::DateWindow;
use futures::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;

/// Opaque record moved from sources to targets.
pub type Record = serde_json::Value;

/// Result type for adapter operations.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = AdapterResult<T>> + Send + 'a>>;

/// Lazy, finite, one-shot sequence of records produced by a source.
pub type RecordStream<'a> = BoxStream<'a, AdapterResult<Record>>;

/// Simplified error for adapter operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterError(pub String);

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for AdapterError {}

/// A record tagged with the id of the source that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub source_id: String,
    pub record: Record,
}

impl BatchItem {
    pub fn new(source_id: impl Into<String>, record: Record) -> Self {
        Self {
            source_id: source_id.into(),
            record,
        }
    }
}

/// A data source read for a date window.
pub trait Source: Send + Sync + 'static {
    /// Stable identifier, used to tag records and as the history key.
    fn id(&self) -> &str;

    /// Produce the records for `window`.
    ///
    /// The stream may perform paginated I/O. An `Err` item ends the
    /// extraction: the engine records it and stops reading the stream.
    fn extract(&self, window: DateWindow) -> RecordStream<'_>;

    /// Best-effort deletion of previously produced data for `window`.
    ///
    /// Failures are logged by the engine and never abort the purge pass.
    fn purge(&self, _window: DateWindow) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// A data target receiving batches inside a transaction.
pub trait Target: Send + Sync + 'static {
    /// Name used in logs and error records.
    fn name(&self) -> &str;

    fn start_transaction(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn commit_transaction(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn rollback_transaction(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Accept one batch.
    ///
    /// Called concurrently with other targets receiving the same batch, but
    /// at most once per batch for a given target. `overwrite` is set when
    /// the run was forced.
    fn inject<'a>(&'a self, batch: &'a [BatchItem], overwrite: bool) -> BoxFuture<'a, ()>;
}

/// Idempotency and audit ledger of processed (source, window) pairs.
pub trait History: Send + Sync + 'static {
    /// Check whether `source_id` already has an entry overlapping `window`.
    fn exists<'a>(&'a self, source_id: &'a str, window: DateWindow) -> BoxFuture<'a, bool>;

    /// Append one completion entry for the given sources.
    fn add_entry<'a>(
        &'a self,
        source_ids: &'a [String],
        window: DateWindow,
        count: u64,
    ) -> BoxFuture<'a, ()>;

    fn start_transaction(&self) -> BoxFuture<'_, ()>;

    fn commit_transaction(&self) -> BoxFuture<'_, ()>;

    fn rollback_transaction(&self) -> BoxFuture<'_, ()>;
}

/// A target that accepts and discards every batch.
///
/// Logs what it would have written; useful for dry runs.
#[derive(Clone, Default)]
pub struct NoOpTarget;

impl Target for NoOpTarget {
    fn name(&self) -> &str {
        "noop"
    }

    fn inject<'a>(&'a self, batch: &'a [BatchItem], overwrite: bool) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tracing::debug!(
                items = batch.len(),
                overwrite,
                "NoOp: would inject batch"
            );
            Ok(())
        })
    }
}
