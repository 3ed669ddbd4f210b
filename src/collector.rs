// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error accumulation point shared by extraction and injection tasks.

use crate::adapter::AdapterError;
use crate::error::{ErrorRecord, FailureKind};
use crate::metrics;
use std::sync::{Arc, Mutex, MutexGuard};

/// Thread-safe list of failures for the current phase attempt.
///
/// Empty if and only if the attempt has not failed. Reset at the start of
/// every attempt.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Mutex<Vec<ErrorRecord>>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ErrorRecord>> {
        self.errors.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a failure raised by `adapter`.
    pub fn push(&self, kind: FailureKind, adapter: impl Into<String>, error: AdapterError) {
        let record = ErrorRecord::new(kind, adapter, error);
        tracing::warn!(
            kind = %record.kind,
            adapter = %record.adapter,
            error = %record.error,
            "Phase task failed"
        );
        metrics::record_task_failure(record.kind, &record.adapter);
        self.lock().push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Copy of the collected failures.
    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.lock().clone()
    }

    pub fn reset(&self) {
        self.lock().clear();
    }
}
