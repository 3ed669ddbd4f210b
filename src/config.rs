// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the aggregation engine.
//!
//! The embedding application owns file and command-line parsing; this
//! module defines what the engine consumes. Every field has a default, so
//! configs can be deserialized from partial YAML/JSON documents.
//!
//! # Configuration Structure
//!
//! ```text
//! EngineConfig
//! ├── batch_size: usize          # Max records per inject call (100)
//! ├── force: bool                # Skip idempotency guard, overwrite targets
//! ├── retries: usize             # Max attempts per phase / purge pass (3)
//! ├── retry_delay: String        # First backoff delay ("0s")
//! ├── retry_max_delay: String    # Backoff ceiling ("30s")
//! ├── phases: Option<Vec<String>> # Run only these phases
//! ├── count_end_markers: bool    # Legacy history count (true)
//! └── history: HistoryConfig     # SQLite ledger settings
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! batch_size: 500
//! retries: 5
//! retry_delay: "2s"
//! phases: ["downloads", "ratings"]
//!
//! history:
//!   sqlite_path: "/var/lib/aggregator/history.db"
//! ```

use crate::error::{EngineError, Result};
use crate::resilience::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// EngineConfig: consumed by Engine::new()
// ═══════════════════════════════════════════════════════════════════════════════

/// Tunables for phase execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of records handed to each target per inject call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Run even if the history already covers the window.
    /// Also passed to targets as `overwrite`.
    #[serde(default)]
    pub force: bool,

    /// Maximum attempts for each phase and for the purge pass.
    #[serde(default = "default_retries")]
    pub retries: usize,

    /// Delay before the second attempt, as a duration string (e.g. "500ms").
    /// Doubles on every further attempt.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: String,

    /// Ceiling for the retry delay.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay: String,

    /// Names of the phases to run. `None` runs all of them.
    /// Configured phase order is kept regardless of the order listed here.
    #[serde(default)]
    pub phases: Option<Vec<String>>,

    /// Add one to the pushed count for every consumed `End` marker, as
    /// older history entries did.
    #[serde(default = "default_true")]
    pub count_end_markers: bool,

    #[serde(default)]
    pub history: HistoryConfig,
}

fn default_batch_size() -> usize {
    100
}

fn default_retries() -> usize {
    3
}

fn default_retry_delay() -> String {
    "0s".to_string()
}

fn default_retry_max_delay() -> String {
    "30s".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            force: false,
            retries: default_retries(),
            retry_delay: default_retry_delay(),
            retry_max_delay: default_retry_max_delay(),
            phases: None,
            count_end_markers: true,
            history: HistoryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Config with an in-memory history path and no retry delay.
    pub fn for_testing() -> Self {
        Self {
            history: HistoryConfig::in_memory(),
            ..Default::default()
        }
    }

    /// Check the values the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EngineError::Config("batch_size must be > 0".to_string()));
        }
        if self.retries == 0 {
            return Err(EngineError::Config("retries must be > 0".to_string()));
        }
        parse_duration("retry_delay", &self.retry_delay)?;
        parse_duration("retry_max_delay", &self.retry_max_delay)?;
        if let Some(phases) = &self.phases {
            if phases.is_empty() {
                return Err(EngineError::Config(
                    "phases must name at least one phase when set".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Parse `retry_delay`, falling back to no delay on invalid input.
    pub fn retry_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.retry_delay).unwrap_or(Duration::ZERO)
    }

    /// Parse `retry_max_delay`, falling back to 30 seconds on invalid input.
    pub fn retry_max_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.retry_max_delay).unwrap_or(Duration::from_secs(30))
    }

    /// Build the retry policy wrapping phases and the purge pass.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retries.max(1),
            initial_delay: self.retry_delay_duration(),
            max_delay: self.retry_max_delay_duration(),
            backoff_factor: 2.0,
        }
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| EngineError::Config(format!("invalid {} {:?}: {}", field, value, e)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HistoryConfig: SQLite ledger
// ═══════════════════════════════════════════════════════════════════════════════

/// Settings for [`SqliteHistory`](crate::history::SqliteHistory).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Path to the SQLite database file.
    pub sqlite_path: String,

    /// Whether to use WAL mode for SQLite (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "aggregator_history.db".to_string(),
            wal_mode: true,
        }
    }
}

impl HistoryConfig {
    /// Create an in-memory config for testing.
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: ":memory:".to_string(),
            wal_mode: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
