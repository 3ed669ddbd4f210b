// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! History ledgers: which (source, window) pairs have been processed.
//!
//! Two implementations of [`History`]:
//!
//! - [`MemoryHistory`]: process-local, for tests and one-shot runs
//! - [`SqliteHistory`]: durable, backed by SQLite
//!
//! # Transaction Semantics
//!
//! Both ledgers stage entries added inside a transaction and only make
//! them visible on commit; rollback discards them. `exists` only sees
//! committed entries. The SQLite ledger writes staged entries in one SQL
//! transaction at commit time, so no write lock is held while a phase is
//! extracting and injecting.
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when the database is
//! contended (e.g. two pipelines sharing one ledger). Writes are retried
//! with capped exponential backoff.
//!
//! # Schema
//!
//! ```text
//! entries(id, start_day, end_day, pushed, recorded_at)
//! entry_sources(entry_id → entries.id, source_id)
//! ```
//!
//! Days are stored as `num_days_from_ce()` integers so range comparisons
//! hold across every year chrono can represent.

use crate::adapter::{AdapterError, AdapterResult, BoxFuture, History};
use crate::config::HistoryConfig;
use crate::error::{EngineError, Result};
use crate::window::DateWindow;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for SQLite busy retry behavior
const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// One completed phase as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sources: Vec<String>,
    pub window: DateWindow,
    /// Pushed count reported by the phase.
    pub count: u64,
    /// Unix timestamp (milliseconds) when the entry was added.
    pub recorded_at: i64,
}

impl HistoryEntry {
    pub fn new(sources: &[String], window: DateWindow, count: u64) -> Self {
        Self {
            sources: sources.to_vec(),
            window,
            count,
            recorded_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Check whether this entry covers `source_id` on any day of `window`.
    pub fn covers(&self, source_id: &str, window: &DateWindow) -> bool {
        self.window.overlaps(window) && self.sources.iter().any(|s| s == source_id)
    }
}

/// Committed entries plus the entries staged by an open transaction.
#[derive(Debug, Default)]
struct Ledger {
    entries: Vec<HistoryEntry>,
    staged: Option<Vec<HistoryEntry>>,
}

impl Ledger {
    fn start(&mut self) -> AdapterResult<()> {
        if self.staged.is_some() {
            return Err(AdapterError::new("history transaction already in progress"));
        }
        self.staged = Some(Vec::new());
        Ok(())
    }

    fn add(&mut self, entry: HistoryEntry) {
        match self.staged.as_mut() {
            Some(staged) => staged.push(entry),
            None => self.entries.push(entry),
        }
    }

    fn take_staged(&mut self) -> AdapterResult<Vec<HistoryEntry>> {
        self.staged
            .take()
            .ok_or_else(|| AdapterError::new("no history transaction in progress"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MemoryHistory
// ═══════════════════════════════════════════════════════════════════════════════

/// In-process ledger. Lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    ledger: Mutex<Ledger>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-populated with committed entries.
    pub fn with_entries(entries: Vec<HistoryEntry>) -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                entries,
                staged: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Committed entries, oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.lock().entries.clone()
    }

    /// Check if a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.lock().staged.is_some()
    }
}

impl History for MemoryHistory {
    fn exists<'a>(&'a self, source_id: &'a str, window: DateWindow) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            Ok(self
                .lock()
                .entries
                .iter()
                .any(|e| e.covers(source_id, &window)))
        })
    }

    fn add_entry<'a>(
        &'a self,
        source_ids: &'a [String],
        window: DateWindow,
        count: u64,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.lock().add(HistoryEntry::new(source_ids, window, count));
            Ok(())
        })
    }

    fn start_transaction(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.lock().start() })
    }

    fn commit_transaction(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut ledger = self.lock();
            let staged = ledger.take_staged()?;
            ledger.entries.extend(staged);
            Ok(())
        })
    }

    fn rollback_transaction(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(staged) = self.lock().staged.take() {
                debug!(discarded = staged.len(), "History rollback");
            }
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SqliteHistory
// ═══════════════════════════════════════════════════════════════════════════════

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    mut f: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts,
                        "SQLite operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => {
                if is_sqlite_busy_error(&e) {
                    warn!(
                        operation = operation_name,
                        attempts,
                        "SQLite busy, max retries exceeded"
                    );
                }
                return Err(e);
            }
        }
    }
}

fn store_error(operation: &str, e: sqlx::Error) -> AdapterError {
    AdapterError::new(format!("history {} failed: {}", operation, e))
}

fn stored_day(days_from_ce: i32) -> Result<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days_from_ce)
        .ok_or_else(|| EngineError::History(format!("invalid stored day {}", days_from_ce)))
}

/// Durable ledger backed by SQLite.
pub struct SqliteHistory {
    pool: SqlitePool,
    ledger: Mutex<Ledger>,
    path: String,
}

impl SqliteHistory {
    /// Open (or create) the ledger at `path`.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let config = HistoryConfig {
            sqlite_path: path.as_ref().to_string_lossy().to_string(),
            ..Default::default()
        };
        Self::from_config(&config).await
    }

    /// Open the ledger described by `config`. `":memory:"` opens a
    /// private in-memory database.
    pub async fn from_config(config: &HistoryConfig) -> Result<Self> {
        let path = config.sqlite_path.clone();
        info!(path = %path, "Initializing history store");

        let in_memory = path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", path)
        };

        let mut options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| EngineError::Config(format!("Invalid SQLite path: {}", e)))?
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true);
        if config.wal_mode && !in_memory {
            options = options.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        }

        // Every in-memory connection is its own database, so keep exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 2 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                start_day INTEGER NOT NULL,
                end_day INTEGER NOT NULL,
                pushed INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entry_sources (
                entry_id INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
                source_id TEXT NOT NULL,
                PRIMARY KEY (entry_id, source_id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entry_sources_source ON entry_sources(source_id)")
            .execute(&pool)
            .await?;

        Ok(Self {
            pool,
            ledger: Mutex::new(Ledger::default()),
            path,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check for a committed entry covering `source_id` on any day of `window`.
    pub async fn covers(&self, source_id: &str, window: &DateWindow) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM entries e
            JOIN entry_sources s ON s.entry_id = e.id
            WHERE s.source_id = ? AND e.start_day <= ? AND e.end_day >= ?
            "#,
        )
        .bind(source_id)
        .bind(window.end().num_days_from_ce())
        .bind(window.start().num_days_from_ce())
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Committed entries, oldest first.
    pub async fn entries(&self) -> Result<Vec<HistoryEntry>> {
        let rows: Vec<(i64, i32, i32, i64, i64)> = sqlx::query_as(
            "SELECT id, start_day, end_day, pushed, recorded_at FROM entries ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, start, end, pushed, recorded_at) in rows {
            let sources: Vec<(String,)> = sqlx::query_as(
                "SELECT source_id FROM entry_sources WHERE entry_id = ? ORDER BY rowid",
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

            entries.push(HistoryEntry {
                sources: sources.into_iter().map(|(s,)| s).collect(),
                window: DateWindow::new(stored_day(start)?, stored_day(end)?)?,
                count: pushed.max(0) as u64,
                recorded_at,
            });
        }
        Ok(entries)
    }

    /// Write entries in one SQL transaction.
    async fn write_entries(&self, entries: &[HistoryEntry]) -> std::result::Result<(), sqlx::Error> {
        let pool = &self.pool;
        execute_with_retry("history_commit", || async move {
            let mut tx = pool.begin().await?;
            for entry in entries {
                let result = sqlx::query(
                    "INSERT INTO entries (start_day, end_day, pushed, recorded_at) VALUES (?, ?, ?, ?)",
                )
                .bind(entry.window.start().num_days_from_ce())
                .bind(entry.window.end().num_days_from_ce())
                .bind(entry.count as i64)
                .bind(entry.recorded_at)
                .execute(&mut *tx)
                .await?;
                let entry_id = result.last_insert_rowid();

                for source_id in &entry.sources {
                    sqlx::query(
                        "INSERT OR IGNORE INTO entry_sources (entry_id, source_id) VALUES (?, ?)",
                    )
                    .bind(entry_id)
                    .bind(source_id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            tx.commit().await
        })
        .await
    }

    /// Get database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Force flush WAL to main database (for clean shutdown).
    pub async fn checkpoint(&self) -> Result<()> {
        let pool = &self.pool;

        execute_with_retry("history_checkpoint", || async move {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(pool)
                .await
        })
        .await?;

        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Close the connection pool gracefully.
    ///
    /// Discards any open transaction and checkpoints WAL before closing.
    pub async fn close(&self) {
        if let Some(staged) = self.lock().staged.take() {
            warn!(discarded = staged.len(), "Closing history with an open transaction");
        }

        if let Err(e) = self.checkpoint().await {
            warn!(error = %e, "Failed to checkpoint WAL on close");
        }
        self.pool.close().await;
        info!("History store closed");
    }
}

impl History for SqliteHistory {
    fn exists<'a>(&'a self, source_id: &'a str, window: DateWindow) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.covers(source_id, &window)
                .await
                .map_err(|e| AdapterError::new(e.to_string()))
        })
    }

    fn add_entry<'a>(
        &'a self,
        source_ids: &'a [String],
        window: DateWindow,
        count: u64,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let entry = HistoryEntry::new(source_ids, window, count);
            let in_transaction = {
                let mut ledger = self.lock();
                if ledger.staged.is_some() {
                    ledger.add(entry.clone());
                    true
                } else {
                    false
                }
            };
            if !in_transaction {
                self.write_entries(std::slice::from_ref(&entry))
                    .await
                    .map_err(|e| store_error("add_entry", e))?;
            }
            Ok(())
        })
    }

    fn start_transaction(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.lock().start() })
    }

    fn commit_transaction(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let staged = self.lock().take_staged()?;
            if staged.is_empty() {
                return Ok(());
            }
            self.write_entries(&staged)
                .await
                .map_err(|e| store_error("commit", e))?;
            debug!(entries = staged.len(), "History committed");
            Ok(())
        })
    }

    fn rollback_transaction(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(staged) = self.lock().staged.take() {
                debug!(discarded = staged.len(), "History rollback");
            }
            Ok(())
        })
    }
}
