// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persisted applier progress.
//!
//! Each applier records the LSA of the last source commit it applied. On
//! start (and after every restart) the applier loads it once and skips any
//! transaction at or below it.
//!
//! # Immediate Writes
//!
//! Unlike a read cursor, progress is never debounced: `save()` returns only
//! once the row is on disk. The target has already committed the data by
//! then, so losing the write would replay a committed transaction. Every
//! connection runs with `synchronous = FULL`, so a WAL-mode commit is
//! fsynced before `save()` returns and the stored LSA never moves backwards
//! after a power loss.
//!
//! ```text
//! send_batch([.., CatalogProgress(L)]) → commit() → save(L)
//!                                       (crash here = replay, skipped by the
//!                                        target's CatalogProgress check)
//! ```
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when the database is
//! contended. We handle this with:
//! - Automatic retry with exponential backoff
//! - Configurable max retries (default 5)

use crate::config::ProgressConfig;
use crate::error::{ApplierError, Result};
use crate::lsa::Lsa;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for SQLite busy retry behavior
const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// Boxed future returned by progress stores.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Last applied position of one applier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub applier_id: String,
    pub committed_lsa: Lsa,
}

impl Progress {
    pub fn new(applier_id: impl Into<String>, committed_lsa: Lsa) -> Self {
        Self {
            applier_id: applier_id.into(),
            committed_lsa,
        }
    }

    /// Progress of an applier that has never committed.
    pub fn initial(applier_id: impl Into<String>) -> Self {
        Self::new(applier_id, Lsa::NULL)
    }
}

/// Trait defining what we need from the progress store.
pub trait ProgressStore: Send + Sync + 'static {
    /// Load the progress of `applier_id`; NULL LSA if none was saved.
    fn load<'a>(&'a self, applier_id: &'a str) -> StoreFuture<'a, Progress>;

    /// Durably record `progress`, replacing the previous value.
    fn save<'a>(&'a self, progress: &'a Progress) -> StoreFuture<'a, ()>;
}

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
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
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
                crate::metrics::progress_retries_total(operation_name);
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

/// Progress store backed by SQLite.
pub struct SqliteProgressStore {
    pool: SqlitePool,
    path: String,
    wal_mode: bool,
}

impl SqliteProgressStore {
    /// Open (or create) a store at `path` in WAL mode.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let config = ProgressConfig {
            sqlite_path: path.as_ref().to_string_lossy().to_string(),
            wal_mode: true,
        };
        Self::from_config(&config).await
    }

    /// Open the store described by `config`. `":memory:"` gives a private
    /// in-memory database.
    pub async fn from_config(config: &ProgressConfig) -> Result<Self> {
        let path_str = config.sqlite_path.clone();
        info!(path = %path_str, "Initializing progress store");

        let in_memory = path_str == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", path_str)
        };
        let mut options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| ApplierError::Config(format!("Invalid SQLite path: {}", e)))?
            .synchronous(SqliteSynchronous::Full)
            .create_if_missing(true);
        let wal_mode = config.wal_mode && !in_memory;
        if wal_mode {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to :memory: opens its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 2 })
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS applier_progress (
                applier_id TEXT PRIMARY KEY,
                page_id INTEGER NOT NULL,
                page_offset INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            path: path_str,
            wal_mode,
        })
    }

    async fn load_inner(&self, applier_id: &str) -> Result<Progress> {
        let pool = &self.pool;
        let row: Option<(i64, i64)> = execute_with_retry("progress_load", || async {
            sqlx::query_as(
                "SELECT page_id, page_offset FROM applier_progress WHERE applier_id = ?",
            )
            .bind(applier_id)
            .fetch_optional(pool)
            .await
        })
        .await?;

        let committed_lsa = match row {
            Some((page_id, offset)) => stored_lsa(applier_id, page_id, offset)?,
            None => Lsa::NULL,
        };
        debug!(applier_id = %applier_id, committed_lsa = %committed_lsa, "Loaded progress");
        Ok(Progress::new(applier_id, committed_lsa))
    }

    async fn save_inner(&self, progress: &Progress) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let pool = &self.pool;

        let result = execute_with_retry("progress_save", || async {
            sqlx::query(
                r#"
                INSERT INTO applier_progress (applier_id, page_id, page_offset, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(applier_id) DO UPDATE SET
                    page_id = excluded.page_id,
                    page_offset = excluded.page_offset,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&progress.applier_id)
            .bind(progress.committed_lsa.page_id)
            .bind(progress.committed_lsa.offset as i64)
            .bind(now)
            .execute(pool)
            .await
        })
        .await;

        result?;
        debug!(
            applier_id = %progress.applier_id,
            committed_lsa = %progress.committed_lsa,
            "Progress saved"
        );
        Ok(())
    }

    /// Delete the progress of an applier (e.g., when its replica is dropped).
    pub async fn delete(&self, applier_id: &str) -> Result<()> {
        let pool = &self.pool;
        execute_with_retry("progress_delete", || async {
            sqlx::query("DELETE FROM applier_progress WHERE applier_id = ?")
                .bind(applier_id)
                .execute(pool)
                .await
        })
        .await?;

        info!(applier_id = %applier_id, "Deleted progress");
        Ok(())
    }

    /// All stored positions (for metrics/debugging).
    pub async fn get_all(&self) -> Result<HashMap<String, Lsa>> {
        let rows: Vec<(String, i64, i64)> =
            sqlx::query_as("SELECT applier_id, page_id, page_offset FROM applier_progress")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(id, page_id, offset)| {
                let lsa = stored_lsa(&id, page_id, offset)?;
                Ok((id, lsa))
            })
            .collect()
    }

    /// Get database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Force flush WAL to main database (for clean shutdown).
    pub async fn checkpoint(&self) -> Result<()> {
        if !self.wal_mode {
            return Ok(());
        }
        let pool = &self.pool;
        execute_with_retry("progress_checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(pool)
                .await
        })
        .await?;

        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Checkpoint and close the connection pool.
    pub async fn close(&self) {
        if let Err(e) = self.checkpoint().await {
            warn!(error = %e, "Failed to checkpoint WAL on close");
        }
        self.pool.close().await;
        info!("Progress store closed");
    }
}

/// Rebuild an LSA from its stored columns, rejecting an offset that does
/// not fit a page offset.
fn stored_lsa(applier_id: &str, page_id: i64, offset: i64) -> Result<Lsa> {
    let offset = i16::try_from(offset).map_err(|_| {
        ApplierError::Internal(format!(
            "stored offset {} for {} out of range",
            offset, applier_id
        ))
    })?;
    Ok(Lsa::new(page_id, offset))
}

impl ProgressStore for SqliteProgressStore {
    fn load<'a>(&'a self, applier_id: &'a str) -> StoreFuture<'a, Progress> {
        Box::pin(self.load_inner(applier_id))
    }

    fn save<'a>(&'a self, progress: &'a Progress) -> StoreFuture<'a, ()> {
        Box::pin(self.save_inner(progress))
    }
}

/// Progress store kept in memory. Lost on restart of the process.
#[derive(Default)]
pub struct MemoryProgressStore {
    positions: Mutex<HashMap<String, Lsa>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `applier_id` already at `lsa`.
    pub fn with_progress(applier_id: &str, lsa: Lsa) -> Self {
        let store = Self::default();
        store.positions.lock().insert(applier_id.to_string(), lsa);
        store
    }

    /// Make every later `save()` fail with a transient error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn get(&self, applier_id: &str) -> Option<Lsa> {
        self.positions.lock().get(applier_id).copied()
    }
}

impl ProgressStore for MemoryProgressStore {
    fn load<'a>(&'a self, applier_id: &'a str) -> StoreFuture<'a, Progress> {
        let lsa = self.get(applier_id).unwrap_or(Lsa::NULL);
        Box::pin(async move { Ok(Progress::new(applier_id, lsa)) })
    }

    fn save<'a>(&'a self, progress: &'a Progress) -> StoreFuture<'a, ()> {
        let result = if self.fail_saves.load(Ordering::SeqCst) {
            Err(ApplierError::transient("progress_save", "store unavailable"))
        } else {
            self.positions
                .lock()
                .insert(progress.applier_id.clone(), progress.committed_lsa);
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        Box::pin(async move { result })
    }
}
