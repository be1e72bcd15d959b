//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Items applied per kind
//! - Batch flushes (size, kind, latency)
//! - Commits, skipped transactions and progress persists
//! - Restarts and decode errors
//! - Applier state and committed position
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `log_applier_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use log_applier::metrics;
//! use std::time::Duration;
//!
//! // After a commit-bound flush
//! metrics::record_batch_flush("replica-1", "commit", 12, Duration::from_millis(8));
//! metrics::record_commit("replica-1");
//! ```

use crate::lsa::Lsa;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record items handed to the target, by item kind.
pub fn record_items_applied(applier_id: &str, kind: &str, count: usize) {
    counter!(
        "log_applier_items_applied_total",
        "applier_id" => applier_id.to_string(),
        "kind" => kind.to_string()
    )
    .increment(count as u64);
}

/// Record a batch sent to the target.
///
/// `kind` is `commit` (sent then committed), `partial` (sent with autocommit
/// off) or `progress` (progress marker only).
pub fn record_batch_flush(applier_id: &str, kind: &str, size: usize, duration: Duration) {
    counter!(
        "log_applier_batch_flushes_total",
        "applier_id" => applier_id.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
    histogram!("log_applier_batch_size", "applier_id" => applier_id.to_string())
        .record(size as f64);
    histogram!(
        "log_applier_batch_flush_duration_seconds",
        "applier_id" => applier_id.to_string(),
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a failed flush.
pub fn record_batch_flush_error(applier_id: &str, kind: &str) {
    counter!(
        "log_applier_batch_flush_errors_total",
        "applier_id" => applier_id.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a committed source transaction.
pub fn record_commit(applier_id: &str) {
    counter!("log_applier_commits_total", "applier_id" => applier_id.to_string()).increment(1);
}

/// Record a descriptor skipped because its position was already applied.
pub fn record_skipped_transaction(applier_id: &str) {
    counter!("log_applier_skipped_transactions_total", "applier_id" => applier_id.to_string())
        .increment(1);
}

/// Record a transaction that ended in ABORT.
pub fn record_aborted_transaction(applier_id: &str) {
    counter!("log_applier_aborted_transactions_total", "applier_id" => applier_id.to_string())
        .increment(1);
}

/// Record a restart of the apply loop.
pub fn record_restart(applier_id: &str, error_class: &str) {
    counter!(
        "log_applier_restarts_total",
        "applier_id" => applier_id.to_string(),
        "error_class" => error_class.to_string()
    )
    .increment(1);
}

/// Record a record that could not be turned into an item.
pub fn record_decode_error(reason: &str) {
    counter!("log_applier_decode_errors_total", "reason" => reason.to_string()).increment(1);
}

/// Record a progress save.
pub fn record_progress_persist(applier_id: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "log_applier_progress_persists_total",
        "applier_id" => applier_id.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record progress store SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn progress_retries_total(operation: &str) {
    counter!("log_applier_progress_retries_total", "operation" => operation.to_string())
        .increment(1);
}

/// Record a group-id toggle sent to the target.
pub fn record_gid_update(applier_id: &str, enabled: bool) {
    let action = if enabled { "enable" } else { "disable" };
    counter!(
        "log_applier_gid_updates_total",
        "applier_id" => applier_id.to_string(),
        "action" => action
    )
    .increment(1);
}

/// Set applier state gauge.
pub fn set_applier_state(applier_id: &str, state: &str) {
    let value = match state {
        "Init" => 0.0,
        "Running" => 1.0,
        "Dead" => 2.0,
        _ => -1.0,
    };
    gauge!("log_applier_state", "applier_id" => applier_id.to_string()).set(value);
}

/// Set the committed position gauges.
pub fn set_committed_lsa(applier_id: &str, lsa: Lsa) {
    gauge!("log_applier_committed_page_id", "applier_id" => applier_id.to_string())
        .set(lsa.page_id as f64);
    gauge!("log_applier_committed_offset", "applier_id" => applier_id.to_string())
        .set(lsa.offset as f64);
}

/// Record how long one transaction took from first record to commit.
pub fn record_transaction_latency(applier_id: &str, records: usize, duration: Duration) {
    histogram!(
        "log_applier_transaction_duration_seconds",
        "applier_id" => applier_id.to_string()
    )
    .record(duration.as_secs_f64());
    histogram!("log_applier_transaction_records", "applier_id" => applier_id.to_string())
        .record(records as f64);
}
