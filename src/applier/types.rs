//! Applier state types.
//!
//! Defines the state machine for the applier lifecycle and the counters the
//! applier publishes while it runs.
//!
//! # State Transitions
//!
//! ```text
//!        start() (latched)
//! Init ───────────────────────→ Running
//!   ↑                              │
//!   │   (restartable error,        │
//!   │    after backoff)            │
//!   └──────────────────────────────┘
//!   │                              │
//!   │ shutdown()        shutdown() │ (or configuration error)
//!   ↓                              ↓
//!  Dead ←──────────────────────────┘
//! ```
//!
//! # State Descriptions
//!
//! - **Init**: Waiting for the start signal, or backing off after a failed
//!   episode. No target transaction is open.
//! - **Running**: Draining the descriptor queue and applying transactions.
//! - **Dead**: Terminal. The task has exited.

use crate::batch::ItemCounts;
use std::sync::atomic::{AtomicU64, Ordering};

/// State of one applier.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplierState {
    /// Idle until started, or between Running episodes.
    Init,

    /// Applying transactions.
    Running,

    /// Stopped for good.
    ///
    /// Entered on shutdown or a non-restartable error. Check logs for the
    /// reason.
    Dead,
}

impl ApplierState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplierState::Init => "Init",
            ApplierState::Running => "Running",
            ApplierState::Dead => "Dead",
        }
    }
}

impl std::fmt::Display for ApplierState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Running totals for one applier.
///
/// Updated only by the applier task; read by anyone holding the handle.
#[derive(Debug, Default)]
pub struct ApplierStats {
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    ddls: AtomicU64,
    commits: AtomicU64,
    gid_updates: AtomicU64,
    skipped: AtomicU64,
    aborted: AtomicU64,
    restarts: AtomicU64,
}

/// Point-in-time copy of [`ApplierStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub ddls: u64,
    pub commits: u64,
    pub gid_updates: u64,
    pub skipped: u64,
    pub aborted: u64,
    pub restarts: u64,
}

impl ApplierStats {
    pub(crate) fn record_flush(&self, counts: &ItemCounts) {
        self.inserts.fetch_add(counts.inserts as u64, Ordering::Relaxed);
        self.updates.fetch_add(counts.updates as u64, Ordering::Relaxed);
        self.deletes.fetch_add(counts.deletes as u64, Ordering::Relaxed);
        self.ddls.fetch_add(counts.ddls as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_gid_update(&self) {
        self.gid_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            ddls: self.ddls.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            gid_updates: self.gid_updates.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applier_state_display() {
        assert_eq!(ApplierState::Init.to_string(), "Init");
        assert_eq!(ApplierState::Running.to_string(), "Running");
        assert_eq!(ApplierState::Dead.to_string(), "Dead");
    }

    #[test]
    fn test_applier_state_copy() {
        let state = ApplierState::Dead;
        let copied: ApplierState = state;
        assert_eq!(state, copied);
        assert_ne!(ApplierState::Init, ApplierState::Running);
    }

    #[test]
    fn test_stats_accumulate() {
        let stats = ApplierStats::default();
        stats.record_flush(&ItemCounts {
            inserts: 2,
            updates: 1,
            deletes: 0,
            ddls: 1,
            progress: 1,
        });
        stats.record_flush(&ItemCounts {
            inserts: 1,
            ..Default::default()
        });
        stats.record_commit();
        stats.record_skipped();
        stats.record_restart();

        let snap = stats.snapshot();
        assert_eq!(snap.inserts, 3);
        assert_eq!(snap.updates, 1);
        assert_eq!(snap.ddls, 1);
        assert_eq!(snap.commits, 1);
        assert_eq!(snap.skipped, 1);
        assert_eq!(snap.restarts, 1);
        assert_eq!(snap.aborted, 0);
    }
}
