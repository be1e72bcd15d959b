//! Mock TargetSink for testing.
//!
//! Records every call in order and models the target's open transaction:
//! sent items stay pending until commit, and rollback drops them.
//! Failures can be injected per operation.

use log_applier::item::ReplicationItem;
use log_applier::target::{BoxFuture, TargetError, TargetSink};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// A recorded call.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetCall {
    Send(Vec<ReplicationItem>),
    Commit,
    Rollback,
    SetAutocommit(bool),
    UpdateGroupId {
        migrator_id: i32,
        group_id: i32,
        is_slave: bool,
        enabled: bool,
    },
}

impl TargetCall {
    /// Short label, e.g. `send(3)` or `autocommit(false)`.
    pub fn label(&self) -> String {
        match self {
            TargetCall::Send(items) => format!("send({})", items.len()),
            TargetCall::Commit => "commit".to_string(),
            TargetCall::Rollback => "rollback".to_string(),
            TargetCall::SetAutocommit(on) => format!("autocommit({})", on),
            TargetCall::UpdateGroupId { group_id, enabled, .. } => {
                format!("gid({}, {})", group_id, enabled)
            }
        }
    }
}

#[derive(Default)]
struct TargetDb {
    open: Vec<ReplicationItem>,
    committed: Vec<ReplicationItem>,
}

/// Mock implementation of TargetSink that records all calls.
///
/// # Example
/// ```rust,ignore
/// let target = MockTarget::new();
/// target.fail_next_sends(2);
///
/// // Use in tests...
///
/// assert_eq!(target.labels().await, vec!["send(2)", "commit"]);
/// ```
#[derive(Default)]
pub struct MockTarget {
    calls: RwLock<Vec<TargetCall>>,
    db: RwLock<TargetDb>,
    /// Sends left to fail
    failing_sends: AtomicUsize,
    /// Commits left to fail
    failing_commits: AtomicUsize,
}

impl MockTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` send_batch() calls fail.
    pub fn fail_next_sends(&self, n: usize) {
        self.failing_sends.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` commit() calls fail.
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<TargetCall> {
        self.calls.read().await.clone()
    }

    pub async fn labels(&self) -> Vec<String> {
        self.calls.read().await.iter().map(TargetCall::label).collect()
    }

    /// Every batch sent, in order.
    pub async fn sent_batches(&self) -> Vec<Vec<ReplicationItem>> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|c| match c {
                TargetCall::Send(items) => Some(items.clone()),
                _ => None,
            })
            .collect()
    }

    /// Items that made it through a commit.
    pub async fn committed(&self) -> Vec<ReplicationItem> {
        self.db.read().await.committed.clone()
    }

    pub async fn committed_data_keys(&self) -> Vec<Vec<u8>> {
        self.committed()
            .await
            .into_iter()
            .filter_map(|item| match item {
                ReplicationItem::Data(data) => Some(data.key),
                _ => None,
            })
            .collect()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl TargetSink for MockTarget {
    fn send_batch<'a>(&'a self, items: &'a [ReplicationItem]) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.calls.write().await.push(TargetCall::Send(items.to_vec()));
            if Self::take_failure(&self.failing_sends) {
                return Err(TargetError("connection reset".into()));
            }
            self.db.write().await.open.extend_from_slice(items);
            Ok(())
        })
    }

    fn commit(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.calls.write().await.push(TargetCall::Commit);
            if Self::take_failure(&self.failing_commits) {
                return Err(TargetError("commit rejected".into()));
            }
            let mut db = self.db.write().await;
            let open = std::mem::take(&mut db.open);
            db.committed.extend(open);
            Ok(())
        })
    }

    fn rollback(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.calls.write().await.push(TargetCall::Rollback);
            self.db.write().await.open.clear();
            Ok(())
        })
    }

    fn set_autocommit(&self, enabled: bool) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.calls.write().await.push(TargetCall::SetAutocommit(enabled));
            Ok(())
        })
    }

    fn update_group_id(
        &self,
        migrator_id: i32,
        group_id: i32,
        is_slave: bool,
        enabled: bool,
    ) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.calls.write().await.push(TargetCall::UpdateGroupId {
                migrator_id,
                group_id,
                is_slave,
                enabled,
            });
            Ok(())
        })
    }
}
