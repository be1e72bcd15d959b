//! Batch accumulator and transmitter.
//!
//! Collects the items of one source transaction in log order and sends them
//! to the target as a unit.
//!
//! # Design
//!
//! ```text
//! ItemTranslator ──▶ BatchAccumulator ──┬──▶ threshold reached (capacity - 1)
//!                    Vec<Item> (FIFO)   │      set_autocommit(false)
//!                                       │      send_batch(items)
//!                                       │      set_autocommit(true)
//!                                       │
//!                                       └──▶ immediate (commit boundary)
//!                                              send_batch(items)
//!                                              commit()
//! ```
//!
//! A flush either succeeds and clears the batch, or fails and leaves every
//! item in place. The threshold sits one below capacity so the commit marker
//! of the transaction always fits.

use crate::error::{ApplierError, Result};
use crate::item::{DataOp, ReplicationItem};
use crate::metrics;
use crate::target::TargetSink;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// How a batch is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushKind {
    /// Send, then commit the target transaction.
    Commit,
    /// Send inside the open target transaction, autocommit off.
    Partial,
}

impl FlushKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Partial => "partial",
        }
    }
}

/// Item counts of a sent batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemCounts {
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
    pub ddls: usize,
    pub progress: usize,
}

impl ItemCounts {
    fn add(&mut self, item: &ReplicationItem) {
        match item {
            ReplicationItem::Data(data) => match data.op {
                DataOp::Insert => self.inserts += 1,
                DataOp::Update => self.updates += 1,
                DataOp::Delete => self.deletes += 1,
            },
            ReplicationItem::Schema { .. } => self.ddls += 1,
            ReplicationItem::CatalogProgress { .. } => self.progress += 1,
            ReplicationItem::GidBitmapUpdate { .. } => {}
        }
    }
}

/// Result of a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchResult {
    pub kind: FlushKind,
    /// Items sent; zero when the batch was empty.
    pub total: usize,
    pub counts: ItemCounts,
}

/// Check the item mix of a batch about to be sent.
///
/// A batch holding a schema item must be exactly `[Schema, CatalogProgress]`;
/// a batch holding only progress markers must hold exactly one. Group-id
/// toggles are never batched.
pub fn validate_composition(items: &[ReplicationItem]) -> Result<()> {
    if items
        .iter()
        .any(|i| matches!(i, ReplicationItem::GidBitmapUpdate { .. }))
    {
        return Err(ApplierError::BatchComposition(
            "group-id bitmap updates are applied immediately, not batched".into(),
        ));
    }

    if items.iter().any(ReplicationItem::is_schema) {
        let ok = items.len() == 2 && items[0].is_schema() && items[1].is_progress();
        if !ok {
            return Err(ApplierError::BatchComposition(format!(
                "schema batch must be [schema, progress], got [{}]",
                kinds(items)
            )));
        }
        return Ok(());
    }

    if !items.is_empty() && items.iter().all(ReplicationItem::is_progress) && items.len() != 1 {
        return Err(ApplierError::BatchComposition(format!(
            "progress-only batch must hold one item, got {}",
            items.len()
        )));
    }
    Ok(())
}

fn kinds(items: &[ReplicationItem]) -> String {
    items
        .iter()
        .map(ReplicationItem::kind)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Bounded FIFO of pending items, flushed as a unit.
pub struct BatchAccumulator<T: TargetSink> {
    items: Vec<ReplicationItem>,
    capacity: usize,
    target: Arc<T>,
    applier_id: String,
}

impl<T: TargetSink> BatchAccumulator<T> {
    /// `capacity` must be at least 2 (checked by config validation).
    pub fn new(target: Arc<T>, applier_id: String, capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            target,
            applier_id,
        }
    }

    /// Append an item at the tail.
    pub fn add(&mut self, item: ReplicationItem) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[ReplicationItem] {
        &self.items
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Item count that triggers a partial flush.
    pub fn threshold(&self) -> usize {
        self.capacity.saturating_sub(1).max(1)
    }

    /// Flush if `immediate` or if the threshold is reached.
    ///
    /// Returns `None` when nothing was sent.
    pub async fn maybe_flush(&mut self, immediate: bool) -> Result<Option<BatchResult>> {
        if immediate {
            return self.flush(FlushKind::Commit).await.map(Some);
        }
        if self.items.len() >= self.threshold() {
            return self.flush(FlushKind::Partial).await.map(Some);
        }
        Ok(None)
    }

    /// Send every pending item in one request.
    ///
    /// On failure the batch is left intact.
    #[instrument(skip(self), fields(applier_id = %self.applier_id, size = self.items.len()))]
    pub async fn flush(&mut self, kind: FlushKind) -> Result<BatchResult> {
        if self.items.is_empty() {
            return Ok(BatchResult {
                kind,
                total: 0,
                counts: ItemCounts::default(),
            });
        }
        validate_composition(&self.items)?;

        let label = self.flush_label(kind);
        let start = Instant::now();
        let sent = match kind {
            FlushKind::Commit => self.send_and_commit().await,
            FlushKind::Partial => self.send_without_commit().await,
        };
        if let Err(e) = sent {
            warn!(
                applier_id = %self.applier_id,
                kind = label,
                size = self.items.len(),
                error = %e,
                "Batch flush failed"
            );
            metrics::record_batch_flush_error(&self.applier_id, label);
            return Err(e);
        }

        let mut counts = ItemCounts::default();
        for item in &self.items {
            counts.add(item);
        }
        let total = self.items.len();
        self.items.clear();

        metrics::record_batch_flush(&self.applier_id, label, total, start.elapsed());
        record_counts(&self.applier_id, &counts);
        debug!(
            applier_id = %self.applier_id,
            kind = label,
            total,
            "Batch flushed"
        );

        Ok(BatchResult { kind, total, counts })
    }

    /// Drop all pending items without sending them.
    pub fn discard(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        dropped
    }

    fn flush_label(&self, kind: FlushKind) -> &'static str {
        if self.items.iter().all(ReplicationItem::is_progress) {
            "progress"
        } else {
            kind.as_str()
        }
    }

    async fn send_and_commit(&self) -> Result<()> {
        self.target
            .send_batch(&self.items)
            .await
            .map_err(|e| ApplierError::target("send_batch", e))?;
        self.target
            .commit()
            .await
            .map_err(|e| ApplierError::target("commit", e))
    }

    async fn send_without_commit(&self) -> Result<()> {
        self.target
            .set_autocommit(false)
            .await
            .map_err(|e| ApplierError::target("set_autocommit", e))?;
        let sent = self
            .target
            .send_batch(&self.items)
            .await
            .map_err(|e| ApplierError::target("send_batch", e));
        let restored = self
            .target
            .set_autocommit(true)
            .await
            .map_err(|e| ApplierError::target("set_autocommit", e));
        sent?;
        restored
    }
}

fn record_counts(applier_id: &str, counts: &ItemCounts) {
    for (kind, count) in [
        ("insert", counts.inserts),
        ("update", counts.updates),
        ("delete", counts.deletes),
        ("ddl", counts.ddls),
        ("progress", counts.progress),
    ] {
        if count > 0 {
            metrics::record_items_applied(applier_id, kind, count);
        }
    }
}
