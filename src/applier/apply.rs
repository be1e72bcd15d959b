//! Apply loop: one task per target replica.
//!
//! The loop runs Running episodes until shutdown:
//! 1. Loads the persisted committed LSA
//! 2. Pops transaction descriptors (bounded wait)
//! 3. Walks each transaction's records forward until its COMMIT
//! 4. Batches items and flushes them, commit-bound at the end
//! 5. Persists the committed LSA after the target commit
//!
//! # Failure Handling
//!
//! Any error inside an episode rolls back the target's open transaction,
//! drops the pending batch and sends the loop back to Init. After a backoff
//! the next episode reloads progress and retries the descriptor that failed,
//! so every transaction is applied at least once and never past the
//! persisted position twice.
//!
//! # Graceful Shutdown
//!
//! The shutdown flag is checked before every record and every pop; the pop
//! and the restart backoff are raced against it with `tokio::select!`. A
//! decode or target call already in progress finishes first.

use super::types::{ApplierState, ApplierStats};
use crate::batch::{BatchAccumulator, BatchResult, FlushKind};
use crate::config::ShardSettings;
use crate::error::{ApplierError, Result};
use crate::item::{ItemTranslator, ReplicationItem};
use crate::lsa::Lsa;
use crate::metrics;
use crate::progress::{Progress, ProgressStore};
use crate::queue::{DescriptorQueue, TransactionDescriptor};
use crate::reconstruct::RecordReconstructor;
use crate::resilience::RetryConfig;
use crate::target::TargetSink;
use crate::wal::{LogReader, PageBuffer, RecordBody};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

/// Everything the loop owns. Built by [`super::Applier`], moved into the task.
pub(crate) struct ApplyLoop<P, Q, T, S>
where
    P: PageBuffer,
    Q: DescriptorQueue,
    T: TargetSink,
    S: ProgressStore,
{
    pub(crate) applier_id: String,
    pub(crate) buffer: Arc<P>,
    pub(crate) queue: Arc<Q>,
    pub(crate) target: Arc<T>,
    pub(crate) store: Arc<S>,
    pub(crate) batch: BatchAccumulator<T>,
    pub(crate) shard: ShardSettings,
    pub(crate) poll_timeout: Duration,
    pub(crate) retry: RetryConfig,
    pub(crate) state_tx: watch::Sender<ApplierState>,
    pub(crate) start_rx: watch::Receiver<bool>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
    pub(crate) snapshot: Arc<RwLock<Lsa>>,
    pub(crate) stats: Arc<ApplierStats>,

    /// Last committed LSA loaded or saved in this episode.
    pub(crate) progress: Lsa,
    /// Commit position of empty transactions not yet sent or saved.
    pub(crate) pending_marker: Option<Lsa>,
    /// Descriptor being applied; kept across a restart so it is retried.
    pub(crate) in_flight: Option<TransactionDescriptor>,
    pub(crate) consecutive_failures: usize,
}

impl<P, Q, T, S> ApplyLoop<P, Q, T, S>
where
    P: PageBuffer,
    Q: DescriptorQueue,
    T: TargetSink,
    S: ProgressStore,
{
    /// Run until shutdown or a non-restartable error.
    pub(crate) async fn run(mut self) {
        info!("Starting applier");

        loop {
            self.set_state(ApplierState::Init);

            if !self.wait_for_start().await {
                break;
            }

            if self.consecutive_failures > 0 {
                let delay = self.retry.delay_for_attempt(self.consecutive_failures);
                debug!(
                    delay_ms = delay.as_millis() as u64,
                    attempt = self.consecutive_failures,
                    "Backing off before restart"
                );
                if !self.sleep_or_shutdown(delay).await {
                    break;
                }
            }

            self.set_state(ApplierState::Running);

            match self.run_episode().await {
                Ok(()) => break,
                Err(ApplierError::Shutdown) => {
                    self.abandon_open_transaction().await;
                    break;
                }
                Err(e) if e.is_restartable() => {
                    let discarded = self.abandon_open_transaction().await;
                    self.consecutive_failures += 1;
                    self.stats.record_restart();
                    metrics::record_restart(&self.applier_id, e.class().as_str());
                    warn!(
                        error = %e,
                        error_class = e.class().as_str(),
                        committed_lsa = %self.progress,
                        discarded,
                        attempt = self.consecutive_failures,
                        "Apply failed, restarting from last committed position"
                    );
                }
                Err(e) => {
                    self.abandon_open_transaction().await;
                    error!(
                        error = %e,
                        committed_lsa = %self.progress,
                        "Apply failed with unrecoverable error"
                    );
                    break;
                }
            }
        }

        self.set_state(ApplierState::Dead);
        info!(committed_lsa = %self.progress, "Applier stopped");
    }

    /// One Running episode: load progress, then drain the queue.
    ///
    /// Returns `Ok` only when shutdown was requested.
    async fn run_episode(&mut self) -> Result<()> {
        let progress = self.store.load(&self.applier_id).await?;
        self.publish_progress(progress.committed_lsa).await;
        info!(committed_lsa = %self.progress, "Applier running");

        loop {
            if self.shutdown_requested() {
                return Ok(());
            }

            let next = match self.in_flight {
                Some(descriptor) => Some(descriptor),
                None => {
                    let timeout = self.poll_timeout;
                    tokio::select! {
                        biased;

                        changed = self.shutdown_rx.changed() => {
                            if changed.is_err() {
                                return Ok(());
                            }
                            continue;
                        }
                        descriptor = self.queue.pop(timeout) => descriptor,
                    }
                }
            };

            match next {
                Some(descriptor) => {
                    self.in_flight = Some(descriptor);
                    self.apply_transaction(descriptor).await?;
                    self.in_flight = None;
                }
                None => self.flush_pending_marker().await?,
            }
        }
    }

    /// Apply one committed transaction, or skip it if already applied.
    async fn apply_transaction(&mut self, descriptor: TransactionDescriptor) -> Result<()> {
        let tran_id = descriptor.transaction_id;
        let committed_lsa = descriptor.committed_lsa;

        if committed_lsa <= self.progress {
            debug!(
                tran_id,
                committed_lsa = %committed_lsa,
                progress = %self.progress,
                "Skipping transaction already applied"
            );
            self.stats.record_skipped();
            metrics::record_skipped_transaction(&self.applier_id);
            return Ok(());
        }

        let header = self.buffer.fetch_header()?;
        if committed_lsa >= header.eof_lsa {
            return Err(ApplierError::transient(
                "fetch_header",
                format!(
                    "commit {} of transaction {} is not below log end {}",
                    committed_lsa, tran_id, header.eof_lsa
                ),
            ));
        }

        let buffer = Arc::clone(&self.buffer);
        let shard = self.shard.clone();
        let reader = LogReader::new(buffer.as_ref(), header);
        let translator = ItemTranslator::new(RecordReconstructor::new(&reader, &shard));

        let started = Instant::now();
        let mut records = 0usize;
        let mut sent_partial = false;
        let mut lsa = descriptor.replication_start_lsa;

        loop {
            if self.shutdown_requested() {
                return Err(ApplierError::Shutdown);
            }
            if lsa > committed_lsa {
                return Err(ApplierError::inconsistent(
                    lsa,
                    format!(
                        "walked past commit {} of transaction {}",
                        committed_lsa, tran_id
                    ),
                ));
            }

            let record = reader.read_record(lsa)?;
            records += 1;

            if record.header.tran_id == tran_id {
                match &record.body {
                    RecordBody::Commit { .. } => {
                        if record.lsa != committed_lsa {
                            return Err(ApplierError::inconsistent(
                                record.lsa,
                                format!(
                                    "commit of transaction {} found here, expected at {}",
                                    tran_id, committed_lsa
                                ),
                            ));
                        }
                        self.commit_transaction(committed_lsa, sent_partial).await?;
                        break;
                    }
                    RecordBody::Abort { .. } => {
                        self.abort_transaction(tran_id, committed_lsa).await?;
                        break;
                    }
                    _ => {
                        if let Some(item) = translator.translate(&record)? {
                            sent_partial |= self.enqueue(item).await?;
                        }
                    }
                }
            }

            let next = record.header.forw_lsa;
            if next.is_null() || next <= lsa {
                return Err(ApplierError::inconsistent(
                    lsa,
                    format!(
                        "forward link {} breaks the chain before commit of transaction {}",
                        next, tran_id
                    ),
                ));
            }
            lsa = next;
        }

        metrics::record_transaction_latency(&self.applier_id, records, started.elapsed());
        Ok(())
    }

    /// Queue one item. Returns `true` if a partial batch went out.
    async fn enqueue(&mut self, item: ReplicationItem) -> Result<bool> {
        match item {
            ReplicationItem::Schema { .. } => {
                let flushed = self.flush_partial().await?;
                self.batch.add(item);
                self.batch.add(ReplicationItem::CatalogProgress {
                    committed_lsa: self.progress,
                });
                let result = self.batch.flush(FlushKind::Commit).await?;
                self.record_result(&result);
                Ok(flushed)
            }
            ReplicationItem::GidBitmapUpdate {
                migrator_id,
                group_id,
                enabled,
                apply_locally,
            } => {
                if !apply_locally {
                    debug!(migrator_id, group_id, enabled, "Group-id change already applied here");
                    return Ok(false);
                }
                let flushed = self.flush_partial().await?;
                self.target
                    .update_group_id(migrator_id, group_id, true, enabled)
                    .await
                    .map_err(|e| ApplierError::target("update_group_id", e))?;
                self.stats.record_gid_update();
                metrics::record_gid_update(&self.applier_id, enabled);
                info!(migrator_id, group_id, enabled, "Applied group-id change");
                Ok(flushed)
            }
            item => {
                self.batch.add(item);
                match self.batch.maybe_flush(false).await? {
                    Some(result) => {
                        self.record_result(&result);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
        }
    }

    /// Send whatever is pending without committing.
    async fn flush_partial(&mut self) -> Result<bool> {
        if self.batch.is_empty() {
            return Ok(false);
        }
        let result = self.batch.flush(FlushKind::Partial).await?;
        self.record_result(&result);
        Ok(true)
    }

    /// Close the transaction at `committed_lsa`.
    ///
    /// With nothing sent or pending the position becomes the pending marker
    /// instead of costing a target round trip.
    async fn commit_transaction(&mut self, committed_lsa: Lsa, sent_partial: bool) -> Result<()> {
        if self.batch.is_empty() && !sent_partial {
            debug!(committed_lsa = %committed_lsa, "Empty transaction, deferring progress");
            self.pending_marker = Some(committed_lsa);
            return Ok(());
        }

        self.batch.add(ReplicationItem::CatalogProgress { committed_lsa });
        let result = self.batch.flush(FlushKind::Commit).await?;
        self.record_result(&result);
        self.pending_marker = None;
        self.persist(committed_lsa).await?;

        self.consecutive_failures = 0;
        self.stats.record_commit();
        metrics::record_commit(&self.applier_id);
        debug!(committed_lsa = %committed_lsa, items = result.total, "Transaction committed");
        Ok(())
    }

    async fn abort_transaction(&mut self, tran_id: i32, committed_lsa: Lsa) -> Result<()> {
        self.target
            .rollback()
            .await
            .map_err(|e| ApplierError::target("rollback", e))?;
        let discarded = self.batch.discard();
        self.stats.record_aborted();
        metrics::record_aborted_transaction(&self.applier_id);
        warn!(tran_id, discarded, committed_lsa = %committed_lsa, "Transaction aborted in log");
        self.pending_marker = Some(committed_lsa);
        Ok(())
    }

    /// On an idle poll, send and save a deferred progress marker.
    async fn flush_pending_marker(&mut self) -> Result<()> {
        let Some(marker) = self.pending_marker else {
            return Ok(());
        };
        if marker <= self.progress {
            self.pending_marker = None;
            return Ok(());
        }

        self.batch.add(ReplicationItem::CatalogProgress {
            committed_lsa: marker,
        });
        let result = self.batch.flush(FlushKind::Commit).await?;
        self.record_result(&result);
        self.persist(marker).await?;
        self.pending_marker = None;
        self.consecutive_failures = 0;
        debug!(committed_lsa = %marker, "Flushed deferred progress");
        Ok(())
    }

    async fn persist(&mut self, committed_lsa: Lsa) -> Result<()> {
        let progress = Progress::new(self.applier_id.clone(), committed_lsa);
        match self.store.save(&progress).await {
            Ok(()) => {
                metrics::record_progress_persist(&self.applier_id, true);
                self.publish_progress(committed_lsa).await;
                Ok(())
            }
            Err(e) => {
                metrics::record_progress_persist(&self.applier_id, false);
                Err(e)
            }
        }
    }

    async fn publish_progress(&mut self, committed_lsa: Lsa) {
        self.progress = committed_lsa;
        *self.snapshot.write().await = committed_lsa;
        metrics::set_committed_lsa(&self.applier_id, committed_lsa);
    }

    fn record_result(&self, result: &BatchResult) {
        self.stats.record_flush(&result.counts);
    }

    /// Roll back the target and drop pending items. Returns the drop count.
    async fn abandon_open_transaction(&mut self) -> usize {
        let discarded = self.batch.discard();
        if let Err(e) = self.target.rollback().await {
            warn!(error = %e, "Rollback after failed apply also failed");
        }
        discarded
    }

    /// Wait for the latched start signal. `false` on shutdown.
    async fn wait_for_start(&mut self) -> bool {
        loop {
            if self.shutdown_requested() {
                return false;
            }
            if *self.start_rx.borrow() {
                return true;
            }
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                changed = self.start_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Sleep for `delay` unless shutdown comes first. `false` on shutdown.
    async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        return false;
                    }
                }
                _ = &mut sleep => return true,
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn set_state(&self, state: ApplierState) {
        self.state_tx.send_replace(state);
        metrics::set_applier_state(&self.applier_id, state.as_str());
    }
}
