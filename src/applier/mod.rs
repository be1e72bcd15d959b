// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Applier state machine and handle.
//!
//! Ties together:
//! - The descriptor queue fed by the analyzer ([`crate::queue`])
//! - WAL access and record reconstruction ([`crate::wal`], [`crate::reconstruct`])
//! - Batching and transmission to the target ([`crate::batch`], [`crate::target`])
//! - Progress persistence ([`crate::progress`])
//!
//! # Architecture
//!
//! One [`Applier`] drives one target replica from one tokio task:
//! 1. [`spawn()`](Applier::spawn) starts the task in `Init`
//! 2. [`start()`](Applier::start) latches the start signal, the task goes `Running`
//! 3. Errors send the task back to `Init`, and it restarts by itself after a backoff
//! 4. [`shutdown()`](Applier::shutdown) stops the task, which ends in `Dead`
//!
//! Several appliers may share a page buffer; each has its own queue,
//! target and progress row.

mod apply;
mod types;

pub use types::{ApplierState, ApplierStats, StatsSnapshot};

use crate::batch::BatchAccumulator;
use crate::config::ApplierConfig;
use crate::error::{ApplierError, Result};
use crate::lsa::Lsa;
use crate::metrics;
use crate::progress::ProgressStore;
use crate::queue::DescriptorQueue;
use crate::target::TargetSink;
use crate::wal::PageBuffer;
use apply::ApplyLoop;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

/// How long [`Applier::shutdown()`] waits for an in-flight decode or RPC.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to one applier.
///
/// # Example
///
/// ```rust,no_run
/// use log_applier::applier::Applier;
/// use log_applier::config::ApplierConfig;
/// use log_applier::progress::MemoryProgressStore;
/// use log_applier::queue::ChannelQueue;
/// use log_applier::target::NoOpTarget;
/// use log_applier::wal::LogBuilder;
/// use std::sync::Arc;
///
/// # async fn example() -> log_applier::error::Result<()> {
/// let config = ApplierConfig::for_testing("replica-1");
/// let buffer = Arc::new(LogBuilder::new(4096, 0).build());
/// let (sender, queue) = ChannelQueue::bounded(config.settings.queue.capacity);
///
/// let mut applier = Applier::new(
///     config,
///     buffer,
///     Arc::new(queue),
///     Arc::new(NoOpTarget),
///     Arc::new(MemoryProgressStore::new()),
/// )?;
/// applier.spawn()?;
/// applier.start();
/// // ... analyzer pushes descriptors through `sender` ...
/// # drop(sender);
/// applier.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Applier<P, Q, T, S>
where
    P: PageBuffer,
    Q: DescriptorQueue,
    T: TargetSink,
    S: ProgressStore,
{
    applier_id: String,

    /// Applier state (broadcast to watchers)
    state_tx: watch::Sender<ApplierState>,

    /// Applier state receiver (for internal use)
    state_rx: watch::Receiver<ApplierState>,

    /// Latched start signal
    start_tx: watch::Sender<bool>,

    /// Shutdown signal sender
    shutdown_tx: watch::Sender<bool>,

    /// Last committed LSA seen by the task
    snapshot: Arc<RwLock<Lsa>>,

    stats: Arc<ApplierStats>,

    /// The loop, until it is moved into its task
    worker: Option<ApplyLoop<P, Q, T, S>>,

    handle: Option<JoinHandle<()>>,
}

impl<P, Q, T, S> Applier<P, Q, T, S>
where
    P: PageBuffer,
    Q: DescriptorQueue,
    T: TargetSink,
    S: ProgressStore,
{
    /// Create an applier in `Init`.
    ///
    /// Fails if the configuration does not validate.
    pub fn new(
        config: ApplierConfig,
        buffer: Arc<P>,
        queue: Arc<Q>,
        target: Arc<T>,
        store: Arc<S>,
    ) -> Result<Self> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(ApplierState::Init);
        let (start_tx, start_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let snapshot = Arc::new(RwLock::new(Lsa::NULL));
        let stats = Arc::new(ApplierStats::default());

        let settings = &config.settings;
        let batch = BatchAccumulator::new(
            Arc::clone(&target),
            config.applier_id.clone(),
            settings.batch.capacity,
        );

        let worker = ApplyLoop {
            applier_id: config.applier_id.clone(),
            buffer,
            queue,
            target,
            store,
            batch,
            shard: settings.shard.clone(),
            poll_timeout: settings.queue.poll_timeout_duration(),
            retry: settings.restart.retry_config(),
            state_tx: state_tx.clone(),
            start_rx,
            shutdown_rx,
            snapshot: Arc::clone(&snapshot),
            stats: Arc::clone(&stats),
            progress: Lsa::NULL,
            pending_marker: None,
            in_flight: None,
            consecutive_failures: 0,
        };

        metrics::set_applier_state(&config.applier_id, ApplierState::Init.as_str());

        Ok(Self {
            applier_id: config.applier_id,
            state_tx,
            state_rx,
            start_tx,
            shutdown_tx,
            snapshot,
            stats,
            worker: Some(worker),
            handle: None,
        })
    }

    pub fn applier_id(&self) -> &str {
        &self.applier_id
    }

    /// Get current applier state.
    pub fn state(&self) -> ApplierState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ApplierState> {
        self.state_rx.clone()
    }

    /// Check if the applier is running.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), ApplierState::Running)
    }

    /// Last committed LSA loaded or persisted by the task.
    pub async fn committed_lsa(&self) -> Lsa {
        *self.snapshot.read().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Spawn the applier task. It idles in `Init` until [`start()`](Self::start).
    pub fn spawn(&mut self) -> Result<()> {
        let worker = self.worker.take().ok_or_else(|| ApplierError::InvalidState {
            expected: "not spawned".to_string(),
            actual: format!("spawned ({})", self.state()),
        })?;

        let span = info_span!("applier", applier_id = %self.applier_id);
        self.handle = Some(tokio::spawn(worker.run().instrument(span)));
        info!(applier_id = %self.applier_id, "Spawned applier task");
        Ok(())
    }

    /// Let the task leave `Init`.
    ///
    /// The signal is latched: restarts after errors do not need another call.
    pub fn start(&self) {
        self.start_tx.send_replace(true);
        debug!(applier_id = %self.applier_id, "Start signal latched");
    }

    /// Stop the applier and wait for its task.
    ///
    /// An in-flight decode or target call runs to completion first; the
    /// target's open transaction is rolled back. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        info!(applier_id = %self.applier_id, "Shutting down applier");
        self.shutdown_tx.send_replace(true);

        match self.handle.take() {
            Some(handle) => match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!("Applier task completed"),
                Ok(Err(e)) => {
                    warn!(error = %e, "Applier task panicked");
                    self.mark_dead();
                }
                Err(_) => {
                    warn!("Applier task did not stop in time, abandoning it");
                    self.mark_dead();
                }
            },
            // Never spawned: nothing to wait for.
            None => {
                self.worker = None;
                self.mark_dead();
            }
        }
    }

    fn mark_dead(&self) {
        self.state_tx.send_replace(ApplierState::Dead);
        metrics::set_applier_state(&self.applier_id, ApplierState::Dead.as_str());
    }
}
