//! # Log Applier
//!
//! Applies committed source transactions to a target replica by reading the
//! source database's write-ahead log.
//!
//! ## Architecture
//!
//! A separate analyzer walks the log and enqueues one descriptor per committed
//! transaction. The applier pops descriptors, decodes each transaction's
//! records from the WAL page buffer and ships the resulting items to the
//! target:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              log-applier                                 │
//! │                                                                          │
//! │  ┌────────────┐    ┌──────────────┐    ┌─────────────┐    ┌───────────┐  │
//! │  │ Descriptor │───►│ LogReader    │───►│ Item        │───►│ Batch     │──┼─► target
//! │  │ queue      │    │ (page walk)  │    │ Translator  │    │ (flush)   │  │
//! │  └────────────┘    └──────────────┘    └─────────────┘    └───────────┘  │
//! │                           │                   │                  │       │
//! │                           ▼                   ▼                  ▼       │
//! │                    ┌─────────────┐   ┌────────────────┐   ┌──────────┐   │
//! │                    │ PageBuffer  │   │ Reconstructor  │   │ Progress │   │
//! │                    │ (fix/unfix) │   │ (zip/diff/ovf) │   │ (SQLite) │   │
//! │                    └─────────────┘   └────────────────┘   └──────────┘   │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery
//!
//! Progress is saved only after the target commit returns, and descriptors at
//! or below the saved position are skipped. Any failure restarts the applier
//! from the saved position, so every transaction reaches the target at least
//! once and the saved position never moves backwards.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use log_applier::{Applier, ApplierConfig, ChannelQueue, NoOpTarget, SqliteProgressStore};
//! use log_applier::wal::LogBuilder;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> log_applier::Result<()> {
//!     let config = ApplierConfig::default();
//!     let store = SqliteProgressStore::from_config(&config.progress).await?;
//!     let (_sender, queue) = ChannelQueue::bounded(config.settings.queue.capacity);
//!     let buffer = Arc::new(LogBuilder::new(4096, 0).build());
//!
//!     let mut applier = Applier::new(
//!         config,
//!         buffer,
//!         Arc::new(queue),
//!         Arc::new(NoOpTarget),
//!         Arc::new(store),
//!     )?;
//!     applier.spawn()?;
//!     applier.start();
//!
//!     // Applier runs until shutdown signal
//!     applier.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod applier;
pub mod batch;
pub mod config;
pub mod error;
pub mod item;
pub mod lsa;
pub mod metrics;
pub mod progress;
pub mod queue;
pub mod reconstruct;
pub mod resilience;
pub mod target;
pub mod wal;

// Re-exports for convenience
pub use applier::{Applier, ApplierState, StatsSnapshot};
pub use batch::{BatchAccumulator, FlushKind};
pub use config::{ApplierConfig, ApplierSettings, ProgressConfig, ShardSettings};
pub use error::{ApplierError, Result};
pub use item::{DataItem, DataOp, ReplicationItem};
pub use lsa::Lsa;
pub use progress::{MemoryProgressStore, Progress, ProgressStore, SqliteProgressStore};
pub use queue::{ChannelQueue, DescriptorQueue, DescriptorSender, TransactionDescriptor};
pub use reconstruct::{RecordImage, RecordKind};
pub use target::{NoOpTarget, TargetError, TargetSink};
pub use wal::{MemoryPageBuffer, PageBuffer};
