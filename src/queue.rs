// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transaction descriptor queue between the analyzer and the applier.
//!
//! The analyzer pushes one descriptor per committed source transaction, in
//! commit order. The applier pops them with a bounded wait so it can notice
//! shutdown and flush pending progress while the log is quiet.

use crate::error::{ApplierError, Result};
use crate::lsa::Lsa;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Where a committed source transaction lives in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDescriptor {
    pub transaction_id: i32,
    /// First record the applier has to look at.
    pub replication_start_lsa: Lsa,
    /// First record the transaction wrote.
    pub transaction_start_lsa: Lsa,
    /// LSA of the transaction's COMMIT record.
    pub committed_lsa: Lsa,
}

/// Boxed future returned by descriptor queues.
pub type PopFuture<'a> = Pin<Box<dyn Future<Output = Option<TransactionDescriptor>> + Send + 'a>>;

/// Trait defining what the applier needs from the descriptor queue.
pub trait DescriptorQueue: Send + Sync + 'static {
    /// Wait up to `timeout` for the next descriptor.
    fn pop(&self, timeout: Duration) -> PopFuture<'_>;
}

/// Producer side of a [`ChannelQueue`].
#[derive(Debug, Clone)]
pub struct DescriptorSender {
    tx: mpsc::Sender<TransactionDescriptor>,
}

impl DescriptorSender {
    /// Enqueue a descriptor, waiting while the queue is full.
    pub async fn push(&self, descriptor: TransactionDescriptor) -> Result<()> {
        self.tx
            .send(descriptor)
            .await
            .map_err(|_| ApplierError::Shutdown)
    }

    /// Enqueue without waiting; fails if the queue is full or closed.
    pub fn try_push(&self, descriptor: TransactionDescriptor) -> Result<()> {
        self.tx.try_send(descriptor).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ApplierError::transient("queue_push", "descriptor queue full")
            }
            mpsc::error::TrySendError::Closed(_) => ApplierError::Shutdown,
        })
    }
}

/// Bounded FIFO backed by a tokio channel.
#[derive(Debug)]
pub struct ChannelQueue {
    rx: Mutex<mpsc::Receiver<TransactionDescriptor>>,
}

impl ChannelQueue {
    /// Create a queue holding at most `capacity` descriptors.
    pub fn bounded(capacity: usize) -> (DescriptorSender, ChannelQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            DescriptorSender { tx },
            ChannelQueue { rx: Mutex::new(rx) },
        )
    }
}

impl DescriptorQueue for ChannelQueue {
    fn pop(&self, timeout: Duration) -> PopFuture<'_> {
        Box::pin(async move {
            let mut rx = self.rx.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(descriptor)) => Some(descriptor),
                Ok(None) => {
                    // All senders gone: behave like an idle queue.
                    drop(rx);
                    tokio::time::sleep(timeout).await;
                    None
                }
                Err(_) => None,
            }
        })
    }
}
