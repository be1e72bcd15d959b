// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Target database integration traits.
//!
//! Defines what the applier needs from the replica it writes to. The embedding
//! process supplies an implementation backed by its database client.
//!
//! # Example
//!
//! ```rust,no_run
//! use log_applier::item::ReplicationItem;
//! use log_applier::target::{BoxFuture, TargetSink};
//!
//! struct MyReplica { /* client handle */ }
//!
//! impl TargetSink for MyReplica {
//!     fn send_batch<'a>(&'a self, _items: &'a [ReplicationItem]) -> BoxFuture<'a, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn commit(&self) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn rollback(&self) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn set_autocommit(&self, _enabled: bool) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn update_group_id(
//!         &self,
//!         _migrator_id: i32,
//!         _group_id: i32,
//!         _is_slave: bool,
//!         _enabled: bool,
//!     ) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//! }
//! ```

use crate::item::ReplicationItem;
use std::future::Future;
use std::pin::Pin;

/// Result type for target operations.
pub type TargetResult<T> = std::result::Result<T, TargetError>;

/// Type alias for boxed async futures returned by the target.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = TargetResult<T>> + Send + 'a>>;

/// Error reported by the target database client.
#[derive(Debug, Clone)]
pub struct TargetError(pub String);

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TargetError {}

/// Trait defining what we need from the target replica.
///
/// All calls for one applier arrive from a single task, in order, so an
/// implementation may keep one connection and one open transaction.
pub trait TargetSink: Send + Sync + 'static {
    /// Send every item in one request, in slice order.
    ///
    /// Whether the request commits depends on the connection's autocommit
    /// setting; the applier always follows a commit-bound batch with
    /// [`commit()`](Self::commit).
    fn send_batch<'a>(&'a self, items: &'a [ReplicationItem]) -> BoxFuture<'a, ()>;

    /// Commit the open transaction.
    fn commit(&self) -> BoxFuture<'_, ()>;

    /// Roll back the open transaction.
    fn rollback(&self) -> BoxFuture<'_, ()>;

    /// Toggle autocommit on the connection.
    fn set_autocommit(&self, enabled: bool) -> BoxFuture<'_, ()>;

    /// Enable or disable a shard group on the target.
    ///
    /// Called immediately when a group-id bitmap record is applied; the
    /// change must be visible before any later row routed to `group_id`.
    fn update_group_id(
        &self,
        migrator_id: i32,
        group_id: i32,
        is_slave: bool,
        enabled: bool,
    ) -> BoxFuture<'_, ()>;
}

/// A target that accepts everything and does nothing.
///
/// Useful for dry runs that only need the decoder and progress tracking.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTarget;

impl TargetSink for NoOpTarget {
    fn send_batch<'a>(&'a self, _items: &'a [ReplicationItem]) -> BoxFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn commit(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn rollback(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn set_autocommit(&self, _enabled: bool) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn update_group_id(
        &self,
        _migrator_id: i32,
        _group_id: i32,
        _is_slave: bool,
        _enabled: bool,
    ) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
