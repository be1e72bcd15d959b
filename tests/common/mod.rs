//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Mock TargetSink recording every call
//! - Log fixtures for whole source transactions
//! - An applier harness with wait helpers

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_target;

pub use fixtures::*;
pub use mock_target::*;
