// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Source WAL formats and access.
//!
//! The log is a byte stream cut into fixed-size pages. Records are laid out
//! back to back and may straddle page boundaries; an [`Lsa`](crate::lsa::Lsa) addresses the
//! first byte of a record header.
//!
//! ```text
//! page 99                          page 100
//! ┌────────────────────────────────┬────────────────────────────────┐
//! │ hdr │ body ... │ hdr │ body ...│... body │ hdr │ body │ ...     │
//! └────────────────────────────────┴────────────────────────────────┘
//!   ▲               ▲                          ▲
//!   (99|0)          (99|71)                    (100|50)
//! ```
//!
//! Every header links three ways: `forw_lsa` to the next record in the log,
//! `back_lsa` to the previous one, and `prev_tran_lsa` to the previous record
//! written by the same transaction.
//!
//! - [`record`]: header and body layouts
//! - [`reader`]: page-crossing reads through a [`PageBuffer`]
//! - [`buffer`]: the page buffer contract and an in-memory implementation
//! - [`builder`]: lays out records into pages (fixtures, fuzzing)

pub mod buffer;
pub mod builder;
pub mod reader;
pub mod record;

pub use buffer::{LogHeader, LogPage, MemoryPageBuffer, PageBuffer};
pub use builder::LogBuilder;
pub use reader::{LogCursor, LogReader};
pub use record::{
    GidBitmapRecord, LogRecord, LogRecordHeader, RecordBody, ReplDataRecord, ReplSchemaRecord,
    StoredPayload, LOG_RECORD_HEADER_SIZE,
};

/// Type tag stored in every record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogRecordType {
    UndoRedo,
    DiffUndoRedo,
    Redo,
    DummyOverflow,
    Commit,
    Abort,
    ReplicationData,
    ReplicationSchema,
    GidBitmapUpdate,
    Dummy,
}

impl LogRecordType {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => Self::UndoRedo,
            2 => Self::DiffUndoRedo,
            3 => Self::Redo,
            4 => Self::DummyOverflow,
            5 => Self::Commit,
            6 => Self::Abort,
            7 => Self::ReplicationData,
            8 => Self::ReplicationSchema,
            9 => Self::GidBitmapUpdate,
            10 => Self::Dummy,
            _ => return None,
        })
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            Self::UndoRedo => 1,
            Self::DiffUndoRedo => 2,
            Self::Redo => 3,
            Self::DummyOverflow => 4,
            Self::Commit => 5,
            Self::Abort => 6,
            Self::ReplicationData => 7,
            Self::ReplicationSchema => 8,
            Self::GidBitmapUpdate => 9,
            Self::Dummy => 10,
        }
    }

    /// Records that carry a heap row image.
    pub fn is_heap_record(&self) -> bool {
        matches!(self, Self::UndoRedo | Self::DiffUndoRedo | Self::Redo)
    }
}

/// Low-level storage operation that produced a heap record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryIndex {
    HeapInsert,
    HeapUpdate,
    HeapDelete,
    HeapInsertNewHome,
    OverflowNewPageInsert,
    OverflowChangeLink,
    Other(u16),
}

impl RecoveryIndex {
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::HeapInsert,
            2 => Self::HeapUpdate,
            3 => Self::HeapDelete,
            4 => Self::HeapInsertNewHome,
            5 => Self::OverflowNewPageInsert,
            6 => Self::OverflowChangeLink,
            other => Self::Other(other),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            Self::HeapInsert => 1,
            Self::HeapUpdate => 2,
            Self::HeapDelete => 3,
            Self::HeapInsertNewHome => 4,
            Self::OverflowNewPageInsert => 5,
            Self::OverflowChangeLink => 6,
            Self::Other(value) => *value,
        }
    }
}

impl std::fmt::Display for RecoveryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HeapInsert => write!(f, "heap_insert"),
            Self::HeapUpdate => write!(f, "heap_update"),
            Self::HeapDelete => write!(f, "heap_delete"),
            Self::HeapInsertNewHome => write!(f, "heap_insert_newhome"),
            Self::OverflowNewPageInsert => write!(f, "ovf_newpage_insert"),
            Self::OverflowChangeLink => write!(f, "ovf_change_link"),
            Self::Other(value) => write!(f, "rcv_{}", value),
        }
    }
}

/// Location of a row in the source heap. Carried for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapAddress {
    pub page_id: i64,
    pub slot: i16,
}
