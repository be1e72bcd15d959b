// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record header and body layouts.
//!
//! All integers are little-endian.
//!
//! ```text
//! header (36 bytes)
//! ┌──────────────┬──────────────┬──────────────┬─────────┬─────────┐
//! │ prev_tran_lsa│ back_lsa     │ forw_lsa     │ tran_id │ type    │
//! │ i64 + i16    │ i64 + i16    │ i64 + i16    │ i32     │ u16     │
//! └──────────────┴──────────────┴──────────────┴─────────┴─────────┘
//! ```
//!
//! Heap payload length fields use bit 31 as the "zipped" flag: the stored
//! bytes are then a zstd frame and bits 0..30 give the stored size.

use super::reader::LogCursor;
use super::{HeapAddress, LogRecordType, RecoveryIndex};
use crate::error::{ApplierError, Result};
use crate::lsa::{Lsa, LSA_SIZE};
use bytes::{Buf, BufMut, BytesMut};

/// Encoded size of a record header.
pub const LOG_RECORD_HEADER_SIZE: usize = 3 * LSA_SIZE + 4 + 2;

/// Flag bit marking a zipped payload in a length field.
pub const ZIP_FLAG: u32 = 1 << 31;

pub(crate) fn get_lsa(buf: &mut impl Buf) -> Lsa {
    let page_id = buf.get_i64_le();
    let offset = buf.get_i16_le();
    Lsa::new(page_id, offset)
}

pub(crate) fn put_lsa(out: &mut impl BufMut, lsa: Lsa) {
    out.put_i64_le(lsa.page_id);
    out.put_i16_le(lsa.offset);
}

/// Fixed header in front of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordHeader {
    pub prev_tran_lsa: Lsa,
    pub back_lsa: Lsa,
    pub forw_lsa: Lsa,
    pub tran_id: i32,
    pub record_type: LogRecordType,
}

impl LogRecordHeader {
    /// Decode a header read from `lsa`. `bytes` must hold exactly one header.
    pub fn decode(lsa: Lsa, mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() != LOG_RECORD_HEADER_SIZE {
            return Err(ApplierError::inconsistent(
                lsa,
                format!("record header is {} bytes", bytes.len()),
            ));
        }
        let prev_tran_lsa = get_lsa(&mut bytes);
        let back_lsa = get_lsa(&mut bytes);
        let forw_lsa = get_lsa(&mut bytes);
        let tran_id = bytes.get_i32_le();
        let raw_type = bytes.get_u16_le();
        let record_type = LogRecordType::from_u16(raw_type).ok_or_else(|| {
            ApplierError::inconsistent(lsa, format!("unknown record type {}", raw_type))
        })?;
        Ok(Self {
            prev_tran_lsa,
            back_lsa,
            forw_lsa,
            tran_id,
            record_type,
        })
    }

    pub fn encode(&self, out: &mut BytesMut) {
        put_lsa(out, self.prev_tran_lsa);
        put_lsa(out, self.back_lsa);
        put_lsa(out, self.forw_lsa);
        out.put_i32_le(self.tran_id);
        out.put_u16_le(self.record_type.as_u16());
    }
}

/// A heap payload as stored in the log, possibly zipped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredPayload {
    pub bytes: Vec<u8>,
    pub zipped: bool,
}

impl StoredPayload {
    pub fn plain(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            zipped: false,
        }
    }

    pub fn zipped(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            zipped: true,
        }
    }

    fn length_field(&self) -> u32 {
        let len = self.bytes.len() as u32 & !ZIP_FLAG;
        if self.zipped {
            len | ZIP_FLAG
        } else {
            len
        }
    }

    fn split_length_field(field: u32) -> (usize, bool) {
        ((field & !ZIP_FLAG) as usize, field & ZIP_FLAG != 0)
    }
}

/// Body of a REPLICATION_DATA record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplDataRecord {
    /// 1 insert, 2 update, 3 delete.
    pub op: u16,
    pub group_id: i32,
    /// Heap record carrying the row image.
    pub target_lsa: Lsa,
    pub class_name: String,
    pub key: Vec<u8>,
}

/// Body of a REPLICATION_SCHEMA record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplSchemaRecord {
    pub statement_type: u16,
    pub group_id: i32,
    pub object_name: String,
    pub ddl: String,
    pub db_user: String,
}

/// Body of a GID_BITMAP_UPDATE record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GidBitmapRecord {
    pub migrator_id: i32,
    pub group_id: i32,
    /// `false` when the change was already applied on this node.
    pub apply_locally: bool,
    pub enabled: bool,
}

/// Decoded record body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    UndoRedo {
        rcv_index: RecoveryIndex,
        address: HeapAddress,
        undo: StoredPayload,
        redo: StoredPayload,
        /// Redo is stored as a diff against undo.
        diff: bool,
    },
    Redo {
        rcv_index: RecoveryIndex,
        address: HeapAddress,
        redo: StoredPayload,
    },
    DummyOverflow,
    Commit {
        at_time: i64,
    },
    Abort {
        at_time: i64,
    },
    ReplicationData(ReplDataRecord),
    ReplicationSchema(ReplSchemaRecord),
    GidBitmapUpdate(GidBitmapRecord),
    Dummy,
}

impl RecordBody {
    /// Header type tag for this body.
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::UndoRedo { diff: false, .. } => LogRecordType::UndoRedo,
            Self::UndoRedo { diff: true, .. } => LogRecordType::DiffUndoRedo,
            Self::Redo { .. } => LogRecordType::Redo,
            Self::DummyOverflow => LogRecordType::DummyOverflow,
            Self::Commit { .. } => LogRecordType::Commit,
            Self::Abort { .. } => LogRecordType::Abort,
            Self::ReplicationData(_) => LogRecordType::ReplicationData,
            Self::ReplicationSchema(_) => LogRecordType::ReplicationSchema,
            Self::GidBitmapUpdate(_) => LogRecordType::GidBitmapUpdate,
            Self::Dummy => LogRecordType::Dummy,
        }
    }

    /// Read a body of type `record_type` from the cursor.
    pub fn read<P>(cursor: &mut LogCursor<'_, P>, record_type: LogRecordType) -> Result<Self>
    where
        P: super::PageBuffer + ?Sized,
    {
        let body = match record_type {
            LogRecordType::UndoRedo | LogRecordType::DiffUndoRedo => {
                let raw = cursor.read_bytes(2 + 8 + 2 + 4 + 4)?;
                let mut fixed = &raw[..];
                let rcv_index = RecoveryIndex::from_u16(fixed.get_u16_le());
                let address = HeapAddress {
                    page_id: fixed.get_i64_le(),
                    slot: fixed.get_i16_le(),
                };
                let (undo_len, undo_zipped) = StoredPayload::split_length_field(fixed.get_u32_le());
                let (redo_len, redo_zipped) = StoredPayload::split_length_field(fixed.get_u32_le());
                let undo = StoredPayload {
                    bytes: cursor.read_bytes(undo_len)?,
                    zipped: undo_zipped,
                };
                let redo = StoredPayload {
                    bytes: cursor.read_bytes(redo_len)?,
                    zipped: redo_zipped,
                };
                Self::UndoRedo {
                    rcv_index,
                    address,
                    undo,
                    redo,
                    diff: record_type == LogRecordType::DiffUndoRedo,
                }
            }
            LogRecordType::Redo => {
                let raw = cursor.read_bytes(2 + 8 + 2 + 4)?;
                let mut fixed = &raw[..];
                let rcv_index = RecoveryIndex::from_u16(fixed.get_u16_le());
                let address = HeapAddress {
                    page_id: fixed.get_i64_le(),
                    slot: fixed.get_i16_le(),
                };
                let (len, zipped) = StoredPayload::split_length_field(fixed.get_u32_le());
                Self::Redo {
                    rcv_index,
                    address,
                    redo: StoredPayload {
                        bytes: cursor.read_bytes(len)?,
                        zipped,
                    },
                }
            }
            LogRecordType::DummyOverflow => Self::DummyOverflow,
            LogRecordType::Dummy => Self::Dummy,
            LogRecordType::Commit => Self::Commit {
                at_time: cursor.read_i64()?,
            },
            LogRecordType::Abort => Self::Abort {
                at_time: cursor.read_i64()?,
            },
            LogRecordType::ReplicationData => {
                let raw = cursor.read_bytes(2 + 4 + LSA_SIZE)?;
                let mut fixed = &raw[..];
                let op = fixed.get_u16_le();
                let group_id = fixed.get_i32_le();
                let target_lsa = get_lsa(&mut fixed);
                let class_name = cursor.read_string_u16()?;
                let key_len = cursor.read_u16()? as usize;
                let key = cursor.read_bytes(key_len)?;
                Self::ReplicationData(ReplDataRecord {
                    op,
                    group_id,
                    target_lsa,
                    class_name,
                    key,
                })
            }
            LogRecordType::ReplicationSchema => {
                let raw = cursor.read_bytes(2 + 4)?;
                let mut fixed = &raw[..];
                let statement_type = fixed.get_u16_le();
                let group_id = fixed.get_i32_le();
                let object_name = cursor.read_string_u16()?;
                let ddl_len = cursor.read_u32()? as usize;
                let ddl = cursor.read_string(ddl_len)?;
                let db_user = cursor.read_string_u16()?;
                Self::ReplicationSchema(ReplSchemaRecord {
                    statement_type,
                    group_id,
                    object_name,
                    ddl,
                    db_user,
                })
            }
            LogRecordType::GidBitmapUpdate => {
                let raw = cursor.read_bytes(4 + 4 + 1 + 1)?;
                let mut fixed = &raw[..];
                Self::GidBitmapUpdate(GidBitmapRecord {
                    migrator_id: fixed.get_i32_le(),
                    group_id: fixed.get_i32_le(),
                    apply_locally: fixed.get_u8() != 0,
                    enabled: fixed.get_u8() != 0,
                })
            }
        };
        Ok(body)
    }

    /// Append the encoded body to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Self::UndoRedo {
                rcv_index,
                address,
                undo,
                redo,
                ..
            } => {
                out.put_u16_le(rcv_index.as_u16());
                out.put_i64_le(address.page_id);
                out.put_i16_le(address.slot);
                out.put_u32_le(undo.length_field());
                out.put_u32_le(redo.length_field());
                out.put_slice(&undo.bytes);
                out.put_slice(&redo.bytes);
            }
            Self::Redo {
                rcv_index,
                address,
                redo,
            } => {
                out.put_u16_le(rcv_index.as_u16());
                out.put_i64_le(address.page_id);
                out.put_i16_le(address.slot);
                out.put_u32_le(redo.length_field());
                out.put_slice(&redo.bytes);
            }
            Self::DummyOverflow | Self::Dummy => {}
            Self::Commit { at_time } | Self::Abort { at_time } => out.put_i64_le(*at_time),
            Self::ReplicationData(data) => {
                out.put_u16_le(data.op);
                out.put_i32_le(data.group_id);
                put_lsa(out, data.target_lsa);
                put_str_u16(out, &data.class_name);
                out.put_u16_le(data.key.len() as u16);
                out.put_slice(&data.key);
            }
            Self::ReplicationSchema(schema) => {
                out.put_u16_le(schema.statement_type);
                out.put_i32_le(schema.group_id);
                put_str_u16(out, &schema.object_name);
                out.put_u32_le(schema.ddl.len() as u32);
                out.put_slice(schema.ddl.as_bytes());
                put_str_u16(out, &schema.db_user);
            }
            Self::GidBitmapUpdate(gid) => {
                out.put_i32_le(gid.migrator_id);
                out.put_i32_le(gid.group_id);
                out.put_u8(gid.apply_locally as u8);
                out.put_u8(gid.enabled as u8);
            }
        }
    }
}

fn put_str_u16(out: &mut BytesMut, value: &str) {
    out.put_u16_le(value.len() as u16);
    out.put_slice(value.as_bytes());
}

/// A record read from the log: where it is, its header, and its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub lsa: Lsa,
    pub header: LogRecordHeader,
    pub body: RecordBody,
}
