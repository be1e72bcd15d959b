// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication items and their translation from WAL records.
//!
//! One replication record becomes exactly one [`ReplicationItem`]. Heap
//! records, dummies and commit/abort markers translate to nothing; the
//! applier handles transaction boundaries itself.

use crate::error::{ApplierError, Result};
use crate::lsa::Lsa;
use crate::metrics;
use crate::reconstruct::{ImageTarget, RecordImage, RecordKind, RecordReconstructor};
use crate::wal::{LogRecord, PageBuffer, RecordBody, RecoveryIndex, ReplDataRecord};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Row operation of a data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataOp {
    Insert,
    Update,
    Delete,
}

impl DataOp {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Insert),
            2 => Some(Self::Update),
            3 => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            Self::Insert => 1,
            Self::Update => 2,
            Self::Delete => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// A row change for one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataItem {
    pub op: DataOp,
    pub class_name: String,
    /// Primary key in the source's key encoding.
    pub key: Vec<u8>,
    pub group_id: i32,
    /// LSA of the replication record this item came from.
    pub source_lsa: Lsa,
    /// Row image; `None` for deletes.
    pub image: Option<RecordImage>,
}

/// What a DDL statement did, for the target's catalog bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub statement_type: u16,
    pub object_name: String,
    pub db_user: String,
    pub group_id: i32,
}

/// Unit of work sent to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicationItem {
    Data(DataItem),
    Schema {
        ddl_text: String,
        metadata: SchemaMetadata,
    },
    GidBitmapUpdate {
        migrator_id: i32,
        group_id: i32,
        enabled: bool,
        /// `false` if the change already took effect on this node.
        apply_locally: bool,
    },
    /// Position marker committed together with the data it covers.
    CatalogProgress { committed_lsa: Lsa },
}

impl ReplicationItem {
    /// Label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Data(data) => data.op.as_str(),
            Self::Schema { .. } => "ddl",
            Self::GidBitmapUpdate { .. } => "gid_bitmap",
            Self::CatalogProgress { .. } => "progress",
        }
    }

    pub fn is_schema(&self) -> bool {
        matches!(self, Self::Schema { .. })
    }

    pub fn is_progress(&self) -> bool {
        matches!(self, Self::CatalogProgress { .. })
    }
}

/// Turns WAL records of one transaction into replication items.
pub struct ItemTranslator<'r, 'a, P: PageBuffer + ?Sized> {
    reconstructor: RecordReconstructor<'r, 'a, P>,
}

impl<'r, 'a, P: PageBuffer + ?Sized> ItemTranslator<'r, 'a, P> {
    pub fn new(reconstructor: RecordReconstructor<'r, 'a, P>) -> Self {
        Self { reconstructor }
    }

    /// Translate one record. `None` for records that are not replication
    /// records.
    pub fn translate(&self, record: &LogRecord) -> Result<Option<ReplicationItem>> {
        let item = match &record.body {
            RecordBody::ReplicationData(data) => {
                ReplicationItem::Data(self.translate_data(record, data)?)
            }
            RecordBody::ReplicationSchema(schema) => ReplicationItem::Schema {
                ddl_text: schema.ddl.clone(),
                metadata: SchemaMetadata {
                    statement_type: schema.statement_type,
                    object_name: schema.object_name.clone(),
                    db_user: schema.db_user.clone(),
                    group_id: schema.group_id,
                },
            },
            RecordBody::GidBitmapUpdate(gid) => ReplicationItem::GidBitmapUpdate {
                migrator_id: gid.migrator_id,
                group_id: gid.group_id,
                enabled: gid.enabled,
                apply_locally: gid.apply_locally,
            },
            _ => return Ok(None),
        };
        Ok(Some(item))
    }

    fn translate_data(&self, record: &LogRecord, data: &ReplDataRecord) -> Result<DataItem> {
        let op = DataOp::from_u16(data.op).ok_or_else(|| {
            metrics::record_decode_error("unknown_op");
            ApplierError::inconsistent(record.lsa, format!("unknown data op {}", data.op))
        })?;

        let image = match op {
            DataOp::Delete => None,
            DataOp::Insert | DataOp::Update => Some(self.reconstruct(record, data, op)?),
        };

        Ok(DataItem {
            op,
            class_name: data.class_name.clone(),
            key: data.key.clone(),
            group_id: data.group_id,
            source_lsa: record.lsa,
            image,
        })
    }

    fn reconstruct(&self, record: &LogRecord, data: &ReplDataRecord, op: DataOp) -> Result<RecordImage> {
        let target = ImageTarget {
            tran_id: record.header.tran_id,
            group_id: data.group_id,
            class_name: &data.class_name,
        };
        let reconstructed = self
            .reconstructor
            .reconstruct(data.target_lsa, target)
            .map_err(|e| {
                warn!(
                    class_name = %data.class_name,
                    key = %hex::encode(&data.key),
                    target_lsa = %data.target_lsa,
                    error = %e,
                    "Failed to reconstruct row image"
                );
                metrics::record_decode_error("reconstruct");
                e
            })?;

        let rcv_index = reconstructed.rcv_index;
        let kind = reconstructed.image.kind;
        let valid = match op {
            DataOp::Insert => rcv_index == RecoveryIndex::HeapInsert,
            DataOp::Update => {
                matches!(kind, RecordKind::Normal | RecordKind::BigOne)
                    && matches!(
                        rcv_index,
                        RecoveryIndex::HeapUpdate | RecoveryIndex::OverflowChangeLink
                    )
            }
            DataOp::Delete => true,
        };
        if !valid {
            warn!(
                class_name = %data.class_name,
                key = %hex::encode(&data.key),
                rcv_index = %rcv_index,
                kind = kind.as_str(),
                op = op.as_str(),
                "Row image does not match operation"
            );
            metrics::record_decode_error("op_mismatch");
            return Err(ApplierError::inconsistent(
                data.target_lsa,
                format!(
                    "{} of class {} with {} image from {}",
                    op.as_str(),
                    data.class_name,
                    kind.as_str(),
                    rcv_index
                ),
            ));
        }
        Ok(reconstructed.image)
    }
}
