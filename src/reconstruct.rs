// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Row image reconstruction from heap log records.
//!
//! A replication record points at a heap record (`target_lsa`) whose redo
//! payload holds the row image. Getting the real image may take several
//! steps:
//!
//! 1. Unzip the stored payloads (zstd).
//! 2. For DIFF_UNDOREDO, XOR the redo diff over the undo image.
//! 3. If the image is a big-one, or the operation relinked overflow pages,
//!    walk the transaction's backward chain and stitch the overflow pages
//!    together.
//! 4. If the image is a relocation stub, decode the record it points back to.
//!
//! The result is then checked against the group id the item was routed to.

use crate::config::ShardSettings;
use crate::error::{ApplierError, Result};
use crate::lsa::Lsa;
use crate::wal::{
    LogReader, LogRecord, LogRecordType, PageBuffer, RecordBody, RecoveryIndex, StoredPayload,
};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Bytes in front of each overflow page's share of the row.
pub const OVERFLOW_PART_HEADER_SIZE: usize = 8;

/// Bytes holding the image kind in front of the record bytes.
pub const IMAGE_KIND_SIZE: usize = 2;

/// Relocation stubs followed before giving up.
const MAX_RELOCATION_DEPTH: usize = 4;

/// zstd level used when zipping payloads.
const ZIP_LEVEL: i32 = 3;

// ═══════════════════════════════════════════════════════════════════════════════
// Record images
// ═══════════════════════════════════════════════════════════════════════════════

/// Kind of row image carried in a heap redo payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Row stored in its home slot (a "new home" row decodes as this too).
    Normal,
    /// Row too large for one page; the body lives in overflow pages.
    BigOne,
    /// Stub pointing at the record that holds the moved row.
    Relocation,
    /// Slot reservation with no row body.
    AssignAddress,
}

impl RecordKind {
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 | 2 => Some(Self::Normal),
            3 => Some(Self::Relocation),
            4 => Some(Self::BigOne),
            5 => Some(Self::AssignAddress),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> i16 {
        match self {
            Self::Normal => 1,
            Self::Relocation => 3,
            Self::BigOne => 4,
            Self::AssignAddress => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::BigOne => "big_one",
            Self::Relocation => "relocation",
            Self::AssignAddress => "assign_address",
        }
    }
}

/// A row image: its kind and the record bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordImage {
    pub kind: RecordKind,
    pub bytes: Vec<u8>,
}

impl RecordImage {
    pub fn new(kind: RecordKind, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Group id stored in the first four record bytes.
    pub fn group_id(&self) -> Option<i32> {
        if self.bytes.len() < 4 {
            return None;
        }
        Some((&self.bytes[..4]).get_i32_le())
    }

    /// Heap redo payload form: kind then bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IMAGE_KIND_SIZE + self.bytes.len());
        out.put_i16_le(self.kind.as_i16());
        out.put_slice(&self.bytes);
        out
    }

    /// Decode a redo payload read from the record at `lsa`.
    pub fn decode(lsa: Lsa, payload: &[u8]) -> Result<Self> {
        if payload.len() < IMAGE_KIND_SIZE {
            return Err(ApplierError::inconsistent(
                lsa,
                format!("redo payload of {} bytes has no image kind", payload.len()),
            ));
        }
        let raw_kind = (&payload[..IMAGE_KIND_SIZE]).get_i16_le();
        let kind = RecordKind::from_i16(raw_kind).ok_or_else(|| {
            ApplierError::inconsistent(lsa, format!("unknown image kind {}", raw_kind))
        })?;
        Ok(Self::new(kind, &payload[IMAGE_KIND_SIZE..]))
    }
}

/// Build a group-prefixed normal image, as a heap insert would log it.
pub fn row_image(group_id: i32, body: &[u8]) -> RecordImage {
    let mut bytes = Vec::with_capacity(4 + body.len());
    bytes.put_i32_le(group_id);
    bytes.put_slice(body);
    RecordImage::new(RecordKind::Normal, bytes)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Payload helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Return the plain bytes of a stored payload, decompressing zipped ones.
pub fn unzip_payload(payload: &StoredPayload) -> Result<Vec<u8>> {
    if !payload.zipped {
        return Ok(payload.bytes.clone());
    }
    let mut decoder = zstd::Decoder::new(&payload.bytes[..])
        .map_err(|e| ApplierError::Decompression(format!("zstd init: {}", e)))?;
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| ApplierError::Decompression(format!("zstd decode: {}", e)))?;
    Ok(decompressed)
}

/// Zip `bytes` into a stored payload.
pub fn zip_payload(bytes: &[u8]) -> Result<StoredPayload> {
    let compressed = zstd::encode_all(bytes, ZIP_LEVEL)
        .map_err(|e| ApplierError::Internal(format!("zstd encode: {}", e)))?;
    Ok(StoredPayload::zipped(compressed))
}

/// Rebuild the full redo image from the undo image and a redo diff.
///
/// Bytes covered by both are XORed; the tail of `diff` past the undo image
/// is taken as is. The result always has the length of `diff`.
pub fn apply_diff(undo: &[u8], diff: &[u8]) -> Vec<u8> {
    diff.iter()
        .enumerate()
        .map(|(i, d)| match undo.get(i) {
            Some(u) => d ^ u,
            None => *d,
        })
        .collect()
}

/// Inverse of [`apply_diff`]: the diff that turns `undo` into `full`.
pub fn make_diff(undo: &[u8], full: &[u8]) -> Vec<u8> {
    apply_diff(undo, full)
}

/// Heap payloads of one record, already unzipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPayload {
    UndoRedo {
        rcv_index: RecoveryIndex,
        undo: Vec<u8>,
        redo: Vec<u8>,
        diff: bool,
    },
    Redo {
        rcv_index: RecoveryIndex,
        redo: Vec<u8>,
    },
}

impl LogPayload {
    /// Extract the payloads of a heap record.
    pub fn from_record(record: &LogRecord) -> Result<Self> {
        match &record.body {
            RecordBody::UndoRedo {
                rcv_index,
                undo,
                redo,
                diff,
                ..
            } => Ok(Self::UndoRedo {
                rcv_index: *rcv_index,
                undo: unzip_payload(undo)?,
                redo: unzip_payload(redo)?,
                diff: *diff,
            }),
            RecordBody::Redo { rcv_index, redo, .. } => Ok(Self::Redo {
                rcv_index: *rcv_index,
                redo: unzip_payload(redo)?,
            }),
            other => Err(ApplierError::inconsistent(
                record.lsa,
                format!("{:?} record carries no heap payload", other.record_type()),
            )),
        }
    }

    pub fn rcv_index(&self) -> RecoveryIndex {
        match self {
            Self::UndoRedo { rcv_index, .. } | Self::Redo { rcv_index, .. } => *rcv_index,
        }
    }

    /// The redo image, with any diff applied.
    pub fn into_redo(self) -> Vec<u8> {
        match self {
            Self::UndoRedo {
                undo,
                redo,
                diff: true,
                ..
            } => apply_diff(&undo, &redo),
            Self::UndoRedo { redo, .. } | Self::Redo { redo, .. } => redo,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Reconstructor
// ═══════════════════════════════════════════════════════════════════════════════

/// What the reconstructed image is checked against.
#[derive(Debug, Clone, Copy)]
pub struct ImageTarget<'s> {
    pub tran_id: i32,
    pub group_id: i32,
    pub class_name: &'s str,
}

/// A reconstructed image and the recovery index of the record that asked
/// for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconstructed {
    pub image: RecordImage,
    pub rcv_index: RecoveryIndex,
}

/// Decodes heap records into complete row images.
pub struct RecordReconstructor<'r, 'a, P: PageBuffer + ?Sized> {
    reader: &'r LogReader<'a, P>,
    shard: &'r ShardSettings,
}

impl<'r, 'a, P: PageBuffer + ?Sized> RecordReconstructor<'r, 'a, P> {
    pub fn new(reader: &'r LogReader<'a, P>, shard: &'r ShardSettings) -> Self {
        Self { reader, shard }
    }

    /// Reconstruct the image held by the heap record at `target_lsa`.
    pub fn reconstruct(&self, target_lsa: Lsa, target: ImageTarget<'_>) -> Result<Reconstructed> {
        let record = self.reader.read_record(target_lsa)?;
        check_heap_record(&record, target.tran_id)?;

        let (image, rcv_index) = self.decode_heap(&record, 0)?;
        self.check_group(target_lsa, &image, target)?;
        Ok(Reconstructed { image, rcv_index })
    }

    fn decode_heap(&self, record: &LogRecord, depth: usize) -> Result<(RecordImage, RecoveryIndex)> {
        let payload = LogPayload::from_record(record)?;
        let rcv_index = payload.rcv_index();
        let image = RecordImage::decode(record.lsa, &payload.into_redo())?;

        match image.kind {
            RecordKind::Relocation => {
                if depth >= MAX_RELOCATION_DEPTH {
                    return Err(ApplierError::inconsistent(
                        record.lsa,
                        format!("relocation nested deeper than {}", MAX_RELOCATION_DEPTH),
                    ));
                }
                let inner_lsa = record.header.prev_tran_lsa;
                if inner_lsa.is_null() || inner_lsa >= record.lsa {
                    return Err(ApplierError::inconsistent(
                        record.lsa,
                        format!("relocation points at {}", inner_lsa),
                    ));
                }
                let inner = self.reader.read_record(inner_lsa)?;
                check_heap_record(&inner, record.header.tran_id)?;
                let (inner_image, _) = self.decode_heap(&inner, depth + 1)?;
                Ok((inner_image, rcv_index))
            }
            RecordKind::BigOne => Ok((self.walk_overflow(record)?, rcv_index)),
            _ if rcv_index == RecoveryIndex::OverflowChangeLink => {
                Ok((self.walk_overflow(record)?, rcv_index))
            }
            _ => Ok((image, rcv_index)),
        }
    }

    /// Collect the overflow pages written by the transaction before `record`
    /// and return them concatenated in write order.
    fn walk_overflow(&self, record: &LogRecord) -> Result<RecordImage> {
        let tran_id = record.header.tran_id;
        let mut parts: Vec<Vec<u8>> = Vec::new();
        let mut previous = record.lsa;
        let mut lsa = record.header.prev_tran_lsa;

        while !lsa.is_null() {
            if lsa >= previous {
                return Err(ApplierError::inconsistent(
                    record.lsa,
                    format!("overflow chain moves forward from {} to {}", previous, lsa),
                ));
            }
            let header = self.reader.read_header(lsa)?;
            if header.tran_id != tran_id || header.record_type == LogRecordType::DummyOverflow {
                break;
            }
            if header.record_type == LogRecordType::Redo {
                let page = self.reader.read_record(lsa)?;
                if let RecordBody::Redo {
                    rcv_index: RecoveryIndex::OverflowNewPageInsert,
                    redo,
                    ..
                } = &page.body
                {
                    let bytes = unzip_payload(redo)?;
                    if bytes.len() < OVERFLOW_PART_HEADER_SIZE {
                        return Err(ApplierError::inconsistent(
                            lsa,
                            format!("overflow page payload of {} bytes", bytes.len()),
                        ));
                    }
                    parts.push(bytes[OVERFLOW_PART_HEADER_SIZE..].to_vec());
                }
            }
            previous = lsa;
            lsa = header.prev_tran_lsa;
        }

        if parts.is_empty() {
            return Err(ApplierError::inconsistent(
                record.lsa,
                "big-one record without overflow pages",
            ));
        }
        parts.reverse();
        Ok(RecordImage::new(RecordKind::BigOne, parts.concat()))
    }

    fn check_group(&self, lsa: Lsa, image: &RecordImage, target: ImageTarget<'_>) -> Result<()> {
        if image.kind == RecordKind::AssignAddress {
            return Ok(());
        }
        let group_id = image.group_id().ok_or_else(|| {
            ApplierError::inconsistent(lsa, format!("image of {} bytes has no group id", image.len()))
        })?;
        if group_id == target.group_id {
            return Ok(());
        }
        let global = self.shard.global_group_id;
        if self.shard.is_metadata_class(target.class_name)
            && group_id == global
            && target.group_id >= global
        {
            return Ok(());
        }
        Err(ApplierError::inconsistent(
            lsa,
            format!(
                "image group id {} does not match item group {} for class {}",
                group_id, target.group_id, target.class_name
            ),
        ))
    }
}

fn check_heap_record(record: &LogRecord, tran_id: i32) -> Result<()> {
    if !record.header.record_type.is_heap_record() {
        return Err(ApplierError::inconsistent(
            record.lsa,
            format!("expected a heap record, found {:?}", record.header.record_type),
        ));
    }
    if record.header.tran_id != tran_id {
        return Err(ApplierError::inconsistent(
            record.lsa,
            format!(
                "heap record belongs to transaction {}, expected {}",
                record.header.tran_id, tran_id
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::{HeapAddress, LogBuilder, MemoryPageBuffer};

    const TRAN: i32 = 11;

    fn redo(rcv_index: RecoveryIndex, payload: Vec<u8>) -> RecordBody {
        RecordBody::Redo {
            rcv_index,
            address: HeapAddress { page_id: 3, slot: 4 },
            redo: StoredPayload::plain(payload),
        }
    }

    fn overflow_page(data: &[u8]) -> RecordBody {
        let mut payload = vec![0u8; OVERFLOW_PART_HEADER_SIZE];
        payload.extend_from_slice(data);
        redo(RecoveryIndex::OverflowNewPageInsert, payload)
    }

    fn target(group_id: i32, class_name: &str) -> ImageTarget<'_> {
        ImageTarget {
            tran_id: TRAN,
            group_id,
            class_name,
        }
    }

    fn reconstruct(
        buffer: &MemoryPageBuffer,
        lsa: Lsa,
        group_id: i32,
        class_name: &str,
    ) -> Result<Reconstructed> {
        let reader = LogReader::open(buffer)?;
        let shard = ShardSettings::default();
        RecordReconstructor::new(&reader, &shard).reconstruct(lsa, target(group_id, class_name))
    }

    #[test]
    fn test_apply_diff_lengths() {
        let undo = vec![1u8, 2, 3, 4];
        let full = vec![1u8, 9, 3, 4, 5, 6];
        let diff = make_diff(&undo, &full);
        assert_eq!(diff.len(), full.len());
        assert_eq!(apply_diff(&undo, &diff), full);

        let shorter = vec![7u8, 7];
        assert_eq!(apply_diff(&undo, &make_diff(&undo, &shorter)), shorter);
    }

    #[test]
    fn test_unzip_roundtrip_and_plain_passthrough() {
        let data = b"row row row row row row row".to_vec();
        let zipped = zip_payload(&data).unwrap();
        assert!(zipped.zipped);
        assert_eq!(unzip_payload(&zipped).unwrap(), data);
        assert_eq!(unzip_payload(&StoredPayload::plain(data.clone())).unwrap(), data);
    }

    #[test]
    fn test_unzip_garbage_fails() {
        let err = unzip_payload(&StoredPayload::zipped(vec![1, 2, 3, 4, 5])).unwrap_err();
        assert!(matches!(err, ApplierError::Decompression(_)));
    }

    #[test]
    fn test_image_decode_kinds() {
        let image = RecordImage::decode(Lsa::new(0, 0), &[2, 0, 9, 9]).unwrap();
        assert_eq!(image.kind, RecordKind::Normal);
        assert_eq!(image.bytes, vec![9, 9]);
        assert!(RecordImage::decode(Lsa::new(0, 0), &[9, 0]).is_err());
        assert!(RecordImage::decode(Lsa::new(0, 0), &[1]).is_err());
    }

    #[test]
    fn test_normal_insert() {
        let mut builder = LogBuilder::new(256, 0);
        let image = row_image(3, &[0xAB; 36]);
        let lsa = builder.append(TRAN, redo(RecoveryIndex::HeapInsert, image.encode()));
        let buffer = builder.build();

        let out = reconstruct(&buffer, lsa, 3, "orders").unwrap();
        assert_eq!(out.image, image);
        assert_eq!(out.image.len(), 40);
        assert_eq!(out.rcv_index, RecoveryIndex::HeapInsert);
        assert_eq!(buffer.fixed_count(), 0);
    }

    #[test]
    fn test_zipped_diff_update() {
        let before = row_image(5, b"name=alice;balance=0010");
        let after = row_image(5, b"name=alice;balance=0990;extra");
        let diff = make_diff(&before.encode(), &after.encode());

        let mut builder = LogBuilder::new(128, 40);
        let lsa = builder.append(
            TRAN,
            RecordBody::UndoRedo {
                rcv_index: RecoveryIndex::HeapUpdate,
                address: HeapAddress::default(),
                undo: zip_payload(&before.encode()).unwrap(),
                redo: zip_payload(&diff).unwrap(),
                diff: true,
            },
        );
        let buffer = builder.build();

        let out = reconstruct(&buffer, lsa, 5, "accounts").unwrap();
        assert_eq!(out.image, after);
        assert_eq!(out.rcv_index, RecoveryIndex::HeapUpdate);
    }

    #[test]
    fn test_overflow_pages_concatenate_in_write_order() {
        let mut builder = LogBuilder::new(128, 0);
        builder.append(TRAN, RecordBody::DummyOverflow);
        let mut part1 = Vec::new();
        part1.put_i32_le(8);
        part1.extend_from_slice(&[1u8; 60]);
        builder.append(TRAN, overflow_page(&part1));
        builder.append(77, RecordBody::Dummy);
        builder.append(TRAN, overflow_page(&[2u8; 70]));
        builder.append(TRAN, overflow_page(&[3u8; 10]));
        let stub = RecordImage::new(RecordKind::BigOne, vec![0u8; 12]);
        let lsa = builder.append(TRAN, redo(RecoveryIndex::HeapInsert, stub.encode()));
        let buffer = builder.build();

        let out = reconstruct(&buffer, lsa, 8, "blobs").unwrap();
        let mut expected = part1.clone();
        expected.extend_from_slice(&[2u8; 70]);
        expected.extend_from_slice(&[3u8; 10]);
        assert_eq!(out.image.kind, RecordKind::BigOne);
        assert_eq!(out.image.len(), 64 + 70 + 10);
        assert_eq!(out.image.bytes, expected);
        assert_eq!(buffer.fixed_count(), 0);
    }

    #[test]
    fn test_overflow_walk_stops_at_foreign_transaction() {
        let mut builder = LogBuilder::new(128, 0);
        let mut part = Vec::new();
        part.put_i32_le(1);
        part.extend_from_slice(&[5u8; 20]);
        let first = builder.append(TRAN, overflow_page(&[9u8; 30]));
        let foreign = builder.append(99, RecordBody::Dummy);
        let mine = builder.append_linked(TRAN, foreign, overflow_page(&part));
        let stub = RecordImage::new(RecordKind::BigOne, vec![]);
        let lsa = builder.append_linked(TRAN, mine, redo(RecoveryIndex::HeapInsert, stub.encode()));
        assert!(first < foreign);
        let buffer = builder.build();

        let out = reconstruct(&buffer, lsa, 1, "blobs").unwrap();
        assert_eq!(out.image.bytes, part);
    }

    #[test]
    fn test_big_one_without_pages_is_inconsistent() {
        let mut builder = LogBuilder::new(128, 0);
        let stub = RecordImage::new(RecordKind::BigOne, vec![0u8; 8]);
        let lsa = builder.append(TRAN, redo(RecoveryIndex::HeapInsert, stub.encode()));
        let buffer = builder.build();

        let err = reconstruct(&buffer, lsa, 0, "blobs").unwrap_err();
        assert!(matches!(err, ApplierError::DecodeInconsistency { .. }));
    }

    #[test]
    fn test_short_overflow_page_is_inconsistent() {
        let mut builder = LogBuilder::new(128, 0);
        builder.append(TRAN, redo(RecoveryIndex::OverflowNewPageInsert, vec![0u8; 3]));
        let stub = RecordImage::new(RecordKind::BigOne, vec![]);
        let lsa = builder.append(TRAN, redo(RecoveryIndex::HeapInsert, stub.encode()));
        let buffer = builder.build();

        assert!(reconstruct(&buffer, lsa, 0, "blobs").is_err());
    }

    #[test]
    fn test_change_link_walks_overflow() {
        let mut builder = LogBuilder::new(128, 0);
        let mut part = Vec::new();
        part.put_i32_le(2);
        part.extend_from_slice(b"tail");
        builder.append(TRAN, overflow_page(&part));
        let normal = row_image(2, b"old");
        let lsa = builder.append(TRAN, redo(RecoveryIndex::OverflowChangeLink, normal.encode()));
        let buffer = builder.build();

        let out = reconstruct(&buffer, lsa, 2, "blobs").unwrap();
        assert_eq!(out.image.kind, RecordKind::BigOne);
        assert_eq!(out.image.bytes, part);
        assert_eq!(out.rcv_index, RecoveryIndex::OverflowChangeLink);
    }

    #[test]
    fn test_relocation_uses_inner_image_and_outer_index() {
        let mut builder = LogBuilder::new(128, 0);
        let moved = row_image(4, b"moved row");
        builder.append(TRAN, redo(RecoveryIndex::HeapInsertNewHome, moved.encode()));
        let stub = RecordImage::new(RecordKind::Relocation, vec![0u8; 10]);
        let lsa = builder.append(TRAN, redo(RecoveryIndex::HeapUpdate, stub.encode()));
        let buffer = builder.build();

        let out = reconstruct(&buffer, lsa, 4, "orders").unwrap();
        assert_eq!(out.image, moved);
        assert_eq!(out.rcv_index, RecoveryIndex::HeapUpdate);
    }

    #[test]
    fn test_two_overflow_rows_in_one_transaction() {
        let mut builder = LogBuilder::new(128, 0);
        let mut first = Vec::new();
        first.put_i32_le(6);
        first.extend_from_slice(&[0xA1; 50]);
        builder.append(TRAN, RecordBody::DummyOverflow);
        builder.append(TRAN, overflow_page(&first[..30]));
        builder.append(TRAN, overflow_page(&first[30..]));
        let stub = RecordImage::new(RecordKind::BigOne, vec![0u8; 8]);
        let first_lsa = builder.append(TRAN, redo(RecoveryIndex::HeapInsert, stub.encode()));

        let mut second = Vec::new();
        second.put_i32_le(6);
        second.extend_from_slice(&[0xB2; 40]);
        builder.append(TRAN, RecordBody::DummyOverflow);
        builder.append(TRAN, overflow_page(&second));
        let second_lsa = builder.append(TRAN, redo(RecoveryIndex::HeapInsert, stub.encode()));
        let buffer = builder.build();

        let out = reconstruct(&buffer, first_lsa, 6, "blobs").unwrap();
        assert_eq!(out.image.bytes, first);

        // The second walk stops at its own DUMMY_OVERFLOW.
        let out = reconstruct(&buffer, second_lsa, 6, "blobs").unwrap();
        assert_eq!(out.image.kind, RecordKind::BigOne);
        assert_eq!(out.image.bytes, second);
        assert_eq!(buffer.fixed_count(), 0);
    }

    #[test]
    fn test_relocation_to_big_one_walks_from_inner_record() {
        let mut builder = LogBuilder::new(128, 0);
        let mut row = Vec::new();
        row.put_i32_le(4);
        row.extend_from_slice(&[0x5A; 90]);
        builder.append(TRAN, RecordBody::DummyOverflow);
        builder.append(TRAN, overflow_page(&row[..60]));
        builder.append(TRAN, overflow_page(&row[60..]));
        let big = RecordImage::new(RecordKind::BigOne, vec![0u8; 8]);
        builder.append(TRAN, redo(RecoveryIndex::HeapInsertNewHome, big.encode()));
        let stub = RecordImage::new(RecordKind::Relocation, vec![0u8; 10]);
        let lsa = builder.append(TRAN, redo(RecoveryIndex::HeapUpdate, stub.encode()));
        let buffer = builder.build();

        let out = reconstruct(&buffer, lsa, 4, "blobs").unwrap();
        assert_eq!(out.image.kind, RecordKind::BigOne);
        assert_eq!(out.image.bytes, row);
        assert_eq!(out.rcv_index, RecoveryIndex::HeapUpdate);
        assert_eq!(buffer.fixed_count(), 0);
    }

    #[test]
    fn test_relocation_depth_is_bounded() {
        let mut builder = LogBuilder::new(128, 0);
        builder.append(TRAN, redo(RecoveryIndex::HeapInsert, row_image(0, b"x").encode()));
        let stub = RecordImage::new(RecordKind::Relocation, vec![]);
        let mut lsa = Lsa::NULL;
        for _ in 0..=MAX_RELOCATION_DEPTH {
            lsa = builder.append(TRAN, redo(RecoveryIndex::HeapUpdate, stub.encode()));
        }
        let buffer = builder.build();

        let err = reconstruct(&buffer, lsa, 0, "orders").unwrap_err();
        assert!(err.to_string().contains("relocation"));
    }

    #[test]
    fn test_relocation_to_foreign_record_fails() {
        let mut builder = LogBuilder::new(128, 0);
        let other = builder.append(12, redo(RecoveryIndex::HeapInsert, row_image(0, b"x").encode()));
        let stub = RecordImage::new(RecordKind::Relocation, vec![]);
        let lsa = builder.append_linked(TRAN, other, redo(RecoveryIndex::HeapUpdate, stub.encode()));
        let buffer = builder.build();

        assert!(reconstruct(&buffer, lsa, 0, "orders").is_err());
    }

    #[test]
    fn test_group_mismatch_is_inconsistent() {
        let mut builder = LogBuilder::new(128, 0);
        let lsa = builder.append(TRAN, redo(RecoveryIndex::HeapInsert, row_image(7, b"r").encode()));
        let buffer = builder.build();

        let err = reconstruct(&buffer, lsa, 3, "orders").unwrap_err();
        assert!(matches!(err, ApplierError::DecodeInconsistency { .. }));
    }

    #[test]
    fn test_shard_metadata_may_show_global_group() {
        let mut builder = LogBuilder::new(128, 0);
        let lsa = builder.append(TRAN, redo(RecoveryIndex::HeapInsert, row_image(0, b"r").encode()));
        let buffer = builder.build();

        assert!(reconstruct(&buffer, lsa, 3, "shard_gid_skey_info").is_ok());
        assert!(reconstruct(&buffer, lsa, 3, "orders").is_err());
    }

    #[test]
    fn test_assign_address_skips_group_check() {
        let mut builder = LogBuilder::new(128, 0);
        let image = RecordImage::new(RecordKind::AssignAddress, vec![]);
        let lsa = builder.append(TRAN, redo(RecoveryIndex::HeapInsert, image.encode()));
        let buffer = builder.build();

        let out = reconstruct(&buffer, lsa, 42, "orders").unwrap();
        assert_eq!(out.image.kind, RecordKind::AssignAddress);
    }

    #[test]
    fn test_foreign_target_record_is_inconsistent() {
        let mut builder = LogBuilder::new(128, 0);
        let lsa = builder.append(TRAN + 1, redo(RecoveryIndex::HeapInsert, row_image(0, b"r").encode()));
        let buffer = builder.build();

        assert!(reconstruct(&buffer, lsa, 0, "orders").is_err());
    }

    #[test]
    fn test_target_must_be_heap_record() {
        let mut builder = LogBuilder::new(128, 0);
        let lsa = builder.append(TRAN, RecordBody::Commit { at_time: 0 });
        let buffer = builder.build();

        assert!(reconstruct(&buffer, lsa, 0, "orders").is_err());
    }
}
