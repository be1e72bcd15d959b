// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lays out records into log pages.
//!
//! Produces byte-exact log images for fixtures and fuzzing. There is no
//! durability here: the builder only fills pages and links headers.

use super::buffer::{LogHeader, LogPage, MemoryPageBuffer};
use super::record::{put_lsa, LogRecordHeader, RecordBody, LOG_RECORD_HEADER_SIZE};
use crate::lsa::{Lsa, LSA_SIZE};
use bytes::BytesMut;
use std::collections::HashMap;

/// Byte offset of `forw_lsa` inside a record header.
const FORW_LSA_OFFSET: usize = 2 * LSA_SIZE;

/// Appends records to an in-memory log image.
#[derive(Debug, Clone)]
pub struct LogBuilder {
    page_size: usize,
    first_page_id: i64,
    stream: Vec<u8>,
    last_record: Option<usize>,
    last_by_tran: HashMap<i32, Lsa>,
}

impl LogBuilder {
    /// # Panics
    ///
    /// If `page_size` cannot hold a record header or does not fit an `i16`
    /// offset.
    pub fn new(page_size: usize, first_page_id: i64) -> Self {
        assert!(
            page_size > LOG_RECORD_HEADER_SIZE && page_size <= i16::MAX as usize,
            "unsupported page size {}",
            page_size
        );
        Self {
            page_size,
            first_page_id,
            stream: Vec::new(),
            last_record: None,
            last_by_tran: HashMap::new(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// LSA the next appended record will get.
    pub fn next_lsa(&self) -> Lsa {
        self.lsa_at(self.stream.len())
    }

    /// Append a record for `tran_id`, linking it behind the transaction's
    /// previous record.
    pub fn append(&mut self, tran_id: i32, body: RecordBody) -> Lsa {
        let prev = self.last_by_tran.get(&tran_id).copied().unwrap_or(Lsa::NULL);
        self.append_linked(tran_id, prev, body)
    }

    /// Append with an explicit `prev_tran_lsa`.
    pub fn append_linked(&mut self, tran_id: i32, prev_tran_lsa: Lsa, body: RecordBody) -> Lsa {
        let pos = self.stream.len();
        let lsa = self.lsa_at(pos);
        let back_lsa = self.last_record.map(|p| self.lsa_at(p)).unwrap_or(Lsa::NULL);

        let header = LogRecordHeader {
            prev_tran_lsa,
            back_lsa,
            forw_lsa: Lsa::NULL,
            tran_id,
            record_type: body.record_type(),
        };
        let mut out = BytesMut::with_capacity(LOG_RECORD_HEADER_SIZE + 64);
        header.encode(&mut out);
        body.encode(&mut out);

        if let Some(previous) = self.last_record {
            self.set_forw_lsa_at(previous, lsa);
        }
        self.stream.extend_from_slice(&out);
        self.last_record = Some(pos);
        self.last_by_tran.insert(tran_id, lsa);
        lsa
    }

    /// Pad with zeros so the next record starts at `lsa`.
    ///
    /// # Panics
    ///
    /// If `lsa` is behind the current end of the log.
    pub fn seek(&mut self, lsa: Lsa) {
        let pos = self.position_of(lsa);
        assert!(pos >= self.stream.len(), "cannot seek backwards to {}", lsa);
        self.stream.resize(pos, 0);
    }

    /// Overwrite the `forw_lsa` of the record at `lsa`.
    pub fn set_forw_lsa(&mut self, lsa: Lsa, forw_lsa: Lsa) {
        let pos = self.position_of(lsa);
        self.set_forw_lsa_at(pos, forw_lsa);
    }

    /// Overwrite one byte of the image.
    pub fn corrupt_byte(&mut self, lsa: Lsa, delta: usize, value: u8) {
        let pos = self.position_of(lsa) + delta;
        self.stream[pos] = value;
    }

    /// First LSA past the last record.
    pub fn eof_lsa(&self) -> Lsa {
        self.next_lsa()
    }

    pub fn header(&self) -> LogHeader {
        let eof = self.eof_lsa();
        LogHeader {
            eof_lsa: eof,
            last_flushed_page_id: eof.page_id,
            page_size: self.page_size,
        }
    }

    /// Cut the image into pages, the page holding the EOF included.
    pub fn pages(&self) -> Vec<LogPage> {
        let eof = self.eof_lsa();
        (self.first_page_id..=eof.page_id)
            .map(|page_id| {
                let start = (page_id - self.first_page_id) as usize * self.page_size;
                let end = (start + self.page_size).min(self.stream.len());
                let mut data = vec![0u8; self.page_size];
                if start < end {
                    data[..end - start].copy_from_slice(&self.stream[start..end]);
                }
                LogPage::new(page_id, data)
            })
            .collect()
    }

    pub fn build(&self) -> MemoryPageBuffer {
        MemoryPageBuffer::new(self.header(), self.pages())
    }

    /// Push the current image into an existing buffer, as a growing log would.
    pub fn publish_to(&self, buffer: &MemoryPageBuffer) {
        for page in self.pages() {
            buffer.put_page(page);
        }
        buffer.set_header(self.header());
    }

    fn lsa_at(&self, pos: usize) -> Lsa {
        Lsa::new(
            self.first_page_id + (pos / self.page_size) as i64,
            (pos % self.page_size) as i16,
        )
    }

    fn position_of(&self, lsa: Lsa) -> usize {
        (lsa.page_id - self.first_page_id) as usize * self.page_size + lsa.offset as usize
    }

    fn set_forw_lsa_at(&mut self, pos: usize, forw_lsa: Lsa) {
        let mut patch = Vec::with_capacity(LSA_SIZE);
        put_lsa(&mut patch, forw_lsa);
        let at = pos + FORW_LSA_OFFSET;
        self.stream[at..at + LSA_SIZE].copy_from_slice(&patch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::reader::LogReader;
    use crate::wal::record::{ReplDataRecord, StoredPayload};
    use crate::wal::{HeapAddress, PageBuffer, RecoveryIndex};

    fn redo(bytes: Vec<u8>) -> RecordBody {
        RecordBody::Redo {
            rcv_index: RecoveryIndex::HeapInsert,
            address: HeapAddress { page_id: 5, slot: 1 },
            redo: StoredPayload::plain(bytes),
        }
    }

    #[test]
    fn test_links_are_patched() {
        let mut builder = LogBuilder::new(128, 10);
        let a = builder.append(7, redo(vec![1; 20]));
        let b = builder.append(8, RecordBody::Dummy);
        let c = builder.append(7, RecordBody::Commit { at_time: 1 });

        let buffer = builder.build();
        let reader = LogReader::open(&buffer).unwrap();
        let ha = reader.read_header(a).unwrap();
        let hb = reader.read_header(b).unwrap();
        let hc = reader.read_header(c).unwrap();

        assert_eq!(a, Lsa::new(10, 0));
        assert_eq!(ha.forw_lsa, b);
        assert_eq!(hb.forw_lsa, c);
        assert_eq!(hb.back_lsa, a);
        assert!(hc.forw_lsa.is_null());
        assert_eq!(hc.prev_tran_lsa, a);
        assert!(ha.prev_tran_lsa.is_null());
    }

    #[test]
    fn test_records_straddle_pages() {
        let mut builder = LogBuilder::new(64, 0);
        let lsa = builder.append(1, redo((0..150u8).collect()));
        let buffer = builder.build();
        let reader = LogReader::open(&buffer).unwrap();
        let record = reader.read_record(lsa).unwrap();

        match record.body {
            RecordBody::Redo { redo, .. } => assert_eq!(redo.bytes, (0..150u8).collect::<Vec<_>>()),
            other => panic!("unexpected body {:?}", other),
        }
        assert!(buffer.page_ids().len() >= 3);
        assert_eq!(buffer.fixed_count(), 0);
    }

    #[test]
    fn test_seek_places_record() {
        let mut builder = LogBuilder::new(256, 99);
        builder.seek(Lsa::new(100, 50));
        let lsa = builder.append(
            3,
            RecordBody::ReplicationData(ReplDataRecord {
                op: 1,
                group_id: 0,
                target_lsa: Lsa::NULL,
                class_name: "t".into(),
                key: vec![1],
            }),
        );
        assert_eq!(lsa, Lsa::new(100, 50));
        let buffer = builder.build();
        let header = buffer.fetch_header().unwrap();
        assert!(header.eof_lsa > lsa);
        assert_eq!(header.last_flushed_page_id, header.eof_lsa.page_id);
    }
}
