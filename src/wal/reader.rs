// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Page-crossing log reads.
//!
//! A [`LogCursor`] reads a byte range that may span any number of pages.
//! For every page it touches it fetches the page, copies the needed slice
//! out, and releases the page before moving on, so at most one page is
//! fixed by a cursor at any time.

use super::buffer::{LogHeader, PageBuffer};
use super::record::{LogRecord, LogRecordHeader, RecordBody, LOG_RECORD_HEADER_SIZE};
use crate::error::{ApplierError, Result};
use crate::lsa::Lsa;
use bytes::Buf;

/// Reads records through a page buffer, bounded by a log header snapshot.
pub struct LogReader<'a, P: PageBuffer + ?Sized> {
    buffer: &'a P,
    header: LogHeader,
}

impl<'a, P: PageBuffer + ?Sized> LogReader<'a, P> {
    pub fn new(buffer: &'a P, header: LogHeader) -> Self {
        Self { buffer, header }
    }

    /// Fetch a fresh log header from the buffer and build a reader on it.
    pub fn open(buffer: &'a P) -> Result<Self> {
        let header = buffer.fetch_header()?;
        if header.page_size <= LOG_RECORD_HEADER_SIZE || header.page_size > i16::MAX as usize {
            return Err(ApplierError::transient(
                "fetch_header",
                format!("unsupported log page size {}", header.page_size),
            ));
        }
        Ok(Self::new(buffer, header))
    }

    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    /// Position a cursor at `lsa`.
    pub fn cursor(&self, lsa: Lsa) -> Result<LogCursor<'a, P>> {
        if lsa.is_null() {
            return Err(ApplierError::inconsistent(lsa, "cannot read at NULL LSA"));
        }
        if lsa.offset as usize >= self.header.page_size {
            return Err(ApplierError::inconsistent(
                lsa,
                format!("offset beyond page size {}", self.header.page_size),
            ));
        }
        if lsa >= self.header.eof_lsa {
            return Err(ApplierError::transient(
                "read_log",
                format!("{} is past end of log {}", lsa, self.header.eof_lsa),
            ));
        }
        Ok(LogCursor {
            buffer: self.buffer,
            header: self.header,
            start: lsa,
            page_id: lsa.page_id,
            offset: lsa.offset as usize,
        })
    }

    /// Read only the header of the record at `lsa`.
    pub fn read_header(&self, lsa: Lsa) -> Result<LogRecordHeader> {
        let mut cursor = self.cursor(lsa)?;
        let bytes = cursor.read_bytes(LOG_RECORD_HEADER_SIZE)?;
        LogRecordHeader::decode(lsa, &bytes)
    }

    /// Read the header and body of the record at `lsa`.
    pub fn read_record(&self, lsa: Lsa) -> Result<LogRecord> {
        let mut cursor = self.cursor(lsa)?;
        let bytes = cursor.read_bytes(LOG_RECORD_HEADER_SIZE)?;
        let header = LogRecordHeader::decode(lsa, &bytes)?;
        let body = RecordBody::read(&mut cursor, header.record_type)?;
        Ok(LogRecord { lsa, header, body })
    }
}

/// Sequential reader over the log byte stream.
pub struct LogCursor<'a, P: PageBuffer + ?Sized> {
    buffer: &'a P,
    header: LogHeader,
    start: Lsa,
    page_id: i64,
    offset: usize,
}

impl<'a, P: PageBuffer + ?Sized> LogCursor<'a, P> {
    /// Current position.
    pub fn position(&self) -> Lsa {
        Lsa::new(self.page_id, self.offset as i16)
    }

    /// Bytes between the current position and the end of the log.
    fn remaining(&self) -> u64 {
        let page_size = self.header.page_size as i64;
        let eof = self.header.eof_lsa;
        let here = self.page_id * page_size + self.offset as i64;
        let end = eof.page_id * page_size + eof.offset as i64;
        end.saturating_sub(here).max(0) as u64
    }

    /// Copy `len` bytes starting at the current position, crossing pages.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if len as u64 > self.remaining() {
            return Err(ApplierError::inconsistent(
                self.start,
                format!("record needs {} bytes past {}, beyond end of log", len, self.position()),
            ));
        }

        let page_size = self.header.page_size;
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            if self.offset == page_size {
                self.page_id += 1;
                self.offset = 0;
            }
            if self.page_id > self.header.last_flushed_page_id {
                return Err(ApplierError::transient(
                    "read_log",
                    format!("page {} not flushed yet", self.page_id),
                ));
            }

            let page = self.buffer.fetch_page(self.page_id)?;
            let copied = copy_from_page(&page.data, page.page_id, self.page_id, page_size, self.offset, len - out.len());
            self.buffer.release_page(self.page_id);
            let slice = copied.map_err(|message| ApplierError::inconsistent(self.start, message))?;

            out.extend_from_slice(slice.as_slice());
            self.offset += slice.len();
        }
        Ok(out)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok((&self.read_bytes(2)?[..]).get_u16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok((&self.read_bytes(4)?[..]).get_u32_le())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok((&self.read_bytes(8)?[..]).get_i64_le())
    }

    /// Read `len` bytes as UTF-8.
    pub fn read_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes)
            .map_err(|e| ApplierError::inconsistent(self.start, format!("invalid utf-8: {}", e)))
    }

    /// Read a `u16` length prefix followed by that many UTF-8 bytes.
    pub fn read_string_u16(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        self.read_string(len)
    }
}

/// Copy up to `wanted` bytes of one page, starting at `offset`.
fn copy_from_page(
    data: &[u8],
    got_page_id: i64,
    want_page_id: i64,
    page_size: usize,
    offset: usize,
    wanted: usize,
) -> std::result::Result<Vec<u8>, String> {
    if got_page_id != want_page_id {
        return Err(format!(
            "buffer returned page {} for page {}",
            got_page_id, want_page_id
        ));
    }
    if data.len() < page_size {
        return Err(format!(
            "page {} truncated to {} of {} bytes",
            want_page_id,
            data.len(),
            page_size
        ));
    }
    let take = wanted.min(page_size - offset);
    Ok(data[offset..offset + take].to_vec())
}
