// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Log page buffer contract.
//!
//! The page buffer manager owns log pages; the applier fixes a page with
//! [`PageBuffer::fetch_page`], copies what it needs, and unfixes it with
//! [`PageBuffer::release_page`] straight away. Implementations synchronize
//! internally and may be shared by several appliers.

use crate::error::{ApplierError, Result};
use crate::lsa::Lsa;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// One fixed log page.
#[derive(Debug, Clone)]
pub struct LogPage {
    pub page_id: i64,
    pub data: Bytes,
}

impl LogPage {
    pub fn new(page_id: i64, data: impl Into<Bytes>) -> Self {
        Self {
            page_id,
            data: data.into(),
        }
    }
}

/// Snapshot of the log header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// First LSA past the last record appended to the log.
    pub eof_lsa: Lsa,
    /// Highest page id that is durable and may be fetched.
    pub last_flushed_page_id: i64,
    /// Size in bytes of every log page.
    pub page_size: usize,
}

/// Trait defining what we need from the WAL page buffer manager.
pub trait PageBuffer: Send + Sync + 'static {
    /// Fix a page in the buffer and return it.
    ///
    /// Fails with a transient error if the page cannot be made resident.
    fn fetch_page(&self, page_id: i64) -> Result<LogPage>;

    /// Unfix a page previously returned by [`fetch_page()`](Self::fetch_page).
    fn release_page(&self, page_id: i64);

    /// Read the current log header.
    fn fetch_header(&self) -> Result<LogHeader>;
}

/// Page buffer backed by an in-memory page map.
///
/// Tracks fixes so tests can assert every fetched page was released.
pub struct MemoryPageBuffer {
    pages: RwLock<BTreeMap<i64, LogPage>>,
    header: RwLock<LogHeader>,
    unavailable: RwLock<HashSet<i64>>,
    fixed: AtomicUsize,
    fetches: AtomicUsize,
}

impl MemoryPageBuffer {
    pub fn new(header: LogHeader, pages: impl IntoIterator<Item = LogPage>) -> Self {
        let pages = pages.into_iter().map(|p| (p.page_id, p)).collect();
        Self {
            pages: RwLock::new(pages),
            header: RwLock::new(header),
            unavailable: RwLock::new(HashSet::new()),
            fixed: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Replace (or add) a page.
    pub fn put_page(&self, page: LogPage) {
        self.pages.write().insert(page.page_id, page);
    }

    /// Make fetches of `page_id` fail until [`restore_page()`](Self::restore_page).
    pub fn make_unavailable(&self, page_id: i64) {
        self.unavailable.write().insert(page_id);
    }

    pub fn restore_page(&self, page_id: i64) {
        self.unavailable.write().remove(&page_id);
    }

    pub fn set_header(&self, header: LogHeader) {
        *self.header.write() = header;
    }

    /// Pages currently fixed (fetched and not yet released).
    pub fn fixed_count(&self) -> usize {
        self.fixed.load(Ordering::SeqCst)
    }

    /// Total successful fetches since creation.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn page_ids(&self) -> Vec<i64> {
        self.pages.read().keys().copied().collect()
    }
}

impl PageBuffer for MemoryPageBuffer {
    fn fetch_page(&self, page_id: i64) -> Result<LogPage> {
        if self.unavailable.read().contains(&page_id) {
            return Err(ApplierError::transient(
                "fetch_page",
                format!("page {} unavailable", page_id),
            ));
        }
        let page = self.pages.read().get(&page_id).cloned().ok_or_else(|| {
            ApplierError::transient("fetch_page", format!("page {} not in buffer", page_id))
        })?;
        self.fixed.fetch_add(1, Ordering::SeqCst);
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(page)
    }

    fn release_page(&self, _page_id: i64) {
        // Saturating: a stray release must not wrap the counter.
        let _ = self
            .fixed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn fetch_header(&self) -> Result<LogHeader> {
        Ok(*self.header.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> LogHeader {
        LogHeader {
            eof_lsa: Lsa::new(1, 0),
            last_flushed_page_id: 0,
            page_size: 16,
        }
    }

    #[test]
    fn test_fetch_and_release_tracks_fixes() {
        let buffer = MemoryPageBuffer::new(header(), vec![LogPage::new(0, vec![0u8; 16])]);
        let page = buffer.fetch_page(0).unwrap();
        assert_eq!(page.page_id, 0);
        assert_eq!(buffer.fixed_count(), 1);
        buffer.release_page(0);
        assert_eq!(buffer.fixed_count(), 0);
        assert_eq!(buffer.fetch_count(), 1);
    }

    #[test]
    fn test_missing_page_is_transient() {
        let buffer = MemoryPageBuffer::new(header(), vec![]);
        let err = buffer.fetch_page(3).unwrap_err();
        assert!(matches!(err, ApplierError::TransientIo { .. }));
        assert_eq!(buffer.fixed_count(), 0);
    }

    #[test]
    fn test_unavailable_page_can_be_restored() {
        let buffer = MemoryPageBuffer::new(header(), vec![LogPage::new(0, vec![0u8; 16])]);
        buffer.make_unavailable(0);
        assert!(buffer.fetch_page(0).is_err());
        buffer.restore_page(0);
        assert!(buffer.fetch_page(0).is_ok());
    }

    #[test]
    fn test_stray_release_does_not_underflow() {
        let buffer = MemoryPageBuffer::new(header(), vec![]);
        buffer.release_page(9);
        assert_eq!(buffer.fixed_count(), 0);
    }
}
