//! Fuzz target for record decoding.
//!
//! Treats the input as a single log page and reads a record at offset 0,
//! then decodes the input as a row image. Neither may panic, and a page
//! fetched by the reader must always be released.

#![no_main]

use libfuzzer_sys::fuzz_target;
use log_applier::reconstruct::RecordImage;
use log_applier::wal::{LogHeader, LogPage, LogReader, MemoryPageBuffer};
use log_applier::Lsa;

fuzz_target!(|data: &[u8]| {
    let _ = RecordImage::decode(Lsa::new(0, 0), data);

    if data.is_empty() || data.len() > i16::MAX as usize {
        return;
    }
    let header = LogHeader {
        eof_lsa: Lsa::new(0, data.len() as i16),
        last_flushed_page_id: 0,
        page_size: data.len(),
    };
    let buffer = MemoryPageBuffer::new(header, [LogPage::new(0, data.to_vec())]);
    let reader = LogReader::new(&buffer, header);
    let _ = reader.read_record(Lsa::new(0, 0));
    assert_eq!(buffer.fixed_count(), 0);
});
