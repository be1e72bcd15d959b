//! Fuzz target for payload decompression.
//!
//! This tests that `unzip_payload` never panics on arbitrary input.

#![no_main]

use libfuzzer_sys::fuzz_target;
use log_applier::reconstruct::unzip_payload;
use log_applier::wal::StoredPayload;

fuzz_target!(|data: &[u8]| {
    // Should never panic, whatever the frame looks like
    let _ = unzip_payload(&StoredPayload::zipped(data.to_vec()));
});
