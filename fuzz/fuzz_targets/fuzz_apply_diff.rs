//! Fuzz target for diff-encoded updates.
//!
//! `apply_diff` must never panic and must always produce a row as long as
//! the diff, whatever the length of the before-image.

#![no_main]

use libfuzzer_sys::fuzz_target;
use log_applier::reconstruct::{apply_diff, make_diff};

fuzz_target!(|data: (&[u8], &[u8])| {
    let (undo, diff) = data;

    let full = apply_diff(undo, diff);
    assert_eq!(full.len(), diff.len());

    // Round trip through make_diff
    let again = make_diff(undo, &full);
    assert_eq!(apply_diff(undo, &again), full);
});
