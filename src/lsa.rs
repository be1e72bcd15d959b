// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Log sequence addresses.
//!
//! An [`Lsa`] names the first byte of a WAL record: the log page it starts on
//! and the byte offset inside that page. LSAs are totally ordered by
//! `(page_id, offset)`, which is also the order records were written in.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoded size of an LSA inside a record (`i64` page id + `i16` offset).
pub const LSA_SIZE: usize = 10;

/// Position of a record in the write-ahead log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsa {
    pub page_id: i64,
    pub offset: i16,
}

impl Lsa {
    /// The null address. Terminates backward chains; sorts below every real LSA.
    pub const NULL: Lsa = Lsa {
        page_id: -1,
        offset: -1,
    };

    pub const fn new(page_id: i64, offset: i16) -> Self {
        Self { page_id, offset }
    }

    pub fn is_null(&self) -> bool {
        self.page_id < 0 || self.offset < 0
    }
}

impl Default for Lsa {
    fn default() -> Self {
        Lsa::NULL
    }
}

impl fmt::Display for Lsa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}|{})", self.page_id, self.offset)
    }
}
