// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity byte buffer holding delimited records until they are
//! written to a backing target.

pub const DEFAULT_DELIMITER: &[u8] = b"\n";

/// Accumulates serialized records separated by a delimiter.
///
/// The buffer never grows beyond `capacity`: the backing allocation is made
/// once and reused after every [`clear`](Self::clear). A delimiter is only
/// written between records, so a record of exactly `capacity` bytes fits an
/// empty buffer.
#[derive(Debug)]
pub struct MemoryAccumulationBuffer {
    data: Vec<u8>,
    capacity: usize,
    delimiter: &'static [u8],
    records: usize,
}

impl MemoryAccumulationBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_delimiter(capacity, DEFAULT_DELIMITER)
    }

    #[must_use]
    pub fn with_delimiter(capacity: usize, delimiter: &'static [u8]) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            delimiter,
            records: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write cursor, in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when no record is buffered. Empty records still count.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records
    }

    /// Bytes a record of `len` bytes would take, delimiter included.
    fn required(&self, len: usize) -> usize {
        if self.records == 0 {
            len
        } else {
            len + self.delimiter.len()
        }
    }

    #[must_use]
    pub fn fits(&self, len: usize) -> bool {
        self.required(len) <= self.remaining()
    }

    /// Appends `record`, returning `false` and leaving the buffer untouched
    /// when it does not fit.
    pub fn try_append(&mut self, record: &[u8]) -> bool {
        if !self.fits(record.len()) {
            return false;
        }
        if self.records > 0 {
            self.data.extend_from_slice(self.delimiter);
        }
        self.data.extend_from_slice(record);
        self.records += 1;
        true
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.records = 0;
    }
}
