// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Why a window was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The window reached `max_window_count` records.
    Count,
    /// The window timer fired with records pending.
    Timer,
    /// A caller forced the window closed.
    Flush,
    /// The pipeline was draining during shutdown.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CloseReason::Count => "count",
            CloseReason::Timer => "timer",
            CloseReason::Flush => "flush",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(reason)
    }
}

/// An ordered, fixed-size group of records closed by the windowed batcher.
///
/// Records keep the order in which the batcher received them. Sequence
/// numbers increase by one per closed window within a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    sequence: u64,
    reason: CloseReason,
    records: Box<[T]>,
}

impl<T> Batch<T> {
    pub fn new(sequence: u64, reason: CloseReason, records: Vec<T>) -> Self {
        Self {
            sequence,
            reason,
            records: records.into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub fn close_reason(&self) -> CloseReason {
        self.reason
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.records.iter()
    }

    #[must_use]
    pub fn into_records(self) -> Vec<T> {
        self.records.into_vec()
    }
}

impl<T> IntoIterator for Batch<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_vec().into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Batch<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
