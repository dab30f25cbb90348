// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

/// Counts records rejected at the ingest boundary.
///
/// `since_flush` only grows between flush ticks and is swapped back to zero
/// exactly once per tick by [`DropCounter::take`]. `total` is never reset.
#[derive(Debug, Default)]
pub struct DropCounter {
    since_flush: AtomicU64,
    total: AtomicU64,
}

/// Snapshot taken when the counter is reset on a flush tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropReport {
    pub dropped: u64,
    pub total: u64,
}

impl DropCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) {
        self.since_flush.fetch_add(1, Ordering::AcqRel);
        self.total.fetch_add(1, Ordering::AcqRel);
    }

    #[must_use]
    pub fn since_flush(&self) -> u64 {
        self.since_flush.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Resets the since-flush count and returns what it held.
    pub fn take(&self) -> DropReport {
        let dropped = self.since_flush.swap(0, Ordering::AcqRel);
        DropReport {
            dropped,
            total: self.total(),
        }
    }
}
