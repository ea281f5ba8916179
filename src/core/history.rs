//! Execution history.
//!
//! A fixed-capacity ring that drops its oldest entry when full, and the
//! record the scheduler appends after every time slice.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::core::lane::LaneId;

/// One completed time slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Lane that held the intersection.
    pub lane: LaneId,
    /// Slice start in milliseconds since epoch.
    pub start_ms: u128,
    /// Slice end in milliseconds since epoch.
    pub end_ms: u128,
    /// Vehicles that crossed during the slice.
    pub vehicles_processed: u32,
}

impl ExecutionRecord {
    /// Slice duration in milliseconds.
    #[must_use]
    pub const fn duration_ms(&self) -> u128 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// Bounded circular buffer; the oldest entry is overwritten when full.
#[derive(Debug, Clone)]
pub struct HistoryRing<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> HistoryRing<T> {
    /// Ring retaining at most `capacity` entries. A zero capacity retains nothing.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Append an entry, returning the one it displaced, if any.
    pub fn push(&mut self, entry: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(entry);
        }
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        self.entries.iter()
    }

    /// Most recent entry.
    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Entries currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum entries retained.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl HistoryRing<ExecutionRecord> {
    /// Vehicles processed across the retained window.
    #[must_use]
    pub fn vehicles_in_window(&self) -> u64 {
        self.entries
            .iter()
            .map(|r| u64::from(r.vehicles_processed))
            .sum()
    }

    /// Vehicles per minute over the retained window, from the first slice
    /// start to the last slice end. Zero when the window is empty or instant.
    #[must_use]
    pub fn window_throughput_per_min(&self) -> f64 {
        let (Some(first), Some(last)) = (self.entries.front(), self.entries.back()) else {
            return 0.0;
        };
        let span_ms = last.end_ms.saturating_sub(first.start_ms);
        if span_ms == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let per_min = self.vehicles_in_window() as f64 * 60_000.0 / span_ms as f64;
        per_min
    }
}
