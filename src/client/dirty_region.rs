// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::protocol::Delta;

/// A delta waiting for the next flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyRegion {
    /// The queued change.
    pub delta: Delta,
    /// When the change was observed.
    pub enqueued_at: Instant,
}

/// FIFO of pending deltas for one document.
///
/// Unbounded; only a flush drains it, and it drains in enqueue order.
#[derive(Debug, Default)]
pub struct DirtyRegionQueue {
    regions: VecDeque<DirtyRegion>,
}

impl DirtyRegionQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a delta.
    pub fn add(&mut self, delta: Delta, now: Instant) {
        self.regions.push_back(DirtyRegion {
            delta,
            enqueued_at: now,
        });
    }

    /// Removes and returns the oldest region.
    pub fn remove_next(&mut self) -> Option<DirtyRegion> {
        self.regions.pop_front()
    }

    /// Drops everything queued. Returns how many regions were dropped.
    pub fn purge(&mut self) -> usize {
        let dropped = self.regions.len();
        self.regions.clear();
        dropped
    }

    /// Number of queued regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Enqueue time of the oldest region.
    #[must_use]
    pub fn oldest(&self) -> Option<Instant> {
        self.regions.front().map(|r| r.enqueued_at)
    }
}
