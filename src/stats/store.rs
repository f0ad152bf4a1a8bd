//! The bucket window: counter store and retention rules
//!
//! Buckets are kept oldest first with contiguous unit IDs. The newest bucket
//! is the one updates are counted into. Creating, evicting and clearing
//! buckets requires the write lock; counting into an existing bucket only
//! needs the read lock plus the bucket's own mutex.

use std::cmp;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::stats::bucket::{BucketCounters, TimeBucket};
use crate::stats::Entry;

/// Outcome of advancing the window to a new unit
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rotation {
    pub evicted: usize,
    pub created: usize,
}

impl Rotation {
    pub fn is_noop(&self) -> bool {
        self.evicted == 0 && self.created == 0
    }
}

#[derive(Debug)]
struct Window {
    buckets: VecDeque<Arc<TimeBucket>>,
    limit_hours: u32,
    top_limit: usize,
}

impl Window {
    fn oldest_allowed(&self, current: u32) -> u32 {
        current.saturating_sub(self.limit_hours.saturating_sub(1))
    }

    fn needs_advance(&self, current: u32) -> bool {
        let oldest_allowed = self.oldest_allowed(current);
        match (self.buckets.front(), self.buckets.back()) {
            (Some(front), Some(back)) => {
                front.unit_id() < oldest_allowed || back.unit_id() < current
            }
            _ => false,
        }
    }

    /// Evict buckets that fell out of `[current - limit + 1, current]` and
    /// fill the window up to `current` with empty buckets.
    ///
    /// An empty window only gets a bucket when `create` is set.
    fn advance(&mut self, current: u32, create: bool) -> Rotation {
        let mut rotation = Rotation::default();
        let had_buckets = !self.buckets.is_empty();
        let oldest_allowed = self.oldest_allowed(current);

        while let Some(front) = self.buckets.front() {
            if front.unit_id() >= oldest_allowed {
                break;
            }
            self.buckets.pop_front();
            rotation.evicted += 1;
        }

        let first_missing = match self.buckets.back() {
            Some(back) if back.unit_id() >= current => None,
            Some(back) => Some(back.unit_id() + 1),
            None if create || had_buckets => Some(current),
            None => None,
        };

        if let Some(first_missing) = first_missing {
            for unit_id in cmp::max(first_missing, oldest_allowed)..=current {
                self.buckets
                    .push_back(Arc::new(TimeBucket::new(unit_id, self.top_limit)));
                rotation.created += 1;
            }
        }

        rotation.evicted += self.truncate();
        rotation
    }

    /// Drop the oldest buckets until the window fits the limit
    fn truncate(&mut self) -> usize {
        let mut evicted = 0;
        while self.buckets.len() > self.limit_hours as usize {
            self.buckets.pop_front();
            evicted += 1;
        }
        evicted
    }
}

/// Owns every bucket of the retention window
#[derive(Debug)]
pub struct CounterStore {
    window: RwLock<Window>,
}

impl CounterStore {
    pub fn new(limit_hours: u32, top_limit: usize) -> CounterStore {
        CounterStore {
            window: RwLock::new(Window {
                buckets: VecDeque::new(),
                limit_hours: cmp::max(limit_hours, 1),
                top_limit,
            }),
        }
    }

    /// Count `entry` into the bucket of `current`, creating it if needed.
    ///
    /// If the clock went backwards the entry goes into the newest bucket.
    pub fn update(&self, current: u32, entry: &Entry) {
        {
            let window = self.window.read();
            if let Some(newest) = window.buckets.back() {
                if newest.unit_id() >= current {
                    newest.record(entry);
                    return;
                }
            }
        }

        let mut window = self.window.write();
        let rotation = window.advance(current, true);
        if rotation.evicted > 0 {
            log::debug!("Stats: evicted {} bucket(s) on update", rotation.evicted);
        }
        if let Some(newest) = window.buckets.back() {
            newest.record(entry);
        }
    }

    /// Rotate the window to `current` without creating a bucket in an empty
    /// window. A second call for the same unit is a no-op.
    pub fn advance(&self, current: u32) -> Rotation {
        if !self.window.read().needs_advance(current) {
            return Rotation::default();
        }
        self.window.write().advance(current, false)
    }

    /// Change the window length, evicting the oldest buckets if it shrank
    pub fn set_limit_hours(&self, limit_hours: u32) -> usize {
        let mut window = self.window.write();
        window.limit_hours = cmp::max(limit_hours, 1);
        window.truncate()
    }

    pub fn limit_hours(&self) -> u32 {
        self.window.read().limit_hours
    }

    pub fn top_limit(&self) -> usize {
        self.window.read().top_limit
    }

    pub fn len(&self) -> usize {
        self.window.read().buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.read().buckets.is_empty()
    }

    /// Discard all buckets
    pub fn clear(&self) {
        self.window.write().buckets.clear();
    }

    /// Replace the window with previously persisted buckets.
    ///
    /// Buckets must be sorted by unit ID. Units outside the window around
    /// `current` are dropped and gaps are filled with empty buckets.
    pub fn restore(&self, current: u32, units: Vec<(u32, BucketCounters)>) {
        let mut window = self.window.write();
        window.buckets.clear();

        let oldest_allowed = window.oldest_allowed(current);
        let top_limit = window.top_limit;
        for (unit_id, counters) in units {
            if unit_id < oldest_allowed || unit_id > current {
                continue;
            }
            let next = window.buckets.back().map(|b| b.unit_id().saturating_add(1));
            if let Some(next) = next {
                for gap in next..unit_id {
                    window
                        .buckets
                        .push_back(Arc::new(TimeBucket::new(gap, top_limit)));
                }
            }
            window
                .buckets
                .push_back(Arc::new(TimeBucket::with_counters(unit_id, counters)));
        }

        window.advance(current, false);
    }

    /// Read-consistent copy of every bucket, oldest first
    pub fn snapshot(&self) -> Vec<(u32, BucketCounters)> {
        let window = self.window.read();
        window
            .buckets
            .iter()
            .map(|bucket| (bucket.unit_id(), bucket.snapshot()))
            .collect()
    }
}
