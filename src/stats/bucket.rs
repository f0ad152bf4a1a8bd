//! Aggregate counters for one hour

use std::net::IpAddr;

use parking_lot::Mutex;

use crate::stats::topn::TopN;
use crate::stats::{Entry, FilterResult};

/// Counters collected during one unit
#[derive(Clone, Debug)]
pub struct BucketCounters {
    pub by_result: [u64; FilterResult::COUNT],
    pub total_queries: u64,
    pub total_elapsed_ms: u64,
    pub domains: TopN<String>,
    pub blocked_domains: TopN<String>,
    pub clients: TopN<IpAddr>,
}

impl BucketCounters {
    pub fn new(top_limit: usize) -> BucketCounters {
        BucketCounters {
            by_result: [0; FilterResult::COUNT],
            total_queries: 0,
            total_elapsed_ms: 0,
            domains: TopN::new(top_limit),
            blocked_domains: TopN::new(top_limit),
            clients: TopN::new(top_limit),
        }
    }

    pub fn record(&mut self, entry: &Entry) {
        self.by_result[entry.result.index()] += 1;
        self.total_queries += 1;
        self.total_elapsed_ms += u64::from(entry.elapsed_ms);

        if !entry.domain.is_empty() {
            self.domains.add(&entry.domain);
            if entry.result.is_blocked() {
                self.blocked_domains.add(&entry.domain);
            }
        }
        self.clients.add(&entry.client);
    }

    pub fn count(&self, result: FilterResult) -> u64 {
        self.by_result[result.index()]
    }
}

/// One hour of the retention window.
///
/// The counters have their own lock so that updates to the current hour do
/// not need exclusive access to the window.
#[derive(Debug)]
pub struct TimeBucket {
    unit_id: u32,
    counters: Mutex<BucketCounters>,
}

impl TimeBucket {
    pub fn new(unit_id: u32, top_limit: usize) -> TimeBucket {
        TimeBucket::with_counters(unit_id, BucketCounters::new(top_limit))
    }

    pub fn with_counters(unit_id: u32, counters: BucketCounters) -> TimeBucket {
        TimeBucket {
            unit_id,
            counters: Mutex::new(counters),
        }
    }

    pub fn unit_id(&self) -> u32 {
        self.unit_id
    }

    pub fn record(&self, entry: &Entry) {
        self.counters.lock().record(entry);
    }

    /// Copy of the counters at this moment
    pub fn snapshot(&self) -> BucketCounters {
        self.counters.lock().clone()
    }
}
