//! Snapshot generation
//!
//! Converts the stored hourly buckets into the unit requested by the caller.
//! In `Days` mode every 24 consecutive buckets (oldest first) make one data
//! point; a trailing group with fewer hours is reported as a partial day.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::stats::bucket::BucketCounters;
use crate::stats::topn::TopN;
use crate::stats::{FilterResult, TimeUnit};

pub const HOURS_PER_DAY: usize = 24;

/// `{"name": count}`, the dashboard's format for top list entries
pub type TopItem = BTreeMap<String, u64>;

/// Statistics snapshot returned by `/control/stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsData {
    pub time_units: TimeUnit,

    pub num_dns_queries: u64,
    pub num_blocked_filtering: u64,
    pub num_replaced_safebrowsing: u64,
    pub num_replaced_safesearch: u64,
    pub num_replaced_parental: u64,
    /// Average processing time over the whole window, milliseconds
    pub avg_processing_time: f64,

    pub dns_queries: Vec<u64>,
    pub blocked_filtering: Vec<u64>,
    pub replaced_safebrowsing: Vec<u64>,
    pub replaced_safesearch: Vec<u64>,
    pub replaced_parental: Vec<u64>,
    /// Average processing time per data point, milliseconds
    pub avg_processing_times: Vec<f64>,

    pub top_queried_domains: Vec<TopItem>,
    pub top_blocked_domains: Vec<TopItem>,
    pub top_clients: Vec<TopItem>,
}

impl StatsData {
    pub fn empty(time_units: TimeUnit) -> StatsData {
        StatsData {
            time_units,
            num_dns_queries: 0,
            num_blocked_filtering: 0,
            num_replaced_safebrowsing: 0,
            num_replaced_safesearch: 0,
            num_replaced_parental: 0,
            avg_processing_time: 0.0,
            dns_queries: Vec::new(),
            blocked_filtering: Vec::new(),
            replaced_safebrowsing: Vec::new(),
            replaced_safesearch: Vec::new(),
            replaced_parental: Vec::new(),
            avg_processing_times: Vec::new(),
            top_queried_domains: Vec::new(),
            top_blocked_domains: Vec::new(),
            top_clients: Vec::new(),
        }
    }

    /// Number of data points in the series
    pub fn len(&self) -> usize {
        self.dns_queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dns_queries.is_empty()
    }
}

/// Sums of a group of buckets
#[derive(Clone, Debug, Default)]
struct Point {
    by_result: [u64; FilterResult::COUNT],
    total_queries: u64,
    total_elapsed_ms: u64,
}

impl Point {
    fn add(&mut self, counters: &BucketCounters) {
        for (sum, count) in self.by_result.iter_mut().zip(counters.by_result.iter()) {
            *sum += count;
        }
        self.total_queries += counters.total_queries;
        self.total_elapsed_ms += counters.total_elapsed_ms;
    }

    fn count(&self, result: FilterResult) -> u64 {
        self.by_result[result.index()]
    }

    fn avg_processing_time(&self) -> f64 {
        average(self.total_elapsed_ms, self.total_queries)
    }
}

/// Mean milliseconds per query, zero when nothing was counted
pub fn average(total_elapsed_ms: u64, total_queries: u64) -> f64 {
    if total_queries == 0 {
        return 0.0;
    }
    total_elapsed_ms as f64 / total_queries as f64
}

/// Build a snapshot from buckets ordered oldest first
pub fn aggregate(units: &[(u32, BucketCounters)], time_units: TimeUnit, top_limit: usize) -> StatsData {
    let group_size = match time_units {
        TimeUnit::Hours => 1,
        TimeUnit::Days => HOURS_PER_DAY,
    };

    let mut data = StatsData::empty(time_units);
    let mut total = Point::default();

    for group in units.chunks(group_size) {
        let mut point = Point::default();
        for (_, counters) in group {
            point.add(counters);
        }

        data.dns_queries.push(point.total_queries);
        data.blocked_filtering.push(point.count(FilterResult::Filtered));
        data.replaced_safebrowsing.push(point.count(FilterResult::SafeBrowsing));
        data.replaced_safesearch.push(point.count(FilterResult::SafeSearch));
        data.replaced_parental.push(point.count(FilterResult::Parental));
        data.avg_processing_times.push(point.avg_processing_time());

        for (sum, count) in total.by_result.iter_mut().zip(point.by_result.iter()) {
            *sum += count;
        }
        total.total_queries += point.total_queries;
        total.total_elapsed_ms += point.total_elapsed_ms;
    }

    data.num_dns_queries = total.total_queries;
    data.num_blocked_filtering = total.count(FilterResult::Filtered);
    data.num_replaced_safebrowsing = total.count(FilterResult::SafeBrowsing);
    data.num_replaced_safesearch = total.count(FilterResult::SafeSearch);
    data.num_replaced_parental = total.count(FilterResult::Parental);
    data.avg_processing_time = total.avg_processing_time();

    data.top_queried_domains = merge_top(units.iter().map(|(_, c)| &c.domains), top_limit);
    data.top_blocked_domains = merge_top(units.iter().map(|(_, c)| &c.blocked_domains), top_limit);
    data.top_clients = merge_top(units.iter().map(|(_, c)| &c.clients), top_limit);

    data
}

/// Sum per-bucket top lists and keep the `limit` largest
fn merge_top<'a, K, I>(lists: I, limit: usize) -> Vec<TopItem>
where
    K: Eq + Hash + Clone + ToString + 'a,
    I: Iterator<Item = &'a TopN<K>>,
{
    let mut merged: HashMap<String, u64> = HashMap::new();
    for list in lists {
        for (key, count) in list.iter() {
            *merged.entry(key.to_string()).or_insert(0) += count;
        }
    }

    let mut sorted: Vec<(String, u64)> = merged.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted.truncate(limit);

    sorted
        .into_iter()
        .map(|(name, count)| {
            let mut item = TopItem::new();
            item.insert(name, count);
            item
        })
        .collect()
}
