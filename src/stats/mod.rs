//! Query Statistics Engine
//!
//! Records the outcome of every processed DNS query and keeps hourly
//! aggregates for a rolling retention window, reported to the dashboard in
//! hours or days.
//!
//! # Module Structure
//!
//! * `bucket` - per-hour aggregate counters
//! * `topn` - bounded approximate top-N counters for domains and clients
//! * `store` - the ordered bucket window and its retention rules
//! * `query` - snapshot generation and hour/day conversion
//! * `persist` - durable configuration and window snapshots
//! * `context` - the engine handle: configuration, rotation and shutdown
//! * `http` - `/control/stats*` handlers

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::web::RouteRegistrar;

pub mod bucket;
pub mod context;
pub mod errors;
pub mod http;
pub mod persist;
pub mod query;
pub mod store;
pub mod topn;
pub mod unit;

pub use context::StatsContext;
pub use errors::{Result, StatsError};
pub use query::StatsData;
pub use unit::{CurrentUnitSource, WallClockHours};

/// Retention intervals (in days) accepted by `set_limit`
pub const SUPPORTED_INTERVALS: [u32; 5] = [1, 7, 30, 90, 365];

/// Interval used when nothing valid is configured
pub const DEFAULT_INTERVAL_DAYS: u32 = 1;

/// Maximum number of names tracked per bucket and reported per top list
pub const DEFAULT_TOP_LIMIT: usize = 100;

/// Returns true if `days` is one of the supported retention intervals
pub fn check_interval(days: u32) -> bool {
    SUPPORTED_INTERVALS.contains(&days)
}

/// Result of filtering a single DNS request
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterResult {
    NotFiltered,
    Filtered,
    SafeBrowsing,
    SafeSearch,
    Parental,
}

impl FilterResult {
    pub const COUNT: usize = 5;

    pub const ALL: [FilterResult; FilterResult::COUNT] = [
        FilterResult::NotFiltered,
        FilterResult::Filtered,
        FilterResult::SafeBrowsing,
        FilterResult::SafeSearch,
        FilterResult::Parental,
    ];

    /// Position of this result in per-bucket counter arrays
    pub fn index(self) -> usize {
        match self {
            FilterResult::NotFiltered => 0,
            FilterResult::Filtered => 1,
            FilterResult::SafeBrowsing => 2,
            FilterResult::SafeSearch => 3,
            FilterResult::Parental => 4,
        }
    }

    pub fn is_blocked(self) -> bool {
        self != FilterResult::NotFiltered
    }
}

/// A completed DNS query, handed over once by the request pipeline
#[derive(Clone, Debug)]
pub struct Entry {
    pub domain: String,
    pub client: IpAddr,
    pub result: FilterResult,
    /// Processing time in milliseconds
    pub elapsed_ms: u32,
}

/// Granularity of the data points returned by `get_data`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Hours,
    Days,
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeUnit::Hours => write!(f, "hours"),
            TimeUnit::Days => write!(f, "days"),
        }
    }
}

/// Settings that are stored on disk
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Retention interval in days
    pub statistics_interval: u32,
}

impl Default for DiskConfig {
    fn default() -> Self {
        DiskConfig {
            statistics_interval: DEFAULT_INTERVAL_DAYS,
        }
    }
}

/// Invoked once after every successful `set_limit` or `clear`
pub type ConfigModified = Box<dyn Fn(&DiskConfig) + Send + Sync>;

/// Construction-time settings of a `StatsContext`
pub struct StatsConfig {
    /// Window snapshot file. Nothing is persisted if unset.
    pub filename: Option<PathBuf>,
    /// Retention interval in days
    pub limit_days: u32,
    /// Supplies the current hour number. Wall-clock hours if unset.
    pub unit_source: Option<Arc<dyn CurrentUnitSource>>,
    pub config_modified: Option<ConfigModified>,
    /// Where the HTTP handlers get registered. No handlers if unset.
    pub http_register: Option<Arc<dyn RouteRegistrar>>,
    /// How often the background thread checks for an hour boundary
    pub rotation_period: Duration,
    pub top_limit: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            filename: None,
            limit_days: DEFAULT_INTERVAL_DAYS,
            unit_source: None,
            config_modified: None,
            http_register: None,
            rotation_period: Duration::from_secs(60),
            top_limit: DEFAULT_TOP_LIMIT,
        }
    }
}
