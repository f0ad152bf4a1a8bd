//! DNS Query Statistics
//!
//! Aggregates the outcome of every query processed by a filtering DNS server
//! into hourly buckets and serves dashboard summaries over HTTP.
//!
//! # Architecture
//!
//! The crate is divided into two main modules:
//! * `stats` - counting, retention and reporting engine
//! * `web` - HTTP control API the engine registers its handlers with

/// Statistics engine
pub mod stats;

/// Web server and HTTP API
pub mod web;
