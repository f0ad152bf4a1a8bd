//! HTTP handlers for statistics data and settings
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET | `/control/stats` | snapshot, in days if the interval is longer than a week |
//! | GET | `/control/stats_info` | `{"interval": days}` |
//! | POST | `/control/stats_config` | `{"interval": days}` |
//! | POST | `/control/stats_reset` | discard all data |

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tiny_http::Method;

use crate::stats::{StatsContext, StatsError, TimeUnit};
use crate::web::{HttpReply, HttpRequest, RouteRegistrar};

/// Intervals longer than this are reported per day
const HOURS_REPORT_MAX_DAYS: u32 = 7;

#[derive(Debug, Serialize, Deserialize)]
pub struct IntervalConfig {
    pub interval: u32,
}

fn http_error(request: &HttpRequest, status: u16, text: String) -> HttpReply {
    log::info!("Stats: {:?} {}: {}", request.method, request.url, text);
    HttpReply::error(status, text)
}

/// Unit used by `/control/stats` for a given retention interval
pub fn report_units(interval_days: u32) -> TimeUnit {
    if interval_days > HOURS_REPORT_MAX_DAYS {
        TimeUnit::Days
    } else {
        TimeUnit::Hours
    }
}

pub fn handle_stats(context: &StatsContext, request: &HttpRequest) -> HttpReply {
    let units = report_units(context.interval_days());

    let data = match context.get_data(units) {
        Ok(data) => data,
        Err(err) => {
            return http_error(
                request,
                500,
                format!("Couldn't get statistics data: {}", err),
            )
        }
    };

    match serde_json::to_string(&data) {
        Ok(body) => HttpReply::json(body),
        Err(err) => http_error(request, 500, format!("json encode: {}", err)),
    }
}

pub fn handle_stats_info(context: &StatsContext, request: &HttpRequest) -> HttpReply {
    let info = IntervalConfig {
        interval: context.interval_days(),
    };

    match serde_json::to_string(&info) {
        Ok(body) => HttpReply::json(body),
        Err(err) => http_error(request, 500, format!("json encode: {}", err)),
    }
}

pub fn handle_stats_config(context: &StatsContext, request: &HttpRequest) -> HttpReply {
    let config: IntervalConfig = match serde_json::from_slice(&request.body) {
        Ok(config) => config,
        Err(err) => return http_error(request, 400, format!("json decode: {}", err)),
    };

    match context.set_limit(config.interval) {
        Ok(()) => HttpReply::ok(),
        Err(StatsError::UnsupportedInterval { .. }) => {
            http_error(request, 400, "Unsupported interval".to_string())
        }
        Err(err) => http_error(request, 500, err.to_string()),
    }
}

pub fn handle_stats_reset(context: &StatsContext, request: &HttpRequest) -> HttpReply {
    match context.clear() {
        Ok(()) => HttpReply::ok(),
        Err(err) => http_error(request, 500, format!("Couldn't reset statistics: {}", err)),
    }
}

/// Register the statistics routes
pub fn init_web(context: &Arc<StatsContext>, registrar: &dyn RouteRegistrar) {
    let routes: [(Method, &str, fn(&StatsContext, &HttpRequest) -> HttpReply); 4] = [
        (Method::Get, "/control/stats", handle_stats),
        (Method::Post, "/control/stats_reset", handle_stats_reset),
        (Method::Post, "/control/stats_config", handle_stats_config),
        (Method::Get, "/control/stats_info", handle_stats_info),
    ];

    for (method, path, handler) in routes.iter() {
        let context = context.clone();
        let handler = *handler;
        registrar.register(
            method.clone(),
            path,
            Box::new(move |request: &HttpRequest| handler(&context, request)),
        );
    }
}
