//! Error types for the statistics engine

use derive_more::{Display, Error, From};

#[derive(Debug, Display, From, Error)]
pub enum StatsError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Json(serde_json::Error),
    #[display(fmt = "unsupported statistics interval: {} days", days)]
    #[from(ignore)]
    UnsupportedInterval { days: u32 },
    #[display(fmt = "statistics storage is corrupted: {}", reason)]
    #[from(ignore)]
    Corrupted { reason: String },
}

impl StatsError {
    /// Validation errors are caused by the caller, everything else is a
    /// storage failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, StatsError::UnsupportedInterval { .. })
    }
}

pub type Result<T> = std::result::Result<T, StatsError>;
