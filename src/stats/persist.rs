//! Durable state: the YAML disk configuration and the window snapshot
//!
//! Both files are replaced atomically: the new contents go to `<path>.tmp`,
//! are synced, and are then renamed over the old file. A crash mid-write
//! leaves the previous file intact.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::stats::bucket::BucketCounters;
use crate::stats::errors::{Result, StatsError};
use crate::stats::{DiskConfig, FilterResult};

const SNAPSHOT_VERSION: u32 = 1;

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Replace `path` with `data` without ever exposing a partial file
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);

    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(data)?;
        file.sync_all()
    });
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }

    fs::rename(&tmp, path)?;
    Ok(())
}

impl DiskConfig {
    /// Read the configuration, or the defaults if the file does not exist
    pub fn load(path: &Path) -> Result<DiskConfig> {
        match fs::read_to_string(path) {
            Ok(data) => Ok(serde_yaml::from_str(&data)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(DiskConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        write_atomic(path, data.as_bytes())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedUnit {
    id: u32,
    by_result: [u64; FilterResult::COUNT],
    total_queries: u64,
    total_elapsed_ms: u64,
    domains: Vec<(String, u64)>,
    blocked_domains: Vec<(String, u64)>,
    clients: Vec<(IpAddr, u64)>,
}

impl PersistedUnit {
    fn from_counters(id: u32, counters: &BucketCounters) -> PersistedUnit {
        PersistedUnit {
            id,
            by_result: counters.by_result,
            total_queries: counters.total_queries,
            total_elapsed_ms: counters.total_elapsed_ms,
            domains: counters.domains.sorted(),
            blocked_domains: counters.blocked_domains.sorted(),
            clients: counters.clients.sorted(),
        }
    }

    fn into_counters(self, top_limit: usize) -> Result<(u32, BucketCounters)> {
        let counted = self
            .by_result
            .iter()
            .try_fold(0u64, |sum, count| sum.checked_add(*count))
            .ok_or_else(|| StatsError::Corrupted {
                reason: format!("unit {}: result counters overflow", self.id),
            })?;
        if counted != self.total_queries {
            return Err(StatsError::Corrupted {
                reason: format!(
                    "unit {}: {} results recorded for {} queries",
                    self.id, counted, self.total_queries
                ),
            });
        }

        let mut counters = BucketCounters::new(top_limit);
        counters.by_result = self.by_result;
        counters.total_queries = self.total_queries;
        counters.total_elapsed_ms = self.total_elapsed_ms;
        for (domain, count) in &self.domains {
            counters.domains.add_count(domain, *count);
        }
        for (domain, count) in &self.blocked_domains {
            counters.blocked_domains.add_count(domain, *count);
        }
        for (client, count) in &self.clients {
            counters.clients.add_count(client, *count);
        }

        Ok((self.id, counters))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedWindow {
    version: u32,
    units: Vec<PersistedUnit>,
}

/// Write the window, oldest bucket first
pub fn save_window(path: &Path, units: &[(u32, BucketCounters)]) -> Result<()> {
    let window = PersistedWindow {
        version: SNAPSHOT_VERSION,
        units: units
            .iter()
            .map(|(id, counters)| PersistedUnit::from_counters(*id, counters))
            .collect(),
    };

    let data = serde_json::to_vec(&window)?;
    write_atomic(path, &data)
}

/// Read a window written by `save_window`. Returns `None` if there is no
/// snapshot yet.
pub fn load_window(path: &Path, top_limit: usize) -> Result<Option<Vec<(u32, BucketCounters)>>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let window: PersistedWindow = serde_json::from_slice(&data).map_err(|err| StatsError::Corrupted {
        reason: format!("{}: {}", path.display(), err),
    })?;

    if window.version != SNAPSHOT_VERSION {
        return Err(StatsError::Corrupted {
            reason: format!("unknown snapshot version {}", window.version),
        });
    }

    let mut units = Vec::with_capacity(window.units.len());
    let mut last_id: Option<u32> = None;
    for unit in window.units {
        if let Some(last) = last_id {
            if unit.id <= last {
                return Err(StatsError::Corrupted {
                    reason: format!("unit {} follows unit {}", unit.id, last),
                });
            }
        }
        last_id = Some(unit.id);
        units.push(unit.into_counters(top_limit)?);
    }

    Ok(Some(units))
}
