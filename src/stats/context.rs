//! The `StatsContext` holds the statistics state of the server
//!
//! It is created once at startup and shared (`Arc`) with the DNS pipeline,
//! which calls `update`, and with the HTTP layer, which reads snapshots and
//! changes the configuration.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::{Builder, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::stats::errors::{Result, StatsError};
use crate::stats::persist;
use crate::stats::query::{self, StatsData};
use crate::stats::store::{CounterStore, Rotation};
use crate::stats::unit::{CurrentUnitSource, WallClockHours};
use crate::stats::{
    check_interval, http, ConfigModified, DiskConfig, Entry, StatsConfig, TimeUnit,
    DEFAULT_INTERVAL_DAYS,
};

struct RotationThread {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct StatsContext {
    store: CounterStore,
    unit_source: Arc<dyn CurrentUnitSource>,
    filename: Option<PathBuf>,
    config_modified: Option<ConfigModified>,
    /// Set when the persisted window could not be read. Cleared by `clear`.
    storage_error: RwLock<Option<String>>,
    /// Unit of the newest bucket written by the last successful flush
    last_flushed_unit: AtomicU32,
    /// Held from snapshot to rename so flushes land in order
    flush_lock: Mutex<()>,
    rotation: Mutex<Option<RotationThread>>,
}

impl StatsContext {
    /// Create the engine, restore the persisted window, register the HTTP
    /// handlers and start the rotation thread.
    pub fn new(conf: StatsConfig) -> Result<Arc<StatsContext>> {
        let limit_days = if check_interval(conf.limit_days) {
            conf.limit_days
        } else {
            log::warn!(
                "Stats: unsupported interval {} days, using {}",
                conf.limit_days,
                DEFAULT_INTERVAL_DAYS
            );
            DEFAULT_INTERVAL_DAYS
        };

        let unit_source = conf
            .unit_source
            .unwrap_or_else(|| Arc::new(WallClockHours) as Arc<dyn CurrentUnitSource>);

        let started_unit = unit_source.current_unit();
        let context = Arc::new(StatsContext {
            store: CounterStore::new(limit_days * 24, conf.top_limit),
            unit_source,
            filename: conf.filename,
            config_modified: conf.config_modified,
            storage_error: RwLock::new(None),
            last_flushed_unit: AtomicU32::new(started_unit),
            flush_lock: Mutex::new(()),
            rotation: Mutex::new(None),
        });

        context.load();

        if let Some(registrar) = conf.http_register {
            http::init_web(&context, registrar.as_ref());
        }

        context.start_rotation(conf.rotation_period)?;

        log::info!("Stats: initialized with a limit of {} days", limit_days);
        Ok(context)
    }

    fn load(&self) {
        let path = match self.filename {
            Some(ref path) => path,
            None => return,
        };

        match persist::load_window(path, self.store.top_limit()) {
            Ok(Some(units)) => {
                let count = units.len();
                self.store.restore(self.current_unit(), units);
                log::info!(
                    "Stats: loaded {} unit(s) from {}, {} in window",
                    count,
                    path.display(),
                    self.store.len()
                );
            }
            Ok(None) => log::debug!("Stats: no snapshot at {}", path.display()),
            Err(err) => {
                log::error!("Stats: can't load {}: {}", path.display(), err);
                *self.storage_error.write() = Some(err.to_string());
            }
        }
    }

    fn start_rotation(self: &Arc<Self>, period: Duration) -> Result<()> {
        let (stop, stopped) = mpsc::channel::<()>();
        let context: Weak<StatsContext> = Arc::downgrade(self);

        let handle = Builder::new()
            .name("stats-rotation".into())
            .spawn(move || loop {
                match stopped.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => match context.upgrade() {
                        Some(context) => {
                            context.rotate();
                        }
                        None => break,
                    },
                    _ => break,
                }
            })?;

        *self.rotation.lock() = Some(RotationThread { stop, handle });
        Ok(())
    }

    fn current_unit(&self) -> u32 {
        self.unit_source.current_unit()
    }

    fn notify(&self, config: &DiskConfig) {
        if let Some(ref config_modified) = self.config_modified {
            config_modified(config);
        }
    }

    /// Count a completed query. Never blocks on I/O and never fails.
    pub fn update(&self, entry: &Entry) {
        self.store.update(self.current_unit(), entry);
    }

    /// Evict expired buckets and start the bucket of the current hour.
    ///
    /// Runs from the rotation thread; `update` performs the same work lazily,
    /// whichever comes first does it. The window is persisted once per hour
    /// boundary, even if an update already created the new bucket.
    pub fn rotate(&self) -> Rotation {
        let current = self.current_unit();
        let rotation = self.store.advance(current);
        if !rotation.is_noop() {
            log::debug!(
                "Stats: rotated window, {} bucket(s) evicted, {} created",
                rotation.evicted,
                rotation.created
            );
        }

        // one attempt per hour, a failed write is retried at the next boundary
        if self.last_flushed_unit.swap(current, Ordering::SeqCst) != current {
            if let Err(err) = self.flush() {
                log::error!("Stats: can't persist window: {}", err);
            }
        }
        rotation
    }

    /// Statistics for the retention window in the given unit
    pub fn get_data(&self, time_units: TimeUnit) -> Result<StatsData> {
        if let Some(ref reason) = *self.storage_error.read() {
            return Err(StatsError::Corrupted {
                reason: reason.clone(),
            });
        }

        let started = Instant::now();
        self.store.advance(self.current_unit());
        let units = self.store.snapshot();
        let data = query::aggregate(&units, time_units, self.store.top_limit());
        log::debug!("Stats: prepared data in {:?}", started.elapsed());

        Ok(data)
    }

    /// Change the retention interval.
    ///
    /// Buckets beyond the new limit are dropped immediately.
    pub fn set_limit(&self, days: u32) -> Result<()> {
        if !check_interval(days) {
            return Err(StatsError::UnsupportedInterval { days });
        }

        let evicted = self.store.set_limit_hours(days * 24);
        log::info!("Stats: set limit to {} days, {} bucket(s) evicted", days, evicted);

        self.notify(&DiskConfig {
            statistics_interval: days,
        });
        Ok(())
    }

    /// Discard all collected data. The retention interval is kept.
    pub fn clear(&self) -> Result<()> {
        self.store.clear();
        *self.storage_error.write() = None;
        log::info!("Stats: cleared");

        self.flush()?;
        self.notify(&self.disk_config());
        Ok(())
    }

    pub fn interval_days(&self) -> u32 {
        self.store.limit_hours() / 24
    }

    pub fn disk_config(&self) -> DiskConfig {
        DiskConfig {
            statistics_interval: self.interval_days(),
        }
    }

    /// Persist the current retention interval to `path`
    pub fn write_disk_config(&self, path: &Path) -> Result<DiskConfig> {
        let config = self.disk_config();
        config.save(path)?;
        Ok(config)
    }

    /// Write the window snapshot, if a file is configured.
    ///
    /// An unreadable snapshot is left in place until `clear` is called.
    pub fn flush(&self) -> Result<()> {
        let path = match self.filename {
            Some(ref path) => path,
            None => return Ok(()),
        };

        if let Some(ref reason) = *self.storage_error.read() {
            return Err(StatsError::Corrupted {
                reason: reason.clone(),
            });
        }

        let _guard = self.flush_lock.lock();
        let current = self.current_unit();
        persist::save_window(path, &self.store.snapshot())?;
        self.last_flushed_unit.store(current, Ordering::SeqCst);
        Ok(())
    }

    /// Stop the rotation thread and persist the window.
    ///
    /// Not safe to call in parallel with any other method: the caller must
    /// make sure no update, query or configuration call is in flight.
    pub fn close(&self) -> Result<()> {
        if let Some(rotation) = self.rotation.lock().take() {
            let _ = rotation.stop.send(());
            if rotation.handle.join().is_err() {
                log::error!("Stats: rotation thread panicked");
            }
        }

        self.flush()?;
        log::debug!("Stats: closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use crate::stats::FilterResult;

    struct FakeClock(AtomicU32);

    impl FakeClock {
        fn set(&self, unit: u32) {
            self.0.store(unit, Ordering::SeqCst);
        }
    }

    impl CurrentUnitSource for FakeClock {
        fn current_unit(&self) -> u32 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn context(clock: &Arc<FakeClock>) -> Arc<StatsContext> {
        StatsContext::new(StatsConfig {
            unit_source: Some(clock.clone()),
            rotation_period: Duration::from_secs(3600),
            ..StatsConfig::default()
        })
        .unwrap()
    }

    fn entry(result: FilterResult) -> Entry {
        Entry {
            domain: "example.org".to_string(),
            client: "127.0.0.1".parse().unwrap(),
            result,
            elapsed_ms: 10,
        }
    }

    #[test]
    fn test_update_and_get_data() {
        let clock = Arc::new(FakeClock(AtomicU32::new(1000)));
        let stats = context(&clock);

        stats.update(&entry(FilterResult::NotFiltered));
        stats.update(&entry(FilterResult::Filtered));
        clock.set(1001);
        stats.update(&entry(FilterResult::Parental));

        let data = stats.get_data(TimeUnit::Hours).unwrap();
        assert_eq!(data.dns_queries, vec![2, 1]);
        assert_eq!(data.blocked_filtering, vec![1, 0]);
        assert_eq!(data.replaced_parental, vec![0, 1]);
        assert_eq!(data.avg_processing_time, 10.0);
        stats.close().unwrap();
    }

    #[test]
    fn test_get_data_follows_the_clock() {
        let clock = Arc::new(FakeClock(AtomicU32::new(1000)));
        let stats = context(&clock);

        stats.update(&entry(FilterResult::NotFiltered));
        clock.set(1002);

        let data = stats.get_data(TimeUnit::Hours).unwrap();
        assert_eq!(data.dns_queries, vec![1, 0, 0]);
    }

    #[test]
    fn test_set_limit_validates_and_notifies() {
        let clock = Arc::new(FakeClock(AtomicU32::new(1000)));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let stats = StatsContext::new(StatsConfig {
            unit_source: Some(clock.clone()),
            config_modified: Some(Box::new(move |config: &DiskConfig| {
                assert_eq!(config.statistics_interval, 7);
                seen.fetch_add(1, Ordering::SeqCst);
            })),
            ..StatsConfig::default()
        })
        .unwrap();

        assert!(matches!(
            stats.set_limit(3),
            Err(StatsError::UnsupportedInterval { days: 3 })
        ));
        assert_eq!(stats.interval_days(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        stats.set_limit(7).unwrap();
        assert_eq!(stats.interval_days(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_limit_shrinks_window() {
        let clock = Arc::new(FakeClock(AtomicU32::new(0)));
        let stats = context(&clock);
        stats.set_limit(7).unwrap();

        stats.update(&entry(FilterResult::NotFiltered));
        clock.set(100);
        stats.update(&entry(FilterResult::NotFiltered));
        assert_eq!(stats.get_data(TimeUnit::Hours).unwrap().len(), 101);

        stats.set_limit(1).unwrap();
        let data = stats.get_data(TimeUnit::Hours).unwrap();
        assert_eq!(data.len(), 24);
        assert_eq!(data.num_dns_queries, 1);
    }

    #[test]
    fn test_clear_keeps_interval() {
        let clock = Arc::new(FakeClock(AtomicU32::new(5)));
        let stats = context(&clock);
        stats.set_limit(30).unwrap();
        stats.update(&entry(FilterResult::SafeBrowsing));

        stats.clear().unwrap();

        for unit in [TimeUnit::Hours, TimeUnit::Days].iter() {
            let data = stats.get_data(*unit).unwrap();
            assert!(data.is_empty());
            assert_eq!(data.num_dns_queries, 0);
            assert!(data.top_clients.is_empty());
        }
        assert_eq!(stats.interval_days(), 30);
    }

    #[test]
    fn test_rotate_is_noop_within_the_hour() {
        let clock = Arc::new(FakeClock(AtomicU32::new(5)));
        let stats = context(&clock);
        stats.update(&entry(FilterResult::NotFiltered));

        assert!(stats.rotate().is_noop());
        clock.set(6);
        assert_eq!(stats.rotate().created, 1);
        assert!(stats.rotate().is_noop());
    }

    #[test]
    fn test_rotate_persists_when_update_crossed_the_hour() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let clock = Arc::new(FakeClock(AtomicU32::new(100)));
        let stats = StatsContext::new(StatsConfig {
            filename: Some(path.clone()),
            unit_source: Some(clock.clone()),
            rotation_period: Duration::from_secs(3600),
            ..StatsConfig::default()
        })
        .unwrap();

        stats.update(&entry(FilterResult::NotFiltered));
        assert!(stats.rotate().is_noop());
        assert!(!path.exists());

        clock.set(101);
        stats.update(&entry(FilterResult::Filtered));
        assert!(stats.rotate().is_noop());

        let units = persist::load_window(&path, 10).unwrap().unwrap();
        let ids: Vec<u32> = units.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![100, 101]);

        std::fs::remove_file(&path).unwrap();
        stats.rotate();
        assert!(!path.exists());
    }

    #[test]
    fn test_parallel_flushes_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let clock = Arc::new(FakeClock(AtomicU32::new(100)));
        let stats = StatsContext::new(StatsConfig {
            filename: Some(path.clone()),
            unit_source: Some(clock.clone()),
            rotation_period: Duration::from_secs(3600),
            ..StatsConfig::default()
        })
        .unwrap();
        stats.update(&entry(FilterResult::NotFiltered));

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    let mut failures = 0;
                    for round in 0..100 {
                        let result = if worker == 0 && round % 10 == 0 {
                            stats.clear()
                        } else {
                            stats.flush()
                        };
                        if result.is_err() {
                            failures += 1;
                        }
                    }
                    failures
                })
            })
            .collect();

        let failures: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
        assert_eq!(failures, 0);
        assert!(persist::load_window(&path, 10).unwrap().is_some());
        assert!(!dir.path().join("stats.json.tmp").exists());
    }

    #[test]
    fn test_concurrent_set_limit_reports_each_interval() {
        let clock = Arc::new(FakeClock(AtomicU32::new(1000)));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let stats = StatsContext::new(StatsConfig {
            unit_source: Some(clock.clone()),
            config_modified: Some(Box::new(move |config: &DiskConfig| {
                recorder.lock().push(config.statistics_interval);
            })),
            rotation_period: Duration::from_secs(3600),
            ..StatsConfig::default()
        })
        .unwrap();

        let workers: Vec<_> = [7u32, 30]
            .iter()
            .map(|days| {
                let stats = stats.clone();
                let days = *days;
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        stats.set_limit(days).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), 400);
        assert_eq!(seen.iter().filter(|days| **days == 7).count(), 200);
        assert_eq!(seen.iter().filter(|days| **days == 30).count(), 200);
    }

    #[test]
    fn test_background_rotation() {
        let clock = Arc::new(FakeClock(AtomicU32::new(5)));
        let stats = StatsContext::new(StatsConfig {
            unit_source: Some(clock.clone()),
            rotation_period: Duration::from_millis(10),
            ..StatsConfig::default()
        })
        .unwrap();
        stats.update(&entry(FilterResult::NotFiltered));
        clock.set(7);

        let deadline = Instant::now() + Duration::from_secs(5);
        while stats.store.len() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(stats.store.len(), 3);
        stats.close().unwrap();
    }

    #[test]
    fn test_corrupted_snapshot_reported_until_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, b"not json").unwrap();

        let clock = Arc::new(FakeClock(AtomicU32::new(5)));
        let stats = StatsContext::new(StatsConfig {
            filename: Some(path.clone()),
            unit_source: Some(clock.clone()),
            ..StatsConfig::default()
        })
        .unwrap();

        stats.update(&entry(FilterResult::NotFiltered));
        assert!(matches!(
            stats.get_data(TimeUnit::Hours),
            Err(StatsError::Corrupted { .. })
        ));
        assert!(stats.close().is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"not json");

        stats.clear().unwrap();
        assert!(stats.get_data(TimeUnit::Hours).unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_initial_limit_falls_back() {
        let clock = Arc::new(FakeClock(AtomicU32::new(5)));
        let stats = StatsContext::new(StatsConfig {
            limit_days: 2,
            unit_source: Some(clock.clone()),
            ..StatsConfig::default()
        })
        .unwrap();
        assert_eq!(stats.interval_days(), DEFAULT_INTERVAL_DAYS);
    }
}
