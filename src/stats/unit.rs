//! Source of the current unit ID (hour number)

use chrono::Utc;

/// Supplies the identifier of the hour that updates are counted into.
///
/// Unit IDs must increase by one per hour. Tests inject a controllable source
/// to make rotation deterministic.
pub trait CurrentUnitSource: Send + Sync {
    fn current_unit(&self) -> u32;
}

impl<F> CurrentUnitSource for F
where
    F: Fn() -> u32 + Send + Sync,
{
    fn current_unit(&self) -> u32 {
        self()
    }
}

/// Hours elapsed since the Unix epoch
#[derive(Copy, Clone, Debug, Default)]
pub struct WallClockHours;

impl CurrentUnitSource for WallClockHours {
    fn current_unit(&self) -> u32 {
        (Utc::now().timestamp() / 3600) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_wall_clock_is_current_hour() {
        let expected = (Utc::now().timestamp() / 3600) as u32;
        let unit = WallClockHours.current_unit();
        // may cross an hour boundary between the two calls
        assert!(unit == expected || unit == expected + 1);
    }

    #[test]
    fn test_closure_source() {
        let hour = Arc::new(AtomicU32::new(10));
        let handle = hour.clone();
        let source = move || handle.load(Ordering::SeqCst);

        assert_eq!(source.current_unit(), 10);
        hour.store(11, Ordering::SeqCst);
        assert_eq!(source.current_unit(), 11);
    }
}
