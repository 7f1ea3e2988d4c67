//! Wall clock capability
//!
//! Rotation only needs "now" as a UTC instant; schedule overrides need the
//! listener's local calendar date and hour. Both go through [`Clock`] so
//! that tests and simulations can drive time explicitly.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, FixedOffset, Local, Offset, Timelike, Utc};

use crate::schedule::ScheduleSlot;

/// Source of the current instant and of the local schedule slot
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Local (date, hour) of `at`
    fn local_slot(&self, at: DateTime<Utc>) -> ScheduleSlot {
        let local = at.with_timezone(&Local);
        ScheduleSlot {
            date: local.date_naive(),
            hour: local.hour() as u8,
        }
    }
}

/// The operating system clock, in the process' local time zone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same instant. The local time zone is a fixed offset so
/// results do not depend on the machine running the tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
    offset: FixedOffset,
}

impl ManualClock {
    /// UTC clock starting at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::with_offset(start, Utc.fix())
    }

    pub fn with_offset(start: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
            offset,
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn advance_ms(&self, ms: i64) {
        self.advance(Duration::milliseconds(ms));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn local_slot(&self, at: DateTime<Utc>) -> ScheduleSlot {
        let local = at.with_timezone(&self.offset);
        ScheduleSlot {
            date: local.date_naive(),
            hour: local.hour() as u8,
        }
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    fn local_slot(&self, at: DateTime<Utc>) -> ScheduleSlot {
        (**self).local_slot(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    #[test]
    fn test_manual_clock_is_shared_between_clones() {
        let start = Utc.with_ymd_and_hms(2024, 3, 10, 13, 59, 0).unwrap();
        let clock = ManualClock::new(start);
        let other = clock.clone();
        other.advance_ms(90_000);
        assert_eq!(clock.now(), start + Duration::seconds(90));
    }

    #[test]
    fn test_manual_clock_local_slot_uses_offset() {
        let start = Utc.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).unwrap();
        let utc = ManualClock::new(start);
        let slot = utc.local_slot(start);
        assert_eq!(slot.hour, 23);
        assert_eq!(slot.date.to_string(), "2024-03-10");

        let paris = ManualClock::with_offset(start, FixedOffset::east_opt(3600).unwrap());
        let slot = paris.local_slot(start);
        assert_eq!(slot.hour, 0);
        assert_eq!(slot.date.to_string(), "2024-03-11");
        assert_eq!(slot.date.weekday(), chrono::Weekday::Mon);
    }
}
