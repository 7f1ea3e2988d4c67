//! Wall clock driven by tokio time
//!
//! [`TokioClock`] reports a wall-clock instant that advances with
//! `tokio::time::Instant`. Under a paused test runtime, or when a simulation
//! wants the rotation and the simulated device to share one time base, this
//! keeps the target and the device position consistent.

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use pmorotation::{Clock, ScheduleSlot};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TokioClock {
    wall_origin: DateTime<Utc>,
    origin: Instant,
    offset: FixedOffset,
}

impl TokioClock {
    /// Clock reading `start` now, local time in UTC
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self::with_offset(start, Utc.fix())
    }

    pub fn with_offset(start: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            wall_origin: start,
            origin: Instant::now(),
            offset,
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.origin.elapsed();
        self.wall_origin + chrono::Duration::milliseconds(elapsed.as_millis() as i64)
    }

    fn local_slot(&self, at: DateTime<Utc>) -> ScheduleSlot {
        let local = at.with_timezone(&self.offset);
        ScheduleSlot {
            date: local.date_naive(),
            hour: local.hour() as u8,
        }
    }
}
