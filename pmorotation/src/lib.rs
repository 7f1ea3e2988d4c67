//! # pmorotation
//!
//! Deterministic "live radio" model: given the same catalog, schedule and
//! shared epoch, every listener computes the same on-air track and offset
//! from its own wall clock, without talking to anybody.
//!
//! The crate is pure: no async, no I/O. The stateful playback side lives in
//! `pmoonair`.
//!
//! ## Example
//!
//! ```
//! use chrono::{Duration, TimeZone, Utc};
//! use pmorotation::{resolve, Track};
//!
//! let epoch = Utc.timestamp_millis_opt(1_704_067_200_000).unwrap();
//! let tracks = vec![
//!     Track::new("a", "Alpha", "X", 100.0),
//!     Track::new("b", "Beta", "Y", 50.0),
//! ];
//!
//! let state = resolve(&tracks, epoch, epoch + Duration::seconds(120));
//! assert_eq!(state.active_track_id.as_deref(), Some("b"));
//! assert_eq!(state.offset_secs, 20.0);
//! ```

pub mod catalog;
pub mod clock;
pub mod document;
pub mod error;
pub mod rotation;
pub mod schedule;
pub mod target;
pub mod track;

pub use catalog::{parse_upload_name, Catalog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use document::{LoadReport, RejectReason, Role, Session, StationDocument};
pub use error::{Error, Result};
pub use rotation::{
    cycle_length_ms, epoch_for_direct_play, offset_for_track, resolve, resolve_with_history,
    track_start_ms, RotationState, DEFAULT_HISTORY_LEN,
};
pub use schedule::{resolve_override, ScheduleEntry, ScheduleSlot, ScheduleTable};
pub use target::{resolve_all, resolve_target, Resolution, Target, TargetSource};
pub use track::{Track, FALLBACK_DURATION_SECS, MAX_DURATION_MS};

use chrono::{DateTime, TimeZone, Utc};

/// Default shared epoch, 2024-01-01T00:00:00Z
pub const DEFAULT_EPOCH_MS: i64 = 1_704_067_200_000;

/// Converts an epoch expressed in milliseconds, falling back to
/// [`DEFAULT_EPOCH_MS`] when out of range.
pub fn epoch_from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::milliseconds(DEFAULT_EPOCH_MS))
}

/// The default shared epoch
pub fn default_epoch() -> DateTime<Utc> {
    epoch_from_millis(DEFAULT_EPOCH_MS)
}
