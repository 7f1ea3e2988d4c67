//! Target resolution: schedule override first, rotation as fallback

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::rotation::{self, RotationState};
use crate::schedule::{ScheduleSlot, ScheduleTable};
use crate::track::Track;

/// Where the on-air track comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSource {
    Rotation,
    Schedule,
}

impl std::fmt::Display for TargetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetSource::Rotation => write!(f, "rotation"),
            TargetSource::Schedule => write!(f, "schedule"),
        }
    }
}

/// The (track, offset) pair the local playback must converge to
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub track_id: String,
    /// May be negative or past the end for scheduled tracks
    pub offset_secs: f64,
    pub source: TargetSource,
}

/// Full resolution result of one tick
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub rotation: RotationState,
    pub target: Option<Target>,
}

/// Resolves what should be on air at `now`.
///
/// A scheduled override replaces the track identity only: its offset comes
/// from the rotation formula applied to the overriding track. An override
/// naming a track missing from the catalog is ignored.
pub fn resolve_target(
    tracks: &[Track],
    schedule: &ScheduleTable,
    epoch: DateTime<Utc>,
    now: DateTime<Utc>,
    slot: ScheduleSlot,
) -> Option<Target> {
    let rotation = rotation::resolve(tracks, epoch, now);
    target_from(tracks, schedule, epoch, now, slot, &rotation)
}

/// Same as [`resolve_target`] but also returns the rotation state, which the
/// UI needs for next/history.
pub fn resolve_all(
    tracks: &[Track],
    schedule: &ScheduleTable,
    epoch: DateTime<Utc>,
    now: DateTime<Utc>,
    slot: ScheduleSlot,
    history_len: usize,
) -> Resolution {
    let rotation = rotation::resolve_with_history(tracks, epoch, now, history_len);
    let target = target_from(tracks, schedule, epoch, now, slot, &rotation);
    Resolution { rotation, target }
}

fn target_from(
    tracks: &[Track],
    schedule: &ScheduleTable,
    epoch: DateTime<Utc>,
    now: DateTime<Utc>,
    slot: ScheduleSlot,
    rotation: &RotationState,
) -> Option<Target> {
    if let Some(scheduled) = schedule.resolve_override(slot) {
        match rotation::offset_for_track(tracks, epoch, now, scheduled) {
            Some(offset_secs) => {
                return Some(Target {
                    track_id: scheduled.to_string(),
                    offset_secs,
                    source: TargetSource::Schedule,
                });
            }
            None => {
                debug!(
                    track_id = scheduled,
                    date = %slot.date,
                    hour = slot.hour,
                    "Scheduled track not in catalog, falling back to rotation"
                );
            }
        }
    }

    rotation.active_track_id.as_ref().map(|id| Target {
        track_id: id.clone(),
        offset_secs: rotation.offset_secs,
        source: TargetSource::Rotation,
    })
}
