//! Rotation resolver
//!
//! Every listener derives the same on-air position from three inputs only:
//! the ordered track list, the shared epoch and the local wall clock. The
//! playlist is treated as an infinite loop started at the epoch.
//!
//! All arithmetic is done in integer milliseconds so that two processes
//! holding the same catalog always land on the same track boundary.

use chrono::{DateTime, Duration, Utc};

use crate::track::Track;

/// Number of previously played tracks reported by [`resolve`]
pub const DEFAULT_HISTORY_LEN: usize = 5;

/// Derived rotation state, recomputed from scratch on every tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RotationState {
    pub active_track_id: Option<String>,
    /// Seconds elapsed inside the active track, `0 <= offset < duration`
    pub offset_secs: f64,
    pub next_track_id: Option<String>,
    /// Most recent first, never contains the active id
    pub history_ids: Vec<String>,
}

impl RotationState {
    /// True when no track is on air (empty catalog)
    pub fn is_idle(&self) -> bool {
        self.active_track_id.is_none()
    }
}

/// Resolves the on-air state with the default history length.
pub fn resolve(tracks: &[Track], epoch: DateTime<Utc>, now: DateTime<Utc>) -> RotationState {
    resolve_with_history(tracks, epoch, now, DEFAULT_HISTORY_LEN)
}

/// Resolves the on-air state, reporting at most `history_len` previous tracks.
pub fn resolve_with_history(
    tracks: &[Track],
    epoch: DateTime<Utc>,
    now: DateTime<Utc>,
    history_len: usize,
) -> RotationState {
    let Some(position) = rotation_position_ms(tracks, epoch, now) else {
        return RotationState::default();
    };

    let mut running = 0i64;
    let mut active = tracks.len() - 1;
    let mut offset_ms = 0i64;
    for (index, track) in tracks.iter().enumerate() {
        let duration = track.effective_duration_ms();
        if position < running.saturating_add(duration) {
            active = index;
            offset_ms = position - running;
            break;
        }
        running = running.saturating_add(duration);
    }

    let len = tracks.len();
    let active_id = &tracks[active].id;
    let next = &tracks[(active + 1) % len].id;

    // Walk backwards with wraparound; a track listed twice in the catalog
    // may come back as the active one and is then skipped.
    let steps = history_len.min(len - 1);
    let history_ids = (1..=steps)
        .map(|step| &tracks[(active + len - step) % len].id)
        .filter(|id| *id != active_id)
        .cloned()
        .collect();

    RotationState {
        active_track_id: Some(active_id.clone()),
        offset_secs: ms_to_secs(offset_ms),
        next_track_id: Some(next.clone()),
        history_ids,
    }
}

/// Length of one full rotation cycle in milliseconds (0 for an empty list).
pub fn cycle_length_ms(tracks: &[Track]) -> i64 {
    tracks
        .iter()
        .map(Track::effective_duration_ms)
        .fold(0i64, i64::saturating_add)
}

/// Position inside the current cycle, `0 <= position < cycle_length`.
///
/// Uses the Euclidean remainder so that a clock set before the epoch still
/// lands inside the cycle.
pub fn rotation_position_ms(
    tracks: &[Track],
    epoch: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<i64> {
    let total = cycle_length_ms(tracks);
    if total <= 0 {
        return None;
    }
    let elapsed = (now - epoch).num_milliseconds();
    Some(elapsed.rem_euclid(total))
}

/// Start of `track_id` inside the cycle (first occurrence).
pub fn track_start_ms(tracks: &[Track], track_id: &str) -> Option<i64> {
    let mut running = 0i64;
    for track in tracks {
        if track.id == track_id {
            return Some(running);
        }
        running = running.saturating_add(track.effective_duration_ms());
    }
    None
}

/// Offset of an arbitrary track under the rotation formula.
///
/// This is `position - start(track)`: it is only meaningful for the active
/// track and may be negative or larger than the track's duration for any
/// other one. Scheduled overrides use it as is.
pub fn offset_for_track(
    tracks: &[Track],
    epoch: DateTime<Utc>,
    now: DateTime<Utc>,
    track_id: &str,
) -> Option<f64> {
    let position = rotation_position_ms(tracks, epoch, now)?;
    let start = track_start_ms(tracks, track_id)?;
    Some(ms_to_secs(position - start))
}

/// Epoch that puts `track_id` at offset zero at `now`.
///
/// Equals `now` when the track is the first of the catalog.
pub fn epoch_for_direct_play(
    tracks: &[Track],
    track_id: &str,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let start = track_start_ms(tracks, track_id)?;
    Some(now - Duration::milliseconds(start))
}

fn ms_to_secs(ms: i64) -> f64 {
    ms as f64 / 1000.0
}
