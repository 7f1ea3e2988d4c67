//! UI-facing view of the station state

use chrono::{DateTime, Utc};
use pmorotation::{Catalog, Resolution, TargetSource, Track};
use serde::Serialize;

use crate::reconciler::ReconcilerState;

/// Title shown when nothing is on air
pub const OFFLINE_TITLE: &str = "Nova Offline";
/// Artist line shown when nothing is on air
pub const OFFLINE_ARTIST: &str = "Waiting for Signal";

/// Everything a UI needs to render the player, published on every change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OnAirSnapshot {
    /// Track on air (scheduled override or rotation)
    pub active: Option<Track>,
    pub offset_secs: f64,
    pub next: Option<Track>,
    /// Most recent first
    pub history: Vec<Track>,
    #[serde(serialize_with = "serialize_source")]
    pub source: Option<TargetSource>,
    #[serde(serialize_with = "serialize_state")]
    pub state: ReconcilerState,
    pub muted: bool,
    pub volume: f64,
    pub epoch: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

impl OnAirSnapshot {
    /// Initial snapshot, before the first tick
    pub fn offline(epoch: DateTime<Utc>, muted: bool, volume: f64) -> Self {
        Self {
            active: None,
            offset_secs: 0.0,
            next: None,
            history: Vec::new(),
            source: None,
            state: ReconcilerState::Idle,
            muted,
            volume,
            epoch,
            generated_at: epoch,
        }
    }

    /// Builds the snapshot of one resolution.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        catalog: &Catalog,
        resolution: &Resolution,
        state: ReconcilerState,
        muted: bool,
        volume: f64,
        epoch: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let lookup = |id: &String| catalog.get(id).cloned();
        let (active, offset_secs, source) = match &resolution.target {
            Some(target) => (
                catalog.get(&target.track_id).cloned(),
                target.offset_secs,
                Some(target.source),
            ),
            None => (None, 0.0, None),
        };

        // under an override the rotation history may list the scheduled track
        let on_air_id = resolution.target.as_ref().map(|t| t.track_id.as_str());
        Self {
            active,
            offset_secs,
            next: resolution.rotation.next_track_id.as_ref().and_then(lookup),
            history: resolution
                .rotation
                .history_ids
                .iter()
                .filter(|id| Some(id.as_str()) != on_air_id)
                .filter_map(lookup)
                .collect(),
            source,
            state,
            muted,
            volume,
            epoch,
            generated_at: now,
        }
    }

    /// True while the device is actually playing the target
    pub fn on_air(&self) -> bool {
        self.state == ReconcilerState::Playing
    }

    pub fn now_playing(&self) -> NowPlaying {
        NowPlaying::from_snapshot(self)
    }
}

fn serialize_source<S: serde::Serializer>(
    source: &Option<TargetSource>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match source {
        Some(source) => serializer.serialize_some(&source.to_string()),
        None => serializer.serialize_none(),
    }
}

fn serialize_state<S: serde::Serializer>(
    state: &ReconcilerState,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(state.as_str())
}

/// Display values of the player bar
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    pub is_live_show: bool,
    /// `m:ss`
    pub elapsed: String,
    /// `m:ss`
    pub duration: String,
    /// 0 to 100
    pub progress_percent: f64,
    pub on_air: bool,
}

impl NowPlaying {
    pub fn from_snapshot(snapshot: &OnAirSnapshot) -> Self {
        match &snapshot.active {
            Some(track) => {
                let duration = track.effective_duration_secs();
                Self {
                    title: track.title.clone(),
                    artist: track.artist.clone(),
                    is_live_show: track.is_live_show,
                    elapsed: format_time(snapshot.offset_secs),
                    duration: format_time(duration),
                    progress_percent: progress_percent(snapshot.offset_secs, duration),
                    on_air: snapshot.on_air(),
                }
            }
            None => Self {
                title: OFFLINE_TITLE.to_string(),
                artist: OFFLINE_ARTIST.to_string(),
                is_live_show: false,
                elapsed: format_time(0.0),
                duration: format_time(0.0),
                progress_percent: 0.0,
                on_air: false,
            },
        }
    }
}

/// Formats seconds as `m:ss`; negative and non-finite values show `0:00`.
pub fn format_time(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs.floor() as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}

/// Elapsed share of the track, capped to `0..=100`
pub fn progress_percent(offset_secs: f64, duration_secs: f64) -> f64 {
    if duration_secs.is_nan() || duration_secs <= 0.0 || !offset_secs.is_finite() {
        return 0.0;
    }
    (offset_secs * 100.0 / duration_secs).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmorotation::{resolve_all, ScheduleSlot, ScheduleTable};

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(59.9), "0:59");
        assert_eq!(format_time(61.0), "1:01");
        assert_eq!(format_time(3725.0), "62:05");
        assert_eq!(format_time(-30.0), "0:00");
        assert_eq!(format_time(f64::NAN), "0:00");
    }

    #[test]
    fn test_progress_is_capped() {
        assert_eq!(progress_percent(50.0, 200.0), 25.0);
        assert_eq!(progress_percent(500.0, 200.0), 100.0);
        assert_eq!(progress_percent(-5.0, 200.0), 0.0);
        assert_eq!(progress_percent(5.0, 0.0), 0.0);
    }

    #[test]
    fn test_offline_display() {
        let epoch = pmorotation::default_epoch();
        let np = OnAirSnapshot::offline(epoch, true, 0.8).now_playing();
        assert_eq!(np.title, "Nova Offline");
        assert_eq!(np.artist, "Waiting for Signal");
        assert!(!np.on_air);
    }

    #[test]
    fn test_snapshot_from_resolution() {
        let catalog = Catalog::from_tracks(vec![
            Track::new("a", "Alpha", "X", 100.0),
            Track::new("b", "Beta", "Y", 50.0),
            Track::new("c", "Gamma", "Z", 0.0),
        ]);
        let epoch = pmorotation::default_epoch();
        let now = epoch + chrono::Duration::seconds(120);
        let slot = ScheduleSlot::new(
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            0,
        )
        .unwrap();
        let resolution = resolve_all(
            catalog.as_slice(),
            &ScheduleTable::new(),
            epoch,
            now,
            slot,
            5,
        );

        let snapshot = OnAirSnapshot::build(
            &catalog,
            &resolution,
            ReconcilerState::Playing,
            false,
            0.8,
            epoch,
            now,
        );
        assert_eq!(snapshot.active.as_ref().unwrap().id, "b");
        assert_eq!(snapshot.next.as_ref().unwrap().id, "c");
        assert_eq!(
            snapshot.history.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "c"]
        );
        assert_eq!(snapshot.source, Some(TargetSource::Rotation));

        let np = snapshot.now_playing();
        assert_eq!(np.title, "Beta");
        assert_eq!(np.elapsed, "0:20");
        assert_eq!(np.duration, "0:50");
        assert_eq!(np.progress_percent, 40.0);
        assert!(np.on_air);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "playing");
        assert_eq!(json["source"], "rotation");
    }

    #[test]
    fn test_history_never_lists_scheduled_track() {
        let catalog = Catalog::from_tracks(vec![
            Track::new("a", "Alpha", "X", 100.0),
            Track::new("b", "Beta", "Y", 50.0),
            Track::new("s", "Special", "Z", 3600.0),
        ]);
        let epoch = pmorotation::default_epoch();
        let now = epoch + chrono::Duration::seconds(120);
        let slot = ScheduleSlot::new(now.date_naive(), 0).unwrap();
        let mut schedule = ScheduleTable::new();
        schedule.set_slot(slot, Some("s"));
        let resolution = resolve_all(catalog.as_slice(), &schedule, epoch, now, slot, 5);
        assert_eq!(resolution.rotation.history_ids, vec!["a", "s"]);

        let snapshot = OnAirSnapshot::build(
            &catalog,
            &resolution,
            ReconcilerState::Playing,
            false,
            0.8,
            epoch,
            now,
        );
        assert_eq!(snapshot.active.as_ref().unwrap().id, "s");
        assert_eq!(snapshot.source, Some(TargetSource::Schedule));
        assert_eq!(
            snapshot.history.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            vec!["a"]
        );
    }
}
