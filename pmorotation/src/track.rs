//! Track record shared by the catalog, the resolvers and the reconciler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Duration used for tracks without a usable duration (seconds)
///
/// A missing, zero, negative or non-finite duration would make the rotation
/// cycle degenerate, so every such track counts as a three minute slot.
pub const FALLBACK_DURATION_SECS: f64 = 180.0;

/// Same fallback expressed in the rotation's internal unit
pub const FALLBACK_DURATION_MS: i64 = 180_000;

/// Longest slot a single track may take in the rotation (one week, ms)
///
/// Longer durations are capped so that summing a whole catalog can never
/// overflow.
pub const MAX_DURATION_MS: i64 = 7 * 24 * 3600 * 1000;

/// A track of the station catalog.
///
/// The serialized form keeps the field names of the persisted station
/// document (`duration`, `uploadedAt`, `isLiveShow`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    /// Playable URL; empty when the bytes live in the blob store only
    #[serde(default)]
    pub url: String,
    /// Authoritative duration in seconds (see [`Track::effective_duration_secs`])
    #[serde(rename = "duration", default)]
    pub duration_secs: f64,
    /// Long-form show recording rather than a single track
    #[serde(default)]
    pub is_live_show: bool,
    #[serde(rename = "uploadedAt", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Track {
    /// Creates a plain track with no URL, created at the Unix epoch.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        duration_secs: f64,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            url: String::new(),
            duration_secs,
            is_live_show: false,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn live_show(mut self, is_live_show: bool) -> Self {
        self.is_live_show = is_live_show;
        self
    }

    /// True when the stored duration can be used as is
    pub fn has_usable_duration(&self) -> bool {
        self.duration_secs.is_finite() && self.duration_ms_rounded() > 0
    }

    /// Duration in milliseconds, the unit of every rotation computation.
    pub fn effective_duration_ms(&self) -> i64 {
        if self.has_usable_duration() {
            self.duration_ms_rounded()
        } else {
            FALLBACK_DURATION_MS
        }
    }

    /// Duration in seconds with the 180 s fallback applied
    pub fn effective_duration_secs(&self) -> f64 {
        self.effective_duration_ms() as f64 / 1000.0
    }

    fn duration_ms_rounded(&self) -> i64 {
        if !self.duration_secs.is_finite() || self.duration_secs <= 0.0 {
            return 0;
        }
        let ms = (self.duration_secs * 1000.0).round();
        if ms >= MAX_DURATION_MS as f64 {
            MAX_DURATION_MS
        } else {
            ms as i64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_duration_fallbacks() {
        assert_eq!(Track::new("a", "A", "X", 100.0).effective_duration_ms(), 100_000);
        assert_eq!(Track::new("a", "A", "X", 0.0).effective_duration_ms(), 180_000);
        assert_eq!(Track::new("a", "A", "X", -4.0).effective_duration_ms(), 180_000);
        assert_eq!(Track::new("a", "A", "X", f64::NAN).effective_duration_ms(), 180_000);
        assert_eq!(Track::new("a", "A", "X", f64::INFINITY).effective_duration_secs(), 180.0);
        // rounds to zero milliseconds
        assert_eq!(Track::new("a", "A", "X", 0.0001).effective_duration_ms(), 180_000);
        assert_eq!(Track::new("a", "A", "X", 213.4567).effective_duration_ms(), 213_457);
    }

    #[test]
    fn test_absurd_duration_is_capped() {
        assert_eq!(Track::new("a", "A", "X", 6e15).effective_duration_ms(), MAX_DURATION_MS);
        assert_eq!(Track::new("a", "A", "X", f64::MAX).effective_duration_ms(), MAX_DURATION_MS);
        assert_eq!(Track::new("a", "A", "X", 3600.0).effective_duration_ms(), 3_600_000);
    }

    #[test]
    fn test_serialized_field_names() {
        let track = Track::new("abc", "Song", "Band", 12.5)
            .with_url("https://example.org/a.mp3")
            .live_show(true);
        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(json["duration"], 12.5);
        assert_eq!(json["isLiveShow"], true);
        assert_eq!(json["uploadedAt"], 0);
    }
}
