//! Ordered track catalog
//!
//! The catalog order is the rotation order. Tracks are only ever appended
//! (uploads) or removed; the resolvers never mutate them.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::track::Track;

/// Artist used for uploaded tracks whose file name carries no artist
pub const DEFAULT_TRACK_ARTIST: &str = "Unbekannt";
/// Artist used for uploaded show recordings whose file name carries no artist
pub const DEFAULT_SHOW_ARTIST: &str = "Broadcast Special";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    tracks: Vec<Track>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps tracks as loaded, keeping their order.
    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    /// Appends a track, refusing ids already present.
    pub fn push(&mut self, track: Track) -> Result<()> {
        if self.contains(&track.id) {
            return Err(Error::DuplicateTrack(track.id));
        }
        self.tracks.push(track);
        Ok(())
    }

    /// Registers an uploaded file at the end of the rotation.
    ///
    /// The file name is parsed as `Artist - Title.ext`; the new track gets a
    /// fresh random id and an empty URL (its bytes belong to the blob store).
    pub fn add_upload(
        &mut self,
        file_name: &str,
        duration_secs: f64,
        is_live_show: bool,
        now: DateTime<Utc>,
    ) -> &Track {
        let (artist, title) = parse_upload_name(file_name, is_live_show);
        let track = Track {
            id: Uuid::new_v4().simple().to_string(),
            title,
            artist,
            url: String::new(),
            duration_secs,
            is_live_show,
            created_at: now,
        };
        info!(track_id = %track.id, title = %track.title, artist = %track.artist, "Track added to catalog");
        let index = self.tracks.len();
        self.tracks.push(track);
        &self.tracks[index]
    }

    /// Removes a track and returns it.
    pub fn remove(&mut self, track_id: &str) -> Result<Track> {
        let index = self
            .position(track_id)
            .ok_or_else(|| Error::TrackNotFound(track_id.to_string()))?;
        debug!(track_id, "Track removed from catalog");
        Ok(self.tracks.remove(index))
    }

    pub fn get(&self, track_id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == track_id)
    }

    pub fn position(&self, track_id: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == track_id)
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.position(track_id).is_some()
    }

    pub fn as_slice(&self) -> &[Track] {
        &self.tracks
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Track> {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn into_tracks(self) -> Vec<Track> {
        self.tracks
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a Track;
    type IntoIter = std::slice::Iter<'a, Track>;

    fn into_iter(self) -> Self::IntoIter {
        self.tracks.iter()
    }
}

/// Splits an uploaded file name into (artist, title).
///
/// The last extension is dropped, then the name is cut at its first `-`.
/// Without a dash the whole name is the title and the artist defaults to
/// [`DEFAULT_TRACK_ARTIST`] or [`DEFAULT_SHOW_ARTIST`].
pub fn parse_upload_name(file_name: &str, is_live_show: bool) -> (String, String) {
    let stem = match file_name.rfind('.') {
        Some(dot) if dot > 0 && !file_name[dot + 1..].contains('/') => &file_name[..dot],
        _ => file_name,
    };

    match stem.split_once('-') {
        Some((artist, title)) => (artist.trim().to_string(), title.trim().to_string()),
        None => {
            let artist = if is_live_show {
                DEFAULT_SHOW_ARTIST
            } else {
                DEFAULT_TRACK_ARTIST
            };
            (artist.to_string(), stem.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_upload_name() {
        assert_eq!(
            parse_upload_name("Daft Punk - One More Time.mp3", false),
            ("Daft Punk".to_string(), "One More Time".to_string())
        );
        // only the first dash separates artist and title
        assert_eq!(
            parse_upload_name("A-ha - Take-On-Me.flac", false),
            ("A".to_string(), "ha - Take-On-Me".to_string())
        );
        assert_eq!(
            parse_upload_name("jingle.ogg", false),
            ("Unbekannt".to_string(), "jingle".to_string())
        );
        assert_eq!(
            parse_upload_name("morning.show.wav", true),
            ("Broadcast Special".to_string(), "morning.show".to_string())
        );
        assert_eq!(
            parse_upload_name("noext", false),
            ("Unbekannt".to_string(), "noext".to_string())
        );
    }

    #[test]
    fn test_add_upload_appends_with_fresh_id() {
        let mut catalog = Catalog::new();
        let now = Utc::now();
        let first = catalog.add_upload("X - One.mp3", 120.0, false, now).id.clone();
        let second = catalog.add_upload("Talk.mp3", 3600.0, true, now).id.clone();

        assert_ne!(first, second);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.position(&second), Some(1));
        let show = catalog.get(&second).unwrap();
        assert!(show.is_live_show);
        assert!(show.url.is_empty());
        assert_eq!(show.artist, DEFAULT_SHOW_ARTIST);
    }

    #[test]
    fn test_remove_and_duplicates() {
        let mut catalog = Catalog::from_tracks(vec![
            Track::new("a", "A", "X", 1.0),
            Track::new("b", "B", "X", 1.0),
        ]);
        assert!(matches!(
            catalog.push(Track::new("a", "Again", "X", 1.0)),
            Err(Error::DuplicateTrack(_))
        ));

        let removed = catalog.remove("a").unwrap();
        assert_eq!(removed.title, "A");
        assert_eq!(catalog.as_slice()[0].id, "b");
        assert!(matches!(catalog.remove("a"), Err(Error::TrackNotFound(_))));
    }
}
