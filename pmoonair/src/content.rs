//! Playable content materialization
//!
//! A track is playable either from the bytes kept in the blob store, written
//! to a local file for the device, or from its URL. The local file belongs
//! to the [`PlayableContent`] value and is deleted when that value is
//! dropped, so discarding stale or superseded content releases it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pmorotation::Track;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blob::{BlobStore, MemoryBlobStore};
use crate::error::Result;

/// Where the device reads the audio from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackSource {
    Url(String),
    File(PathBuf),
}

impl fmt::Display for PlaybackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackSource::Url(url) => write!(f, "{url}"),
            PlaybackSource::File(path) => write!(f, "file://{}", path.display()),
        }
    }
}

/// Content ready to hand to the audio output
#[derive(Debug)]
pub struct PlayableContent {
    track_id: String,
    generation: u64,
    source: PlaybackSource,
    mime_type: Option<String>,
    owned_file: Option<PathBuf>,
}

impl PlayableContent {
    /// Content streamed from a URL, nothing to release
    pub fn from_url(track_id: impl Into<String>, generation: u64, url: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            generation,
            source: PlaybackSource::Url(url.into()),
            mime_type: None,
            owned_file: None,
        }
    }

    /// Content backed by a local file removed on drop
    pub fn from_owned_file(
        track_id: impl Into<String>,
        generation: u64,
        path: PathBuf,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            track_id: track_id.into(),
            generation,
            source: PlaybackSource::File(path.clone()),
            mime_type: Some(mime_type.into()),
            owned_file: Some(path),
        }
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn source(&self) -> &PlaybackSource {
        &self.source
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Deletes the owned file, if any, without blocking the runtime.
    pub async fn release(mut self) {
        if let Some(path) = self.owned_file.take() {
            let result = tokio::fs::remove_file(&path).await;
            log_release(&self.track_id, &path, result);
        }
    }
}

impl Drop for PlayableContent {
    /// Fallback when the content was not [released](PlayableContent::release):
    /// the file is removed on the blocking pool when a runtime is around.
    fn drop(&mut self) {
        let Some(path) = self.owned_file.take() else {
            return;
        };
        let track_id = std::mem::take(&mut self.track_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    log_release(&track_id, &path, std::fs::remove_file(&path));
                });
            }
            Err(_) => log_release(&track_id, &path, std::fs::remove_file(&path)),
        }
    }
}

fn log_release(track_id: &str, path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => debug!(track_id, path = %path.display(), "Released content file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to release content file"),
    }
}

/// Turns catalog tracks into playable content
#[derive(Clone)]
pub struct ContentLoader {
    store: Arc<dyn BlobStore>,
    cache_dir: Option<PathBuf>,
}

impl Default for ContentLoader {
    /// Empty memory store, URL-only playback
    fn default() -> Self {
        Self::new(Arc::new(MemoryBlobStore::new()))
    }
}

impl ContentLoader {
    /// Loader without a cache directory: blobs cannot be materialized and
    /// only track URLs are playable.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            cache_dir: None,
        }
    }

    pub fn with_cache_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cache_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Loader configured from `onair.content_cache.directory`
    pub fn from_config(store: Arc<dyn BlobStore>, config: &pmoconfig::Config) -> Result<Self> {
        use crate::config_ext::OnAirConfigExt;
        Ok(Self::new(store).with_cache_dir(config.get_onair_content_cache_dir()?))
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Resolves playable content for `track`.
    ///
    /// Stored bytes win over the URL. `Ok(None)` means there is nothing to
    /// play (or the fetch was cancelled): the caller leaves a silent gap.
    pub async fn load(
        &self,
        track: &Track,
        generation: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<PlayableContent>> {
        let blob = match self.store.get(&track.id).await {
            Ok(blob) => blob,
            Err(e) => {
                warn!(track_id = %track.id, error = %e, "Blob lookup failed, trying URL");
                None
            }
        };

        if cancel.is_cancelled() {
            debug!(track_id = %track.id, generation, "Content fetch cancelled");
            return Ok(None);
        }

        if let Some(blob) = blob {
            match &self.cache_dir {
                Some(dir) => {
                    tokio::fs::create_dir_all(dir).await?;
                    let path = dir.join(format!(
                        "{}.{}.{}",
                        file_stem(&track.id),
                        generation,
                        extension_for_mime(&blob.mime_type)
                    ));
                    tokio::fs::write(&path, &blob.bytes).await?;
                    let content =
                        PlayableContent::from_owned_file(&track.id, generation, path, blob.mime_type);
                    if cancel.is_cancelled() {
                        debug!(track_id = %track.id, generation, "Content fetch cancelled");
                        content.release().await;
                        return Ok(None);
                    }
                    debug!(track_id = %track.id, generation, source = %content.source(), "Content materialized");
                    return Ok(Some(content));
                }
                None => {
                    debug!(track_id = %track.id, "No content cache directory, ignoring stored bytes");
                }
            }
        }

        if !track.url.is_empty() {
            return Ok(Some(PlayableContent::from_url(&track.id, generation, &track.url)));
        }

        info!(track_id = %track.id, "No playable content for track");
        Ok(None)
    }
}

/// File extension for an audio MIME type
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/ogg" | "application/ogg" => "ogg",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/aac" => "aac",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        "audio/webm" => "webm",
        _ => "bin",
    }
}

fn file_stem(track_id: &str) -> String {
    track_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::StoredBlob;

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("audio/mpeg"), "mp3");
        assert_eq!(extension_for_mime("Audio/X-WAV; codecs=1"), "wav");
        assert_eq!(extension_for_mime("video/whatever"), "bin");
        assert_eq!(extension_for_mime(""), "bin");
    }

    #[tokio::test]
    async fn test_blob_is_materialized_and_released_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryBlobStore::new());
        store
            .put("t/1", StoredBlob::new(vec![1, 2, 3], "audio/mpeg"))
            .await
            .unwrap();
        let loader = ContentLoader::new(store).with_cache_dir(tmp.path());

        let track = Track::new("t/1", "T", "X", 10.0).with_url("https://example.org/t.mp3");
        let content = loader
            .load(&track, 7, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        let PlaybackSource::File(path) = content.source().clone() else {
            panic!("expected a local file");
        };
        assert_eq!(path.file_name().unwrap(), "t_1.7.mp3");
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
        assert_eq!(content.mime_type(), Some("audio/mpeg"));

        content.release().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_dropped_content_file_is_removed_off_thread() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("d.1.mp3");
        std::fs::write(&path, b"xx").unwrap();
        let content = PlayableContent::from_owned_file("d", 1, path.clone(), "audio/mpeg");

        drop(content);
        for _ in 0..100 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_outside_runtime_removes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("e.1.mp3");
        std::fs::write(&path, b"xx").unwrap();
        drop(PlayableContent::from_owned_file("e", 1, path.clone(), "audio/mpeg"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_url_fallback_and_missing_content() {
        let loader = ContentLoader::default();
        let token = CancellationToken::new();

        let remote = Track::new("r", "R", "X", 10.0).with_url("https://example.org/r.mp3");
        let content = loader.load(&remote, 1, &token).await.unwrap().unwrap();
        assert_eq!(
            content.source(),
            &PlaybackSource::Url("https://example.org/r.mp3".to_string())
        );

        let nothing = Track::new("n", "N", "X", 10.0);
        assert!(loader.load(&nothing, 1, &token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_fetch_yields_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryBlobStore::new());
        store
            .put("c", StoredBlob::new(vec![0; 16], "audio/ogg"))
            .await
            .unwrap();
        let loader = ContentLoader::new(store).with_cache_dir(tmp.path());

        let token = CancellationToken::new();
        token.cancel();
        let track = Track::new("c", "C", "X", 10.0);
        assert!(loader.load(&track, 3, &token).await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
