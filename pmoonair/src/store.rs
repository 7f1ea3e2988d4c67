//! Station document persistence
//!
//! The document is a single JSON file (catalog, schedule, session, epoch).
//! Loading never fails: a missing file is an empty station and invalid
//! content is filtered record by record. Saving writes a temporary file and
//! renames it over the previous document.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pmorotation::{Catalog, LoadReport, ScheduleTable, StationDocument};
use tracing::{debug, info, warn};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct StationStore {
    path: PathBuf,
}

impl StationStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Store at `onair.station.directory/station.json`
    pub fn from_config(config: &pmoconfig::Config) -> Result<Self> {
        use crate::config_ext::OnAirConfigExt;
        Ok(Self::new(config.get_onair_station_document_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and validates the document.
    pub async fn load(&self) -> (StationDocument, LoadReport) {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => {
                let (doc, report) = StationDocument::from_json_str(&text);
                info!(
                    path = %self.path.display(),
                    tracks = doc.tracks.len(),
                    schedule = doc.schedule.len(),
                    rejected = report.rejected.len(),
                    "Station document loaded"
                );
                (doc, report)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No station document, starting empty");
                (StationDocument::default(), LoadReport::default())
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read station document, starting empty");
                (
                    StationDocument::default(),
                    LoadReport {
                        document_discarded: true,
                        rejected: Vec::new(),
                    },
                )
            }
        }
    }

    /// Writes the whole document.
    pub async fn save(&self, doc: &StationDocument) -> Result<()> {
        let text = doc.to_json_string_pretty()?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "Station document saved");
        Ok(())
    }

    /// Reads the current document, applies `edit` and writes it back.
    pub async fn update(&self, edit: impl FnOnce(&mut StationDocument)) -> Result<()> {
        let (mut doc, _) = self.load().await;
        edit(&mut doc);
        self.save(&doc).await
    }

    /// Persists a new shared epoch, keeping the rest of the document.
    pub async fn save_epoch(&self, epoch: DateTime<Utc>) -> Result<()> {
        self.update(|doc| doc.epoch = Some(epoch)).await
    }

    /// Persists catalog and schedule, keeping session and epoch.
    pub async fn save_station(&self, catalog: &Catalog, schedule: &ScheduleTable) -> Result<()> {
        let tracks = catalog.as_slice().to_vec();
        let entries = schedule.entries().to_vec();
        self.update(move |doc| {
            doc.tracks = tracks;
            doc.schedule = entries;
        })
        .await
    }
}
