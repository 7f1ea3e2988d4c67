//! Extension pour intégrer la station dans pmoconfig
//!
//! Ce module fournit le trait `OnAirConfigExt` qui ajoute à
//! `pmoconfig::Config` les accès aux clés `onair.*` : réglages des boucles,
//! époque partagée et répertoires gérés (document de station, blobs, cache
//! de contenu).
//!
//! # Exemple
//!
//! ```no_run
//! use pmoconfig::get_config;
//! use pmoonair::OnAirConfigExt;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = get_config();
//! let onair = config.get_onair_config();
//! println!("drift tolerance: {} s", onair.drift_tolerance_secs);
//! println!("station document: {}", config.get_onair_station_document_path()?.display());
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use pmoconfig::Config;
use serde_yaml::Value;
use std::path::PathBuf;

use crate::config::{clamp_volume, OnAirConfig};

const STATION_DOCUMENT_FILE: &str = "station.json";
const BLOB_DATABASE_FILE: &str = "blobs.db";

/// Trait d'extension pour gérer la configuration de la station dans pmoconfig
pub trait OnAirConfigExt {
    /// Bloc `onair` typé, avec valeurs par défaut
    fn get_onair_config(&self) -> OnAirConfig;

    /// Époque partagée (ms depuis l'époque Unix)
    fn get_onair_epoch_ms(&self) -> Result<i64>;

    /// Enregistre une nouvelle époque (action "go live now")
    fn set_onair_epoch_ms(&self, epoch_ms: i64) -> Result<()>;

    fn get_onair_initial_volume(&self) -> Result<f64>;

    fn set_onair_initial_volume(&self, volume: f64) -> Result<()>;

    fn get_onair_start_muted(&self) -> Result<bool>;

    fn set_onair_start_muted(&self, muted: bool) -> Result<()>;

    /// Répertoire du document de station (créé si nécessaire)
    fn get_onair_station_dir(&self) -> Result<String>;

    /// Chemin du document JSON de la station
    fn get_onair_station_document_path(&self) -> Result<PathBuf>;

    /// Chemin de la base SQLite des blobs audio
    fn get_onair_blob_db_path(&self) -> Result<PathBuf>;

    /// Répertoire où les contenus jouables sont matérialisés
    fn get_onair_content_cache_dir(&self) -> Result<String>;
}

impl OnAirConfigExt for Config {
    fn get_onair_config(&self) -> OnAirConfig {
        OnAirConfig::from_config(self)
    }

    fn get_onair_epoch_ms(&self) -> Result<i64> {
        Ok(self.get_i64_or(&["onair", "epoch_ms"], pmorotation::DEFAULT_EPOCH_MS))
    }

    fn set_onair_epoch_ms(&self, epoch_ms: i64) -> Result<()> {
        self.set_value(&["onair", "epoch_ms"], Value::Number(epoch_ms.into()))
    }

    fn get_onair_initial_volume(&self) -> Result<f64> {
        Ok(clamp_volume(self.get_f64_or(&["onair", "initial_volume"], 0.8)))
    }

    fn set_onair_initial_volume(&self, volume: f64) -> Result<()> {
        self.set_f64(&["onair", "initial_volume"], clamp_volume(volume))
    }

    fn get_onair_start_muted(&self) -> Result<bool> {
        Ok(self.get_bool_or(&["onair", "start_muted"], true))
    }

    fn set_onair_start_muted(&self, muted: bool) -> Result<()> {
        self.set_value(&["onair", "start_muted"], Value::Bool(muted))
    }

    fn get_onair_station_dir(&self) -> Result<String> {
        self.get_managed_dir(&["onair", "station", "directory"], "station")
    }

    fn get_onair_station_document_path(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.get_onair_station_dir()?).join(STATION_DOCUMENT_FILE))
    }

    fn get_onair_blob_db_path(&self) -> Result<PathBuf> {
        let dir = self.get_managed_dir(&["onair", "blobs", "directory"], "blobs")?;
        Ok(PathBuf::from(dir).join(BLOB_DATABASE_FILE))
    }

    fn get_onair_content_cache_dir(&self) -> Result<String> {
        self.get_managed_dir(&["onair", "content_cache", "directory"], "content")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_paths_live_under_config_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::from_yaml_str_in("", tmp.path()).unwrap();

        let doc = config.get_onair_station_document_path().unwrap();
        assert!(doc.starts_with(tmp.path()));
        assert!(doc.ends_with("station/station.json"));
        assert!(doc.parent().unwrap().is_dir());

        let db = config.get_onair_blob_db_path().unwrap();
        assert!(db.ends_with("blobs/blobs.db"));

        let cache = config.get_onair_content_cache_dir().unwrap();
        assert!(std::path::Path::new(&cache).is_dir());
    }

    #[test]
    fn test_epoch_and_volume_accessors() {
        let config = Config::from_yaml_str("").unwrap();
        assert_eq!(config.get_onair_epoch_ms().unwrap(), 1_704_067_200_000);

        config.set_onair_epoch_ms(1_710_000_000_000).unwrap();
        assert_eq!(config.get_onair_config().epoch_ms, 1_710_000_000_000);

        config.set_onair_initial_volume(1.7).unwrap();
        assert_eq!(config.get_onair_initial_volume().unwrap(), 1.0);

        config.set_onair_start_muted(false).unwrap();
        assert!(!config.get_onair_start_muted().unwrap());
    }
}
