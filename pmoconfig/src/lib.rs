//! # PMO On Air Configuration Module
//!
//! This module provides configuration management for the on-air station, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for configuration values
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! // Get the global configuration
//! let config = get_config();
//!
//! // Access configuration values
//! let level = config.get_log_min_level()?;
//! let station_dir = config.get_managed_dir(&["onair", "station", "directory"], "station")?;
//!
//! // Update configuration values
//! config.set_log_min_level("DEBUG".to_string())?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::info;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmoonair.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PMO On Air configuration"));
}

const ENV_CONFIG_DIR: &str = "PMOONAIR_CONFIG";
const ENV_PREFIX: &str = "PMOONAIR_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmoonair";

// Default values for configuration
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> anyhow::Result<bool> {
            Ok(self.get_bool_or($path, $default))
        }

        pub fn $setter(&self, value: bool) -> anyhow::Result<()> {
            self.set_value($path, serde_yaml::Value::Bool(value))
        }
    };
}

/// Configuration manager for PMO On Air
///
/// This structure manages the application configuration, including:
/// - Loading configuration from YAML files
/// - Merging with default configuration
/// - Handling environment variable overrides
/// - Providing typed getters/setters for configuration values
///
/// A configuration built with [`Config::from_yaml_str`] lives only in memory:
/// setters update it but nothing is written to disk.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: Option<String>,
    data: Mutex<Value>,
}

// Implémentation manuelle de Clone
impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.data.lock().unwrap().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var=ENV_CONFIG_DIR, path=%env_path, "Trying to load config from env");
            return env_path;
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        // Default fallback
        CONFIG_DIR_NAME.to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!(
                "Config path {} is not a directory",
                path.display()
            ));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PMOONAIR_CONFIG` environment variable
    /// 3. `.pmoonair` in the current directory
    /// 4. `.pmoonair` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for read/write permissions.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir=%config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        match fs::read(&path) {
            Ok(data) => {
                info!(config_file=%path, "Loaded config file");
                let external_value: Value = serde_yaml::from_slice(&data)?;
                merge_yaml(&mut default_value, &external_value);
            }
            Err(_) => {
                info!(config_file=%path, "Config file not found, using default embedded config");
            }
        }

        let mut config_value = lower_keys_value(default_value);
        apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path: Some(path),
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Builds an in-memory configuration from a YAML document merged over the
    /// embedded defaults.
    ///
    /// Environment overrides are not applied and nothing is ever saved, which
    /// makes this constructor suitable for tests and embedding.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        if !yaml.trim().is_empty() {
            let external_value: Value = serde_yaml::from_str(yaml)?;
            merge_yaml(&mut default_value, &external_value);
        }

        Ok(Config {
            config_dir: ".".to_string(),
            path: None,
            data: Mutex::new(lower_keys_value(default_value)),
        })
    }

    /// Same as [`Config::from_yaml_str`] but managed directories are resolved
    /// relative to `config_dir`.
    pub fn from_yaml_str_in(yaml: &str, config_dir: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_yaml_str(yaml)?;
        config.config_dir = config_dir.as_ref().to_string_lossy().to_string();
        Ok(config)
    }

    /// Directory used to resolve relative managed directories
    pub fn directory(&self) -> &str {
        &self.config_dir
    }

    /// Saves the current configuration to the config.yaml file
    ///
    /// In-memory configurations are left untouched.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = self.data.lock().unwrap();
        let yaml = serde_yaml::to_string(&*data)?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["onair", "history_len"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        set_value_internal(&mut data, path, value)?;
        drop(data);
        self.save()
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().unwrap();
        get_value_internal(&data, path)
    }

    /// Reads an unsigned integer, falling back to `default` when the key is
    /// absent or has the wrong type.
    pub fn get_u64_or(&self, path: &[&str], default: u64) -> u64 {
        match self.get_value(path) {
            Ok(Value::Number(n)) => n.as_u64().unwrap_or(default),
            Ok(Value::String(s)) => s.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(path = %path.join("."), value = %s, "Invalid integer, using default {}", default);
                default
            }),
            _ => default,
        }
    }

    /// Reads a signed integer with a default
    pub fn get_i64_or(&self, path: &[&str], default: i64) -> i64 {
        match self.get_value(path) {
            Ok(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Ok(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Reads a usize with a default
    pub fn get_usize_or(&self, path: &[&str], default: usize) -> usize {
        self.get_u64_or(path, default as u64) as usize
    }

    /// Reads a floating point value with a default
    ///
    /// Integers are accepted and widened.
    pub fn get_f64_or(&self, path: &[&str], default: f64) -> f64 {
        match self.get_value(path) {
            Ok(Value::Number(n)) => n.as_f64().unwrap_or(default),
            Ok(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Reads a boolean with a default
    pub fn get_bool_or(&self, path: &[&str], default: bool) -> bool {
        match self.get_value(path) {
            Ok(Value::Bool(b)) => b,
            _ => default,
        }
    }

    /// Writes a floating point value
    pub fn set_f64(&self, path: &[&str], value: f64) -> Result<()> {
        self.set_value(path, Value::Number(Number::from(value)))
    }

    /// Résout un chemin relatif ou absolu et crée le répertoire si nécessaire
    fn resolve_and_create_dir(&self, dir_path: &str) -> Result<String> {
        let path = Path::new(dir_path);

        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.config_dir).join(path)
        };

        if !absolute_path.exists() {
            fs::create_dir_all(&absolute_path)?;
            info!(directory=%absolute_path.display(), "Created managed directory");
        }

        Ok(absolute_path.to_string_lossy().to_string())
    }

    /// Récupère un répertoire géré par la configuration
    ///
    /// Le répertoire peut être absolu ou relatif au répertoire de
    /// configuration. Il sera créé s'il n'existe pas.
    ///
    /// # Arguments
    ///
    /// * `path` - Chemin dans l'arbre de configuration (ex: `&["onair", "blobs", "directory"]`)
    /// * `default` - Nom de répertoire par défaut si non configuré
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<String> {
        let dir_path = match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => {
                self.set_managed_dir(path, default.to_string())?;
                default.to_string()
            }
        };
        self.resolve_and_create_dir(&dir_path)
    }

    /// Définit un répertoire géré par la configuration
    pub fn set_managed_dir(&self, path: &[&str], directory: String) -> Result<()> {
        self.set_value(path, Value::String(directory))
    }

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    /// Récupère le niveau de log minimum depuis la configuration
    pub fn get_log_min_level(&self) -> Result<String> {
        match self.get_value(&["host", "logger", "min_level"]) {
            Ok(Value::String(s)) => Ok(s),
            _ => Ok(DEFAULT_LOG_MIN_LEVEL.to_string()),
        }
    }

    /// Définit le niveau de log minimum dans la configuration
    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level))
    }
}

/// Returns the global configuration instance
///
/// This function provides access to the singleton configuration instance,
/// which is lazily loaded on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    if path.is_empty() {
        *data = value;
        return Ok(());
    }
    if let Value::Mapping(map) = data {
        let key_value = Value::String(path[0].to_lowercase());
        if path.len() == 1 {
            map.insert(key_value, value);
        } else {
            let entry = map
                .entry(key_value)
                .or_insert(Value::Mapping(Mapping::new()));
            set_value_internal(entry, &path[1..], value)?;
        }
        Ok(())
    } else {
        Err(anyhow!("Current node is not a map"))
    }
}

fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
    let mut current = data;
    for (i, key) in path.iter().enumerate() {
        if let Value::Mapping(map) = current {
            match map.get(&Value::String(key.to_lowercase())) {
                Some(next) => current = next,
                None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
            }
        } else {
            return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
        }
    }
    Ok(current.clone())
}

fn apply_env_overrides(config: &mut Value) {
    apply_overrides(config, env::vars());
}

fn apply_overrides(config: &mut Value, vars: impl IntoIterator<Item = (String, String)>) {
    for (key, value) in vars {
        if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
            let key_path = stripped.split("__").collect::<Vec<_>>();
            let yaml_value = convert_env_value(&value);
            let _ = set_value_internal(config, &key_path, yaml_value);
        }
    }
}

fn convert_env_value(value: &str) -> Value {
    if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
        return parsed;
    }
    Value::String(value.to_string())
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut new_map = Mapping::new();
            for (k, v) in map {
                let key = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                new_map.insert(key, lower_keys_value(v));
            }
            Value::Mapping(new_map)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings (objects), it merges keys from external into default
/// - For scalars and sequences, external values replace default values
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(), // pour les scalaires ou séquences, on remplace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults() {
        let config = Config::from_yaml_str("").unwrap();
        assert_eq!(config.get_u64_or(&["onair", "rotation_tick_ms"], 0), 1000);
        assert_eq!(config.get_f64_or(&["onair", "drift_tolerance_secs"], 0.0), 1.5);
        assert_eq!(config.get_log_min_level().unwrap(), "INFO");
    }

    #[test]
    fn test_user_yaml_is_merged_over_defaults() {
        let config = Config::from_yaml_str("onair:\n  history_len: 8\n").unwrap();
        assert_eq!(config.get_usize_or(&["onair", "history_len"], 0), 8);
        // untouched keys keep their default
        assert_eq!(config.get_u64_or(&["onair", "drift_tick_ms"], 0), 500);
    }

    #[test]
    fn test_env_style_overrides() {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG).unwrap();
        apply_overrides(
            &mut value,
            vec![
                (format!("{ENV_PREFIX}ONAIR__START_MUTED"), "false".to_string()),
                ("UNRELATED".to_string(), "1".to_string()),
            ],
        );
        let muted = get_value_internal(&value, &["onair", "start_muted"]).unwrap();
        assert_eq!(muted, Value::Bool(false));
    }

    #[test]
    fn test_missing_path_and_defaults() {
        let config = Config::from_yaml_str("").unwrap();
        assert!(config.get_value(&["nope", "missing"]).is_err());
        assert_eq!(config.get_i64_or(&["nope"], -3), -3);
        assert!(config.get_bool_or(&["nope"], true));
    }

    #[test]
    fn test_in_memory_setters() {
        let config = Config::from_yaml_str("").unwrap();
        config.set_f64(&["onair", "initial_volume"], 0.25).unwrap();
        assert_eq!(config.get_f64_or(&["onair", "initial_volume"], 1.0), 0.25);
        config.set_log_enable_console(false).unwrap();
        assert!(!config.get_log_enable_console().unwrap());
    }

    #[test]
    fn test_managed_dir_is_created_relative_to_config_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::from_yaml_str_in("", tmp.path()).unwrap();
        let dir = config
            .get_managed_dir(&["onair", "blobs", "directory"], "blobs")
            .unwrap();
        assert!(Path::new(&dir).is_dir());
        assert!(dir.starts_with(tmp.path().to_string_lossy().as_ref()));
    }

    #[test]
    fn test_load_config_writes_merged_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("config.yaml"), "onair:\n  history_len: 7\n").unwrap();
        let config = Config::load_config(tmp.path().to_str().unwrap()).unwrap();
        assert_eq!(config.get_usize_or(&["onair", "history_len"], 0), 7);
        let saved = fs::read_to_string(tmp.path().join("config.yaml")).unwrap();
        assert!(saved.contains("drift_tick_ms"));
    }
}
