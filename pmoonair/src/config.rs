//! Typed configuration of the on-air runtime.
//!
//! The `onair` block of the pmoconfig tree deserializes into [`OnAirConfig`].
//! Missing keys take the defaults below, so tests and embedders can build one
//! with `OnAirConfig::default()` and tweak a field or two.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Runtime tuning of the rotation and reconciliation loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnAirConfig {
    /// Shared epoch in milliseconds since the Unix epoch
    #[serde(default = "OnAirConfig::default_epoch_ms")]
    pub epoch_ms: i64,
    #[serde(default = "OnAirConfig::default_rotation_tick_ms")]
    pub rotation_tick_ms: u64,
    #[serde(default = "OnAirConfig::default_drift_tick_ms")]
    pub drift_tick_ms: u64,
    #[serde(default = "OnAirConfig::default_drift_tolerance_secs")]
    pub drift_tolerance_secs: f64,
    /// Drift ticks to wait after a seek before seeking again
    #[serde(default = "OnAirConfig::default_reseek_after_ticks")]
    pub reseek_after_ticks: u32,
    #[serde(default = "OnAirConfig::default_device_timeout_ms")]
    pub device_timeout_ms: u64,
    #[serde(default = "OnAirConfig::default_history_len")]
    pub history_len: usize,
    #[serde(default = "OnAirConfig::default_initial_volume")]
    pub initial_volume: f64,
    #[serde(default = "OnAirConfig::default_start_muted")]
    pub start_muted: bool,
}

impl OnAirConfig {
    const fn default_epoch_ms() -> i64 {
        pmorotation::DEFAULT_EPOCH_MS
    }

    const fn default_rotation_tick_ms() -> u64 {
        1000
    }

    const fn default_drift_tick_ms() -> u64 {
        500
    }

    const fn default_drift_tolerance_secs() -> f64 {
        1.5
    }

    const fn default_reseek_after_ticks() -> u32 {
        4
    }

    const fn default_device_timeout_ms() -> u64 {
        2000
    }

    const fn default_history_len() -> usize {
        pmorotation::DEFAULT_HISTORY_LEN
    }

    const fn default_initial_volume() -> f64 {
        0.8
    }

    const fn default_start_muted() -> bool {
        true
    }

    /// Reads the `onair` block of a pmoconfig tree.
    ///
    /// An absent or unreadable block yields the defaults.
    pub fn from_config(config: &pmoconfig::Config) -> Self {
        match config.get_value(&["onair"]) {
            Ok(value) => match serde_yaml::from_value::<OnAirConfig>(value) {
                Ok(cfg) => cfg.sanitized(),
                Err(e) => {
                    warn!(error = %e, "Invalid onair configuration, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Same as [`OnAirConfig::from_config`] on the global configuration
    pub fn load_from_pmoconfig() -> Self {
        Self::from_config(&pmoconfig::get_config())
    }

    /// Clamps values that would stall the loops or the device
    pub fn sanitized(mut self) -> Self {
        self.rotation_tick_ms = self.rotation_tick_ms.max(1);
        self.drift_tick_ms = self.drift_tick_ms.max(1);
        self.device_timeout_ms = self.device_timeout_ms.max(1);
        self.reseek_after_ticks = self.reseek_after_ticks.max(1);
        if !self.drift_tolerance_secs.is_finite() || self.drift_tolerance_secs < 0.0 {
            self.drift_tolerance_secs = Self::default_drift_tolerance_secs();
        }
        self.initial_volume = clamp_volume(self.initial_volume);
        self
    }

    pub fn rotation_tick(&self) -> Duration {
        Duration::from_millis(self.rotation_tick_ms)
    }

    pub fn drift_tick(&self) -> Duration {
        Duration::from_millis(self.drift_tick_ms)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        pmorotation::epoch_from_millis(self.epoch_ms)
    }
}

impl Default for OnAirConfig {
    fn default() -> Self {
        Self {
            epoch_ms: Self::default_epoch_ms(),
            rotation_tick_ms: Self::default_rotation_tick_ms(),
            drift_tick_ms: Self::default_drift_tick_ms(),
            drift_tolerance_secs: Self::default_drift_tolerance_secs(),
            reseek_after_ticks: Self::default_reseek_after_ticks(),
            device_timeout_ms: Self::default_device_timeout_ms(),
            history_len: Self::default_history_len(),
            initial_volume: Self::default_initial_volume(),
            start_muted: Self::default_start_muted(),
        }
    }
}

/// Volume is a linear gain in `0.0..=1.0`; NaN maps to silence.
pub fn clamp_volume(volume: f64) -> f64 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_match_struct_defaults() {
        let config = pmoconfig::Config::from_yaml_str("").unwrap();
        assert_eq!(OnAirConfig::from_config(&config), OnAirConfig::default());
    }

    #[test]
    fn test_partial_block_keeps_other_defaults() {
        let config = pmoconfig::Config::from_yaml_str(
            "onair:\n  drift_tolerance_secs: 0.5\n  start_muted: false\n",
        )
        .unwrap();
        let cfg = OnAirConfig::from_config(&config);
        assert_eq!(cfg.drift_tolerance_secs, 0.5);
        assert!(!cfg.start_muted);
        assert_eq!(cfg.drift_tick(), Duration::from_millis(500));
        assert_eq!(cfg.epoch().timestamp_millis(), 1_704_067_200_000);
    }

    #[test]
    fn test_sanitized_values() {
        let cfg = OnAirConfig {
            rotation_tick_ms: 0,
            drift_tolerance_secs: f64::NAN,
            initial_volume: 3.0,
            ..OnAirConfig::default()
        }
        .sanitized();
        assert_eq!(cfg.rotation_tick_ms, 1);
        assert_eq!(cfg.drift_tolerance_secs, 1.5);
        assert_eq!(cfg.initial_volume, 1.0);
        assert_eq!(clamp_volume(f64::NAN), 0.0);
        assert_eq!(clamp_volume(-1.0), 0.0);
    }

    #[test]
    fn test_wrong_types_fall_back_to_defaults() {
        let config =
            pmoconfig::Config::from_yaml_str("onair:\n  history_len: lots\n").unwrap();
        assert_eq!(OnAirConfig::from_config(&config), OnAirConfig::default());
    }
}
