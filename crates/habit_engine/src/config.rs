//! Engine configuration.
//!
//! Configuration lives in /etc/habit-engine/config.toml. Every field has a
//! default, so a missing file or a missing section is never an error.
//! Numeric settings are clamped to sane ranges when read.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::store::DbLocation;

/// System configuration directory
pub const SYSTEM_CONFIG_DIR: &str = "/etc/habit-engine";
const CONFIG_FILE: &str = "config.toml";

/// Storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Database path; unset means the per-user data directory
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Insert the built-in achievement catalog into an empty database
    #[serde(default = "default_seed_catalog")]
    pub seed_builtin_catalog: bool,
}

fn default_seed_catalog() -> bool {
    true
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: None,
            seed_builtin_catalog: default_seed_catalog(),
        }
    }
}

impl StorageSettings {
    pub fn location(&self) -> DbLocation {
        match &self.path {
            Some(path) => DbLocation::File(path.clone()),
            None => DbLocation::UserData,
        }
    }
}

/// Analytics report settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSettings {
    /// Trailing days used for rates, consistency and trend (valid: 7-365)
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Trailing days scanned for streaks (valid: 30-3650)
    #[serde(default = "default_history_days")]
    pub history_days: u32,
}

fn default_window_days() -> u32 {
    30
}

fn default_history_days() -> u32 {
    365
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            history_days: default_history_days(),
        }
    }
}

impl AnalyticsSettings {
    pub fn effective_window_days(&self) -> u32 {
        self.window_days.clamp(7, 365)
    }

    /// Never shorter than the analytics window
    pub fn effective_history_days(&self) -> u32 {
        self.history_days
            .clamp(30, 3650)
            .max(self.effective_window_days())
    }
}

/// Completion-rate prediction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSettings {
    /// Maximum absolute jitter added to a prediction (valid: 0.0-0.25)
    #[serde(default = "default_noise_amplitude")]
    pub noise_amplitude: f64,

    /// Fixed seed for reproducible predictions; unset draws from entropy
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_noise_amplitude() -> f64 {
    0.05
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self {
            noise_amplitude: default_noise_amplitude(),
            seed: None,
        }
    }
}

impl PredictionSettings {
    pub fn effective_noise_amplitude(&self) -> f64 {
        if self.noise_amplitude.is_nan() {
            return 0.0;
        }
        self.noise_amplitude.clamp(0.0, 0.25)
    }
}

/// Leaderboard settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardSettings {
    /// Entries returned when the caller gives no limit (valid: 1-100)
    #[serde(default = "default_leaderboard_limit")]
    pub default_limit: usize,
}

fn default_leaderboard_limit() -> usize {
    10
}

impl Default for LeaderboardSettings {
    fn default() -> Self {
        Self {
            default_limit: default_leaderboard_limit(),
        }
    }
}

impl LeaderboardSettings {
    /// Clamp a requested limit, falling back to the default
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_limit).clamp(1, 100)
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub analytics: AnalyticsSettings,
    #[serde(default)]
    pub prediction: PredictionSettings,
    #[serde(default)]
    pub leaderboard: LeaderboardSettings,
}

impl EngineConfig {
    /// Load from the system config file, falling back to defaults
    pub fn load() -> Self {
        let path = config_path();
        if path.exists() {
            if let Ok(config) = Self::load_from(&path) {
                return config;
            }
            tracing::warn!("Ignoring unreadable config at {}", path.display());
        }
        Self::default()
    }

    /// Load from an explicit file; parse errors are returned
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, content)
    }
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    PathBuf::from(SYSTEM_CONFIG_DIR).join(CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.analytics.effective_window_days(), 30);
        assert_eq!(config.analytics.effective_history_days(), 365);
        assert_eq!(config.prediction.effective_noise_amplitude(), 0.05);
        assert_eq!(config.leaderboard.effective_limit(None), 10);
        assert!(config.storage.seed_builtin_catalog);
        assert_eq!(config.storage.location(), DbLocation::UserData);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [analytics]
            window_days = 14

            [prediction]
            seed = 42
            "#,
        )
        .unwrap();
        assert_eq!(config.analytics.window_days, 14);
        assert_eq!(config.analytics.history_days, 365);
        assert_eq!(config.prediction.seed, Some(42));
        assert_eq!(config.prediction.noise_amplitude, 0.05);
    }

    #[test]
    fn test_clamping() {
        let analytics = AnalyticsSettings { window_days: 1, history_days: 5 };
        assert_eq!(analytics.effective_window_days(), 7);
        assert_eq!(analytics.effective_history_days(), 30);

        let wide = AnalyticsSettings { window_days: 200, history_days: 60 };
        assert_eq!(wide.effective_history_days(), 200);

        let prediction = PredictionSettings { noise_amplitude: 3.0, seed: None };
        assert_eq!(prediction.effective_noise_amplitude(), 0.25);

        let board = LeaderboardSettings::default();
        assert_eq!(board.effective_limit(Some(0)), 1);
        assert_eq!(board.effective_limit(Some(5000)), 100);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = EngineConfig::default();
        config.storage.path = Some(dir.path().join("engine.db"));
        config.prediction.seed = Some(7);

        config.save_to(&path).unwrap();
        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[analytics\nwindow_days = ").unwrap();
        assert!(matches!(
            EngineConfig::load_from(&path),
            Err(EngineError::Config(_))
        ));
    }
}
