//! Environment configuration (`lsf.toml`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Contents of `<home>/.lsf/lsf.toml`. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LsfConfig {
    #[serde(default)]
    pub track: TrackSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Defaults for `lsf track`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSettings {
    /// Poll interval in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Max tracked objects; 0 means unbounded
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: u16,

    /// Max object age in seconds; 0 disables age eviction
    #[serde(default)]
    pub max_cache_age_secs: u64,

    /// Rotated event log generations kept
    #[serde(default = "default_max_rotations")]
    pub max_rotations: u8,

    /// Event log size that triggers rotation, in bytes
    #[serde(default = "default_log_file_size")]
    pub log_file_size: u64,

    /// Consecutive failed polls tolerated before the tracker gives up
    #[serde(default = "default_max_poll_failures")]
    pub max_poll_failures: u32,
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_max_cache_size() -> u16 {
    16
}

fn default_max_rotations() -> u8 {
    1
}

fn default_log_file_size() -> u64 {
    128 * 1024
}

fn default_max_poll_failures() -> u32 {
    3
}

impl Default for TrackSettings {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            max_cache_size: default_max_cache_size(),
            max_cache_age_secs: 0,
            max_rotations: default_max_rotations(),
            log_file_size: default_log_file_size(),
            max_poll_failures: default_max_poll_failures(),
        }
    }
}

impl TrackSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn max_cache_age(&self) -> Duration {
        Duration::from_secs(self.max_cache_age_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl LsfConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration, falling back to defaults if the file is missing
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: LsfConfig = toml::from_str("").unwrap();
        assert_eq!(config, LsfConfig::default());
        assert_eq!(config.track.delay(), Duration::from_secs(1));
        assert_eq!(config.track.max_cache_size, 16);
        assert_eq!(config.track.max_rotations, 1);
        assert_eq!(config.track.log_file_size, 131072);
        assert_eq!(config.track.max_poll_failures, 3);
        assert_eq!(config.track.max_cache_age(), Duration::ZERO);
    }

    #[test]
    fn test_partial_track_section() {
        let config: LsfConfig = toml::from_str(
            r#"
            [track]
            delay_ms = 250
            max_cache_age_secs = 60

            [logging]
            filter = "lsf=debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.track.delay(), Duration::from_millis(250));
        assert_eq!(config.track.max_cache_age(), Duration::from_secs(60));
        assert_eq!(config.track.max_cache_size, 16);
        assert_eq!(config.logging.filter.as_deref(), Some("lsf=debug"));
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lsf.toml");

        let mut config = LsfConfig::default();
        config.track.max_cache_size = 4;
        config.save(&path).unwrap();

        assert_eq!(LsfConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_file_reports_parse_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lsf.toml");
        std::fs::write(&path, "[track]\ndelay_ms = \"soon\"\n").unwrap();

        assert!(matches!(LsfConfig::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_defaults() {
        let temp = TempDir::new().unwrap();
        let config = LsfConfig::load_or_default(&temp.path().join("absent.toml")).unwrap();
        assert_eq!(config, LsfConfig::default());
    }
}
