//! Configuration for the export service.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory of experiment snapshots (`{code}.json`)
    pub data_path: PathBuf,

    /// Root directory of the artifact store
    pub artifact_path: PathBuf,

    /// Path of the persisted audit statistics
    pub audit_path: PathBuf,

    /// IANA timezone raw keypress timestamps are rendered in
    pub export_timezone: String,

    /// Time budget for one experiment's computation
    #[serde(with = "duration_serde")]
    pub experiment_timeout: Duration,

    /// Experiments processed concurrently
    pub max_workers: usize,

    /// Attempts per experiment before a timeout is reported
    pub attempts: u32,

    /// Delay between passes of `tapstudy watch`
    #[serde(with = "duration_serde")]
    pub watch_interval: Duration,

    /// Port for the download server
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tapstudy");

        Self {
            data_path: data_dir.join("experiments"),
            artifact_path: data_dir.join("artifacts"),
            audit_path: data_dir.join("audit.json"),
            export_timezone: "UTC".to_string(),
            experiment_timeout: Duration::from_secs(120),
            max_workers: 4,
            attempts: 2,
            watch_interval: Duration::from_secs(300), // 5 minutes
            server_port: 8088,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it is absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tapstudy")
            .join("config.json")
    }

    /// Parsed export timezone.
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.export_timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::InvalidValue(format!("export_timezone: {e}")))
    }

    /// Reject values the batch driver cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timezone()?;
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.artifact_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::InvalidValue(e) => write!(f, "Invalid value: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration (whole seconds).
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
