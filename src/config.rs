use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_SCAN_TYPE: &str = "CarotidIntima";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read configuration file {path}: {source}")]
    Unreadable {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {message}")]
    Invalid { path: String, message: String },

    #[error("Missing configuration element: {key}")]
    MissingKey { key: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub paths: PathConfig,
    pub metadata: Option<MetadataConfig>,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathConfig {
    /// Root under which `<interview>/<exam>/<image><suffix>` artifacts live.
    pub image_data: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_command")]
    pub command: String,
    /// Seconds one lookup may run before the client is killed.
    #[serde(default = "default_lookup_timeout")]
    pub timeout_secs: u64,
}

impl MetadataConfig {
    pub fn endpoint(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_scan_type")]
    pub scan_type: String,
    #[serde(default = "default_baseline_rank")]
    pub baseline_rank: i64,
    #[serde(default = "default_dimensionality")]
    pub dimensionality: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            scan_type: default_scan_type(),
            baseline_rank: default_baseline_rank(),
            dimensionality: default_dimensionality(),
        }
    }
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_command() -> String {
    "opal".to_string()
}

fn default_lookup_timeout() -> u64 {
    30
}

fn default_scan_type() -> String {
    DEFAULT_SCAN_TYPE.to_string()
}

fn default_baseline_rank() -> i64 {
    1
}

fn default_dimensionality() -> i64 {
    2
}

impl Config {
    /// Load and validate a configuration document.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;

        let config = Self::parse(&content).map_err(|e| match e {
            ConfigError::Invalid { message, .. } => ConfigError::Invalid {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Invalid {
            path: "<inline>".to_string(),
            message: e.message().to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.as_os_str().is_empty() {
            return Err(missing("database.path"));
        }
        if self.paths.image_data.as_os_str().is_empty() {
            return Err(missing("paths.image_data"));
        }
        if let Some(metadata) = &self.metadata {
            let required = [
                ("metadata.host", &metadata.host),
                ("metadata.username", &metadata.username),
                ("metadata.password", &metadata.password),
                ("metadata.scheme", &metadata.scheme),
                ("metadata.command", &metadata.command),
            ];
            for (key, value) in required {
                if value.trim().is_empty() {
                    return Err(missing(key));
                }
            }
            if metadata.port == 0 {
                return Err(missing("metadata.port"));
            }
        }
        if self.cleanup.scan_type.trim().is_empty() {
            return Err(missing("cleanup.scan_type"));
        }
        Ok(())
    }

    pub fn require_metadata(&self) -> Result<&MetadataConfig, ConfigError> {
        self.metadata.as_ref().ok_or_else(|| missing("metadata"))
    }
}

fn missing(key: &str) -> ConfigError {
    ConfigError::MissingKey {
        key: key.to_string(),
    }
}
