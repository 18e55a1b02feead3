//! Configuration loading shared by every facesync crate
//!
//! Config structs live next to the components they configure; this module only
//! knows how to turn files, strings and environment variables into them.

use serde::de::DeserializeOwned;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Maximum accepted config file size (1MB)
const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Configuration(err.to_string())
    }
}

/// Serialized configuration formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
    Yaml,
}

impl ConfigFormat {
    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(ConfigFormat::Json),
            "toml" => Some(ConfigFormat::Toml),
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            _ => None,
        }
    }
}

/// Parse `content` in a known format
pub fn parse_as<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> Result<T, ConfigError> {
    match format {
        ConfigFormat::Json => serde_json::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("invalid JSON: {}", e))),
        ConfigFormat::Toml => toml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("invalid TOML: {}", e))),
        ConfigFormat::Yaml => serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("invalid YAML: {}", e))),
    }
}

/// Parse configuration of unknown format: JSON first, then TOML, then YAML
pub fn load_from_str<T: DeserializeOwned>(content: &str) -> Result<T, ConfigError> {
    if let Ok(config) = serde_json::from_str::<T>(content) {
        return Ok(config);
    }

    if let Ok(config) = toml::from_str::<T>(content) {
        return Ok(config);
    }

    if let Ok(config) = serde_yaml::from_str::<T>(content) {
        return Ok(config);
    }

    Err(ConfigError::Parse("Unknown format (expected JSON, TOML or YAML)".to_string()))
}

/// Load configuration from a file; the extension picks the parser when recognised
pub fn load_from_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();

    let metadata = std::fs::metadata(path)
        .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
    if metadata.len() > MAX_CONFIG_SIZE {
        return Err(ConfigError::Io(format!(
            "{}: config file too large ({} bytes, max {})",
            path.display(),
            metadata.len(),
            MAX_CONFIG_SIZE
        )));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;

    match ConfigFormat::from_path(path) {
        Some(format) => {
            debug!("Loading {:?} config from {}", format, path.display());
            parse_as(&content, format)
        }
        None => load_from_str(&content),
    }
}

/// Read and parse an environment variable, ignoring unset or malformed values
pub fn env_override<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring malformed value for {}: {:?}", key, raw);
            None
        }
    }
}
