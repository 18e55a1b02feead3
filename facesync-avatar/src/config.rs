//! Configuration for provider polling, sessions and the counselor roster

use crate::provider_adapter::ProviderKind;
use facesync_anim::{AnalysisConfig, ExpressionConfig};
use facesync_core::config::{env_override, load_from_file, load_from_str, ConfigError};
use facesync_core::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Provider job polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Delay between status checks in milliseconds (default 2500)
    pub interval_ms: u64,

    /// Status checks before a job is declared timed out (default 50)
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2500,
            max_attempts: 50,
        }
    }
}

impl PollConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 || self.interval_ms > 600_000 {
            return Err("Poll interval must be between 1 ms and 10 minutes".to_string());
        }
        if self.max_attempts == 0 || self.max_attempts > 10_000 {
            return Err("Max poll attempts must be between 1 and 10000".to_string());
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Session lifecycle and streaming
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds without activity before a session counts as expired (default 300)
    pub inactivity_secs: u64,

    /// Trailing window of streamed viseme history in seconds (default 2.0)
    pub history_window_secs: f64,

    /// Streamed chunks kept for flushing; the oldest is dropped beyond this (default 256)
    pub max_buffered_chunks: usize,

    /// Run the background sweep that deletes expired sessions (off by default)
    pub eviction_sweep: bool,

    /// Sweep period in seconds (default 60)
    pub sweep_interval_secs: u64,

    /// Capacity of the streaming frame broadcast channel (default 256)
    pub frame_channel_capacity: usize,

    /// Maximum concurrent sessions (default 10000)
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_secs: 300,
            history_window_secs: 2.0,
            max_buffered_chunks: 256,
            eviction_sweep: false,
            sweep_interval_secs: 60,
            frame_channel_capacity: 256,
            max_sessions: 10_000,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.inactivity_secs == 0 {
            return Err("Inactivity timeout cannot be 0".to_string());
        }
        if !self.history_window_secs.is_finite() || self.history_window_secs <= 0.0 || self.history_window_secs > 60.0 {
            return Err("History window must be in (0, 60] seconds".to_string());
        }
        if self.max_buffered_chunks == 0 {
            return Err("Max buffered chunks cannot be 0".to_string());
        }
        if self.sweep_interval_secs == 0 {
            return Err("Sweep interval cannot be 0".to_string());
        }
        if self.frame_channel_capacity == 0 {
            return Err("Frame channel capacity cannot be 0".to_string());
        }
        if self.max_sessions == 0 {
            return Err("Max sessions cannot be 0".to_string());
        }
        Ok(())
    }

    pub fn inactivity(&self) -> Duration {
        Duration::from_secs(self.inactivity_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// HTTP backend settings. Credentials are read from the environment only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL; `None` uses `base_url_env`, then the built-in default
    pub base_url: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Environment variable that may override the base URL
    pub base_url_env: String,

    /// Per-request timeout in seconds (default 30)
    pub request_timeout_secs: u64,

    /// Largest response body accepted, in bytes (default 100KB)
    pub max_response_bytes: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::live_avatar()
    }
}

impl ProviderConfig {
    pub fn live_avatar() -> Self {
        Self {
            base_url: None,
            api_key_env: "LIVE_AVATAR_API_KEY".to_string(),
            base_url_env: "LIVE_AVATAR_BASE_URL".to_string(),
            request_timeout_secs: 30,
            max_response_bytes: 100 * 1024,
        }
    }

    pub fn beyond_presence() -> Self {
        Self {
            base_url: None,
            api_key_env: "BEYOND_PRESENCE_API_KEY".to_string(),
            base_url_env: "BEYOND_PRESENCE_BASE_URL".to_string(),
            request_timeout_secs: 30,
            max_response_bytes: 100 * 1024,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.api_key_env.trim().is_empty() || self.base_url_env.trim().is_empty() {
            return Err("Provider environment variable names cannot be empty".to_string());
        }
        if let Some(ref url) = self.base_url {
            if url.is_empty() || url.len() > 2048 {
                return Err("Provider base URL must be 1-2048 characters".to_string());
            }
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > 600 {
            return Err("Request timeout must be between 1 and 600 seconds".to_string());
        }
        if self.max_response_bytes < 1024 || self.max_response_bytes > 16 * 1024 * 1024 {
            return Err("Max response size must be between 1KB and 16MB".to_string());
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Avatar assigned to one counselor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounselorProfile {
    pub counselor_id: String,
    pub avatar_id: String,
    pub display_name: String,
}

/// Avatar roster and provider selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    /// Avatar used for counselors missing from the roster
    pub default_avatar_id: String,

    pub default_display_name: String,

    /// Backend used when a render request does not name one
    pub default_provider: ProviderKind,

    pub counselors: Vec<CounselorProfile>,

    pub live_avatar: ProviderConfig,

    pub beyond_presence: ProviderConfig,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            default_avatar_id: "default".to_string(),
            default_display_name: "Counselor".to_string(),
            default_provider: ProviderKind::LiveAvatar,
            counselors: Vec::new(),
            live_avatar: ProviderConfig::live_avatar(),
            beyond_presence: ProviderConfig::beyond_presence(),
        }
    }
}

impl AvatarConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_id("Default avatar ID", &self.default_avatar_id)?;
        if self.default_display_name.trim().is_empty() {
            return Err("Default display name cannot be empty".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for profile in &self.counselors {
            validate_id("Counselor ID", &profile.counselor_id)?;
            validate_id("Avatar ID", &profile.avatar_id)?;
            if !seen.insert(profile.counselor_id.as_str()) {
                return Err(format!("Duplicate counselor '{}' in roster", profile.counselor_id));
            }
        }

        self.live_avatar.validate()?;
        self.beyond_presence.validate()?;
        Ok(())
    }

    /// Roster entry for `counselor_id`, or the default avatar
    pub fn profile_for(&self, counselor_id: &str) -> CounselorProfile {
        self.counselors
            .iter()
            .find(|p| p.counselor_id == counselor_id)
            .cloned()
            .unwrap_or_else(|| CounselorProfile {
                counselor_id: counselor_id.to_string(),
                avatar_id: self.default_avatar_id.clone(),
                display_name: self.default_display_name.clone(),
            })
    }

    pub fn provider(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::LiveAvatar => &self.live_avatar,
            ProviderKind::BeyondPresence => &self.beyond_presence,
        }
    }
}

/// Identifiers that end up in URLs and provider payloads
pub(crate) fn validate_id(what: &str, id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} cannot be empty", what));
    }
    if id.len() > 256 {
        return Err(format!("{} too long (max 256 chars)", what));
    }
    if id.chars().any(|c| !c.is_alphanumeric() && c != '-' && c != '_' && c != '.') {
        return Err(format!("{} contains invalid characters", what));
    }
    if id.contains("..") {
        return Err(format!("{} cannot contain '..'", what));
    }
    Ok(())
}

/// Whole-system configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FacesyncConfig {
    pub logging: LoggingConfig,
    pub analysis: AnalysisConfig,
    pub expression: ExpressionConfig,
    pub poll: PollConfig,
    pub session: SessionConfig,
    pub avatar: AvatarConfig,
}

impl FacesyncConfig {
    /// Load from a JSON, TOML or YAML file, apply `FACESYNC_*` overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config: Self = load_from_file(path)?;
        config.apply_env_overrides();
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Parse from a string of unknown format and validate
    pub fn from_str_any(content: &str) -> Result<Self, ConfigError> {
        let config: Self = load_from_str(content)?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Environment variables with the `FACESYNC_` prefix win over file values
    pub fn apply_env_overrides(&mut self) {
        if let Some(level) = env_override::<String>("FACESYNC_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = env_override("FACESYNC_LOG_JSON") {
            self.logging.json = json;
        }
        if let Some(window_ms) = env_override("FACESYNC_WINDOW_MS") {
            self.analysis.window_ms = window_ms;
        }
        if let Some(gain) = env_override("FACESYNC_GAIN") {
            self.analysis.gain = gain;
        }
        if let Some(seed) = env_override("FACESYNC_JITTER_SEED") {
            self.expression.jitter_seed = Some(seed);
        }
        if let Some(interval_ms) = env_override("FACESYNC_POLL_INTERVAL_MS") {
            self.poll.interval_ms = interval_ms;
        }
        if let Some(max_attempts) = env_override("FACESYNC_POLL_MAX_ATTEMPTS") {
            self.poll.max_attempts = max_attempts;
        }
        if let Some(secs) = env_override("FACESYNC_INACTIVITY_SECS") {
            self.session.inactivity_secs = secs;
        }
        if let Some(sweep) = env_override("FACESYNC_EVICTION_SWEEP") {
            self.session.eviction_sweep = sweep;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.logging.validate()?;
        self.analysis.validate()?;
        self.expression.validate()?;
        self.poll.validate()?;
        self.session.validate()?;
        self.avatar.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FacesyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll.interval(), Duration::from_millis(2500));
        assert_eq!(config.poll.max_attempts, 50);
        assert_eq!(config.session.inactivity(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = FacesyncConfig::from_str_any(
            r#"
            [poll]
            max_attempts = 5

            [[avatar.counselors]]
            counselor_id = "maya"
            avatar_id = "avatar-maya"
            display_name = "Maya"
            "#,
        )
        .unwrap();
        assert_eq!(config.poll.max_attempts, 5);
        assert_eq!(config.poll.interval_ms, 2500);
        assert_eq!(config.avatar.counselors.len(), 1);
    }

    #[test]
    fn test_yaml_is_accepted() {
        let config = FacesyncConfig::from_str_any("session:\n  inactivity_secs: 42\n").unwrap();
        assert_eq!(config.session.inactivity_secs, 42);
    }

    #[test]
    fn test_roster_lookup_falls_back_to_default() {
        let mut avatar = AvatarConfig::default();
        avatar.counselors.push(CounselorProfile {
            counselor_id: "maya".into(),
            avatar_id: "avatar-maya".into(),
            display_name: "Maya".into(),
        });

        assert_eq!(avatar.profile_for("maya").avatar_id, "avatar-maya");
        let fallback = avatar.profile_for("sam");
        assert_eq!(fallback.avatar_id, "default");
        assert_eq!(fallback.counselor_id, "sam");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = FacesyncConfig::default();
        config.poll.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = FacesyncConfig::default();
        config.avatar.default_avatar_id = "../etc".into();
        assert!(config.validate().is_err());

        let mut config = FacesyncConfig::default();
        config.session.history_window_secs = 0.0;
        assert!(config.validate().is_err());

        let invalid = FacesyncConfig::from_str_any("{\"poll\": {\"interval_ms\": 0}}");
        assert!(matches!(invalid, Err(ConfigError::Validation(_))));
    }
}
