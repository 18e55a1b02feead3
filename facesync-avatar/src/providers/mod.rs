//! HTTP lip-sync backends

pub mod beyond_presence;
pub mod live_avatar;

pub use beyond_presence::BeyondPresenceBackend;
pub use live_avatar::LiveAvatarBackend;

use crate::config::ProviderConfig;
use crate::error::AvatarError;
use crate::provider_adapter::RemoteStatus;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::Client;
use url::{Host, Url};

/// Error bodies are truncated to this many bytes
const MAX_ERROR_TEXT_SIZE: usize = 10_000;

/// Connection details shared by the HTTP backends
#[derive(Debug, Clone)]
pub(crate) struct HttpEndpoint {
    pub client: Client,
    pub base_url: String,
    pub api_key: String,
    pub max_response_bytes: usize,
}

impl HttpEndpoint {
    /// Credentials from the environment variables named in `config`
    pub fn from_env(config: &ProviderConfig, default_base_url: &str) -> Result<Self, AvatarError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| AvatarError::Config(format!("{} environment variable not set", config.api_key_env)))?;

        let base_url = config
            .base_url
            .clone()
            .or_else(|| std::env::var(&config.base_url_env).ok())
            .unwrap_or_else(|| default_base_url.to_string());

        Self::new(config, base_url, api_key)
    }

    pub fn new(config: &ProviderConfig, base_url: String, api_key: String) -> Result<Self, AvatarError> {
        if api_key.is_empty() || api_key.len() > 512 {
            return Err(AvatarError::Config("Invalid API key length".to_string()));
        }
        if api_key.chars().any(|c| c.is_control()) {
            return Err(AvatarError::Config("API key contains invalid characters".to_string()));
        }

        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.len() > 2048 {
            return Err(AvatarError::Config("Base URL too long".to_string()));
        }
        ensure_secure(&Url::parse(&base_url)?)?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AvatarError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            max_response_bytes: config.max_response_bytes,
        })
    }

    /// `{base}/{segments...}` with each segment percent-encoded
    pub fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for segment in segments {
            url.push('/');
            url.extend(utf8_percent_encode(segment, NON_ALPHANUMERIC));
        }
        url
    }

    /// Read a JSON body, enforcing the size limit and mapping non-2xx to `Api`
    pub async fn read_json(&self, response: reqwest::Response, what: &str) -> Result<serde_json::Value, AvatarError> {
        let status = response.status();
        if !status.is_success() {
            let bytes = response.bytes().await.unwrap_or_default();
            let end = bytes.len().min(MAX_ERROR_TEXT_SIZE);
            let error_text = String::from_utf8_lossy(&bytes[..end]);
            return Err(AvatarError::Api(format!("{} failed: {} - {}", what, status, error_text)));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_response_bytes as u64 {
                return Err(AvatarError::Api(format!(
                    "{} response too large (max {} bytes)",
                    what, self.max_response_bytes
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AvatarError::Network(format!("Failed to read {} response: {}", what, e)))?;
        if bytes.len() > self.max_response_bytes {
            return Err(AvatarError::Api(format!(
                "{} response too large (max {} bytes)",
                what, self.max_response_bytes
            )));
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| AvatarError::Api(format!("Failed to parse {} response: {}", what, e)))
    }
}

/// HTTPS only, except for loopback hosts
pub(crate) fn ensure_secure(url: &Url) -> Result<(), AvatarError> {
    if url.scheme() == "https" {
        return Ok(());
    }
    let loopback = match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    };
    if url.scheme() == "http" && loopback {
        return Ok(());
    }
    Err(AvatarError::Config(format!(
        "Base URL must use HTTPS (got {})",
        url.as_str()
    )))
}

/// Job ids from providers end up in URLs and logs
pub(crate) fn validate_job_id(id: &str) -> Result<(), AvatarError> {
    if id.is_empty() || id.len() > 256 || id.chars().any(|c| !c.is_alphanumeric() && c != '-' && c != '_') {
        return Err(AvatarError::Api("Invalid job id from API".to_string()));
    }
    Ok(())
}

/// First string field present among `keys`
pub(crate) fn string_field(value: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(|v| v.as_str()))
        .map(str::to_string)
}

/// Interpret a provider status document
pub(crate) fn parse_status(doc: &serde_json::Value, result_keys: &[&str]) -> Result<RemoteStatus, AvatarError> {
    let status = string_field(doc, &["status", "state"])
        .ok_or_else(|| AvatarError::Api("Missing status in response".to_string()))?
        .to_ascii_lowercase();

    match status.as_str() {
        "pending" | "queued" | "submitted" | "created" => Ok(RemoteStatus::Pending),
        "running" | "processing" | "in_progress" | "rendering" => Ok(RemoteStatus::Running),
        "done" | "completed" | "complete" | "succeeded" | "ready" => Ok(RemoteStatus::Done {
            result_url: string_field(doc, result_keys),
            duration: doc.get("duration").and_then(|d| d.as_f64()),
        }),
        "failed" | "error" | "cancelled" | "canceled" => Ok(RemoteStatus::Failed {
            reason: string_field(doc, &["error", "message", "reason"])
                .unwrap_or_else(|| format!("provider reported '{}'", status)),
        }),
        other => Err(AvatarError::Api(format!("Unknown job status '{}'", other))),
    }
}
