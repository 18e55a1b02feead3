//! LiveAvatar lip-sync backend

use super::{parse_status, string_field, validate_job_id, HttpEndpoint};
use crate::config::ProviderConfig;
use crate::error::AvatarError;
use crate::provider_adapter::{LipSyncBackend, LipSyncRequest, ProviderKind, RemoteStatus, RenderedClip};
use async_trait::async_trait;
use tracing::{debug, info};

const DEFAULT_BASE_URL: &str = "https://api.liveavatar.ai/v1";

/// LiveAvatar batch rendering:
/// `POST /lipsync/jobs`, `GET /lipsync/jobs/{id}`, `GET /lipsync/jobs/{id}/result`
pub struct LiveAvatarBackend {
    endpoint: HttpEndpoint,
}

impl LiveAvatarBackend {
    /// Reads the API key (and optionally the base URL) from the environment
    pub fn from_env(config: &ProviderConfig) -> Result<Self, AvatarError> {
        Ok(Self {
            endpoint: HttpEndpoint::from_env(config, DEFAULT_BASE_URL)?,
        })
    }

    pub fn with_credentials(
        config: &ProviderConfig,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, AvatarError> {
        Ok(Self {
            endpoint: HttpEndpoint::new(config, base_url.into(), api_key.into())?,
        })
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.endpoint.api_key)
    }
}

#[async_trait]
impl LipSyncBackend for LiveAvatarBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LiveAvatar
    }

    async fn submit(&self, request: &LipSyncRequest) -> Result<String, AvatarError> {
        let payload = serde_json::json!({
            "audio_url": request.audio_url,
            "avatar_id": request.avatar_id,
            "options": request.options,
        });

        let response = self
            .endpoint
            .client
            .post(self.endpoint.url(&["lipsync", "jobs"]))
            .header("Authorization", self.auth())
            .json(&payload)
            .send()
            .await
            .map_err(|e| AvatarError::Network(format!("Failed to submit LiveAvatar job: {}", e)))?;

        let body = self.endpoint.read_json(response, "LiveAvatar job submission").await?;
        let job_id = string_field(&body, &["job_id", "id"])
            .ok_or_else(|| AvatarError::Api("Missing job_id in response".to_string()))?;
        validate_job_id(&job_id)?;

        info!("LiveAvatar job created: {}", job_id);
        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<RemoteStatus, AvatarError> {
        let response = self
            .endpoint
            .client
            .get(self.endpoint.url(&["lipsync", "jobs", job_id]))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| AvatarError::Network(format!("Failed to poll LiveAvatar job: {}", e)))?;

        let body = self.endpoint.read_json(response, "LiveAvatar job status").await?;
        let status = parse_status(&body, &["result_url"])?;
        debug!("LiveAvatar job {} status: {:?}", job_id, status);
        Ok(status)
    }

    async fn fetch(&self, job_id: &str) -> Result<RenderedClip, AvatarError> {
        let response = self
            .endpoint
            .client
            .get(self.endpoint.url(&["lipsync", "jobs", job_id, "result"]))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| AvatarError::Network(format!("Failed to fetch LiveAvatar result: {}", e)))?;

        let body = self.endpoint.read_json(response, "LiveAvatar job result").await?;
        let result_url = string_field(&body, &["result_url", "video_url", "url"])
            .ok_or_else(|| AvatarError::Api("Missing result_url in response".to_string()))?;
        url::Url::parse(&result_url)?;

        Ok(RenderedClip {
            job_id: job_id.to_string(),
            provider: ProviderKind::LiveAvatar,
            result_url,
            duration: body.get("duration").and_then(|d| d.as_f64()),
        })
    }
}
