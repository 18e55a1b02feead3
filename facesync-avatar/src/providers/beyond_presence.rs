//! Beyond Presence lip-sync backend

use super::{parse_status, string_field, validate_job_id, HttpEndpoint};
use crate::config::ProviderConfig;
use crate::error::AvatarError;
use crate::provider_adapter::{LipSyncBackend, LipSyncRequest, ProviderKind, RemoteStatus, RenderedClip};
use async_trait::async_trait;
use tracing::{debug, info};

const DEFAULT_BASE_URL: &str = "https://api.bey.dev/v1";

/// Beyond Presence video generation: `POST /videos`, `GET /videos/{id}`.
/// The status document carries the result, so `fetch` re-reads it.
pub struct BeyondPresenceBackend {
    endpoint: HttpEndpoint,
}

impl BeyondPresenceBackend {
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

    async fn status_document(&self, job_id: &str) -> Result<serde_json::Value, AvatarError> {
        let response = self
            .endpoint
            .client
            .get(self.endpoint.url(&["videos", job_id]))
            .header("x-api-key", &self.endpoint.api_key)
            .send()
            .await
            .map_err(|e| AvatarError::Network(format!("Failed to poll Beyond Presence video: {}", e)))?;

        self.endpoint.read_json(response, "Beyond Presence video status").await
    }
}

#[async_trait]
impl LipSyncBackend for BeyondPresenceBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::BeyondPresence
    }

    async fn submit(&self, request: &LipSyncRequest) -> Result<String, AvatarError> {
        let mut payload = request.options.clone();
        payload.insert("avatar_id".to_string(), request.avatar_id.clone().into());
        payload.insert("audio_url".to_string(), request.audio_url.clone().into());

        let response = self
            .endpoint
            .client
            .post(self.endpoint.url(&["videos"]))
            .header("x-api-key", &self.endpoint.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AvatarError::Network(format!("Failed to submit Beyond Presence video: {}", e)))?;

        let body = self.endpoint.read_json(response, "Beyond Presence video submission").await?;
        let video_id = string_field(&body, &["id", "video_id"])
            .ok_or_else(|| AvatarError::Api("Missing video id in response".to_string()))?;
        validate_job_id(&video_id)?;

        info!("Beyond Presence video created: {}", video_id);
        Ok(video_id)
    }

    async fn poll(&self, job_id: &str) -> Result<RemoteStatus, AvatarError> {
        let body = self.status_document(job_id).await?;
        let status = parse_status(&body, &["video_url", "url"])?;
        debug!("Beyond Presence video {} status: {:?}", job_id, status);
        Ok(status)
    }

    async fn fetch(&self, job_id: &str) -> Result<RenderedClip, AvatarError> {
        let body = self.status_document(job_id).await?;
        match parse_status(&body, &["video_url", "url"])? {
            RemoteStatus::Done {
                result_url: Some(result_url),
                duration,
            } => {
                url::Url::parse(&result_url)?;
                Ok(RenderedClip {
                    job_id: job_id.to_string(),
                    provider: ProviderKind::BeyondPresence,
                    result_url,
                    duration,
                })
            }
            RemoteStatus::Done { result_url: None, .. } => {
                Err(AvatarError::Api("Completed video has no video_url".to_string()))
            }
            other => Err(AvatarError::Api(format!("Video {} is not complete: {:?}", job_id, other))),
        }
    }
}
