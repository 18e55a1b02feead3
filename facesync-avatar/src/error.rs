//! Error types for facesync-avatar

use crate::provider_adapter::ProviderKind;
use facesync_anim::{AnimError, PipelineStage, StageError};
use facesync_core::Error as CoreError;
use thiserror::Error;

/// Session and provider errors
#[derive(Error, Debug)]
pub enum AvatarError {
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("{provider} job {job_id} failed: {reason}")]
    ProviderFailure {
        provider: ProviderKind,
        job_id: String,
        session_id: Option<String>,
        reason: String,
    },

    #[error("{provider} job {job_id} timed out after {attempts} poll attempts")]
    ProviderTimeout {
        provider: ProviderKind,
        job_id: String,
        session_id: Option<String>,
        attempts: u32,
    },

    #[error("Pipeline failed in session {session_id} at {stage} stage: {source}")]
    Pipeline {
        session_id: String,
        stage: PipelineStage,
        #[source]
        source: AnimError,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),
}

impl AvatarError {
    /// Tag a stage failure with the session it happened in
    pub fn pipeline(session_id: impl Into<String>, err: StageError) -> Self {
        AvatarError::Pipeline {
            session_id: session_id.into(),
            stage: err.stage,
            source: err.source,
        }
    }

    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        AvatarError::SessionNotFound {
            session_id: session_id.into(),
        }
    }
}

impl From<AvatarError> for CoreError {
    fn from(err: AvatarError) -> Self {
        CoreError::Avatar(format!("Avatar error: {}", err))
    }
}
