//! Error types for facesync-anim

use facesync_core::Error as CoreError;
use std::fmt;
use thiserror::Error;

/// Animation pipeline errors
#[derive(Error, Debug)]
pub enum AnimError {
    /// Empty, corrupt or zero-duration audio
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),

    /// Malformed or out-of-order keyframes, or missing animation fields
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<AnimError> for CoreError {
    fn from(err: AnimError) -> Self {
        CoreError::Audio(format!("Animation error: {}", err))
    }
}

/// Where in the pipeline a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Decode,
    Synthesize,
    Analyze,
    Compose,
    Synchronize,
    Render,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Decode => "decode",
            PipelineStage::Synthesize => "synthesize",
            PipelineStage::Analyze => "analyze",
            PipelineStage::Compose => "compose",
            PipelineStage::Synchronize => "synchronize",
            PipelineStage::Render => "render",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An [`AnimError`] tagged with the stage that raised it
#[derive(Error, Debug)]
#[error("{stage} stage failed: {source}")]
pub struct StageError {
    pub stage: PipelineStage,
    #[source]
    pub source: AnimError,
}

impl StageError {
    pub fn new(stage: PipelineStage, source: AnimError) -> Self {
        Self { stage, source }
    }
}
