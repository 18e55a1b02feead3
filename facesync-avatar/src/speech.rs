//! Speech provider seam for text utterances

use crate::error::AvatarError;
use async_trait::async_trait;
use facesync_anim::{AudioBuffer, PhonemeTiming};

/// Audio produced for one utterance
#[derive(Debug, Clone)]
pub struct SynthesizedSpeech {
    pub audio: AudioBuffer,
    /// Phoneme timing when the provider reports it
    pub phonemes: Option<Vec<PhonemeTiming>>,
}

/// Upstream text-to-speech provider
#[async_trait]
pub trait SpeechSource: Send + Sync {
    /// Synthesize `text` in the voice assigned to `counselor_id`
    async fn synthesize(&self, text: &str, counselor_id: &str) -> Result<SynthesizedSpeech, AvatarError>;

    fn name(&self) -> &str;
}
