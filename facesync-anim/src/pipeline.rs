//! Single-utterance lip-sync pipeline: analyze, compose, synchronize

use crate::analyzer::AmplitudeAnalyzer;
use crate::audio::AudioBuffer;
use crate::config::{AnalysisConfig, ExpressionConfig};
use crate::error::{AnimError, PipelineStage, StageError};
use crate::expression::{ExpressionComposer, ExpressionKeyframe};
use crate::timeline::{synchronize, AnimationTimeline, TimelineMeta};
use crate::viseme::{phonemes_to_visemes, PhonemeTiming, VisemeKeyframe};
use facesync_core::JitterSource;
use std::sync::Arc;
use tracing::debug;

/// Stateless pipeline over one audio buffer. Safe to share between sessions.
pub struct LipSyncPipeline {
    analyzer: AmplitudeAnalyzer,
    composer: ExpressionComposer,
}

impl LipSyncPipeline {
    pub fn new(
        analysis: AnalysisConfig,
        expression: ExpressionConfig,
        jitter: Arc<dyn JitterSource>,
    ) -> Result<Self, AnimError> {
        Ok(Self {
            analyzer: AmplitudeAnalyzer::new(analysis)?,
            composer: ExpressionComposer::new(expression, jitter)?,
        })
    }

    pub fn analyzer(&self) -> &AmplitudeAnalyzer {
        &self.analyzer
    }

    pub fn composer(&self) -> &ExpressionComposer {
        &self.composer
    }

    /// Amplitude-driven visemes for the whole buffer
    pub fn generate_viseme_data(&self, audio: &AudioBuffer) -> Result<Vec<VisemeKeyframe>, AnimError> {
        self.analyzer.analyze(audio)
    }

    /// Phoneme timing wins when present; amplitude mapping is the fallback
    pub fn visemes_for(
        &self,
        audio: &AudioBuffer,
        phonemes: Option<&[PhonemeTiming]>,
    ) -> Result<Vec<VisemeKeyframe>, AnimError> {
        match phonemes {
            Some(timing) if !timing.is_empty() => {
                debug!("Deriving visemes from {} phonemes", timing.len());
                phonemes_to_visemes(timing, self.analyzer.config().neutral_intensity)
            }
            _ => self.generate_viseme_data(audio),
        }
    }

    pub fn compose_expressions(&self, context: &str, mood: &str, duration: f64) -> Vec<ExpressionKeyframe> {
        self.composer.compose(context, mood, duration)
    }

    /// Full pass from audio to a timeline starting at 0
    pub fn build_timeline(
        &self,
        audio: &AudioBuffer,
        phonemes: Option<&[PhonemeTiming]>,
        meta: TimelineMeta,
    ) -> Result<AnimationTimeline, StageError> {
        let visemes = self
            .visemes_for(audio, phonemes)
            .map_err(|e| StageError::new(PipelineStage::Analyze, e))?;

        let duration = visemes
            .last()
            .map(|v| v.end())
            .unwrap_or(0.0)
            .max(audio.duration());
        let expressions = self.compose_expressions(&meta.context, &meta.mood, duration);

        let timeline = synchronize(visemes, expressions, duration, meta)
            .map_err(|e| StageError::new(PipelineStage::Synchronize, e))?;

        debug!(
            "Built timeline: {} visemes, {} expressions, {:.3}s",
            timeline.visemes.len(),
            timeline.expressions.len(),
            timeline.duration
        );
        Ok(timeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viseme::Viseme;
    use facesync_core::NoJitter;

    fn pipeline() -> LipSyncPipeline {
        LipSyncPipeline::new(AnalysisConfig::default(), ExpressionConfig::default(), Arc::new(NoJitter)).unwrap()
    }

    fn meta() -> TimelineMeta {
        TimelineMeta {
            avatar_id: "avatar-1".into(),
            counselor_id: "counselor-1".into(),
            context: "supportive".into(),
            mood: "calm".into(),
        }
    }

    #[test]
    fn test_build_timeline_aligns_streams() {
        let audio = AudioBuffer::mono(vec![0.1; 16_000], 16_000).unwrap();
        let timeline = pipeline().build_timeline(&audio, None, meta()).unwrap();
        assert_eq!(timeline.visemes.len(), 10);
        assert_eq!(timeline.expressions.len(), 10);
        assert!((timeline.duration - 1.0).abs() < 1e-9);
        assert_eq!(timeline.expressions[0].smile, 0.4);
    }

    #[test]
    fn test_phonemes_take_priority() {
        let audio = AudioBuffer::mono(vec![0.0; 16_000], 16_000).unwrap();
        let phonemes = vec![
            PhonemeTiming { phoneme: "HH".into(), start: 0.0, duration: 0.1 },
            PhonemeTiming { phoneme: "AA1".into(), start: 0.1, duration: 0.2 },
        ];
        let visemes = pipeline().visemes_for(&audio, Some(&phonemes)).unwrap();
        assert_eq!(visemes.len(), 2);
        assert_eq!(visemes[1].code, Viseme::A);

        // Empty phoneme list falls back to amplitude
        let visemes = pipeline().visemes_for(&audio, Some(&[])).unwrap();
        assert_eq!(visemes.len(), 10);
    }

    #[test]
    fn test_stage_is_reported() {
        let audio = AudioBuffer::mono(vec![0.1; 1_600], 16_000).unwrap();
        let bad = vec![PhonemeTiming { phoneme: "AA".into(), start: -1.0, duration: 0.1 }];
        let err = pipeline().build_timeline(&audio, Some(&bad), meta()).unwrap_err();
        assert_eq!(err.stage, PipelineStage::Analyze);

        let mut no_avatar = meta();
        no_avatar.avatar_id.clear();
        let err = pipeline().build_timeline(&audio, None, no_avatar).unwrap_err();
        assert_eq!(err.stage, PipelineStage::Synchronize);
    }
}
