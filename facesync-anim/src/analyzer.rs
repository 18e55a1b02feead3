//! Windowed RMS amplitude analysis

use crate::audio::AudioBuffer;
use crate::config::AnalysisConfig;
use crate::error::AnimError;
use crate::viseme::{Viseme, VisemeKeyframe, VisemeMapper};
use tracing::{debug, warn};

/// Root-mean-square of `samples`. Empty input yields 0.
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Splits audio into fixed windows and maps each window's RMS to a viseme
#[derive(Debug, Clone)]
pub struct AmplitudeAnalyzer {
    config: AnalysisConfig,
    mapper: VisemeMapper,
}

impl AmplitudeAnalyzer {
    pub fn new(config: AnalysisConfig) -> Result<Self, AnimError> {
        config.validate().map_err(AnimError::Config)?;
        let mapper = VisemeMapper::new(config.gain);
        Ok(Self { config, mapper })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn mapper(&self) -> &VisemeMapper {
        &self.mapper
    }

    /// Frames per analysis window at `sample_rate` (at least one)
    pub fn window_frames(&self, sample_rate: u32) -> usize {
        let frames = (sample_rate as f64 * self.config.window_secs()).round() as usize;
        frames.max(1)
    }

    /// One keyframe per window, covering the whole buffer without gaps.
    ///
    /// Deterministic for a given buffer and configuration.
    pub fn analyze(&self, buffer: &AudioBuffer) -> Result<Vec<VisemeKeyframe>, AnimError> {
        let total_frames = buffer.frames();
        if total_frames == 0 {
            return Err(AnimError::InvalidAudio("Zero-length audio buffer".to_string()));
        }

        let rate = buffer.sample_rate() as f64;
        let window = self.window_frames(buffer.sample_rate());
        let mut keyframes = Vec::with_capacity(total_frames.div_ceil(window));

        let mut start = 0;
        while start < total_frames {
            let end = (start + window).min(total_frames);
            let amplitude = window_rms(buffer, start, end);

            let (code, intensity) = match self.mapper.map(amplitude) {
                Some(mapped) => mapped,
                None => {
                    warn!(
                        "Corrupt audio window {} ({}..{} frames), using neutral viseme",
                        keyframes.len(),
                        start,
                        end
                    );
                    (Viseme::Rest, self.config.neutral_intensity)
                }
            };

            keyframes.push(VisemeKeyframe {
                time: start as f64 / rate,
                code,
                intensity,
                duration: (end - start) as f64 / rate,
            });
            start = end;
        }

        debug!(
            "Analyzed {:.3}s of audio into {} viseme keyframes",
            buffer.duration(),
            keyframes.len()
        );
        Ok(keyframes)
    }

    /// Real-time variant: a whole chunk becomes a single keyframe starting at `at`
    pub fn analyze_chunk(&self, chunk: &AudioBuffer, at: f64) -> Result<VisemeKeyframe, AnimError> {
        if !at.is_finite() || at < 0.0 {
            return Err(AnimError::Validation(format!("Invalid chunk start time {}", at)));
        }
        if chunk.frames() == 0 {
            return Err(AnimError::InvalidAudio("Zero-length audio chunk".to_string()));
        }

        let amplitude = window_rms(chunk, 0, chunk.frames());
        let (code, intensity) = self.mapper.map(amplitude).unwrap_or_else(|| {
            warn!("Corrupt audio chunk at {:.3}s, using neutral viseme", at);
            (Viseme::Rest, self.config.neutral_intensity)
        });

        Ok(VisemeKeyframe {
            time: at,
            code,
            intensity,
            duration: chunk.duration(),
        })
    }
}

/// RMS of the channel-averaged frames in `start..end`; NaN if any sample is not finite
fn window_rms(buffer: &AudioBuffer, start: usize, end: usize) -> f64 {
    let mixed: Vec<f32> = (start..end).map(|frame| buffer.frame_mean(frame) as f32).collect();
    if mixed.iter().any(|s| !s.is_finite()) {
        return f64::NAN;
    }
    rms(&mixed)
}
