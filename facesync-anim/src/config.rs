//! Configuration for analysis and expression composition

use serde::{Deserialize, Serialize};

/// Amplitude analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Window length in milliseconds (default 100)
    pub window_ms: u32,

    /// Amplitude gain applied before clamping intensity to 1.0 (default 3.0)
    pub gain: f64,

    /// Intensity used for corrupt windows and the phoneme-path floor (default 0.05)
    pub neutral_intensity: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_ms: 100,
            gain: 3.0,
            neutral_intensity: 0.05,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(5..=1000).contains(&self.window_ms) {
            return Err("Window length must be between 5 and 1000 ms".to_string());
        }

        if !self.gain.is_finite() || self.gain <= 0.0 || self.gain > 100.0 {
            return Err("Gain must be a finite number in (0, 100]".to_string());
        }

        if !self.neutral_intensity.is_finite() || !(0.0..=1.0).contains(&self.neutral_intensity) {
            return Err("Neutral intensity must be between 0.0 and 1.0".to_string());
        }

        Ok(())
    }

    pub fn window_secs(&self) -> f64 {
        self.window_ms as f64 / 1000.0
    }
}

/// Expression composition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionConfig {
    /// Time slice per expression keyframe in milliseconds (default 100, same cadence as visemes)
    pub slice_ms: u32,

    /// Maximum smile perturbation per keyframe (0.0 disables, default 0.04)
    pub jitter_amplitude: f64,

    /// Seed for the jitter source; `None` seeds from entropy
    pub jitter_seed: Option<u64>,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        Self {
            slice_ms: 100,
            jitter_amplitude: 0.04,
            jitter_seed: None,
        }
    }
}

impl ExpressionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(5..=5000).contains(&self.slice_ms) {
            return Err("Expression slice must be between 5 and 5000 ms".to_string());
        }

        if !self.jitter_amplitude.is_finite() || !(0.0..=0.25).contains(&self.jitter_amplitude) {
            return Err("Jitter amplitude must be between 0.0 and 0.25".to_string());
        }

        Ok(())
    }

    pub fn slice_secs(&self) -> f64 {
        self.slice_ms as f64 / 1000.0
    }
}
