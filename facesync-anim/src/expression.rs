//! Facial expressions derived from conversational mood and context

use crate::config::ExpressionConfig;
use crate::error::AnimError;
use facesync_core::JitterSource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Eyebrow pose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EyebrowState {
    Neutral,
    Raised,
    Furrowed,
    Soft,
    Relaxed,
}

/// Eye pose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EyeState {
    Open,
    Soft,
    Warm,
    Bright,
    Attentive,
    Focused,
    Caring,
}

/// A resolved expression, before it is placed in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub smile: f64,
    pub eyebrows: EyebrowState,
    pub eyes: EyeState,
}

/// Context adjustments; `None` keeps the mood's value
#[derive(Debug, Clone, Copy, Default)]
struct Overlay {
    smile: Option<f64>,
    eyebrows: Option<EyebrowState>,
    eyes: Option<EyeState>,
}

/// One facial-expression keyframe (seconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpressionKeyframe {
    pub time: f64,
    pub smile: f64,
    pub eyebrows: EyebrowState,
    pub eyes: EyeState,
}

const NEUTRAL: Expression = Expression {
    smile: 0.2,
    eyebrows: EyebrowState::Neutral,
    eyes: EyeState::Open,
};

fn mood_base(mood: &str) -> Expression {
    let (smile, eyebrows, eyes) = match mood {
        "calm" => (0.3, EyebrowState::Relaxed, EyeState::Soft),
        "warm" => (0.5, EyebrowState::Soft, EyeState::Warm),
        "cheerful" | "happy" => (0.7, EyebrowState::Raised, EyeState::Bright),
        "concerned" | "worried" => (0.1, EyebrowState::Furrowed, EyeState::Attentive),
        "serious" => (0.05, EyebrowState::Neutral, EyeState::Focused),
        "empathetic" => (0.25, EyebrowState::Soft, EyeState::Caring),
        "hopeful" => (0.45, EyebrowState::Raised, EyeState::Warm),
        _ => return NEUTRAL,
    };
    Expression { smile, eyebrows, eyes }
}

fn context_overlay(context: &str) -> Overlay {
    match context {
        "listening" => Overlay {
            smile: None,
            eyebrows: Some(EyebrowState::Raised),
            eyes: Some(EyeState::Attentive),
        },
        "crisis" => Overlay {
            smile: Some(0.0),
            eyebrows: Some(EyebrowState::Furrowed),
            eyes: Some(EyeState::Focused),
        },
        "reassuring" => Overlay {
            smile: Some(0.45),
            eyebrows: Some(EyebrowState::Soft),
            eyes: Some(EyeState::Caring),
        },
        "supportive" => Overlay {
            smile: Some(0.4),
            eyebrows: Some(EyebrowState::Raised),
            eyes: Some(EyeState::Caring),
        },
        "greeting" => Overlay {
            smile: Some(0.65),
            eyebrows: Some(EyebrowState::Raised),
            eyes: Some(EyeState::Bright),
        },
        "explaining" => Overlay {
            smile: None,
            eyebrows: Some(EyebrowState::Neutral),
            eyes: Some(EyeState::Focused),
        },
        "thinking" => Overlay {
            smile: Some(0.15),
            eyebrows: Some(EyebrowState::Furrowed),
            eyes: None,
        },
        "celebrating" => Overlay {
            smile: Some(0.85),
            eyebrows: Some(EyebrowState::Raised),
            eyes: Some(EyeState::Bright),
        },
        "farewell" => Overlay {
            smile: Some(0.5),
            eyebrows: None,
            eyes: Some(EyeState::Warm),
        },
        _ => Overlay::default(),
    }
}

fn normalize(label: &str) -> String {
    label.trim().to_ascii_lowercase()
}

/// Builds expression keyframes from (context, mood)
pub struct ExpressionComposer {
    config: ExpressionConfig,
    jitter: Arc<dyn JitterSource>,
}

impl ExpressionComposer {
    pub fn new(config: ExpressionConfig, jitter: Arc<dyn JitterSource>) -> Result<Self, AnimError> {
        config.validate().map_err(AnimError::Config)?;
        Ok(Self { config, jitter })
    }

    pub fn config(&self) -> &ExpressionConfig {
        &self.config
    }

    /// Mood base with the context overlay applied field by field
    pub fn resolve(&self, context: &str, mood: &str) -> Expression {
        let base = mood_base(&normalize(mood));
        let overlay = context_overlay(&normalize(context));

        Expression {
            smile: overlay.smile.unwrap_or(base.smile).clamp(0.0, 1.0),
            eyebrows: overlay.eyebrows.unwrap_or(base.eyebrows),
            eyes: overlay.eyes.unwrap_or(base.eyes),
        }
    }

    /// Keyframe at `time` with the smile perturbation applied
    pub fn keyframe_at(&self, expression: &Expression, time: f64) -> ExpressionKeyframe {
        let offset = self.jitter.offset(self.config.jitter_amplitude);
        ExpressionKeyframe {
            time,
            smile: (expression.smile + offset).clamp(0.0, 1.0),
            eyebrows: expression.eyebrows,
            eyes: expression.eyes,
        }
    }

    /// One keyframe per slice over `duration` seconds; at least one keyframe
    pub fn compose(&self, context: &str, mood: &str, duration: f64) -> Vec<ExpressionKeyframe> {
        let expression = self.resolve(context, mood);
        let slice_ms = self.config.slice_ms as f64;

        let count = if duration.is_finite() && duration > 0.0 {
            ((duration * 1000.0 / slice_ms) - 1e-9).ceil().max(1.0) as usize
        } else {
            1
        };

        (0..count)
            .map(|i| self.keyframe_at(&expression, i as f64 * slice_ms / 1000.0))
            .collect()
    }
}
