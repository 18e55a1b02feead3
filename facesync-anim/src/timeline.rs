//! Timeline synchronizer: merges viseme and expression streams for the renderer

use crate::error::AnimError;
use crate::expression::ExpressionKeyframe;
use crate::viseme::VisemeKeyframe;
use serde::{Deserialize, Serialize};

/// Identity and labels attached to a timeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineMeta {
    pub avatar_id: String,
    pub counselor_id: String,
    pub context: String,
    pub mood: String,
}

/// The unit handed to the renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationTimeline {
    pub visemes: Vec<VisemeKeyframe>,
    pub expressions: Vec<ExpressionKeyframe>,
    pub duration: f64,
    pub avatar_id: String,
    pub counselor_id: String,
    pub context: String,
    pub mood: String,
}

impl AnimationTimeline {
    /// Shift every keyframe by `offset` seconds
    pub fn offset_by(mut self, offset: f64) -> Self {
        if offset == 0.0 || !offset.is_finite() {
            return self;
        }
        for v in &mut self.visemes {
            v.time += offset;
        }
        for e in &mut self.expressions {
            e.time += offset;
        }
        self
    }

    /// End of the last viseme keyframe
    pub fn end_time(&self) -> f64 {
        self.visemes.last().map(|v| v.end()).unwrap_or(0.0)
    }
}

fn check_ordered<I>(kind: &str, times: I) -> Result<(), AnimError>
where
    I: IntoIterator<Item = f64>,
{
    let mut previous = f64::NEG_INFINITY;
    for (idx, time) in times.into_iter().enumerate() {
        if !time.is_finite() || time < 0.0 {
            return Err(AnimError::Validation(format!(
                "{} keyframe {} has invalid time {}",
                kind, idx, time
            )));
        }
        if time < previous {
            return Err(AnimError::Validation(format!(
                "{} keyframe {} at {} precedes keyframe {} at {}",
                kind,
                idx,
                time,
                idx - 1,
                previous
            )));
        }
        previous = time;
    }
    Ok(())
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Step-resample `expressions` onto `times`: each time takes the last
/// expression at or before it, or the first expression if none precedes it.
fn resample(expressions: &[ExpressionKeyframe], times: impl Iterator<Item = f64>) -> Vec<ExpressionKeyframe> {
    let mut cursor = 0;
    times
        .map(|t| {
            while cursor + 1 < expressions.len() && expressions[cursor + 1].time <= t {
                cursor += 1;
            }
            ExpressionKeyframe {
                time: t,
                ..expressions[cursor]
            }
        })
        .collect()
}

/// Merge visemes and expressions into one timeline
pub fn synchronize(
    visemes: Vec<VisemeKeyframe>,
    expressions: Vec<ExpressionKeyframe>,
    duration: f64,
    meta: TimelineMeta,
) -> Result<AnimationTimeline, AnimError> {
    if visemes.is_empty() {
        return Err(AnimError::Validation("Missing viseme keyframes".to_string()));
    }
    if expressions.is_empty() {
        return Err(AnimError::Validation("Missing expression keyframes".to_string()));
    }
    if meta.avatar_id.trim().is_empty() {
        return Err(AnimError::Validation("Missing avatar id".to_string()));
    }
    if meta.counselor_id.trim().is_empty() {
        return Err(AnimError::Validation("Missing counselor id".to_string()));
    }
    if !duration.is_finite() || duration < 0.0 {
        return Err(AnimError::Validation(format!("Invalid timeline duration {}", duration)));
    }

    check_ordered("Viseme", visemes.iter().map(|v| v.time))?;
    check_ordered("Expression", expressions.iter().map(|e| e.time))?;
    if let Some((idx, v)) = visemes
        .iter()
        .enumerate()
        .find(|(_, v)| !v.duration.is_finite() || v.duration < 0.0)
    {
        return Err(AnimError::Validation(format!(
            "Viseme keyframe {} has invalid duration {}",
            idx, v.duration
        )));
    }

    let mut expressions = if expressions.len() != visemes.len() {
        resample(&expressions, visemes.iter().map(|v| v.time))
    } else {
        expressions
    };

    let mut visemes = visemes;
    for v in &mut visemes {
        v.intensity = clamp_unit(v.intensity);
    }
    for e in &mut expressions {
        e.smile = clamp_unit(e.smile);
    }

    let viseme_end = visemes.last().map(|v| v.end()).unwrap_or(0.0);

    Ok(AnimationTimeline {
        visemes,
        expressions,
        duration: duration.max(viseme_end),
        avatar_id: meta.avatar_id,
        counselor_id: meta.counselor_id,
        context: meta.context,
        mood: meta.mood,
    })
}
