//! facesync-anim: speech audio to avatar animation keyframes
//!
//! Synchronous, CPU-bound building blocks of the lip-sync pipeline:
//! - Audio buffers (WAV / raw PCM decoding)
//! - Amplitude analyzer (windowed RMS) and viseme mapper
//! - Phoneme-driven visemes when a speech provider supplies timing
//! - Expression composer (mood base + context overlay + seedable jitter)
//! - Timeline synchronizer producing the renderer-facing `AnimationTimeline`

pub mod error;
pub mod config;
pub mod audio;
pub mod viseme;
pub mod analyzer;
pub mod expression;
pub mod timeline;
pub mod pipeline;

pub use error::{AnimError, PipelineStage, StageError};
pub use config::{AnalysisConfig, ExpressionConfig};
pub use audio::AudioBuffer;
pub use viseme::{phonemes_to_visemes, PhonemeTiming, Viseme, VisemeKeyframe, VisemeMapper};
pub use analyzer::{rms, AmplitudeAnalyzer};
pub use expression::{Expression, ExpressionComposer, ExpressionKeyframe, EyeState, EyebrowState};
pub use timeline::{synchronize, AnimationTimeline, TimelineMeta};
pub use pipeline::LipSyncPipeline;
