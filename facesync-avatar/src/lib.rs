//! facesync-avatar: provider rendering and avatar sessions
//!
//! - Provider adapter: submit lip-sync jobs to LiveAvatar or Beyond Presence
//!   and poll them to completion with a bounded attempt budget
//! - Session manager: per-session pipeline serialization, session clock,
//!   real-time chunk streaming and inactivity expiry

pub mod error;
pub mod config;
pub mod cancel;
pub mod job;
pub mod provider_adapter;
pub mod providers;
pub mod speech;
pub mod session;
pub mod session_manager;

pub use error::AvatarError;
pub use config::{AvatarConfig, CounselorProfile, FacesyncConfig, PollConfig, ProviderConfig, SessionConfig};
pub use cancel::CancellationToken;
pub use job::{JobPoller, JobStatus, LipSyncJob, PollState, PollStep};
pub use provider_adapter::{LipSyncBackend, LipSyncRequest, ProviderAdapter, ProviderKind, RemoteStatus, RenderedClip};
pub use providers::{BeyondPresenceBackend, LiveAvatarBackend};
pub use speech::{SpeechSource, SynthesizedSpeech};
pub use session::{SessionInfo, SessionState, StreamingFrame};
pub use session_manager::{RenderMode, SessionManager, SpeakOptions, SpeakOutput, Utterance};
