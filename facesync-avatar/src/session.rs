//! Per-session state

use crate::cancel::CancellationToken;
use chrono::{DateTime, Utc};
use facesync_anim::{AnimError, AudioBuffer, Expression, Viseme, VisemeKeyframe};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

/// Identity returned by `create_session`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub counselor_id: String,
    pub avatar_id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// Read-only snapshot returned by `get_state`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    pub counselor_id: String,
    pub avatar_id: String,
    pub speaking: bool,
    pub context: String,
    pub mood: String,
    pub expression: Expression,
    /// Session clock position: where the next utterance starts
    pub cursor: f64,
    pub history_len: usize,
    pub buffered_chunks: usize,
    pub streaming: bool,
    pub last_activity: DateTime<Utc>,
    pub expired: bool,
}

/// Real-time push to the renderer, one per streamed chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingFrame {
    pub session_id: String,
    pub time: f64,
    pub viseme: Viseme,
    pub intensity: f64,
    pub history: Vec<VisemeKeyframe>,
}

/// Fields readable without waiting for an in-flight pipeline
#[derive(Debug, Clone)]
pub(crate) struct SessionStatus {
    pub speaking: bool,
    pub context: String,
    pub mood: String,
    pub expression: Expression,
    pub cursor: f64,
    pub history_len: usize,
    pub buffered_chunks: usize,
    pub streaming: bool,
    pub last_activity: DateTime<Utc>,
}

/// Streaming buffers, created on the first pushed chunk
#[derive(Debug, Default)]
pub(crate) struct StreamState {
    chunks: VecDeque<AudioBuffer>,
    history: VecDeque<VisemeKeyframe>,
}

impl StreamState {
    /// Buffer a chunk, dropping the oldest beyond `max_chunks`. Returns true if one was dropped.
    pub fn buffer_chunk(&mut self, chunk: AudioBuffer, max_chunks: usize) -> bool {
        self.chunks.push_back(chunk);
        if self.chunks.len() > max_chunks {
            self.chunks.pop_front();
            return true;
        }
        false
    }

    /// Append a keyframe and prune entries older than `now - window`
    pub fn record(&mut self, keyframe: VisemeKeyframe, now: f64, window: f64) {
        self.history.push_back(keyframe);
        let horizon = now - window;
        while self.history.front().is_some_and(|k| k.time < horizon) {
            self.history.pop_front();
        }
    }

    /// Buffered chunks must share one sample rate and channel layout
    pub fn check_format(&self, chunk: &AudioBuffer) -> Result<(), AnimError> {
        match self.chunks.front() {
            Some(first) if first.sample_rate() != chunk.sample_rate() || first.channels() != chunk.channels() => {
                Err(AnimError::InvalidAudio(format!(
                    "Chunk is {}Hz/{}ch but the stream buffer holds {}Hz/{}ch audio",
                    chunk.sample_rate(),
                    chunk.channels(),
                    first.sample_rate(),
                    first.channels()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Join the buffered chunks without removing them; `None` when nothing is buffered
    pub fn joined(&mut self) -> Result<Option<AudioBuffer>, AnimError> {
        if self.chunks.is_empty() {
            return Ok(None);
        }
        AudioBuffer::concat(self.chunks.make_contiguous()).map(Some)
    }

    pub fn clear_chunks(&mut self) {
        self.chunks.clear();
    }

    pub fn history(&self) -> Vec<VisemeKeyframe> {
        self.history.iter().copied().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn buffered(&self) -> usize {
        self.chunks.len()
    }
}

/// State guarded by the per-session pipeline lock
#[derive(Debug, Default)]
pub(crate) struct PipelineState {
    /// Session clock position in seconds
    pub cursor: f64,
    pub stream: Option<StreamState>,
}

/// One avatar session. The async `pipeline` lock serializes `speak` and
/// `push_chunk`; `status` stays readable while a pipeline runs.
pub(crate) struct AvatarSession {
    pub info: SessionInfo,
    pub cancel: CancellationToken,
    pub pipeline: Mutex<PipelineState>,
    status: RwLock<SessionStatus>,
}

impl AvatarSession {
    pub fn new(info: SessionInfo, expression: Expression, now: DateTime<Utc>) -> Self {
        Self {
            info,
            cancel: CancellationToken::new(),
            pipeline: Mutex::new(PipelineState::default()),
            status: RwLock::new(SessionStatus {
                speaking: false,
                context: String::new(),
                mood: String::new(),
                expression,
                cursor: 0.0,
                history_len: 0,
                buffered_chunks: 0,
                streaming: false,
                last_activity: now,
            }),
        }
    }

    pub fn touch(&self, now: DateTime<Utc>) {
        self.status.write().last_activity = now;
    }

    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let idle = now - self.status.read().last_activity;
        idle.to_std().map(|idle| idle > timeout).unwrap_or(false)
    }

    pub fn update_status(&self, f: impl FnOnce(&mut SessionStatus)) {
        f(&mut self.status.write());
    }

    pub fn snapshot(&self, now: DateTime<Utc>, timeout: Duration) -> SessionState {
        let expired = self.is_expired(now, timeout);
        let status = self.status.read();
        SessionState {
            session_id: self.info.session_id.clone(),
            counselor_id: self.info.counselor_id.clone(),
            avatar_id: self.info.avatar_id.clone(),
            speaking: status.speaking,
            context: status.context.clone(),
            mood: status.mood.clone(),
            expression: status.expression,
            cursor: status.cursor,
            history_len: status.history_len,
            buffered_chunks: status.buffered_chunks,
            streaming: status.streaming,
            last_activity: status.last_activity,
            expired,
        }
    }
}
