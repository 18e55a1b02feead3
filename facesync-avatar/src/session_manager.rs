//! Session manager - multi-turn avatar sessions around the lip-sync pipeline

use crate::config::{validate_id, AvatarConfig, FacesyncConfig, SessionConfig};
use crate::error::AvatarError;
use crate::provider_adapter::{LipSyncRequest, ProviderAdapter, ProviderKind, RenderedClip};
use crate::session::{AvatarSession, PipelineState, SessionInfo, SessionState, StreamState, StreamingFrame};
use crate::speech::SpeechSource;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use facesync_anim::{
    AnimError, AnimationTimeline, AudioBuffer, LipSyncPipeline, PhonemeTiming, PipelineStage, StageError,
    TimelineMeta,
};
use facesync_core::{Clock, JitterSource, SeededJitter};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a session is asked to say
#[derive(Debug, Clone)]
pub enum Utterance {
    Audio(AudioBuffer),
    /// Requires a configured [`SpeechSource`]
    Text(String),
}

/// Where the animation comes from
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RenderMode {
    /// Amplitude analyzer (or phoneme timing), composer and synchronizer
    #[default]
    Local,
    /// Batch render through an external provider. `None` uses the configured default.
    Provider {
        provider: Option<ProviderKind>,
        audio_url: String,
        options: serde_json::Map<String, serde_json::Value>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeakOptions {
    pub context: String,
    pub mood: String,
    /// Phoneme timing wins over amplitude analysis when present
    pub phonemes: Option<Vec<PhonemeTiming>>,
    pub render: RenderMode,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            context: "listening".to_string(),
            mood: "neutral".to_string(),
            phonemes: None,
            render: RenderMode::Local,
        }
    }
}

impl SpeakOptions {
    pub fn new(context: impl Into<String>, mood: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            mood: mood.into(),
            ..Self::default()
        }
    }
}

/// Result of one `speak`
#[derive(Debug, Clone, PartialEq)]
pub enum SpeakOutput {
    Timeline(AnimationTimeline),
    Rendered(RenderedClip),
}

/// Owns every session and serializes work within each one
pub struct SessionManager {
    sessions: DashMap<String, Arc<AvatarSession>>,
    pipeline: Arc<LipSyncPipeline>,
    adapter: Arc<ProviderAdapter>,
    speech: Option<Arc<dyn SpeechSource>>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    avatar: AvatarConfig,
    frames: broadcast::Sender<StreamingFrame>,
}

impl SessionManager {
    pub fn new(
        config: &FacesyncConfig,
        pipeline: Arc<LipSyncPipeline>,
        adapter: Arc<ProviderAdapter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AvatarError> {
        config.session.validate().map_err(AvatarError::Config)?;
        config.avatar.validate().map_err(AvatarError::Config)?;

        let (frames, _) = broadcast::channel(config.session.frame_channel_capacity);
        Ok(Self {
            sessions: DashMap::new(),
            pipeline,
            adapter,
            speech: None,
            clock,
            config: config.session.clone(),
            avatar: config.avatar.clone(),
            frames,
        })
    }

    /// Build the pipeline and the provider adapter from configuration
    pub fn from_config(config: &FacesyncConfig, clock: Arc<dyn Clock>) -> Result<Self, AvatarError> {
        config.validate().map_err(AvatarError::Config)?;

        let jitter: Arc<dyn JitterSource> = match config.expression.jitter_seed {
            Some(seed) => Arc::new(SeededJitter::new(seed)),
            None => Arc::new(SeededJitter::from_entropy()),
        };
        let pipeline = LipSyncPipeline::new(config.analysis.clone(), config.expression.clone(), jitter)
            .map_err(|e| AvatarError::Config(e.to_string()))?;
        let adapter = ProviderAdapter::from_env(config, Arc::clone(&clock))?;

        Self::new(config, Arc::new(pipeline), Arc::new(adapter), clock)
    }

    pub fn with_speech_source(mut self, speech: Arc<dyn SpeechSource>) -> Self {
        info!("Speech source configured: {}", speech.name());
        self.speech = Some(speech);
        self
    }

    pub fn adapter(&self) -> &Arc<ProviderAdapter> {
        &self.adapter
    }

    fn get(&self, session_id: &str) -> Result<Arc<AvatarSession>, AvatarError> {
        self.sessions
            .get(session_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| AvatarError::session_not_found(session_id))
    }

    /// Create (or rejoin) a session for `counselor_id`
    pub fn create_session(&self, counselor_id: &str, session_id: Option<&str>) -> Result<SessionInfo, AvatarError> {
        validate_id("Counselor ID", counselor_id).map_err(AvatarError::Config)?;
        let session_id = match session_id {
            Some(id) => {
                validate_id("Session ID", id).map_err(AvatarError::Config)?;
                id.to_string()
            }
            None => Uuid::new_v4().to_string(),
        };

        let now = self.clock.now();
        if self.sessions.len() >= self.config.max_sessions && !self.sessions.contains_key(&session_id) {
            self.evict_expired();
            if self.sessions.len() >= self.config.max_sessions {
                return Err(AvatarError::Config(format!(
                    "Max sessions reached ({})",
                    self.config.max_sessions
                )));
            }
        }

        match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(existing) => {
                let session = existing.get();
                if session.info.counselor_id != counselor_id {
                    return Err(AvatarError::Config(format!(
                        "Session {} belongs to counselor {}",
                        session_id, session.info.counselor_id
                    )));
                }
                session.touch(now);
                debug!("Rejoined session {}", session_id);
                Ok(session.info.clone())
            }
            Entry::Vacant(slot) => {
                let profile = self.avatar.profile_for(counselor_id);
                let info = SessionInfo {
                    session_id: session_id.clone(),
                    counselor_id: counselor_id.to_string(),
                    avatar_id: profile.avatar_id,
                    display_name: profile.display_name,
                    created_at: now,
                };
                let expression = self.pipeline.composer().resolve("", "neutral");
                slot.insert(Arc::new(AvatarSession::new(info.clone(), expression, now)));
                info!(
                    "Created session {} for counselor {} (avatar {})",
                    session_id, counselor_id, info.avatar_id
                );
                Ok(info)
            }
        }
    }

    /// Lock the session pipeline; fails if the session went away while waiting
    async fn lock_pipeline<'a>(
        &self,
        session: &'a AvatarSession,
    ) -> Result<tokio::sync::MutexGuard<'a, PipelineState>, AvatarError> {
        let guard = session.pipeline.lock().await;
        if session.cancel.is_cancelled() || !self.sessions.contains_key(&session.info.session_id) {
            return Err(AvatarError::session_not_found(&session.info.session_id));
        }
        Ok(guard)
    }

    /// Run one utterance through the pipeline. Calls on the same session run one at a time.
    pub async fn speak(
        &self,
        session_id: &str,
        utterance: Utterance,
        options: SpeakOptions,
    ) -> Result<SpeakOutput, AvatarError> {
        let session = self.get(session_id)?;
        let mut state = self.lock_pipeline(&session).await?;

        let expression = self.pipeline.composer().resolve(&options.context, &options.mood);
        session.update_status(|s| {
            s.speaking = true;
            s.context = options.context.clone();
            s.mood = options.mood.clone();
            s.expression = expression;
        });
        session.touch(self.clock.now());

        let result = self.run_utterance(&session, &mut state, utterance, options).await;

        let cursor = state.cursor;
        session.update_status(|s| {
            s.speaking = false;
            s.cursor = cursor;
        });
        session.touch(self.clock.now());

        if let Err(ref e) = result {
            warn!("speak failed in session {}: {}", session_id, e);
        }
        result
    }

    async fn run_utterance(
        &self,
        session: &AvatarSession,
        state: &mut PipelineState,
        utterance: Utterance,
        options: SpeakOptions,
    ) -> Result<SpeakOutput, AvatarError> {
        let session_id = session.info.session_id.as_str();

        if let RenderMode::Provider {
            provider,
            audio_url,
            options: render_options,
        } = options.render
        {
            let fallback = match utterance {
                Utterance::Audio(ref audio) => audio.duration(),
                Utterance::Text(_) => {
                    return Err(AvatarError::Config(
                        "Provider rendering needs an audio utterance; synthesize the text first".to_string(),
                    ))
                }
            };
            let kind = provider.unwrap_or(self.avatar.default_provider);
            let request = LipSyncRequest {
                audio_url,
                avatar_id: session.info.avatar_id.clone(),
                options: render_options,
            };
            let clip = self
                .adapter
                .render(kind, &request, Some(session_id), &session.cancel)
                .await?;

            state.cursor += clip.duration.unwrap_or(fallback);
            return Ok(SpeakOutput::Rendered(clip));
        }

        let (audio, phonemes) = match utterance {
            Utterance::Audio(audio) => (audio, options.phonemes),
            Utterance::Text(text) => {
                if text.trim().is_empty() {
                    return Err(AvatarError::pipeline(
                        session_id,
                        StageError::new(
                            PipelineStage::Synthesize,
                            AnimError::Validation("Utterance text is empty".to_string()),
                        ),
                    ));
                }
                let speech = self
                    .speech
                    .as_ref()
                    .ok_or_else(|| AvatarError::Config("No speech source configured for text utterances".to_string()))?;
                let synthesized = speech.synthesize(&text, &session.info.counselor_id).await?;
                let phonemes = options.phonemes.or(synthesized.phonemes);
                (synthesized.audio, phonemes)
            }
        };

        let meta = TimelineMeta {
            avatar_id: session.info.avatar_id.clone(),
            counselor_id: session.info.counselor_id.clone(),
            context: options.context,
            mood: options.mood,
        };
        let timeline = self
            .pipeline
            .build_timeline(&audio, phonemes.as_deref(), meta)
            .map_err(|e| AvatarError::pipeline(session_id, e))?
            .offset_by(state.cursor);

        state.cursor += timeline.duration;
        debug!(
            "Session {} timeline: {} visemes, ends at {:.3}s",
            session_id,
            timeline.visemes.len(),
            state.cursor
        );
        Ok(SpeakOutput::Timeline(timeline))
    }

    /// Real-time path: one keyframe per chunk, broadcast to frame subscribers
    pub async fn push_chunk(&self, session_id: &str, chunk: AudioBuffer) -> Result<StreamingFrame, AvatarError> {
        let session = self.get(session_id)?;
        let mut state = self.lock_pipeline(&session).await?;

        if let Some(stream) = state.stream.as_ref() {
            stream
                .check_format(&chunk)
                .map_err(|e| AvatarError::pipeline(session_id, StageError::new(PipelineStage::Decode, e)))?;
        }

        let at = state.cursor;
        let keyframe = self
            .pipeline
            .analyzer()
            .analyze_chunk(&chunk, at)
            .map_err(|e| AvatarError::pipeline(session_id, StageError::new(PipelineStage::Analyze, e)))?;
        state.cursor = keyframe.end();
        let now = state.cursor;

        let stream = state.stream.get_or_insert_with(|| {
            info!("Streaming started for session {}", session_id);
            StreamState::default()
        });
        stream.record(keyframe, now, self.config.history_window_secs);
        if stream.buffer_chunk(chunk, self.config.max_buffered_chunks) {
            debug!("Session {} chunk buffer full, dropped oldest chunk", session_id);
        }

        let frame = StreamingFrame {
            session_id: session_id.to_string(),
            time: keyframe.time,
            viseme: keyframe.code,
            intensity: keyframe.intensity,
            history: stream.history(),
        };
        let (history_len, buffered) = (stream.history_len(), stream.buffered());
        session.update_status(|s| {
            s.cursor = now;
            s.history_len = history_len;
            s.buffered_chunks = buffered;
            s.streaming = true;
        });
        session.touch(self.clock.now());

        // No subscribers is fine
        let _ = self.frames.send(frame.clone());
        Ok(frame)
    }

    /// Concatenate and clear buffered chunks; `None` when nothing is buffered.
    /// On error the buffer is left as it was.
    pub async fn flush_stream(&self, session_id: &str) -> Result<Option<AudioBuffer>, AvatarError> {
        let session = self.get(session_id)?;
        let mut state = self.lock_pipeline(&session).await?;

        let stream = match state.stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(None),
        };
        let joined = stream
            .joined()
            .map_err(|e| AvatarError::pipeline(session_id, StageError::new(PipelineStage::Decode, e)))?;
        stream.clear_chunks();

        session.update_status(|s| s.buffered_chunks = 0);
        session.touch(self.clock.now());
        Ok(joined)
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<StreamingFrame> {
        self.frames.subscribe()
    }

    /// Snapshot without touching activity or waiting on a running pipeline
    pub fn get_state(&self, session_id: &str) -> Result<SessionState, AvatarError> {
        let session = self.get(session_id)?;
        Ok(session.snapshot(self.clock.now(), self.config.inactivity()))
    }

    /// Remove the session, stop its poll loops and release its provider jobs
    pub fn cleanup(&self, session_id: &str) -> Result<(), AvatarError> {
        let (_, session) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| AvatarError::session_not_found(session_id))?;

        session.cancel.cancel();
        let released = self.adapter.release_session(session_id);
        info!("Cleaned up session {} ({} provider jobs released)", session_id, released);
        Ok(())
    }

    /// Sessions that have not expired
    pub fn active_session_count(&self) -> usize {
        let now = self.clock.now();
        let timeout = self.config.inactivity();
        self.sessions.iter().filter(|s| !s.is_expired(now, timeout)).count()
    }

    /// All sessions, expired or not
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.key().clone()).collect()
    }

    /// Clean up every expired session; returns how many were removed
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let timeout = self.config.inactivity();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.is_expired(now, timeout))
            .map(|s| s.key().clone())
            .collect();

        expired
            .iter()
            .filter(|id| self.cleanup(id).is_ok())
            .count()
    }

    /// Periodically evict expired sessions until `true` is sent on the returned handle
    pub fn start_eviction_sweep(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let period = manager.config.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = manager.evict_expired();
                        if evicted > 0 {
                            info!(
                                "Session sweep: evicted {} expired sessions ({} remaining)",
                                evicted,
                                manager.session_count()
                            );
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Session sweep shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Starts the sweep only when `eviction_sweep` is enabled
    pub fn spawn_sweep_if_enabled(self: &Arc<Self>) -> Option<watch::Sender<bool>> {
        if self.config.eviction_sweep {
            Some(self.start_eviction_sweep())
        } else {
            None
        }
    }
}
