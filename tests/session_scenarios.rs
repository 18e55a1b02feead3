use async_trait::async_trait;
use facesync_anim::{AnimationTimeline, AudioBuffer, EyeState};
use facesync_avatar::{
    AvatarError, CounselorProfile, FacesyncConfig, LipSyncBackend, LipSyncRequest, ProviderAdapter, ProviderKind,
    RemoteStatus, RenderMode, RenderedClip, SessionManager, SpeakOptions, SpeakOutput, Utterance,
};
use facesync_core::ManualClock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const RATE: u32 = 16_000;

/// Finishes after two polls with a 2.3s clip
struct QuickBackend {
    polls: AtomicU32,
}

#[async_trait]
impl LipSyncBackend for QuickBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::BeyondPresence
    }

    async fn submit(&self, request: &LipSyncRequest) -> Result<String, AvatarError> {
        Ok(format!("bey-{}", request.avatar_id))
    }

    async fn poll(&self, _job_id: &str) -> Result<RemoteStatus, AvatarError> {
        if self.polls.fetch_add(1, Ordering::SeqCst) >= 1 {
            Ok(RemoteStatus::Done {
                result_url: Some("https://cdn.example/bey.mp4".to_string()),
                duration: Some(2.3),
            })
        } else {
            Ok(RemoteStatus::Pending)
        }
    }

    async fn fetch(&self, job_id: &str) -> Result<RenderedClip, AvatarError> {
        Ok(RenderedClip {
            job_id: job_id.to_string(),
            provider: ProviderKind::BeyondPresence,
            result_url: "https://cdn.example/bey.mp4".to_string(),
            duration: Some(2.3),
        })
    }
}

fn config() -> FacesyncConfig {
    let mut config = FacesyncConfig::default();
    config.expression.jitter_amplitude = 0.0;
    config.session.max_sessions = 3;
    config.avatar.counselors.push(CounselorProfile {
        counselor_id: "maya".into(),
        avatar_id: "avatar-maya".into(),
        display_name: "Maya".into(),
    });
    config
}

fn tone(seconds: f64, amplitude: f32) -> AudioBuffer {
    let frames = (seconds * RATE as f64).round() as usize;
    let samples = (0..frames)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * 200.0 * i as f32 / RATE as f32).sin())
        .collect();
    AudioBuffer::mono(samples, RATE).unwrap()
}

fn timeline(output: SpeakOutput) -> AnimationTimeline {
    match output {
        SpeakOutput::Timeline(t) => t,
        other => panic!("expected a timeline, got {:?}", other),
    }
}

#[tokio::test]
async fn test_conversation_turns_share_one_clock() {
    let clock = Arc::new(ManualClock::default());
    let manager = SessionManager::from_config(&config(), clock.clone()).unwrap();
    let info = manager.create_session("maya", None).unwrap();
    let id = info.session_id.as_str();

    // Turn 1: greeting
    let greeting = timeline(
        manager
            .speak(id, Utterance::Audio(tone(1.2, 0.3)), SpeakOptions::new("greeting", "warm"))
            .await
            .unwrap(),
    );
    assert_eq!(greeting.visemes[0].time, 0.0);
    assert_eq!(greeting.avatar_id, "avatar-maya");
    assert!(greeting.expressions.iter().all(|e| e.smile == 0.65 && e.eyes == EyeState::Bright));

    // The user talks; the avatar mirrors it in real time
    for _ in 0..5 {
        manager.push_chunk(id, tone(0.1, 0.2)).await.unwrap();
    }
    let flushed = manager.flush_stream(id).await.unwrap().unwrap();
    assert!((flushed.duration() - 0.5).abs() < 1e-9);

    // Turn 2 starts where the stream left off
    let reply = timeline(
        manager
            .speak(id, Utterance::Audio(tone(0.8, 0.3)), SpeakOptions::new("supportive", "calm"))
            .await
            .unwrap(),
    );
    assert!((reply.visemes[0].time - 1.7).abs() < 1e-9);
    assert!(reply.expressions.iter().all(|e| e.smile == 0.4));

    let state = manager.get_state(id).unwrap();
    assert_eq!(state.context, "supportive");
    assert_eq!(state.mood, "calm");
    assert!(!state.speaking);
    assert!((state.cursor - 2.5).abs() < 1e-9);
    assert_eq!(state.buffered_chunks, 0);
    assert!(state.streaming);
}

#[tokio::test]
async fn test_frame_subscribers_see_every_chunk() {
    let manager = SessionManager::from_config(&config(), Arc::new(ManualClock::default())).unwrap();
    let id = manager.create_session("maya", Some("live-1")).unwrap().session_id;
    let mut frames = manager.subscribe_frames();

    for i in 0..4 {
        manager.push_chunk(&id, tone(0.05, 0.1 * (i + 1) as f32)).await.unwrap();
    }

    let mut times = Vec::new();
    let mut intensities = Vec::new();
    for _ in 0..4 {
        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.session_id, "live-1");
        times.push(frame.time);
        intensities.push(frame.intensity);
    }
    for (i, t) in times.iter().enumerate() {
        assert!((t - 0.05 * i as f64).abs() < 1e-9);
    }
    assert!(intensities.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test(start_paused = true)]
async fn test_provider_render_advances_clock_by_clip_length() {
    let config = config();
    let clock = Arc::new(ManualClock::default());
    let pipeline = facesync_anim::LipSyncPipeline::new(
        config.analysis.clone(),
        config.expression.clone(),
        Arc::new(facesync_core::NoJitter),
    )
    .unwrap();
    let backend = Arc::new(QuickBackend { polls: AtomicU32::new(0) });
    let adapter = ProviderAdapter::new(config.poll.clone(), clock.clone())
        .unwrap()
        .with_backend(backend.clone());
    let manager = SessionManager::new(&config, Arc::new(pipeline), Arc::new(adapter), clock).unwrap();
    let id = manager.create_session("maya", None).unwrap().session_id;

    let options = SpeakOptions {
        render: RenderMode::Provider {
            provider: Some(ProviderKind::BeyondPresence),
            audio_url: "https://audio.example/turn-1.wav".to_string(),
            options: Default::default(),
        },
        ..SpeakOptions::new("reassuring", "warm")
    };
    let output = manager
        .speak(&id, Utterance::Audio(tone(2.0, 0.3)), options)
        .await
        .unwrap();

    match output {
        SpeakOutput::Rendered(clip) => {
            assert_eq!(clip.job_id, "bey-avatar-maya");
            assert_eq!(clip.duration, Some(2.3));
        }
        other => panic!("expected a rendered clip, got {:?}", other),
    }
    assert_eq!(backend.polls.load(Ordering::SeqCst), 2);
    assert_eq!(manager.adapter().in_flight(), 0);
    assert!((manager.get_state(&id).unwrap().cursor - 2.3).abs() < 1e-9);

    // The next local utterance lands after the rendered clip
    let next = timeline(
        manager
            .speak(&id, Utterance::Audio(tone(0.5, 0.3)), SpeakOptions::default())
            .await
            .unwrap(),
    );
    assert!((next.visemes[0].time - 2.3).abs() < 1e-9);
}

#[tokio::test]
async fn test_unconfigured_provider_leaves_session_idle() {
    let manager = SessionManager::from_config(&config(), Arc::new(ManualClock::default())).unwrap();
    let id = manager.create_session("maya", None).unwrap().session_id;
    if manager.adapter().has_backend(ProviderKind::LiveAvatar) {
        // Credentials present in this environment; nothing to check
        return;
    }

    let options = SpeakOptions {
        render: RenderMode::Provider {
            provider: Some(ProviderKind::LiveAvatar),
            audio_url: "https://audio.example/turn.wav".to_string(),
            options: Default::default(),
        },
        ..SpeakOptions::default()
    };
    let err = manager
        .speak(&id, Utterance::Audio(tone(0.5, 0.3)), options)
        .await
        .unwrap_err();
    assert!(matches!(err, AvatarError::Config(_)));

    let state = manager.get_state(&id).unwrap();
    assert!(!state.speaking);
    assert_eq!(state.cursor, 0.0);
}

#[tokio::test]
async fn test_session_cap_reclaims_expired_sessions() {
    let clock = Arc::new(ManualClock::default());
    let manager = SessionManager::from_config(&config(), clock.clone()).unwrap();

    for i in 0..3 {
        manager.create_session("maya", Some(format!("s{}", i).as_str())).unwrap();
    }
    assert!(matches!(manager.create_session("maya", Some("s3")), Err(AvatarError::Config(_))));
    // Rejoining an existing session is not a new session
    assert!(manager.create_session("maya", Some("s1")).is_ok());

    clock.advance(Duration::from_secs(301));
    manager.create_session("maya", Some("s3")).unwrap();
    assert_eq!(manager.session_ids(), vec!["s3".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_eviction_sweep_removes_idle_sessions() {
    let mut config = config();
    config.session.eviction_sweep = true;
    config.session.sweep_interval_secs = 60;

    let clock = Arc::new(ManualClock::default());
    let manager = Arc::new(SessionManager::from_config(&config, clock.clone()).unwrap());
    manager.create_session("maya", Some("idle")).unwrap();
    let shutdown = manager.spawn_sweep_if_enabled().unwrap();

    // First tick fires immediately; nothing has expired yet
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(manager.session_count(), 1);

    clock.advance(Duration::from_secs(301));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(manager.session_count(), 0);
    assert!(matches!(manager.get_state("idle"), Err(AvatarError::SessionNotFound { .. })));

    shutdown.send(true).unwrap();
}
