//! Provider adapter - batch lip-sync rendering through external services

use crate::cancel::CancellationToken;
use crate::config::{validate_id, FacesyncConfig, PollConfig};
use crate::error::AvatarError;
use crate::job::{JobPoller, JobStatus, LipSyncJob, PollStep};
use crate::providers::{BeyondPresenceBackend, LiveAvatarBackend};
use async_trait::async_trait;
use dashmap::DashMap;
use facesync_core::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Supported lip-sync rendering services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    LiveAvatar,
    BeyondPresence,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::LiveAvatar => "LiveAvatar",
            ProviderKind::BeyondPresence => "BeyondPresence",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = AvatarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "liveavatar" => Ok(ProviderKind::LiveAvatar),
            "beyondpresence" | "bey" => Ok(ProviderKind::BeyondPresence),
            _ => Err(AvatarError::Config(format!("Unknown provider '{}'", s))),
        }
    }
}

/// Remote job status as reported by a backend
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteStatus {
    Pending,
    Running,
    Done {
        result_url: Option<String>,
        duration: Option<f64>,
    },
    Failed {
        reason: String,
    },
}

/// What gets rendered: an audio reference on an avatar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LipSyncRequest {
    pub audio_url: String,
    pub avatar_id: String,
    /// Provider-specific options passed through verbatim
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl LipSyncRequest {
    pub fn new(audio_url: impl Into<String>, avatar_id: impl Into<String>) -> Self {
        Self {
            audio_url: audio_url.into(),
            avatar_id: avatar_id.into(),
            options: serde_json::Map::new(),
        }
    }

    pub fn validate(&self) -> Result<(), AvatarError> {
        let url = url::Url::parse(&self.audio_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AvatarError::Config(format!(
                "Audio URL must be http(s), got '{}'",
                url.scheme()
            )));
        }
        validate_id("Avatar ID", &self.avatar_id).map_err(AvatarError::Config)?;

        const MAX_OPTIONS_SIZE: usize = 10_000;
        let size = serde_json::to_string(&self.options)?.len();
        if size > MAX_OPTIONS_SIZE {
            return Err(AvatarError::Config(format!(
                "Render options too large (max {} bytes)",
                MAX_OPTIONS_SIZE
            )));
        }
        Ok(())
    }
}

/// A finished provider render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedClip {
    pub job_id: String,
    pub provider: ProviderKind,
    pub result_url: String,
    pub duration: Option<f64>,
}

/// One external lip-sync service
#[async_trait]
pub trait LipSyncBackend: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Create a remote job; returns the provider's job id
    async fn submit(&self, request: &LipSyncRequest) -> Result<String, AvatarError>;

    async fn poll(&self, job_id: &str) -> Result<RemoteStatus, AvatarError>;

    /// Retrieve the result of a completed job
    async fn fetch(&self, job_id: &str) -> Result<RenderedClip, AvatarError>;
}

/// Job ids are only unique within one provider
type JobKey = (ProviderKind, String);

/// Submits jobs, polls them to a terminal state and keeps the registry of
/// jobs still in flight
pub struct ProviderAdapter {
    backends: HashMap<ProviderKind, Arc<dyn LipSyncBackend>>,
    jobs: DashMap<JobKey, LipSyncJob>,
    clock: Arc<dyn Clock>,
    config: PollConfig,
}

impl ProviderAdapter {
    pub fn new(config: PollConfig, clock: Arc<dyn Clock>) -> Result<Self, AvatarError> {
        config.validate().map_err(AvatarError::Config)?;
        Ok(Self {
            backends: HashMap::new(),
            jobs: DashMap::new(),
            clock,
            config,
        })
    }

    /// Adapter with every HTTP backend whose API key is present in the environment
    pub fn from_env(config: &FacesyncConfig, clock: Arc<dyn Clock>) -> Result<Self, AvatarError> {
        let mut adapter = Self::new(config.poll.clone(), clock)?;

        match LiveAvatarBackend::from_env(&config.avatar.live_avatar) {
            Ok(backend) => adapter.register(Arc::new(backend)),
            Err(e) => debug!("LiveAvatar backend not configured: {}", e),
        }
        match BeyondPresenceBackend::from_env(&config.avatar.beyond_presence) {
            Ok(backend) => adapter.register(Arc::new(backend)),
            Err(e) => debug!("BeyondPresence backend not configured: {}", e),
        }

        if adapter.backends.is_empty() {
            warn!("No lip-sync provider credentials found; provider rendering is unavailable");
        }
        Ok(adapter)
    }

    pub fn with_backend(mut self, backend: Arc<dyn LipSyncBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn register(&mut self, backend: Arc<dyn LipSyncBackend>) {
        info!("Registered lip-sync backend: {}", backend.kind());
        self.backends.insert(backend.kind(), backend);
    }

    pub fn has_backend(&self, kind: ProviderKind) -> bool {
        self.backends.contains_key(&kind)
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.config
    }

    fn backend(&self, kind: ProviderKind) -> Result<Arc<dyn LipSyncBackend>, AvatarError> {
        self.backends
            .get(&kind)
            .cloned()
            .ok_or_else(|| AvatarError::Config(format!("Provider {} is not configured", kind)))
    }

    /// Submit a render job; the returned job is `pending` and registered
    pub async fn submit(
        &self,
        kind: ProviderKind,
        request: &LipSyncRequest,
        session_id: Option<&str>,
    ) -> Result<LipSyncJob, AvatarError> {
        request.validate()?;
        let backend = self.backend(kind)?;

        let id = backend.submit(request).await?;
        let job = LipSyncJob {
            id: id.clone(),
            provider: kind,
            status: JobStatus::Pending,
            result_url: None,
            attempts: 0,
            submitted_at: self.clock.now(),
            session_id: session_id.map(str::to_string),
        };
        self.jobs.insert((kind, id.clone()), job.clone());

        info!("Submitted {} lip-sync job {} (session {:?})", kind, id, session_id);
        Ok(job)
    }

    /// Poll a submitted job until it completes, fails, times out or is cancelled
    pub async fn await_result(
        &self,
        kind: ProviderKind,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RenderedClip, AvatarError> {
        let key = (kind, job_id.to_string());
        let job = self
            .job(kind, job_id)
            .ok_or_else(|| AvatarError::Api(format!("Unknown {} job {}", kind, job_id)))?;
        let backend = self.backend(kind)?;

        let mut poller = JobPoller::new(&self.config);
        let mut step = poller.submitted();

        loop {
            match step {
                PollStep::Wait(interval) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = self.clock.sleep(interval) => {}
                    }
                    if cancel.is_cancelled() || !self.jobs.contains_key(&key) {
                        self.jobs.remove(&key);
                        info!("Stopped polling {} job {}: cancelled", job.provider, job_id);
                        return Err(AvatarError::Cancelled);
                    }

                    step = match backend.poll(job_id).await {
                        Ok(status) => poller.observe(&status),
                        Err(e) => {
                            warn!("Poll of {} job {} failed: {}", job.provider, job_id, e);
                            poller.transport_error()
                        }
                    };
                    debug!(
                        "{} job {} attempt {}/{}: {:?}",
                        job.provider,
                        job_id,
                        poller.attempts(),
                        poller.max_attempts(),
                        poller.state()
                    );

                    if let Some(mut entry) = self.jobs.get_mut(&key) {
                        entry.attempts = poller.attempts();
                        entry.status = poller.state().job_status();
                    }
                }
                PollStep::Completed => {
                    let result = backend.fetch(job_id).await;
                    self.jobs.remove(&key);
                    let clip = result?;
                    info!(
                        "{} job {} completed after {} attempts: {}",
                        job.provider,
                        job_id,
                        poller.attempts(),
                        clip.result_url
                    );
                    return Ok(clip);
                }
                PollStep::Failed(reason) => {
                    self.jobs.remove(&key);
                    warn!("{} job {} failed: {}", job.provider, job_id, reason);
                    return Err(AvatarError::ProviderFailure {
                        provider: job.provider,
                        job_id: job_id.to_string(),
                        session_id: job.session_id.clone(),
                        reason,
                    });
                }
                PollStep::TimedOut => {
                    self.jobs.remove(&key);
                    warn!(
                        "{} job {} timed out after {} attempts",
                        job.provider,
                        job_id,
                        poller.attempts()
                    );
                    return Err(AvatarError::ProviderTimeout {
                        provider: job.provider,
                        job_id: job_id.to_string(),
                        session_id: job.session_id.clone(),
                        attempts: poller.attempts(),
                    });
                }
            }
        }
    }

    /// Submit and wait
    pub async fn render(
        &self,
        kind: ProviderKind,
        request: &LipSyncRequest,
        session_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RenderedClip, AvatarError> {
        let job = self.submit(kind, request, session_id).await?;
        self.await_result(kind, &job.id, cancel).await
    }

    /// Snapshot of a job still in flight
    pub fn job(&self, kind: ProviderKind, job_id: &str) -> Option<LipSyncJob> {
        self.jobs.get(&(kind, job_id.to_string())).map(|j| j.clone())
    }

    pub fn in_flight(&self) -> usize {
        self.jobs.len()
    }

    pub fn jobs_for_session(&self, session_id: &str) -> Vec<LipSyncJob> {
        self.jobs
            .iter()
            .filter(|j| j.session_id.as_deref() == Some(session_id))
            .map(|j| j.clone())
            .collect()
    }

    /// Drop a job from the registry
    pub fn release(&self, kind: ProviderKind, job_id: &str) -> Option<LipSyncJob> {
        self.jobs.remove(&(kind, job_id.to_string())).map(|(_, job)| job)
    }

    /// Drop every job tied to a session; returns how many were released
    pub fn release_session(&self, session_id: &str) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| job.session_id.as_deref() != Some(session_id));
        let released = before.saturating_sub(self.jobs.len());
        if released > 0 {
            info!("Released {} provider jobs for session {}", released, session_id);
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facesync_core::ManualClock;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Scripted backend: returns queued statuses, then repeats the last one
    struct ScriptedBackend {
        script: Mutex<Vec<Result<RemoteStatus, AvatarError>>>,
        polls: AtomicU32,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<RemoteStatus, AvatarError>>) -> Self {
            Self {
                script: Mutex::new(script),
                polls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LipSyncBackend for ScriptedBackend {
        fn kind(&self) -> ProviderKind {
            ProviderKind::LiveAvatar
        }

        async fn submit(&self, _request: &LipSyncRequest) -> Result<String, AvatarError> {
            Ok("job-1".to_string())
        }

        async fn poll(&self, _job_id: &str) -> Result<RemoteStatus, AvatarError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.remove(0)
            } else {
                match script.first() {
                    Some(Ok(status)) => Ok(status.clone()),
                    _ => Err(AvatarError::Network("connection reset".into())),
                }
            }
        }

        async fn fetch(&self, job_id: &str) -> Result<RenderedClip, AvatarError> {
            Ok(RenderedClip {
                job_id: job_id.to_string(),
                provider: ProviderKind::LiveAvatar,
                result_url: "https://cdn.example/clip.mp4".to_string(),
                duration: Some(2.3),
            })
        }
    }

    fn adapter(backend: Arc<ScriptedBackend>, clock: Arc<ManualClock>, max_attempts: u32) -> ProviderAdapter {
        ProviderAdapter::new(
            PollConfig {
                interval_ms: 2500,
                max_attempts,
            },
            clock,
        )
        .unwrap()
        .with_backend(backend)
    }

    fn request() -> LipSyncRequest {
        LipSyncRequest::new("https://audio.example/u1.wav", "avatar-1")
    }

    #[tokio::test]
    async fn test_job_completes_and_is_released() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok(RemoteStatus::Pending),
            Ok(RemoteStatus::Running),
            Ok(RemoteStatus::Done {
                result_url: None,
                duration: None,
            }),
        ]));
        let clock = Arc::new(ManualClock::default());
        let adapter = adapter(backend.clone(), clock, 50);

        let clip = adapter
            .render(ProviderKind::LiveAvatar, &request(), Some("s1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(clip.result_url, "https://cdn.example/clip.mp4");
        assert_eq!(backend.polls.load(Ordering::SeqCst), 3);
        assert_eq!(adapter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_never_completing_job_times_out() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(RemoteStatus::Running)]));
        let clock = Arc::new(ManualClock::default());
        let start = clock.now();
        let adapter = adapter(backend.clone(), clock.clone(), 50);

        let err = adapter
            .render(ProviderKind::LiveAvatar, &request(), Some("s1"), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            AvatarError::ProviderTimeout {
                attempts, session_id, ..
            } => {
                assert_eq!(attempts, 50);
                assert_eq!(session_id.as_deref(), Some("s1"));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(backend.polls.load(Ordering::SeqCst), 50);
        assert_eq!(clock.now() - start, chrono::Duration::milliseconds(125_000));
        assert_eq!(adapter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_transport_errors_count_as_attempts() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(AvatarError::Network("down".into()))]));
        let clock = Arc::new(ManualClock::default());
        let adapter = adapter(backend.clone(), clock, 4);

        let err = adapter
            .render(ProviderKind::LiveAvatar, &request(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AvatarError::ProviderTimeout { attempts: 4, .. }));
    }

    #[tokio::test]
    async fn test_remote_failure_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok(RemoteStatus::Failed {
                reason: "unsupported audio".into(),
            }),
            Ok(RemoteStatus::Running),
        ]));
        let clock = Arc::new(ManualClock::default());
        let adapter = adapter(backend.clone(), clock, 50);

        let err = adapter
            .render(ProviderKind::LiveAvatar, &request(), Some("s9"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AvatarError::ProviderFailure { ref reason, .. } if reason == "unsupported audio"));
        assert_eq!(backend.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_loop_and_releases_job() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(RemoteStatus::Running)]));
        let clock = Arc::new(ManualClock::default());
        let adapter = adapter(backend.clone(), clock, 50);

        let job = adapter
            .submit(ProviderKind::LiveAvatar, &request(), Some("s1"))
            .await
            .unwrap();
        assert_eq!(adapter.jobs_for_session("s1").len(), 1);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = adapter.await_result(job.provider, &job.id, &cancel).await.unwrap_err();
        assert!(matches!(err, AvatarError::Cancelled));
        assert_eq!(adapter.in_flight(), 0);
        assert_eq!(backend.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_during_poll_stops_at_next_wake() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(RemoteStatus::Running)]));
        let adapter = Arc::new(
            ProviderAdapter::new(PollConfig::default(), Arc::new(facesync_core::SystemClock))
                .unwrap()
                .with_backend(backend.clone()),
        );

        let job = adapter
            .submit(ProviderKind::LiveAvatar, &request(), Some("s1"))
            .await
            .unwrap();

        let poll_task = {
            let adapter = Arc::clone(&adapter);
            let id = job.id.clone();
            tokio::spawn(async move {
                adapter
                    .await_result(ProviderKind::LiveAvatar, &id, &CancellationToken::new())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(6_000)).await;
        assert_eq!(adapter.release_session("s1"), 1);

        let result = poll_task.await.unwrap();
        assert!(matches!(result, Err(AvatarError::Cancelled)));
        assert_eq!(backend.polls.load(Ordering::SeqCst), 2);
    }

    /// Hands out the same job id as `ScriptedBackend`, under another provider
    struct BeyondBackend;

    #[async_trait]
    impl LipSyncBackend for BeyondBackend {
        fn kind(&self) -> ProviderKind {
            ProviderKind::BeyondPresence
        }

        async fn submit(&self, _request: &LipSyncRequest) -> Result<String, AvatarError> {
            Ok("job-1".to_string())
        }

        async fn poll(&self, _job_id: &str) -> Result<RemoteStatus, AvatarError> {
            Ok(RemoteStatus::Running)
        }

        async fn fetch(&self, _job_id: &str) -> Result<RenderedClip, AvatarError> {
            Err(AvatarError::Api("not finished".into()))
        }
    }

    #[tokio::test]
    async fn test_same_job_id_from_two_providers_is_tracked_twice() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(RemoteStatus::Running)]));
        let adapter = adapter(backend, Arc::new(ManualClock::default()), 50).with_backend(Arc::new(BeyondBackend));

        adapter
            .submit(ProviderKind::LiveAvatar, &request(), Some("s1"))
            .await
            .unwrap();
        adapter
            .submit(ProviderKind::BeyondPresence, &request(), Some("s2"))
            .await
            .unwrap();
        assert_eq!(adapter.in_flight(), 2);

        let live = adapter.job(ProviderKind::LiveAvatar, "job-1").unwrap();
        assert_eq!(live.session_id.as_deref(), Some("s1"));
        let beyond = adapter.job(ProviderKind::BeyondPresence, "job-1").unwrap();
        assert_eq!(beyond.session_id.as_deref(), Some("s2"));

        let released = adapter.release(ProviderKind::LiveAvatar, "job-1").unwrap();
        assert_eq!(released.provider, ProviderKind::LiveAvatar);
        assert_eq!(adapter.in_flight(), 1);
        assert!(adapter.job(ProviderKind::LiveAvatar, "job-1").is_none());
        assert!(adapter.job(ProviderKind::BeyondPresence, "job-1").is_some());
        assert_eq!(adapter.jobs_for_session("s2").len(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_and_bad_request() {
        let clock = Arc::new(ManualClock::default());
        let adapter = ProviderAdapter::new(PollConfig::default(), clock).unwrap();
        assert!(matches!(
            adapter.submit(ProviderKind::BeyondPresence, &request(), None).await,
            Err(AvatarError::Config(_))
        ));

        let bad = LipSyncRequest::new("ftp://audio.example/a.wav", "avatar-1");
        assert!(bad.validate().is_err());
        let bad = LipSyncRequest::new("https://audio.example/a.wav", "../x");
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("live-avatar".parse::<ProviderKind>().unwrap(), ProviderKind::LiveAvatar);
        assert_eq!("BeyondPresence".parse::<ProviderKind>().unwrap(), ProviderKind::BeyondPresence);
        assert!("heygen".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::LiveAvatar.to_string(), "LiveAvatar");
    }
}
