//! Provider job records and the polling state machine

use crate::config::PollConfig;
use crate::provider_adapter::{ProviderKind, RemoteStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Externally visible job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::TimedOut)
    }
}

/// A batch render job owned by the provider adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LipSyncJob {
    pub id: String,
    pub provider: ProviderKind,
    pub status: JobStatus,
    pub result_url: Option<String>,
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
    pub session_id: Option<String>,
}

/// Polling lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Created,
    Submitted,
    Polling,
    Completed,
    Failed,
    TimedOut,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollState::Completed | PollState::Failed | PollState::TimedOut)
    }

    /// Status reported on the job record
    pub fn job_status(&self) -> JobStatus {
        match self {
            PollState::Created | PollState::Submitted => JobStatus::Pending,
            PollState::Polling => JobStatus::Running,
            PollState::Completed => JobStatus::Done,
            PollState::Failed => JobStatus::Failed,
            PollState::TimedOut => JobStatus::TimedOut,
        }
    }
}

/// What the driver should do after feeding the poller an observation
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    /// Sleep for the interval, then poll again
    Wait(Duration),
    /// Remote job finished; fetch the result
    Completed,
    /// Remote job failed with a reason
    Failed(String),
    /// Attempt budget exhausted
    TimedOut,
}

/// Pure polling state machine. Holds no I/O; the adapter drives it.
///
/// `Completed`, `Failed` and `TimedOut` are final: further observations leave
/// the state unchanged.
#[derive(Debug, Clone)]
pub struct JobPoller {
    state: PollState,
    attempts: u32,
    max_attempts: u32,
    interval: Duration,
    failure: Option<String>,
}

impl JobPoller {
    pub fn new(config: &PollConfig) -> Self {
        Self {
            state: PollState::Created,
            attempts: 0,
            max_attempts: config.max_attempts.max(1),
            interval: config.interval(),
            failure: None,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// `Created → Submitted`. Returns the wait before the first poll.
    pub fn submitted(&mut self) -> PollStep {
        if self.state == PollState::Created {
            self.state = PollState::Submitted;
        }
        self.current_step()
    }

    /// Record a status observation for one poll attempt
    pub fn observe(&mut self, status: &RemoteStatus) -> PollStep {
        if self.state.is_terminal() || self.state == PollState::Created {
            return self.current_step();
        }

        self.attempts += 1;
        self.state = match status {
            RemoteStatus::Done { .. } => PollState::Completed,
            RemoteStatus::Failed { reason } => {
                self.failure = Some(reason.clone());
                PollState::Failed
            }
            RemoteStatus::Pending | RemoteStatus::Running => self.after_inconclusive_attempt(),
        };
        self.current_step()
    }

    /// A poll that failed in transport still consumes an attempt
    pub fn transport_error(&mut self) -> PollStep {
        if self.state.is_terminal() || self.state == PollState::Created {
            return self.current_step();
        }

        self.attempts += 1;
        self.state = self.after_inconclusive_attempt();
        self.current_step()
    }

    fn after_inconclusive_attempt(&self) -> PollState {
        if self.attempts >= self.max_attempts {
            PollState::TimedOut
        } else {
            PollState::Polling
        }
    }

    fn current_step(&self) -> PollStep {
        match self.state {
            PollState::Created | PollState::Submitted | PollState::Polling => PollStep::Wait(self.interval),
            PollState::Completed => PollStep::Completed,
            PollState::Failed => PollStep::Failed(
                self.failure
                    .clone()
                    .unwrap_or_else(|| "unknown failure".to_string()),
            ),
            PollState::TimedOut => PollStep::TimedOut,
        }
    }
}
