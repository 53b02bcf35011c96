use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::MacAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Created,
    Pending,
    Blocked,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    /// created → pending → {done | failed | blocked}, blocked → pending.
    /// A retried job goes pending → pending.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Created, Pending)
                | (Created, Failed)
                | (Pending, Pending)
                | (Pending, Blocked)
                | (Pending, Done)
                | (Pending, Failed)
                | (Blocked, Pending)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Created => write!(f, "created"),
            JobState::Pending => write!(f, "pending"),
            JobState::Blocked => write!(f, "blocked"),
            JobState::Done => write!(f, "done"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Payload-free discriminant of [`JobAction`], used for lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Ping,
    HostCreate,
    TopologyParse,
    Notify,
    Unknown,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Ping => write!(f, "ping"),
            ActionKind::HostCreate => write!(f, "host-create"),
            ActionKind::TopologyParse => write!(f, "topology-parse"),
            ActionKind::Notify => write!(f, "notify"),
            ActionKind::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCreate {
    pub ipmi_address: IpAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyParse {
    pub mac: MacAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notify {
    pub failed_job_id: Uuid,
    pub failed_action: ActionKind,
    pub errors: Vec<String>,
}

/// What a job does, with the inputs it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "kebab-case")]
pub enum JobAction {
    Ping,
    HostCreate(HostCreate),
    TopologyParse(TopologyParse),
    Notify(Notify),
    /// Produced by a newer peer; carried along but never executed.
    #[serde(other)]
    Unknown,
}

impl JobAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            JobAction::Ping => ActionKind::Ping,
            JobAction::HostCreate(_) => ActionKind::HostCreate,
            JobAction::TopologyParse(_) => ActionKind::TopologyParse,
            JobAction::Notify(_) => ActionKind::Notify,
            JobAction::Unknown => ActionKind::Unknown,
        }
    }
}

/// How a handler run ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    /// A host-create run saved the host with this id.
    HostSaved { host_id: Uuid },
    /// Waiting for the host-create job of the same requester.
    Blocked { requester_id: Uuid },
    /// Action this binary does not know; left untouched.
    Dropped,
}

/// Whether a failed job goes back in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retry,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    /// Shared by every job created from one HTTP request.
    pub requester_id: Uuid,
    #[serde(flatten)]
    pub action: JobAction,
    pub state: JobState,
    pub fail_count: u32,
    pub errors: Vec<AppError>,
    /// Host registered by a finished host-create job. Stays valid when a
    /// later request updates the same host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(requester_id: Uuid, action: JobAction) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            requester_id,
            action,
            state: JobState::Created,
            fail_count: 0,
            errors: Vec::new(),
            host_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }

    /// Move to `next` if the lifecycle allows it.
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                job_id = %self.id,
                from = %self.state,
                to = %next,
                "Rejected job state transition"
            );
            return false;
        }
        self.state = next;
        self.updated_at = Utc::now();
        true
    }

    /// The single gate every handler failure passes through: record it and
    /// decide whether the job gets another attempt.
    pub fn append_error(&mut self, mut err: AppError, max_fails: u32) -> Verdict {
        err.job_id = Some(self.id);
        let terminal = err.is_terminal();
        self.errors.push(err);
        self.fail_count += 1;
        self.updated_at = Utc::now();

        if terminal || self.fail_count >= max_fails {
            Verdict::Failed
        } else {
            Verdict::Retry
        }
    }
}
