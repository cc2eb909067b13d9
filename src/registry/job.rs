//! 作业及其生命周期状态

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::range::MachineRange;
use crate::sim::SimTime;

/// 作业标识符：`<workload>!<id>`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(workload: &str, local: &str) -> Self {
        JobId(format!("{workload}!{local}"))
    }

    pub fn workload(&self) -> &str {
        self.0.split_once('!').map_or(self.0.as_str(), |(w, _)| w)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Allocated,
    Running,
    Completed,
    Killed,
    Rejected,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Submitted => "submitted",
            JobState::Allocated => "allocated",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Killed => "killed",
            JobState::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Killed | JobState::Rejected
        )
    }

    fn can_become(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Submitted, JobState::Allocated)
                | (JobState::Submitted, JobState::Rejected)
                | (JobState::Allocated, JobState::Running)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Killed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillReason {
    Decision,
    Walltime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Decision,
    TooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Killed(KillReason),
    Rejected(RejectReason),
}

impl JobOutcome {
    pub fn state(self) -> JobState {
        match self {
            JobOutcome::Success => JobState::Completed,
            JobOutcome::Killed(_) => JobState::Killed,
            JobOutcome::Rejected(_) => JobState::Rejected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobOutcome::Success => "success",
            JobOutcome::Killed(KillReason::Decision) => "killed",
            JobOutcome::Killed(KillReason::Walltime) => "walltime_reached",
            JobOutcome::Rejected(RejectReason::Decision) => "rejected",
            JobOutcome::Rejected(RejectReason::TooLarge) => "rejected_too_large",
        }
    }
}

/// What a loader hands to the registry when a job is submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSubmission {
    pub id: JobId,
    pub requested: u32,
    pub runtime: SimTime,
    pub walltime: Option<SimTime>,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub requested: u32,
    pub submitted_at: SimTime,
    pub runtime: SimTime,
    pub walltime: Option<SimTime>,
    pub state: JobState,
    pub allocation: MachineRange,
    pub started_at: Option<SimTime>,
    pub finished_at: Option<SimTime>,
    pub outcome: Option<JobOutcome>,
}

impl Job {
    pub fn new(sub: &JobSubmission, now: SimTime) -> Self {
        Self {
            id: sub.id.clone(),
            requested: sub.requested,
            submitted_at: now,
            runtime: sub.runtime,
            walltime: sub.walltime,
            state: JobState::Submitted,
            allocation: MachineRange::default(),
            started_at: None,
            finished_at: None,
            outcome: None,
        }
    }

    pub(crate) fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_become(next) {
            return Err(SimError::IllegalTransition {
                job: self.id.to_string(),
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn waiting_time(&self) -> Option<SimTime> {
        self.started_at.map(|s| s.saturating_sub(self.submitted_at))
    }

    pub fn turnaround_time(&self) -> Option<SimTime> {
        self.finished_at.map(|f| f.saturating_sub(self.submitted_at))
    }
}
