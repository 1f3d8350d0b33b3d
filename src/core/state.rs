//! Execution state models

use crate::core::step::StepKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall matrix run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Run has not started
    Pending,
    /// Run is in progress
    Running,
    /// Every required job built and tested
    Completed,
    /// At least one required job failed
    Failed,
    /// Run was cancelled
    Cancelled,
    /// Branch filter excluded the run
    Skipped,
}

/// State of a single job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobState {
    /// Every step succeeded
    Passed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// A step failed or timed out
    Failed {
        step: StepKind,
        error: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Job was cancelled before finishing
    Cancelled { cancelled_at: DateTime<Utc> },
}

impl JobState {
    pub fn is_passed(&self) -> bool {
        matches!(self, JobState::Passed { .. })
    }
}

/// Overall run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run ID
    pub run_id: Uuid,

    pub status: ExecutionStatus,

    pub started_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,

    pub total_jobs: usize,

    pub passed_jobs: usize,

    pub failed_jobs: usize,

    pub cancelled_jobs: usize,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_jobs: 0,
            passed_jobs: 0,
            failed_jobs: 0,
            cancelled_jobs: 0,
        }
    }

    /// Mark run as started
    pub fn start(&mut self, total_jobs: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_jobs = total_jobs;
    }

    /// Record a finished job
    pub fn record(&mut self, state: &JobState) {
        match state {
            JobState::Passed { .. } => self.passed_jobs += 1,
            JobState::Failed { .. } => self.failed_jobs += 1,
            JobState::Cancelled { .. } => self.cancelled_jobs += 1,
        }
    }

    /// Mark run as finished with the given status
    pub fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
