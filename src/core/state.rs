//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every stage reached `Succeeded`
    Succeeded,
    /// At least one stage failed (a skipped stage is not success either)
    Failed,
    /// Pipeline was cancelled (deadline exceeded or user abort)
    Cancelled,
}

/// State of a single stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageState {
    /// Stage is waiting for its `needs` to succeed
    Pending,
    /// Stage steps are executing
    Running { started_at: DateTime<Utc> },
    /// All steps succeeded; outputs are now visible to dependents
    Succeeded {
        outputs: HashMap<String, String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// A step failed; `stderr` is the first failing step's captured stderr
    Failed {
        error: String,
        stderr: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// A dependency failed or was skipped, so this stage never ran
    Skipped { reason: String },
}

impl StageState {
    /// Check if the stage is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageState::Succeeded { .. } | StageState::Failed { .. } | StageState::Skipped { .. }
        )
    }

    /// Outputs published by this stage, if it succeeded
    pub fn outputs(&self) -> Option<&HashMap<String, String>> {
        match self {
            StageState::Succeeded { outputs, .. } => Some(outputs),
            _ => None,
        }
    }

    /// Short display label used in summaries and logs
    pub fn label(&self) -> &'static str {
        match self {
            StageState::Pending => "pending",
            StageState::Running { .. } => "running",
            StageState::Succeeded { .. } => "succeeded",
            StageState::Failed { .. } => "failed",
            StageState::Skipped { .. } => "skipped",
        }
    }
}

/// Overall pipeline run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of stages
    pub total_stages: usize,

    /// Number of succeeded stages
    pub succeeded_stages: usize,

    /// Number of failed stages
    pub failed_stages: usize,

    /// Number of skipped stages
    pub skipped_stages: usize,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_stages: 0,
            succeeded_stages: 0,
            failed_stages: 0,
            skipped_stages: 0,
        }
    }

    /// Mark the run as started
    pub fn start(&mut self, total_stages: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_stages = total_stages;
    }

    /// Mark the run as finished with the given terminal status
    pub fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// Update stage counts from current stage states
    pub fn update_counts(&mut self, total: usize, succeeded: usize, failed: usize, skipped: usize) {
        self.total_stages = total;
        self.succeeded_stages = succeeded;
        self.failed_stages = failed;
        self.skipped_stages = skipped;
    }

    /// Fraction of stages in a terminal state (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        (self.succeeded_stages + self.failed_stages + self.skipped_stages) as f64
            / self.total_stages as f64
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
