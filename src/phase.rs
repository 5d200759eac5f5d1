//! Phase model for the pipeline engine.
//!
//! This module provides:
//! - `PhaseType` — the six fixed pipeline phases in strict total order
//! - `PhaseStatus` — per-phase status with an explicit transition matrix
//! - `PhaseResult` — the record a completed or failed phase leaves behind

use crate::errors::ModelError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The six pipeline phases, in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    /// Explore the task and gather findings.
    Research,
    /// Break research findings into a requirement hierarchy.
    Decomposition,
    /// Author the test-first implementation plan.
    TddPlanning,
    /// Generate the document set from the plan.
    MultiDoc,
    /// Synchronize the plan with the issue tracker.
    BeadsSync,
    /// Execute the implementation.
    Implementation,
}

impl PhaseType {
    /// All phases in execution order.
    pub const ALL: [PhaseType; 6] = [
        PhaseType::Research,
        PhaseType::Decomposition,
        PhaseType::TddPlanning,
        PhaseType::MultiDoc,
        PhaseType::BeadsSync,
        PhaseType::Implementation,
    ];

    /// The snake_case string form used in checkpoints and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseType::Research => "research",
            PhaseType::Decomposition => "decomposition",
            PhaseType::TddPlanning => "tdd_planning",
            PhaseType::MultiDoc => "multi_doc",
            PhaseType::BeadsSync => "beads_sync",
            PhaseType::Implementation => "implementation",
        }
    }

    /// The phase after this one. Fails only at `implementation`.
    pub fn next(&self) -> Result<PhaseType, ModelError> {
        let idx = Self::ALL
            .iter()
            .position(|p| p == self)
            .unwrap_or_default();
        Self::ALL
            .get(idx + 1)
            .copied()
            .ok_or(ModelError::NoNextPhase(*self))
    }

    /// The phase before this one. Fails only at `research`.
    pub fn previous(&self) -> Result<PhaseType, ModelError> {
        let idx = Self::ALL
            .iter()
            .position(|p| p == self)
            .unwrap_or_default();
        idx.checked_sub(1)
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(ModelError::NoPreviousPhase(*self))
    }

    /// First phase of the pipeline.
    pub fn first() -> PhaseType {
        PhaseType::Research
    }

    /// Last phase of the pipeline.
    pub fn last() -> PhaseType {
        PhaseType::Implementation
    }
}

impl fmt::Display for PhaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| ModelError::UnknownPhase(s.to_string()))
    }
}

/// Status of a single phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Phase has not started.
    #[default]
    Pending,
    /// Phase is currently executing.
    InProgress,
    /// Phase finished successfully. Terminal and final.
    Complete,
    /// Phase failed. Terminal, but may be retried.
    Failed,
}

impl PhaseStatus {
    /// Check if the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PhaseStatus::Complete | PhaseStatus::Failed)
    }

    /// The transition matrix: pending→in_progress only; in_progress→complete
    /// or failed; failed→in_progress (retry); complete→nothing.
    pub fn can_transition_to(&self, target: PhaseStatus) -> bool {
        matches!(
            (self, target),
            (PhaseStatus::Pending, PhaseStatus::InProgress)
                | (PhaseStatus::InProgress, PhaseStatus::Complete)
                | (PhaseStatus::InProgress, PhaseStatus::Failed)
                | (PhaseStatus::Failed, PhaseStatus::InProgress)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Complete => "complete",
            PhaseStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record a phase leaves behind: what it produced, how it ended, and
/// how long it took.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseResult {
    /// Which phase this result belongs to.
    pub phase: PhaseType,
    /// Current status.
    pub status: PhaseStatus,
    /// Paths of artifacts the phase produced, in production order.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Error messages, in occurrence order.
    #[serde(default)]
    pub errors: Vec<String>,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution finished (complete or failed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Elapsed seconds between start and finish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Open metadata bag for collaborator payloads. The engine never
    /// interprets its contents.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl PhaseResult {
    /// Create a result for a phase that is starting now.
    pub fn start(phase: PhaseType) -> Self {
        Self {
            phase,
            status: PhaseStatus::InProgress,
            artifacts: Vec::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            duration_secs: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Record an artifact path.
    pub fn add_artifact(&mut self, path: impl Into<String>) {
        self.artifacts.push(path.into());
    }

    /// Mark the phase complete, stamping `completed_at` and the duration.
    pub fn complete(&mut self) -> Result<(), ModelError> {
        self.finish(PhaseStatus::Complete)
    }

    /// Mark the phase failed, appending `err` to the error list.
    pub fn fail(&mut self, err: impl Into<String>) -> Result<(), ModelError> {
        self.errors.push(err.into());
        self.finish(PhaseStatus::Failed)
    }

    /// Restart a failed phase for a retry.
    pub fn restart(&mut self) -> Result<(), ModelError> {
        if !self.status.can_transition_to(PhaseStatus::InProgress) {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: PhaseStatus::InProgress,
            });
        }
        self.status = PhaseStatus::InProgress;
        self.started_at = Utc::now();
        self.completed_at = None;
        self.duration_secs = None;
        Ok(())
    }

    /// Elapsed time between start and finish, if finished.
    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs_f64)
    }

    fn finish(&mut self, target: PhaseStatus) -> Result<(), ModelError> {
        if !self.status.can_transition_to(target) {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        let now = Utc::now();
        self.status = target;
        self.completed_at = Some(now);
        self.duration_secs = Some(
            (now - self.started_at)
                .to_std()
                .unwrap_or_default()
                .as_secs_f64(),
        );
        Ok(())
    }
}
