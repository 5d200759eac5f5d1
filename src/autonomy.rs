//! Autonomy policy for the pipeline.
//!
//! `AutonomyMode` controls how far the pipeline may proceed without human
//! confirmation. The decision logic is a single pure lookup of
//! (mode, phase) so the whole policy is testable as a table.

use crate::errors::ModelError;
use crate::phase::PhaseType;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// How much autonomy the pipeline has between phases.
///
/// Unknown mode strings deserialize to `Checkpoint`: the safe default is to
/// pause for review, never to silently skip it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyMode {
    /// Pause and checkpoint after every phase.
    #[default]
    Checkpoint,
    /// Run each phase group straight through, pausing only at boundaries.
    Batch,
    /// Never pause. Checkpoints are still written so a crash stays resumable.
    FullyAutonomous,
}

impl<'de> Deserialize<'de> for AutonomyMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or_default())
    }
}

impl AutonomyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutonomyMode::Checkpoint => "checkpoint",
            AutonomyMode::Batch => "batch",
            AutonomyMode::FullyAutonomous => "fully_autonomous",
        }
    }
}

impl fmt::Display for AutonomyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutonomyMode {
    type Err = ModelError;

    /// Strict parse for user-supplied strings (CLI, config). The lenient
    /// fallback to `Checkpoint` applies only at the deserialization boundary.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkpoint" => Ok(AutonomyMode::Checkpoint),
            "batch" => Ok(AutonomyMode::Batch),
            "fully_autonomous" | "fully-autonomous" => Ok(AutonomyMode::FullyAutonomous),
            other => Err(ModelError::UnknownMode(other.to_string())),
        }
    }
}

/// The three fixed phase groups. Derived from the phase, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseGroup {
    /// research, decomposition, tdd_planning
    Planning,
    /// multi_doc, beads_sync
    Document,
    /// implementation
    Execution,
}

impl PhaseGroup {
    /// The group a phase belongs to.
    pub fn of(phase: PhaseType) -> PhaseGroup {
        match phase {
            PhaseType::Research | PhaseType::Decomposition | PhaseType::TddPlanning => {
                PhaseGroup::Planning
            }
            PhaseType::MultiDoc | PhaseType::BeadsSync => PhaseGroup::Document,
            PhaseType::Implementation => PhaseGroup::Execution,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PhaseGroup::Planning => "planning",
            PhaseGroup::Document => "document",
            PhaseGroup::Execution => "execution",
        }
    }
}

impl fmt::Display for PhaseGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// True only for the last phase of each group.
pub fn is_group_boundary(phase: PhaseType) -> bool {
    matches!(
        phase,
        PhaseType::TddPlanning | PhaseType::BeadsSync | PhaseType::Implementation
    )
}

/// What the orchestrator does once a phase has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseDecision {
    /// Stop and wait for human confirmation.
    pub pause: bool,
    /// Persist a checkpoint snapshot.
    pub write_checkpoint: bool,
    /// Advance without asking.
    pub auto_approve: bool,
}

/// The full decision table. Pausing and checkpointing are decoupled so a
/// fully autonomous run stays resumable after a crash even though no human
/// ever reviews it.
pub fn decide_after_phase(mode: AutonomyMode, phase: PhaseType) -> PhaseDecision {
    let boundary = is_group_boundary(phase);
    match mode {
        AutonomyMode::Checkpoint => PhaseDecision {
            pause: true,
            write_checkpoint: true,
            auto_approve: false,
        },
        AutonomyMode::Batch => PhaseDecision {
            pause: boundary,
            write_checkpoint: boundary,
            auto_approve: !boundary,
        },
        AutonomyMode::FullyAutonomous => PhaseDecision {
            pause: false,
            write_checkpoint: true,
            auto_approve: true,
        },
    }
}

/// Whether to pause for review after `phase`.
pub fn should_pause_after_phase(mode: AutonomyMode, phase: PhaseType) -> bool {
    decide_after_phase(mode, phase).pause
}

/// Whether to persist a checkpoint after `phase`.
pub fn should_write_checkpoint(mode: AutonomyMode, phase: PhaseType) -> bool {
    decide_after_phase(mode, phase).write_checkpoint
}

/// Whether `phase` may be approved without asking.
pub fn auto_approve_for_phase(mode: AutonomyMode, phase: PhaseType) -> bool {
    decide_after_phase(mode, phase).auto_approve
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_roundtrip() {
        for mode in [
            AutonomyMode::Checkpoint,
            AutonomyMode::Batch,
            AutonomyMode::FullyAutonomous,
        ] {
            assert_eq!(mode.as_str().parse::<AutonomyMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_mode_parse_accepts_cli_hyphens() {
        assert_eq!(
            "fully-autonomous".parse::<AutonomyMode>().unwrap(),
            AutonomyMode::FullyAutonomous
        );
    }

    #[test]
    fn test_mode_parse_rejects_unknown() {
        assert!(matches!(
            "yolo".parse::<AutonomyMode>(),
            Err(ModelError::UnknownMode(ref s)) if s == "yolo"
        ));
    }

    #[test]
    fn test_unknown_mode_deserializes_to_checkpoint() {
        let parsed: AutonomyMode = serde_json::from_str("\"turbo\"").unwrap();
        assert_eq!(parsed, AutonomyMode::Checkpoint);
    }

    #[test]
    fn test_phase_groups() {
        assert_eq!(PhaseGroup::of(PhaseType::Research), PhaseGroup::Planning);
        assert_eq!(
            PhaseGroup::of(PhaseType::Decomposition),
            PhaseGroup::Planning
        );
        assert_eq!(PhaseGroup::of(PhaseType::TddPlanning), PhaseGroup::Planning);
        assert_eq!(PhaseGroup::of(PhaseType::MultiDoc), PhaseGroup::Document);
        assert_eq!(PhaseGroup::of(PhaseType::BeadsSync), PhaseGroup::Document);
        assert_eq!(
            PhaseGroup::of(PhaseType::Implementation),
            PhaseGroup::Execution
        );
    }

    #[test]
    fn test_group_boundaries() {
        let boundaries: Vec<bool> = PhaseType::ALL.iter().map(|p| is_group_boundary(*p)).collect();
        assert_eq!(boundaries, vec![false, false, true, false, true, true]);
    }

    #[test]
    fn test_checkpoint_mode_always_pauses_and_checkpoints() {
        for phase in PhaseType::ALL {
            let d = decide_after_phase(AutonomyMode::Checkpoint, phase);
            assert!(d.pause);
            assert!(d.write_checkpoint);
            assert!(!d.auto_approve);
        }
    }

    #[test]
    fn test_batch_mode_pauses_only_at_boundaries() {
        let pauses: Vec<bool> = PhaseType::ALL
            .iter()
            .map(|p| should_pause_after_phase(AutonomyMode::Batch, *p))
            .collect();
        assert_eq!(pauses, vec![false, false, true, false, true, true]);
    }

    #[test]
    fn test_batch_mode_checkpoints_match_pauses() {
        for phase in PhaseType::ALL {
            assert_eq!(
                should_write_checkpoint(AutonomyMode::Batch, phase),
                should_pause_after_phase(AutonomyMode::Batch, phase)
            );
        }
    }

    #[test]
    fn test_batch_mode_auto_approves_within_group_only() {
        for phase in PhaseType::ALL {
            assert_eq!(
                auto_approve_for_phase(AutonomyMode::Batch, phase),
                !is_group_boundary(phase)
            );
        }
    }

    #[test]
    fn test_fully_autonomous_never_pauses_but_always_checkpoints() {
        for phase in PhaseType::ALL {
            let d = decide_after_phase(AutonomyMode::FullyAutonomous, phase);
            assert!(!d.pause);
            assert!(d.write_checkpoint, "crash recovery requires checkpoints");
            assert!(d.auto_approve);
        }
    }
}
