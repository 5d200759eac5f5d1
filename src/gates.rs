//! Pause gate shown when the orchestrator stops between phases.

use crate::phase::{PhaseResult, PhaseStatus, PhaseType};
use anyhow::Result;
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};

/// What the operator chose at a pause point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseAction {
    /// Proceed to the next phase.
    Continue,
    /// Re-run the phase that just finished.
    Revise,
    /// Start the whole pipeline over from research.
    Restart,
    /// Stop now; the checkpoint on disk allows a later resume.
    Exit,
}

/// Seam between the runner and the terminal. The runner never renders UI
/// itself; it only consumes the returned action.
pub trait PauseGate {
    fn review(&mut self, phase: PhaseType, result: &PhaseResult) -> Result<PauseAction>;
}

/// Interactive gate backed by a dialoguer select prompt.
pub struct InteractiveGate;

impl InteractiveGate {
    pub fn new() -> Self {
        Self
    }

    fn print_summary(phase: PhaseType, result: &PhaseResult) {
        let status = match result.status {
            PhaseStatus::Complete => style("complete").green(),
            PhaseStatus::Failed => style("failed").red(),
            other => style(other.as_str()).dim(),
        };
        println!();
        println!(
            "  Phase {} finished: {}",
            style(phase.as_str()).yellow().bold(),
            status
        );
        if let Some(duration) = result.duration() {
            println!("  Duration: {:.1}s", duration.as_secs_f64());
        }
        for artifact in &result.artifacts {
            println!("  Artifact: {artifact}");
        }
        for error in &result.errors {
            println!("  {} {error}", style("Error:").red());
        }
    }
}

impl Default for InteractiveGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate for InteractiveGate {
    fn review(&mut self, phase: PhaseType, result: &PhaseResult) -> Result<PauseAction> {
        Self::print_summary(phase, result);

        let options = &[
            "Continue to the next phase",
            "Revise this phase",
            "Restart the pipeline from research",
            "Exit (resume later from the checkpoint)",
        ];

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("How to proceed?")
            .items(options)
            .default(0)
            .interact()?;

        Ok(match selection {
            0 => PauseAction::Continue,
            1 => PauseAction::Revise,
            2 => PauseAction::Restart,
            _ => PauseAction::Exit,
        })
    }
}

/// Gate for `--yes` runs: every pause continues immediately.
pub struct AutoGate;

impl PauseGate for AutoGate {
    fn review(&mut self, _phase: PhaseType, _result: &PhaseResult) -> Result<PauseAction> {
        println!("  {} (--yes flag)", style("Auto-continued").dim());
        Ok(PauseAction::Continue)
    }
}
