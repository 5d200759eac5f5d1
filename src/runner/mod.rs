//! Phase runner: the glue between the autonomy orchestrator, the checkpoint
//! store, and the agent invoker.
//!
//! Each phase's real work is delegated through the invoker. After a phase
//! finishes, the runner asks the decision table what to do: persist a
//! checkpoint, pause at the gate, or advance. Fatal errors stop the
//! pipeline and leave the last checkpoint in place for a later resume.

use crate::agent::{AgentInvoker, InvokeOptions};
use crate::autonomy::decide_after_phase;
use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::gates::{PauseAction, PauseGate};
use crate::phase::{PhaseResult, PhaseStatus, PhaseType};
use crate::state::PipelineState;
use crate::ui::RunnerUi;
use anyhow::{Context, Result};
use tracing::{error, info};

/// How a pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// All six phases completed.
    Completed,
    /// A phase failed; the pipeline stopped.
    Failed { phase: PhaseType },
    /// The operator chose to exit at a pause point.
    Exited { after: PhaseType },
    /// The operator asked for a restart from research.
    Restarted,
}

#[derive(Debug)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub checkpoints_written: usize,
}

pub struct PhaseRunner {
    config: Config,
    store: CheckpointStore,
    invoker: AgentInvoker,
}

impl PhaseRunner {
    pub fn new(config: Config) -> Self {
        let store = CheckpointStore::new(&config.project_dir);
        let invoker = AgentInvoker::new(config.agent_config());
        Self {
            config,
            store,
            invoker,
        }
    }

    /// Use a custom invoker (tests, alternate agents).
    pub fn with_invoker(config: Config, invoker: AgentInvoker) -> Self {
        let store = CheckpointStore::new(&config.project_dir);
        Self {
            config,
            store,
            invoker,
        }
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Execute phases until done, failure, or an operator exit.
    ///
    /// Picks up from the first phase without a complete result, so the same
    /// entry point serves fresh runs and checkpoint resumes.
    pub async fn run(
        &self,
        state: &mut PipelineState,
        task: &str,
        gate: &mut dyn PauseGate,
        ui: &RunnerUi,
    ) -> Result<RunSummary> {
        let mut checkpoints_written = 0;
        let total = PhaseType::ALL.len();

        let Some(mut phase) = next_phase(state) else {
            return Ok(RunSummary {
                outcome: RunOutcome::Completed,
                checkpoints_written,
            });
        };

        loop {
            state.current_phase = Some(phase);
            let index = PhaseType::ALL.iter().position(|p| *p == phase).unwrap_or(0) + 1;
            ui.start_phase(phase, index, total);
            info!(phase = %phase, "Starting phase");

            let mut result = PhaseResult::start(phase);
            let prompt = build_phase_prompt(phase, task, state);

            let invocation = self
                .invoker
                .invoke(
                    &prompt,
                    &InvokeOptions {
                        timeout: self.config.phase_timeout,
                        stream: self.config.verbose,
                        working_dir: self.config.project_dir.clone(),
                    },
                )
                .await;

            let log_path = self.write_phase_log(phase, &invocation.output)?;
            ui.log_step(&format!("Output written to {}", log_path));

            if invocation.success {
                result.add_artifact(log_path);
                result.complete()?;
                ui.phase_complete(phase, invocation.duration);
            } else {
                let message = invocation
                    .error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "agent invocation failed".to_string());
                result.fail(message.clone())?;
                ui.phase_failed(phase, &message);
                error!(phase = %phase, "Phase failed: {message}");
            }

            let failed = result.status == PhaseStatus::Failed;
            let errors = result.errors.clone();
            // A stored failed attempt is superseded by this one
            if state
                .result(phase)
                .map(|r| r.status == PhaseStatus::Failed)
                .unwrap_or(false)
            {
                state.clear_result(phase);
            }
            state.record_result(result)?;

            let decision = decide_after_phase(state.mode, phase);
            if decision.write_checkpoint {
                let label = format!("{}-{}", phase, if failed { "failed" } else { "complete" });
                let snapshot = state.to_value()?;
                let path = self
                    .store
                    .write_checkpoint(&snapshot, &label, &errors)
                    .with_context(|| format!("Failed to checkpoint after phase {phase}"))?;
                state.checkpoint_id = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| s.to_string());
                checkpoints_written += 1;
                ui.log_step(&format!("Checkpoint: {}", path.display()));
            }

            if failed {
                // Fatal: stop here, leaving the checkpoint for resume
                return Ok(RunSummary {
                    outcome: RunOutcome::Failed { phase },
                    checkpoints_written,
                });
            }

            if decision.pause {
                let stored = state
                    .result(phase)
                    .cloned()
                    .unwrap_or_else(|| PhaseResult::start(phase));
                match gate.review(phase, &stored)? {
                    PauseAction::Continue => {}
                    PauseAction::Revise => {
                        state.clear_result(phase);
                        continue;
                    }
                    PauseAction::Restart => {
                        return Ok(RunSummary {
                            outcome: RunOutcome::Restarted,
                            checkpoints_written,
                        });
                    }
                    PauseAction::Exit => {
                        return Ok(RunSummary {
                            outcome: RunOutcome::Exited { after: phase },
                            checkpoints_written,
                        });
                    }
                }
            } else if decision.auto_approve {
                ui.log_step(&format!("Auto-approved ({} mode)", state.mode));
            }

            match phase.next() {
                Ok(next) => phase = next,
                Err(_) => {
                    state.current_phase = None;
                    return Ok(RunSummary {
                        outcome: RunOutcome::Completed,
                        checkpoints_written,
                    });
                }
            }
        }
    }

    fn write_phase_log(&self, phase: PhaseType, output: &str) -> Result<String> {
        std::fs::create_dir_all(&self.config.log_dir)
            .context("Failed to create log directory")?;
        let path = self.config.log_dir.join(format!("{phase}.log"));
        std::fs::write(&path, output)
            .with_context(|| format!("Failed to write phase log {}", path.display()))?;
        Ok(path.display().to_string())
    }
}

/// The first phase, in order, without a complete result. `None` when all
/// six are complete.
pub fn next_phase(state: &PipelineState) -> Option<PhaseType> {
    PhaseType::ALL.into_iter().find(|p| {
        state
            .result(*p)
            .map(|r| r.status != PhaseStatus::Complete)
            .unwrap_or(true)
    })
}

/// Render the prompt for one phase: the task text plus the phase directive.
pub fn build_phase_prompt(phase: PhaseType, task: &str, state: &PipelineState) -> String {
    let mut context = String::new();
    let completed: Vec<&str> = PhaseType::ALL
        .iter()
        .filter(|p| {
            state
                .result(**p)
                .map(|r| r.status == PhaseStatus::Complete)
                .unwrap_or(false)
        })
        .map(|p| p.as_str())
        .collect();
    if !completed.is_empty() {
        context = format!("\n## COMPLETED PHASES\n{}\n", completed.join(", "));
    }

    format!(
        "You are executing the {} phase of an autonomous development pipeline.\n\n\
         ## TASK\n{}\n{}\n## PHASE DIRECTIVE\n{}\n",
        phase,
        task,
        context,
        phase_directive(phase)
    )
}

fn phase_directive(phase: PhaseType) -> &'static str {
    match phase {
        PhaseType::Research => {
            "Research the codebase and the task. Record findings, constraints, \
             and open questions in a research document."
        }
        PhaseType::Decomposition => {
            "Decompose the research findings into a requirement hierarchy with \
             explicit dependencies."
        }
        PhaseType::TddPlanning => {
            "Author a test-first implementation plan: for each requirement, the \
             failing test to write first and the change that makes it pass."
        }
        PhaseType::MultiDoc => {
            "Generate the document set from the plan: PRD, design document, and \
             task breakdown."
        }
        PhaseType::BeadsSync => {
            "Synchronize the task breakdown with the issue tracker, creating or \
             updating issues so every task is tracked."
        }
        PhaseType::Implementation => {
            "Implement the plan task by task, keeping tests green and committing \
             incrementally."
        }
    }
}
