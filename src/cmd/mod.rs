//! Command implementations for the `rlm-act` binary.

use anyhow::{Context, Result, bail};
use console::style;
use std::path::{Path, PathBuf};

use rlm_act::autonomy::AutonomyMode;
use rlm_act::checkpoint::CheckpointStore;
use rlm_act::config::Config;
use rlm_act::gates::{AutoGate, InteractiveGate, PauseGate};
use rlm_act::runner::{PhaseRunner, RunOutcome};
use rlm_act::state::PipelineState;
use rlm_act::ui::RunnerUi;

/// `rlm-act run` — execute the pipeline from the start.
pub async fn cmd_run(
    project_dir: PathBuf,
    verbose: bool,
    mode: Option<AutonomyMode>,
    task: Option<PathBuf>,
    yes: bool,
) -> Result<()> {
    let config = Config::new(project_dir, verbose, mode, task)?;
    config.ensure_directories()?;

    let state = PipelineState::new(config.project_dir.display().to_string(), config.mode)?;
    run_pipeline(config, state, yes).await
}

/// `rlm-act resume` — pick up from the most recent checkpoint.
pub async fn cmd_resume(
    project_dir: PathBuf,
    verbose: bool,
    task: Option<PathBuf>,
    yes: bool,
) -> Result<()> {
    let store = CheckpointStore::new(&project_dir);
    let Some(checkpoint) = store.detect_resumable_checkpoint()? else {
        println!("No resumable checkpoint found.");
        return Ok(());
    };

    let state = PipelineState::from_value(checkpoint.state.clone())
        .context("Checkpoint state does not reconstruct a pipeline")?;

    println!(
        "Resuming from checkpoint {} ({}, {} day(s) old)",
        style(&checkpoint.id).cyan(),
        checkpoint.phase,
        CheckpointStore::checkpoint_age_days(&checkpoint),
    );

    let config = Config::new(project_dir, verbose, Some(state.mode), task)?;
    config.ensure_directories()?;
    run_pipeline(config, state, yes).await
}

async fn run_pipeline(config: Config, mut state: PipelineState, yes: bool) -> Result<()> {
    let task = std::fs::read_to_string(&config.task_file)
        .with_context(|| format!("Failed to read task file {}", config.task_file.display()))?;

    let runner = PhaseRunner::new(config.clone());
    let ui = RunnerUi::new(config.verbose);
    let mut gate: Box<dyn PauseGate> = if yes {
        Box::new(AutoGate)
    } else {
        Box::new(InteractiveGate::new())
    };

    loop {
        let summary = runner.run(&mut state, &task, gate.as_mut(), &ui).await?;
        match summary.outcome {
            RunOutcome::Completed => {
                ui.finish(&format!(
                    "{} Pipeline complete ({} checkpoint(s) written)",
                    style("✓").green(),
                    summary.checkpoints_written
                ));
                return Ok(());
            }
            RunOutcome::Failed { phase } => {
                ui.finish(&format!(
                    "{} Pipeline stopped: phase {} failed. Run 'rlm-act resume' to retry.",
                    style("✗").red(),
                    phase
                ));
                bail!("Phase {phase} failed");
            }
            RunOutcome::Exited { after } => {
                ui.finish(&format!(
                    "Paused after {}. Run 'rlm-act resume' to continue.",
                    after
                ));
                return Ok(());
            }
            RunOutcome::Restarted => {
                println!("Restarting pipeline from research.");
                state = PipelineState::new(
                    config.project_dir.display().to_string(),
                    config.mode,
                )?;
            }
        }
    }
}

/// `rlm-act status` — summarize the most recent checkpoint.
pub fn cmd_status(project_dir: &Path) -> Result<()> {
    let store = CheckpointStore::new(project_dir);
    let Some(checkpoint) = store.detect_resumable_checkpoint()? else {
        println!("No checkpoints found.");
        return Ok(());
    };

    println!("Latest checkpoint: {}", style(&checkpoint.id).cyan());
    println!("  Phase:     {}", checkpoint.phase);
    println!("  Timestamp: {}", checkpoint.timestamp);
    println!(
        "  Age:       {} day(s)",
        CheckpointStore::checkpoint_age_days(&checkpoint)
    );
    if !checkpoint.git_commit.is_empty() {
        println!("  Commit:    {}", checkpoint.git_commit);
    }
    if !checkpoint.errors.is_empty() {
        println!("  Errors:");
        for error in &checkpoint.errors {
            println!("    - {error}");
        }
    }
    if let Ok(state) = PipelineState::from_value(checkpoint.state) {
        println!("  Completed phases: {}/6", state.completed_count());
        if let Some(current) = state.current_phase {
            println!("  Current phase:    {current}");
        }
    }
    Ok(())
}

/// `rlm-act checkpoints list`.
pub fn cmd_checkpoints_list(project_dir: &Path) -> Result<()> {
    let store = CheckpointStore::new(project_dir);
    let checkpoints = store.list_checkpoints();
    if checkpoints.is_empty() {
        println!("No checkpoints found.");
        return Ok(());
    }
    for (path, cp) in checkpoints {
        println!(
            "{}  {:>3}d  {:<24}  {}",
            cp.timestamp,
            CheckpointStore::checkpoint_age_days(&cp),
            cp.phase,
            path.display()
        );
    }
    Ok(())
}

/// `rlm-act checkpoints clean --days N`.
pub fn cmd_checkpoints_clean(project_dir: &Path, days: i64) -> Result<()> {
    let store = CheckpointStore::new(project_dir);
    let (deleted, failed) = store.cleanup_by_age(days);
    println!("Deleted {deleted} checkpoint(s), {failed} failure(s).");
    Ok(())
}

/// `rlm-act checkpoints clean-all`.
pub fn cmd_checkpoints_clean_all(project_dir: &Path, force: bool) -> Result<()> {
    if !force {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("Delete ALL checkpoints? A crashed run will not be resumable")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }
    let store = CheckpointStore::new(project_dir);
    let (deleted, failed) = store.cleanup_all();
    println!("Deleted {deleted} checkpoint(s), {failed} failure(s).");
    Ok(())
}

/// Quick credential diagnostic: report whether the stored token is near
/// expiry without invoking the agent.
pub fn cmd_agent_check() -> Result<()> {
    let manager = rlm_act::agent::CredentialManager::new();
    match manager.load() {
        Ok(file) => {
            let near = file
                .oauth
                .expires_within(std::time::Duration::from_secs(5 * 60));
            if near {
                println!(
                    "{} Access token expires within 5 minutes; it will be refreshed before the next invocation.",
                    style("!").yellow()
                );
            } else {
                println!("{} Credentials look current.", style("✓").green());
            }
        }
        Err(e) => println!("{} {e}", style("✗").red()),
    }
    Ok(())
}
