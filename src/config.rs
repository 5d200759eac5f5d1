//! Runtime configuration.
//!
//! Bridges the CLI flags with the optional `rlm-act.toml` file at the
//! project root. Precedence: CLI flag, then environment, then the TOML
//! file, then the built-in default.

use crate::agent::AgentConfig;
use crate::autonomy::AutonomyMode;
use crate::checkpoint::CHECKPOINT_DIR;
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "rlm-act.toml";
const DEFAULT_TIMEOUT_SECS: u64 = 1800;

#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub task_file: PathBuf,
    pub agent_cmd: String,
    pub phase_timeout: Duration,
    pub mode: AutonomyMode,
    pub use_pty: bool,
    pub verbose: bool,
    pub log_dir: PathBuf,
}

impl Config {
    /// Resolve the full runtime configuration.
    ///
    /// `mode_override` comes from the CLI and wins over the TOML file.
    /// The task file defaults to `TASK.md` at the project root.
    pub fn new(
        project_dir: PathBuf,
        verbose: bool,
        mode_override: Option<AutonomyMode>,
        task_file: Option<PathBuf>,
    ) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let toml = ActToml::load_or_default(&project_dir)?;

        let task_file = match task_file {
            Some(path) => path
                .canonicalize()
                .context("Failed to resolve task file path")?,
            None => {
                let default = project_dir.join("TASK.md");
                if !default.exists() {
                    return Err(anyhow!(
                        "No task file found. Create TASK.md or provide --task <file>"
                    ));
                }
                default
            }
        };

        let agent_cmd = std::env::var("RLM_AGENT_CMD")
            .ok()
            .or(toml.agent.command)
            .unwrap_or_else(|| "claude".to_string());

        let phase_timeout =
            Duration::from_secs(toml.agent.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));

        let mode = mode_override.or(toml.pipeline.mode).unwrap_or_default();

        let log_dir = project_dir.join(CHECKPOINT_DIR).join("logs");

        Ok(Self {
            project_dir,
            task_file,
            agent_cmd,
            phase_timeout,
            mode,
            use_pty: toml.agent.use_pty.unwrap_or(cfg!(unix)),
            verbose,
            log_dir,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    /// The invoker configuration this runtime config implies.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            agent_cmd: self.agent_cmd.clone(),
            use_pty: self.use_pty,
            verbose: self.verbose,
            ..AgentConfig::default()
        }
    }
}

/// The optional `rlm-act.toml` file.
#[derive(Debug, Default, Deserialize)]
struct ActToml {
    #[serde(default)]
    agent: AgentTable,
    #[serde(default)]
    pipeline: PipelineTable,
}

#[derive(Debug, Default, Deserialize)]
struct AgentTable {
    command: Option<String>,
    timeout_secs: Option<u64>,
    use_pty: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelineTable {
    mode: Option<AutonomyMode>,
}

impl ActToml {
    fn load_or_default(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }
}
