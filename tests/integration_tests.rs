//! Integration tests for rlm-act
//!
//! These exercise the CLI end to end against temporary project directories,
//! using a shell-script fixture in place of the real agent.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create an rlm-act Command
fn rlm_act() -> Command {
    cargo_bin_cmd!("rlm-act")
}

/// Helper to create a temporary project directory with a task file
fn create_temp_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("TASK.md"), "# Build a widget\n").unwrap();
    dir
}

/// Write an executable fixture script standing in for the agent CLI.
fn fixture_agent(dir: &Path, body: &str) -> String {
    let path = dir.join("agent.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path.to_str().unwrap().to_string()
}

/// Point the CLI at the fixture agent and disable the PTY shim.
fn write_config(dir: &Path, agent_cmd: &str) {
    fs::write(
        dir.join("rlm-act.toml"),
        format!("[agent]\ncommand = \"{agent_cmd}\"\ntimeout_secs = 30\nuse_pty = false\n"),
    )
    .unwrap();
}

// =============================================================================
// Basic CLI tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        rlm_act().arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        rlm_act().arg("--version").assert().success();
    }

    #[test]
    fn test_status_without_checkpoints() {
        let dir = create_temp_project();
        rlm_act()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No checkpoints found"));
    }

    #[test]
    fn test_run_without_task_file_fails() {
        let dir = TempDir::new().unwrap();
        rlm_act()
            .current_dir(dir.path())
            .args(["run", "--yes"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No task file"));
    }

    #[test]
    fn test_run_rejects_unknown_mode() {
        let dir = create_temp_project();
        rlm_act()
            .current_dir(dir.path())
            .args(["run", "--mode", "yolo", "--yes"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Pipeline execution
// =============================================================================

mod pipeline {
    use super::*;

    #[test]
    fn test_full_run_writes_checkpoints_and_status_reports_them() {
        let dir = create_temp_project();
        let agent = fixture_agent(
            dir.path(),
            r#"echo '{"type":"result","result":"done"}'"#,
        );
        write_config(dir.path(), &agent);

        rlm_act()
            .current_dir(dir.path())
            .args(["run", "--mode", "fully-autonomous", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Pipeline complete"));

        // Six phases, six checkpoints
        let checkpoint_dir = dir.path().join(".rlm-act-checkpoints");
        let count = fs::read_dir(&checkpoint_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
            .count();
        assert_eq!(count, 6);

        rlm_act()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("implementation-complete"))
            .stdout(predicate::str::contains("Completed phases: 6/6"));
    }

    #[test]
    fn test_failed_phase_leaves_resumable_checkpoint() {
        let dir = create_temp_project();
        let agent = fixture_agent(dir.path(), "echo 'model unavailable' >&2\nexit 2");
        write_config(dir.path(), &agent);

        rlm_act()
            .current_dir(dir.path())
            .args(["run", "--mode", "fully-autonomous", "--yes"])
            .assert()
            .failure();

        rlm_act()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("research-failed"));
    }

    #[test]
    fn test_resume_after_failure_retries_and_finishes() {
        let dir = create_temp_project();
        // Fails until the recovery marker exists, then succeeds
        let marker = dir.path().join("fixed");
        let agent = fixture_agent(
            dir.path(),
            &format!(
                r#"if [ ! -f {marker} ]; then
  echo 'flaky failure' >&2
  exit 1
fi
echo '{{"type":"result","result":"done"}}'"#,
                marker = marker.display()
            ),
        );
        write_config(dir.path(), &agent);

        rlm_act()
            .current_dir(dir.path())
            .args(["run", "--mode", "fully-autonomous", "--yes"])
            .assert()
            .failure();

        fs::write(&marker, "").unwrap();

        rlm_act()
            .current_dir(dir.path())
            .args(["resume", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Resuming from checkpoint"))
            .stdout(predicate::str::contains("Pipeline complete"));
    }

    #[test]
    fn test_resume_without_checkpoint_is_graceful() {
        let dir = create_temp_project();
        rlm_act()
            .current_dir(dir.path())
            .args(["resume", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No resumable checkpoint"));
    }
}

// =============================================================================
// Checkpoint retention
// =============================================================================

mod checkpoints {
    use super::*;

    fn seed_checkpoint(dir: &Path, id: &str, timestamp: &str) {
        let checkpoint_dir = dir.join(".rlm-act-checkpoints");
        fs::create_dir_all(&checkpoint_dir).unwrap();
        fs::write(
            checkpoint_dir.join(format!("{id}.json")),
            format!(
                r#"{{"id":"{id}","phase":"research-complete","timestamp":"{timestamp}","state":{{}},"errors":[],"git_commit":""}}"#
            ),
        )
        .unwrap();
    }

    #[test]
    fn test_checkpoints_list_shows_entries() {
        let dir = create_temp_project();
        seed_checkpoint(dir.path(), "cp-1", "2024-01-01T00:00:00Z");

        rlm_act()
            .current_dir(dir.path())
            .args(["checkpoints", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("research-complete"));
    }

    #[test]
    fn test_checkpoints_clean_by_age() {
        let dir = create_temp_project();
        seed_checkpoint(dir.path(), "ancient", "2020-01-01T00:00:00Z");

        rlm_act()
            .current_dir(dir.path())
            .args(["checkpoints", "clean", "--days", "30"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Deleted 1 checkpoint(s)"));
    }

    #[test]
    fn test_checkpoints_clean_all_force() {
        let dir = create_temp_project();
        seed_checkpoint(dir.path(), "a", "2024-01-01T00:00:00Z");
        seed_checkpoint(dir.path(), "b", "2024-01-02T00:00:00Z");

        rlm_act()
            .current_dir(dir.path())
            .args(["checkpoints", "clean-all", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Deleted 2 checkpoint(s)"));

        // Second invocation finds nothing to delete
        rlm_act()
            .current_dir(dir.path())
            .args(["checkpoints", "clean-all", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Deleted 0 checkpoint(s)"));
    }
}
