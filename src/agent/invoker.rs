//! The resilient invocation path for the agent subprocess.
//!
//! One invocation:
//! 1. refreshes credentials proactively when expiry is near (non-fatal),
//! 2. spawns the agent wrapped in a `script(1)` pseudo-terminal shim so the
//!    child line-buffers its output,
//! 3. consumes stdout and stderr on independent reader tasks joined before
//!    any output is treated as final,
//! 4. bounds the whole call by a deadline that kills the child, and
//! 5. classifies the outcome — detecting the expired-credential signature
//!    and retrying exactly once after a successful refresh.

use crate::agent::auth::{CredentialManager, CredentialRefresher};
use crate::errors::InvokeError;
use crate::stream::OutputAccumulator;
use regex::Regex;
use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Refresh proactively when expiry is within this lead time.
const REFRESH_LEAD: Duration = Duration::from_secs(5 * 60);

/// Cap on stderr carried inside a `Subprocess` error.
const MAX_STDERR_DIAG: usize = 2000;

/// Configuration for the agent invoker.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent CLI command (default: "claude").
    pub agent_cmd: String,
    /// Flags passed before the prompt.
    pub agent_args: Vec<String>,
    /// Wrap the child in a pseudo-terminal shim. Unix only; the only
    /// reliable way to defeat the child's own buffering heuristics.
    pub use_pty: bool,
    /// Verbose diagnostics on stderr.
    pub verbose: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_cmd: "claude".to_string(),
            agent_args: vec![
                "--print".to_string(),
                "--output-format".to_string(),
                "stream-json".to_string(),
                "--verbose".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            use_pty: cfg!(unix),
            verbose: false,
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    /// Deadline for the whole call.
    pub timeout: Duration,
    /// Emit text fragments live as they stream in.
    pub stream: bool,
    /// Working directory for the child.
    pub working_dir: PathBuf,
}

/// Outcome of one invocation. `error` is typed so callers can distinguish
/// timeout, auth, and subprocess failures.
#[derive(Debug)]
pub struct InvocationResult {
    pub success: bool,
    pub output: String,
    pub error: Option<InvokeError>,
    pub exit_code: i32,
    pub duration: Duration,
}

struct RawRun {
    output: String,
    stderr: String,
    exit_code: i32,
    timed_out: bool,
}

pub struct AgentInvoker {
    config: AgentConfig,
    credentials: Arc<dyn CredentialRefresher>,
}

impl AgentInvoker {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            credentials: Arc::new(CredentialManager::new()),
        }
    }

    /// Use a custom credential refresher (tests, alternate stores).
    pub fn with_refresher(config: AgentConfig, credentials: Arc<dyn CredentialRefresher>) -> Self {
        Self {
            config,
            credentials,
        }
    }

    /// Run the agent once with `prompt`, recovering transparently from one
    /// expired-credential failure.
    pub async fn invoke(&self, prompt: &str, opts: &InvokeOptions) -> InvocationResult {
        let start = Instant::now();

        // Proactive check. Failure here is non-fatal; the reactive path
        // below is the real safety net.
        if self.credentials.needs_refresh(REFRESH_LEAD) {
            debug!("Credential expiry within lead time, refreshing proactively");
            if let Err(e) = self.credentials.refresh().await {
                warn!("Proactive credential refresh failed: {e}");
            }
        }

        let mut refreshed = false;
        let mut exit_code = -1;
        let error = loop {
            let raw = match self.run_once(prompt, opts).await {
                Ok(raw) => raw,
                Err(e) => break Some(e),
            };
            exit_code = raw.exit_code;

            if raw.timed_out {
                break Some(InvokeError::Timeout {
                    seconds: opts.timeout.as_secs(),
                });
            }

            let combined = format!("{}\n{}", raw.output, raw.stderr);
            if looks_like_expired_credentials(&combined) {
                if refreshed {
                    // Second occurrence is definitive; no further retries
                    break Some(InvokeError::AuthExpired(
                        "agent reported expired credentials again after refresh".to_string(),
                    ));
                }
                match self.credentials.refresh().await {
                    Ok(()) => {
                        debug!("Credentials refreshed after expiry signature, retrying once");
                        refreshed = true;
                        continue;
                    }
                    Err(e) => break Some(e),
                }
            }

            if raw.exit_code != 0 {
                break Some(InvokeError::Subprocess {
                    exit_code: raw.exit_code,
                    stderr: truncate_diag(&raw.stderr, MAX_STDERR_DIAG),
                });
            }

            return InvocationResult {
                success: true,
                output: raw.output,
                error: None,
                exit_code: raw.exit_code,
                duration: start.elapsed(),
            };
        };

        InvocationResult {
            success: false,
            output: String::new(),
            error,
            exit_code,
            duration: start.elapsed(),
        }
    }

    /// One spawn-read-wait cycle, no outcome classification.
    async fn run_once(&self, prompt: &str, opts: &InvokeOptions) -> Result<RawRun, InvokeError> {
        let mut cmd = self.build_command(prompt, &opts.working_dir);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if self.config.verbose {
            eprintln!("[agent] Spawning agent in {}", opts.working_dir.display());
        }

        let mut child = cmd.spawn().map_err(InvokeError::SpawnFailed)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| InvokeError::SpawnFailed(std::io::Error::other("no stdout handle")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| InvokeError::SpawnFailed(std::io::Error::other("no stderr handle")))?;

        // Each reader owns its buffer exclusively; both are joined below
        // before any output is treated as final.
        let stream = opts.stream;
        let stdout_task = tokio::spawn(async move {
            let mut acc = OutputAccumulator::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(fragment) = acc.feed_line(&line) {
                    if stream {
                        print!("{fragment}");
                        let _ = std::io::stdout().flush();
                    }
                }
            }
            acc
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                buf.push_str(&line);
                buf.push('\n');
            }
            buf
        });

        let status = match tokio::time::timeout(opts.timeout, child.wait()).await {
            Ok(result) => result.map_err(InvokeError::SpawnFailed)?,
            Err(_) => {
                // Deadline fired: kill the child to unblock both readers,
                // then discard whatever partial output they collected.
                let _ = child.kill().await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                return Ok(RawRun {
                    output: String::new(),
                    stderr: String::new(),
                    exit_code: -1,
                    timed_out: true,
                });
            }
        };

        // Join both readers; no buffered bytes may be lost.
        let acc = stdout_task.await.unwrap_or_default();
        let stderr_buf = stderr_task.await.unwrap_or_default();

        Ok(RawRun {
            output: acc.into_output(),
            stderr: stderr_buf,
            exit_code: status.code().unwrap_or(-1),
            timed_out: false,
        })
    }

    fn build_command(&self, prompt: &str, working_dir: &Path) -> Command {
        let mut argv: Vec<String> = Vec::with_capacity(self.config.agent_args.len() + 3);
        argv.push(self.config.agent_cmd.clone());
        argv.extend(self.config.agent_args.iter().cloned());
        argv.push("-p".to_string());
        argv.push(prompt.to_string());

        let mut cmd = if self.config.use_pty && cfg!(unix) {
            pty_wrapped(&argv)
        } else {
            let mut cmd = Command::new(&argv[0]);
            cmd.args(&argv[1..]);
            cmd
        };
        cmd.current_dir(working_dir);
        cmd
    }
}

/// Wrap an argv in the `script(1)` shim so the child sees a terminal and
/// line-buffers its output. The command-line forms differ between the BSD
/// and util-linux implementations.
fn pty_wrapped(argv: &[String]) -> Command {
    if cfg!(target_os = "macos") {
        let mut cmd = Command::new("script");
        cmd.arg("-q").arg("/dev/null");
        cmd.args(argv);
        cmd
    } else {
        let joined = argv
            .iter()
            .map(|a| shell_escape::escape(Cow::from(a.as_str())).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        let mut cmd = Command::new("script");
        cmd.arg("-qefc").arg(joined).arg("/dev/null");
        cmd
    }
}

/// The expired-credential signature: an authentication-error marker plus an
/// explicit expiry phrase or HTTP 401.
fn looks_like_expired_credentials(text: &str) -> bool {
    let marker = Regex::new(r"(?i)authentication[_\s-]*error").expect("static regex is valid");
    let expiry = Regex::new(r"(?i)(token|credential)s?\s+(has\s+|have\s+)?expired|\b401\b")
        .expect("static regex is valid");
    marker.is_match(text) && expiry.is_match(text)
}

fn truncate_diag(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct MockRefresher {
        refreshes: AtomicUsize,
        fail: bool,
    }

    impl MockRefresher {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                refreshes: AtomicUsize::new(0),
                fail,
            })
        }

        fn refresh_count(&self) -> usize {
            self.refreshes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialRefresher for MockRefresher {
        fn needs_refresh(&self, _lead: Duration) -> bool {
            false
        }

        async fn refresh(&self) -> Result<(), InvokeError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(InvokeError::RefreshFailed {
                    status: 400,
                    body: "invalid_grant".to_string(),
                })
            } else {
                Ok(())
            }
        }
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

    fn invoker_for(agent_cmd: String, refresher: Arc<MockRefresher>) -> AgentInvoker {
        let config = AgentConfig {
            agent_cmd,
            agent_args: Vec::new(),
            use_pty: false,
            verbose: false,
        };
        AgentInvoker::with_refresher(config, refresher)
    }

    fn opts(dir: &Path, timeout: Duration) -> InvokeOptions {
        InvokeOptions {
            timeout,
            stream: false,
            working_dir: dir.to_path_buf(),
        }
    }

    const EXPIRED_LINE: &str = r#"API Error: 401 {"type":"error","error":{"type":"authentication_error","message":"OAuth token has expired"}}"#;

    // =========================================
    // Outcome classification
    // =========================================

    #[tokio::test]
    async fn test_result_event_supersedes_deltas() {
        let dir = tempdir().unwrap();
        let agent = fixture_agent(
            dir.path(),
            r#"echo '{"type":"content_block_delta","delta":{"type":"text_delta","text":"partial "}}'
echo '{"type":"content_block_delta","delta":{"type":"text_delta","text":"output"}}'
echo '{"type":"result","result":"final answer"}'"#,
        );
        let refresher = MockRefresher::new(false);
        let invoker = invoker_for(agent, refresher.clone());

        let result = invoker
            .invoke("do the thing", &opts(dir.path(), Duration::from_secs(10)))
            .await;

        assert!(result.success);
        assert_eq!(result.output, "final answer");
        assert_eq!(result.exit_code, 0);
        assert_eq!(refresher.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_deltas_accumulate_without_result_event() {
        let dir = tempdir().unwrap();
        let agent = fixture_agent(
            dir.path(),
            r#"echo '{"type":"content_block_delta","delta":{"type":"text_delta","text":"a"}}'
echo '{"type":"content_block_delta","delta":{"type":"text_delta","text":"b"}}'"#,
        );
        let invoker = invoker_for(agent, MockRefresher::new(false));

        let result = invoker
            .invoke("go", &opts(dir.path(), Duration::from_secs(10)))
            .await;

        assert!(result.success);
        assert_eq!(result.output, "ab");
    }

    #[tokio::test]
    async fn test_timeout_reported_distinctly() {
        let dir = tempdir().unwrap();
        let agent = fixture_agent(dir.path(), "sleep 10");
        let invoker = invoker_for(agent, MockRefresher::new(false));

        let result = invoker
            .invoke("go", &opts(dir.path(), Duration::from_millis(200)))
            .await;

        assert!(!result.success);
        assert!(matches!(result.error, Some(InvokeError::Timeout { .. })));
        // Partial output is discarded on timeout
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let dir = tempdir().unwrap();
        let agent = fixture_agent(dir.path(), "echo 'disk full' >&2\nexit 3");
        let invoker = invoker_for(agent, MockRefresher::new(false));

        let result = invoker
            .invoke("go", &opts(dir.path(), Duration::from_secs(10)))
            .await;

        assert!(!result.success);
        match result.error {
            Some(InvokeError::Subprocess { exit_code, stderr }) => {
                assert_eq!(exit_code, 3);
                assert!(stderr.contains("disk full"));
            }
            other => panic!("Expected Subprocess error, got {other:?}"),
        }
    }

    // =========================================
    // Expired-credential recovery
    // =========================================

    #[tokio::test]
    async fn test_expired_token_refreshes_and_retries_once() {
        let dir = tempdir().unwrap();
        // Fails with the expiry signature on the first run, succeeds after
        let marker = dir.path().join("ran-once");
        let agent = fixture_agent(
            dir.path(),
            &format!(
                r#"if [ ! -f {marker} ]; then
  touch {marker}
  echo '{EXPIRED_LINE}'
  exit 1
fi
echo '{{"type":"result","result":"recovered"}}'"#,
                marker = marker.display(),
            ),
        );
        let refresher = MockRefresher::new(false);
        let invoker = invoker_for(agent, refresher.clone());

        let result = invoker
            .invoke("go", &opts(dir.path(), Duration::from_secs(10)))
            .await;

        assert!(result.success);
        assert_eq!(result.output, "recovered");
        assert_eq!(refresher.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_twice_is_definitive_auth_failure() {
        let dir = tempdir().unwrap();
        let agent = fixture_agent(dir.path(), &format!("echo '{EXPIRED_LINE}'\nexit 1"));
        let refresher = MockRefresher::new(false);
        let invoker = invoker_for(agent, refresher.clone());

        let result = invoker
            .invoke("go", &opts(dir.path(), Duration::from_secs(10)))
            .await;

        assert!(!result.success);
        assert!(matches!(result.error, Some(InvokeError::AuthExpired(_))));
        // Exactly one refresh, exactly one retry, no loop
        assert_eq!(refresher.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_surfaces_without_retry() {
        let dir = tempdir().unwrap();
        let agent = fixture_agent(dir.path(), &format!("echo '{EXPIRED_LINE}'\nexit 1"));
        let refresher = MockRefresher::new(true);
        let invoker = invoker_for(agent, refresher.clone());

        let result = invoker
            .invoke("go", &opts(dir.path(), Duration::from_secs(10)))
            .await;

        assert!(!result.success);
        assert!(matches!(
            result.error,
            Some(InvokeError::RefreshFailed { status: 400, .. })
        ));
        assert_eq!(refresher.refresh_count(), 1);
    }

    // =========================================
    // Signature detection
    // =========================================

    #[test]
    fn test_expiry_signature_requires_marker_and_phrase() {
        assert!(looks_like_expired_credentials(EXPIRED_LINE));
        assert!(looks_like_expired_credentials(
            "authentication_error: credentials have expired"
        ));
        // Marker without expiry phrase
        assert!(!looks_like_expired_credentials(
            "authentication_error: bad api key"
        ));
        // Expiry phrase without marker
        assert!(!looks_like_expired_credentials("your trial has expired"));
        assert!(!looks_like_expired_credentials("all good"));
    }

    #[test]
    fn test_truncate_diag_respects_char_boundaries() {
        let s = "héllo wörld";
        let t = truncate_diag(s, 3);
        assert!(t.starts_with("h"));
        assert!(t.ends_with("..."));
        assert_eq!(truncate_diag("short", 100), "short");
    }

    #[test]
    fn test_default_config_uses_stream_json() {
        let config = AgentConfig::default();
        assert_eq!(config.agent_cmd, "claude");
        assert!(config.agent_args.contains(&"stream-json".to_string()));
    }
}
