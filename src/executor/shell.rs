//! Process execution
//!
//! [`ProcessRunner`] is the production [`CommandRunner`]: it spawns the
//! program directly (no implicit shell), captures stdout and stderr into
//! bounded buffers, and owns every deadline. A command that outlives its
//! timeout, or whose run is cancelled, is killed and reaped before `run`
//! returns.
//!
//! ## Run Variables
//!
//! Every stage sees the following variables, both as `${VAR}` placeholders
//! and in its processes' environment:
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `WORKSPACE` | Workspace directory |
//! | `BUILD_NUMBER` | Current build number |
//! | `BUILD_ID` | Run id (UUID) |
//! | `JOB_NAME` | Name of the pipeline |
//! | `STAGE_NAME` | Name of the current stage |

use super::cancel::CancellationToken;
use super::traits::{CommandRunner, Invocation, RunOutput, RunnerFault};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Process runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Working directory used when an invocation does not set one
    pub cwd: Option<PathBuf>,

    /// Bytes kept per output stream; the rest is read and discarded
    pub max_output_bytes: usize,

    /// How long to keep draining output after the process is gone
    pub drain_grace: Duration,

    /// Inherited variables starting with any of these prefixes are removed
    /// from every child environment
    pub scrub_env_prefixes: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cwd: None,
            max_output_bytes: 1024 * 1024,
            drain_grace: Duration::from_millis(500),
            scrub_env_prefixes: Vec::new(),
        }
    }
}

/// Runs commands as local child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    config: RunnerConfig,
}

impl ProcessRunner {
    /// Creates a runner with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a runner with the given settings
    #[must_use]
    pub fn with_config(config: RunnerConfig) -> Self {
        Self { config }
    }

    fn scrub_inherited_env(&self, cmd: &mut Command) {
        let prefixes: Vec<&str> = self
            .config
            .scrub_env_prefixes
            .iter()
            .map(String::as_str)
            .filter(|p| !p.is_empty())
            .collect();
        if prefixes.is_empty() {
            return;
        }
        for (key, _) in std::env::vars_os() {
            if let Some(name) = key.to_str()
                && prefixes.iter().any(|p| name.starts_with(p))
            {
                cmd.env_remove(&key);
            }
        }
    }
}

enum Ending {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<RunOutput, RunnerFault> {
        let start = Instant::now();
        let supervise = |source| RunnerFault::Supervise {
            program: invocation.program.clone(),
            source,
        };

        let mut cmd = Command::new(&invocation.program);
        self.scrub_inherited_env(&mut cmd);
        cmd.args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = invocation.cwd.as_ref().or(self.config.cwd.as_ref()) {
            cmd.current_dir(cwd);
        }

        tracing::debug!(
            program = %invocation.program,
            args = invocation.args.len(),
            timeout_ms = invocation.timeout.as_millis(),
            "Spawning command"
        );

        let mut child = cmd.spawn().map_err(|source| RunnerFault::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        let stdout = OutputBuffer::new(self.config.max_output_bytes);
        let stderr = OutputBuffer::new(self.config.max_output_bytes);
        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(stdout.clone().drain(pipe)));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(stderr.clone().drain(pipe)));

        let ending = tokio::select! {
            status = child.wait() => Ending::Exited(status),
            () = tokio::time::sleep(invocation.timeout) => Ending::TimedOut,
            () = cancel.cancelled() => Ending::Cancelled,
        };

        let (status, timed_out, cancelled) = match ending {
            Ending::Exited(status) => (status.map_err(supervise)?, false, false),
            Ending::TimedOut => {
                tracing::warn!(
                    program = %invocation.program,
                    timeout_ms = invocation.timeout.as_millis(),
                    "Command timed out, terminating"
                );
                (terminate(&mut child).await.map_err(supervise)?, true, false)
            }
            Ending::Cancelled => {
                tracing::warn!(program = %invocation.program, "Run cancelled, terminating command");
                (terminate(&mut child).await.map_err(supervise)?, false, true)
            }
        };

        settle(stdout_task, self.config.drain_grace).await;
        settle(stderr_task, self.config.drain_grace).await;

        let output = RunOutput {
            exit_code: exit_code(status),
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            timed_out,
            cancelled,
            duration: start.elapsed(),
        };

        tracing::debug!(
            program = %invocation.program,
            exit_code = output.exit_code,
            duration_ms = output.duration.as_millis(),
            "Command finished"
        );

        Ok(output)
    }
}

async fn terminate(child: &mut Child) -> std::io::Result<ExitStatus> {
    if let Err(err) = child.start_kill() {
        tracing::debug!(error = %err, "Kill signal not delivered");
    }
    child.wait().await
}

/// Waits for an output drain, abandoning it after `grace`
///
/// A grandchild that inherited the pipe can keep it open after the
/// process itself is gone.
async fn settle(task: Option<JoinHandle<()>>, grace: Duration) {
    if let Some(mut task) = task
        && tokio::time::timeout(grace, &mut task).await.is_err()
    {
        task.abort();
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[derive(Debug, Clone)]
struct OutputBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
    limit: usize,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(Vec::new())),
            limit,
        }
    }

    async fn drain<R: AsyncRead + Unpin>(self, mut pipe: R) {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut bytes = self.bytes.lock();
                    let room = self.limit.saturating_sub(bytes.len());
                    bytes.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }
}

/// Builds the variables every stage of a run can see
#[must_use]
pub fn run_variables(
    workspace: &Path,
    job_name: &str,
    build_number: u64,
    build_id: &str,
) -> HashMap<String, String> {
    HashMap::from([
        (
            "WORKSPACE".to_string(),
            workspace.to_string_lossy().to_string(),
        ),
        ("BUILD_NUMBER".to_string(), build_number.to_string()),
        ("BUILD_ID".to_string(), build_id.to_string()),
        ("JOB_NAME".to_string(), job_name.to_string()),
    ])
}
