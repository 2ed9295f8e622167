//! Local command execution using `tokio::process`

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Instant;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::config::{DEFAULT_SHELL, LocalConfig};
use crate::error::ExecError;
use crate::io::capture_or_pump;
use crate::result::CommandResult;
use crate::traits::{Runner, join_command, shell_line};

/// Local command executor
///
/// Executes commands as children of the current process using
/// `tokio::process::Command`.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    config: LocalConfig,
}

impl LocalExecutor {
    /// Create a new local executor
    ///
    /// An empty shell falls back to `/bin/sh`.
    #[must_use]
    pub fn new(mut config: LocalConfig) -> Self {
        if config.shell.is_empty() {
            config.shell = DEFAULT_SHELL.to_string();
        }
        Self { config }
    }

    /// Configuration this executor was built with
    #[must_use]
    pub fn config(&self) -> &LocalConfig {
        &self.config
    }

    fn command(&self, program: &str, args: &[&str]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args);

        if let Some(env) = &self.config.env {
            cmd.env_clear();
            for entry in env {
                if let Some((key, value)) = entry.split_once('=') {
                    cmd.env(key, value);
                } else {
                    warn!(entry = %entry, "ignoring environment entry without '='");
                }
            }
        }

        if let Some(dir) = &self.config.dir {
            cmd.current_dir(dir);
        }

        let stdin = if self.config.stdio.stdin.is_some() {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        };

        cmd.stdin(stdin)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Spawn, feed, drain, wait
    #[instrument(skip(self, args), level = "debug")]
    async fn execute(&self, program: &str, args: &[&str]) -> Result<CommandResult, ExecError> {
        let start = Instant::now();
        let stdio = &self.config.stdio;

        debug!(command = %join_command(program, args), "executing local command");

        let mut child = self
            .command(program, args)
            .spawn()
            .map_err(|e| ExecError::SpawnError(format!("{program}: {e}")))?;

        let stdin_pipe = child.stdin.take();
        let stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::IoError("stdout pipe not available".to_string()))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::IoError("stderr pipe not available".to_string()))?;

        let feed = async {
            match (stdin_pipe, &stdio.stdin) {
                (Some(pipe), Some(source)) => source.feed(pipe).await.map(|_| ()),
                _ => Ok(()),
            }
        };

        // Both pipes are drained concurrently; draining one at a time can
        // deadlock once the other fills its pipe buffer.
        let ((), stdout, stderr) = tokio::try_join!(
            feed,
            capture_or_pump(stdout_pipe, stdio.stdout.as_ref()),
            capture_or_pump(stderr_pipe, stdio.stderr.as_ref()),
        )?;

        let exit = child.wait().await?;
        let duration = start.elapsed();
        let status = decode_status(exit)?;

        debug!(
            program = %program,
            status = status,
            duration = ?duration,
            "command completed"
        );

        Ok(CommandResult {
            status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            duration,
        })
    }
}

/// Exit code of a normally terminated process
fn decode_status(exit: ExitStatus) -> Result<i32, ExecError> {
    if let Some(code) = exit.code() {
        return Ok(code);
    }

    let signal = match exit.signal() {
        Some(raw) => Signal::try_from(raw)
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|_| raw.to_string()),
        None => "unknown".to_string(),
    };
    Err(ExecError::Signaled { signal })
}

#[async_trait]
impl Runner for LocalExecutor {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandResult, ExecError> {
        self.execute(program, args).await
    }

    fn format_run(&self, program: &str, args: &[&str]) -> String {
        join_command(program, args)
    }

    async fn shell(&self, command_line: &str) -> Result<CommandResult, ExecError> {
        self.execute(&self.config.shell, &["-c", command_line]).await
    }

    fn format_shell(&self, command_line: &str) -> String {
        shell_line(&self.config.shell, command_line)
    }

    fn executor_type(&self) -> &'static str {
        "local"
    }
}
