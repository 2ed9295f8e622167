//! Closed set of executors behind one `Runner`

use async_trait::async_trait;

use crate::config::ExecutorConfig;
use crate::error::ExecError;
use crate::local::LocalExecutor;
use crate::result::CommandResult;
use crate::ssh::SshExecutor;
use crate::traits::Runner;

/// Either a local or an SSH executor
#[derive(Debug)]
pub enum Executor {
    /// Runs on this machine
    Local(LocalExecutor),
    /// Runs over SSH
    Ssh(SshExecutor),
}

impl Executor {
    /// Build the executor selected by `config`
    ///
    /// # Errors
    /// Returns `ExecError::ConfigError` if SSH defaults cannot be resolved
    pub fn from_config(config: ExecutorConfig) -> Result<Self, ExecError> {
        match config {
            ExecutorConfig::Local(local) => Ok(Self::Local(LocalExecutor::new(local))),
            ExecutorConfig::Ssh(remote) => SshExecutor::new(remote).map(Self::Ssh),
        }
    }

    fn runner(&self) -> &dyn Runner {
        match self {
            Self::Local(local) => local,
            Self::Ssh(ssh) => ssh,
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::Local(LocalExecutor::default())
    }
}

impl From<LocalExecutor> for Executor {
    fn from(executor: LocalExecutor) -> Self {
        Self::Local(executor)
    }
}

impl From<SshExecutor> for Executor {
    fn from(executor: SshExecutor) -> Self {
        Self::Ssh(executor)
    }
}

#[async_trait]
impl Runner for Executor {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandResult, ExecError> {
        self.runner().run(program, args).await
    }

    fn format_run(&self, program: &str, args: &[&str]) -> String {
        self.runner().format_run(program, args)
    }

    async fn shell(&self, command_line: &str) -> Result<CommandResult, ExecError> {
        self.runner().shell(command_line).await
    }

    fn format_shell(&self, command_line: &str) -> String {
        self.runner().format_shell(command_line)
    }

    fn executor_type(&self) -> &'static str {
        self.runner().executor_type()
    }
}
