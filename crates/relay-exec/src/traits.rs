//! Runner trait shared by every executor

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::CommandResult;

/// Runs commands directly or through a shell and captures their output
///
/// `Ok` means the command ran to completion, whatever its exit status;
/// `Err` means it could not be run or its status could not be observed.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run `program` with `args` like `execvp`, without a shell
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandResult, ExecError>;

    /// How [`Runner::run`] would invoke `program`, for logging
    fn format_run(&self, program: &str, args: &[&str]) -> String;

    /// Run `command_line` with `<shell> -c`
    async fn shell(&self, command_line: &str) -> Result<CommandResult, ExecError>;

    /// How [`Runner::shell`] would invoke `command_line`, for logging
    fn format_shell(&self, command_line: &str) -> String;

    /// Executor name for logs
    fn executor_type(&self) -> &'static str;
}

/// `program arg1 arg2`, trimmed
pub(crate) fn join_command(program: &str, args: &[&str]) -> String {
    let mut line = String::from(program);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line.trim().to_string()
}

/// `<shell> -c "<command_line>"`, trimmed
pub(crate) fn shell_line(shell: &str, command_line: &str) -> String {
    format!(r#"{shell} -c "{command_line}""#).trim().to_string()
}
