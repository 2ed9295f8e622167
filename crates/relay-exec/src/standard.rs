//! Process-wide default local executor
//!
//! The standard executor is created on first use with the default
//! [`LocalConfig`](crate::config::LocalConfig) and never changes afterwards.

use std::sync::LazyLock;

use crate::error::ExecError;
use crate::local::LocalExecutor;
use crate::result::CommandResult;
use crate::traits::Runner;

static STANDARD: LazyLock<LocalExecutor> = LazyLock::new(LocalExecutor::default);

/// The standard executor
#[must_use]
pub fn standard() -> &'static LocalExecutor {
    &STANDARD
}

/// [`Runner::run`] on the standard executor
///
/// # Errors
/// Returns `ExecError` if the program cannot be started
pub async fn run(program: &str, args: &[&str]) -> Result<CommandResult, ExecError> {
    standard().run(program, args).await
}

/// [`Runner::format_run`] on the standard executor
#[must_use]
pub fn format_run(program: &str, args: &[&str]) -> String {
    standard().format_run(program, args)
}

/// [`Runner::shell`] on the standard executor
///
/// # Errors
/// Returns `ExecError` if the shell cannot be started
pub async fn shell(command_line: &str) -> Result<CommandResult, ExecError> {
    standard().shell(command_line).await
}

/// [`Runner::format_shell`] on the standard executor
#[must_use]
pub fn format_shell(command_line: &str) -> String {
    standard().format_shell(command_line)
}
