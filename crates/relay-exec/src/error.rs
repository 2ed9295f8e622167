//! Error types for relay-exec

use thiserror::Error;

/// Errors that prevent a command from running or from reporting its status
///
/// A command that runs and exits nonzero is not an error; see
/// [`CommandResult::status`](crate::result::CommandResult::status).
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Failed to start a local process
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// Failed to connect to remote host
    #[error("connection to {user}@{host} failed: {reason}")]
    ConnectionFailed {
        /// Account used for the connection
        user: String,
        /// Remote host
        host: String,
        /// Underlying cause
        reason: String,
    },

    /// Authentication failed
    #[error("authentication of {user}@{host} failed: {reason}")]
    AuthenticationFailed {
        /// Account used for the connection
        user: String,
        /// Remote host
        host: String,
        /// Underlying cause
        reason: String,
    },

    /// Private key could not be read or parsed
    #[error("could not use private key file '{path}': {reason}")]
    SshKeyError {
        /// Key file path
        path: String,
        /// Underlying cause
        reason: String,
    },

    /// SSH agent could not be reached or queried
    #[error("SSH agent error: {0}")]
    AgentError(String),

    /// Session channel could not be opened or the command could not be submitted
    #[error("session error: {0}")]
    SessionError(String),

    /// I/O error while feeding or draining streams
    #[error("I/O error: {0}")]
    IoError(String),

    /// Command was terminated by a signal
    #[error("command terminated by signal {signal}")]
    Signaled {
        /// Signal name or number
        signal: String,
    },

    /// Remote channel closed without reporting an exit status
    #[error("remote command finished without an exit status")]
    MissingExitStatus,

    /// Invalid or unresolvable configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl ExecError {
    /// Check if error happened while reaching the remote host
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed { .. } | ExecError::AuthenticationFailed { .. }
        )
    }
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::IoError(e.to_string())
    }
}
