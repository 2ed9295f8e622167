//! SSH credential defaulting and authentication strategy selection

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::unistd::{Uid, User};
use russh::keys::{PrivateKey, load_secret_key};
use tracing::debug;

use crate::config::DEFAULT_KEY_FILE_NAME;
use crate::error::ExecError;

/// Environment variable naming the SSH agent socket
pub const AGENT_SOCK_ENV: &str = "SSH_AUTH_SOCK";

/// Name of the account running this process
///
/// # Errors
/// Returns `ExecError::ConfigError` if the account cannot be looked up
pub fn current_username() -> Result<String, ExecError> {
    let uid = Uid::current();
    User::from_uid(uid)
        .map_err(|e| ExecError::ConfigError(format!("cannot look up current user: {e}")))?
        .map(|user| user.name)
        .ok_or_else(|| ExecError::ConfigError(format!("no account for uid {uid}")))
}

/// `<home>/.ssh/id_rsa` for `username`
///
/// # Errors
/// Returns `ExecError::ConfigError` if the account does not exist locally
pub fn default_key_path(username: &str) -> Result<PathBuf, ExecError> {
    let user = User::from_name(username)
        .map_err(|e| ExecError::ConfigError(format!("cannot look up user {username}: {e}")))?
        .ok_or_else(|| ExecError::ConfigError(format!("unknown user: {username}")))?;

    Ok(user.dir.join(".ssh").join(DEFAULT_KEY_FILE_NAME))
}

/// Resolved authentication strategy
///
/// Exactly one is chosen per call; there is no fallback between them.
#[derive(Clone)]
pub enum AuthMethod {
    /// Password authentication
    Password(String),
    /// Every identity offered by the agent listening on this socket
    Agent(PathBuf),
    /// A private key loaded from disk
    Key(Arc<PrivateKey>),
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Password(_) => f.write_str("Password(<redacted>)"),
            AuthMethod::Agent(sock) => f.debug_tuple("Agent").field(sock).finish(),
            AuthMethod::Key(_) => f.write_str("Key(<private>)"),
        }
    }
}

impl AuthMethod {
    /// Pick the strategy: password, then agent, then key file
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if the key file cannot be read or parsed
    pub fn select(password: Option<&str>, key_path: Option<&Path>) -> Result<Self, ExecError> {
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            return Ok(AuthMethod::Password(password.to_string()));
        }

        if let Some(sock) = env::var_os(AGENT_SOCK_ENV).filter(|s| !s.is_empty()) {
            debug!(sock = ?sock, "using SSH agent");
            return Ok(AuthMethod::Agent(PathBuf::from(sock)));
        }

        let path = key_path.ok_or_else(|| ExecError::SshKeyError {
            path: String::new(),
            reason: "no private key configured".to_string(),
        })?;
        Self::load_key(path)
    }

    /// Read and parse a private key file
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` naming the file on failure
    pub fn load_key(path: &Path) -> Result<Self, ExecError> {
        debug!(path = %path.display(), "loading private key");

        let key = load_secret_key(path, None).map_err(|e| ExecError::SshKeyError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(AuthMethod::Key(Arc::new(key)))
    }
}
