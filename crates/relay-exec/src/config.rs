//! Executor configuration types and loading

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ExecError;
use crate::io::Stdio;

/// Shell used by `shell()` when none is configured
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default SSH host
pub const DEFAULT_SSH_HOST: &str = "localhost";

/// File name of the default private key under `~/.ssh`
pub const DEFAULT_KEY_FILE_NAME: &str = "id_rsa";

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

fn default_host() -> String {
    DEFAULT_SSH_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// Configuration for [`LocalExecutor`](crate::local::LocalExecutor)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Shell used by `shell()`
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Environment as `KEY=VALUE` entries
    ///
    /// `None` inherits the caller's environment. `Some` replaces it entirely;
    /// when a key repeats, the last entry wins.
    #[serde(default)]
    pub env: Option<Vec<String>>,
    /// Working directory; `None` inherits the caller's
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Stream redirections
    #[serde(skip)]
    pub stdio: Stdio,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            env: None,
            dir: None,
            stdio: Stdio::default(),
        }
    }
}

impl LocalConfig {
    /// Set the shell used by `shell()`
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Replace the child environment
    #[must_use]
    pub fn with_env<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env = Some(env.into_iter().map(Into::into).collect());
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Set stream redirections
    #[must_use]
    pub fn with_stdio(mut self, stdio: Stdio) -> Self {
        self.stdio = stdio;
        self
    }
}

/// Credentials used to reach a remote host
///
/// `password` and `key_path` are alternatives: a password takes priority.
/// Fields left unset are filled in by
/// [`SshExecutor::new`](crate::ssh::SshExecutor::new).
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    /// Host name or address
    #[serde(default = "default_host")]
    pub host: String,
    /// Port (default 22)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Account name; defaults to the current OS user
    #[serde(default)]
    pub user: Option<String>,
    /// Password
    #[serde(default)]
    pub password: Option<String>,
    /// Private key file
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_path", &self.key_path)
            .finish()
    }
}

impl Credentials {
    /// Credentials for `host` with every other field defaulted
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            ..Self::default()
        }
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set account name
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Authenticate with a password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Authenticate with a private key file
    #[must_use]
    pub fn with_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }
}

/// How the server's host key is verified
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Require a matching entry in `~/.ssh/known_hosts`
    #[default]
    KnownHosts,
    /// Require a matching entry in the given known_hosts file
    KnownHostsFile(PathBuf),
    /// Accept any host key (like `StrictHostKeyChecking=no`)
    AcceptAny,
}

/// Configuration for [`SshExecutor`](crate::ssh::SshExecutor)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Shell on the remote host used by `shell()`
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Authentication and target
    #[serde(default = "default_credentials")]
    pub credentials: Credentials,
    /// Host key verification
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    /// Stream redirections
    #[serde(skip)]
    pub stdio: Stdio,
}

fn default_credentials() -> Credentials {
    Credentials::new(DEFAULT_SSH_HOST)
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            credentials: default_credentials(),
            host_key_policy: HostKeyPolicy::default(),
            stdio: Stdio::default(),
        }
    }
}

impl RemoteConfig {
    /// Configuration targeting `credentials`
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            ..Self::default()
        }
    }

    /// Set the remote shell used by `shell()`
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Set host key verification
    #[must_use]
    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    /// Set stream redirections
    #[must_use]
    pub fn with_stdio(mut self, stdio: Stdio) -> Self {
        self.stdio = stdio;
        self
    }
}

/// Tagged configuration selecting one executor
///
/// ```toml
/// kind = "ssh"
/// shell = "/bin/bash"
///
/// [credentials]
/// host = "build01"
/// user = "deploy"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExecutorConfig {
    /// Run on this machine
    Local(LocalConfig),
    /// Run over SSH
    Ssh(RemoteConfig),
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::Local(LocalConfig::default())
    }
}

impl ExecutorConfig {
    /// Parse configuration from a TOML string
    ///
    /// # Errors
    /// Returns `ExecError::ConfigError` if the document is not valid
    pub fn from_toml(content: &str) -> Result<Self, ExecError> {
        toml::from_str(content).map_err(|e| ExecError::ConfigError(e.to_string()))
    }

    /// Load configuration from file
    ///
    /// # Errors
    /// Returns `ExecError::ConfigError` if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ExecError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ExecError::ConfigError(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Replace the stream redirections of whichever executor is selected
    #[must_use]
    pub fn with_stdio(self, stdio: Stdio) -> Self {
        match self {
            Self::Local(config) => Self::Local(config.with_stdio(stdio)),
            Self::Ssh(config) => Self::Ssh(config.with_stdio(stdio)),
        }
    }
}
