//! SSH command execution using russh crate
//!
//! Every call opens its own connection and session, runs one command and
//! disconnects. Nothing is kept between calls.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use russh::keys::agent::client::AgentClient;
use russh::keys::{PrivateKeyWithHashAlg, check_known_hosts_path, ssh_key};
use russh::{Channel, ChannelMsg, Disconnect, client};
use tracing::{debug, info, instrument, warn};

use crate::config::{
    Credentials, DEFAULT_SHELL, DEFAULT_SSH_HOST, DEFAULT_SSH_PORT, HostKeyPolicy, RemoteConfig,
};
use crate::error::ExecError;
use crate::io::{Sink, Stdio};
use crate::keys::{AuthMethod, current_username, default_key_path};
use crate::result::CommandResult;
use crate::traits::{Runner, join_command, shell_line};

/// SSH extended data type carrying stderr
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl SshClientHandler {
    fn known_hosts_file(&self) -> Option<PathBuf> {
        match &self.policy {
            HostKeyPolicy::KnownHostsFile(path) => Some(path.clone()),
            HostKeyPolicy::KnownHosts => {
                dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
            }
            HostKeyPolicy::AcceptAny => None,
        }
    }
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        if self.policy == HostKeyPolicy::AcceptAny {
            return Ok(true);
        }

        let Some(path) = self.known_hosts_file() else {
            warn!(host = %self.host, "no home directory, cannot verify host key");
            return Ok(false);
        };

        match check_known_hosts_path(&self.host, self.port, server_public_key, &path) {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!(host = %self.host, file = %path.display(), "host key not found in known_hosts");
                Ok(false)
            }
            Err(e) => {
                warn!(host = %self.host, error = %e, "host key verification failed");
                Ok(false)
            }
        }
    }
}

/// SSH command executor
pub struct SshExecutor {
    /// Shell on the remote host
    shell: String,
    /// Target and authentication material, with defaults filled in
    credentials: Credentials,
    /// Resolved account name
    user: String,
    host_key_policy: HostKeyPolicy,
    stdio: Stdio,
}

impl std::fmt::Debug for SshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutor")
            .field("shell", &self.shell)
            .field("credentials", &self.credentials)
            .field("host_key_policy", &self.host_key_policy)
            .finish_non_exhaustive()
    }
}

impl SshExecutor {
    /// Create a new SSH executor
    ///
    /// Fills in defaults: host `localhost`, port 22, the current OS user, and
    /// `~/.ssh/id_rsa` of that user when neither password nor key is given.
    ///
    /// # Errors
    /// Returns `ExecError::ConfigError` if the user or their home directory
    /// cannot be resolved
    pub fn new(config: RemoteConfig) -> Result<Self, ExecError> {
        let RemoteConfig {
            mut shell,
            mut credentials,
            host_key_policy,
            stdio,
        } = config;

        if shell.is_empty() {
            shell = DEFAULT_SHELL.to_string();
        }

        if credentials.host.is_empty() {
            credentials.host = DEFAULT_SSH_HOST.to_string();
        }
        if credentials.port == 0 {
            credentials.port = DEFAULT_SSH_PORT;
        }

        let user = match credentials.user.as_deref().filter(|u| !u.is_empty()) {
            Some(user) => user.to_string(),
            None => current_username()?,
        };
        credentials.user = Some(user.clone());

        let has_password = credentials.password.as_deref().is_some_and(|p| !p.is_empty());
        if !has_password && credentials.key_path.is_none() {
            credentials.key_path = Some(default_key_path(&user)?);
        }

        Ok(Self {
            shell,
            credentials,
            user,
            host_key_policy,
            stdio,
        })
    }

    /// Resolved credentials
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Account used on the remote host
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Remote host
    pub fn host(&self) -> &str {
        &self.credentials.host
    }

    fn connection_failed(&self, reason: impl ToString) -> ExecError {
        ExecError::ConnectionFailed {
            user: self.user.clone(),
            host: self.credentials.host.clone(),
            reason: reason.to_string(),
        }
    }

    fn authentication_failed(&self, reason: impl ToString) -> ExecError {
        ExecError::AuthenticationFailed {
            user: self.user.clone(),
            host: self.credentials.host.clone(),
            reason: reason.to_string(),
        }
    }

    /// Open the transport connection
    async fn connect(&self) -> Result<client::Handle<SshClientHandler>, ExecError> {
        info!(
            host = %self.credentials.host,
            port = self.credentials.port,
            user = %self.user,
            "connecting to SSH"
        );

        let config = Arc::new(client::Config::default());
        let handler = SshClientHandler {
            host: self.credentials.host.clone(),
            port: self.credentials.port,
            policy: self.host_key_policy.clone(),
        };

        client::connect(
            config,
            (&self.credentials.host[..], self.credentials.port),
            handler,
        )
        .await
        .map_err(|e| self.connection_failed(e))
    }

    async fn authenticate(
        &self,
        session: &mut client::Handle<SshClientHandler>,
        auth: &AuthMethod,
    ) -> Result<(), ExecError> {
        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();

        let accepted = match auth {
            AuthMethod::Password(password) => session
                .authenticate_password(&self.user, password)
                .await
                .map_err(|e| self.authentication_failed(e))?
                .success(),
            AuthMethod::Key(key) => session
                .authenticate_publickey(
                    &self.user,
                    PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg),
                )
                .await
                .map_err(|e| self.authentication_failed(e))?
                .success(),
            AuthMethod::Agent(sock) => {
                let mut agent = AgentClient::connect_uds(sock)
                    .await
                    .map_err(|e| ExecError::AgentError(format!("{}: {e}", sock.display())))?;
                let identities = agent
                    .request_identities()
                    .await
                    .map_err(|e| ExecError::AgentError(e.to_string()))?;

                let mut accepted = false;
                for key in identities {
                    let result = session
                        .authenticate_publickey_with(&self.user, key, hash_alg, &mut agent)
                        .await
                        .map_err(|e| self.authentication_failed(e))?;
                    if result.success() {
                        accepted = true;
                        break;
                    }
                }
                accepted
            }
        };

        if accepted {
            info!(host = %self.credentials.host, "SSH connected and authenticated");
            Ok(())
        } else {
            Err(self.authentication_failed("no authentication method was accepted"))
        }
    }

    /// Authenticate, open a session and run `command_line`
    async fn run_session(
        &self,
        session: &mut client::Handle<SshClientHandler>,
        auth: &AuthMethod,
        command_line: &str,
    ) -> Result<CommandResult, ExecError> {
        self.authenticate(session, auth).await?;

        let start = Instant::now();

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::SessionError(e.to_string()))?;

        channel
            .exec(true, command_line)
            .await
            .map_err(|e| ExecError::SessionError(e.to_string()))?;

        // Without a source the command sees end-of-input right away.
        let input = match &self.stdio.stdin {
            Some(source) => Some((source, channel.make_writer())),
            None => {
                channel
                    .eof()
                    .await
                    .map_err(|e| ExecError::SessionError(e.to_string()))?;
                None
            }
        };
        let feed = async move {
            match input {
                Some((source, writer)) => source
                    .feed(Box::pin(writer))
                    .await
                    .map(|_| ())
                    .map_err(ExecError::from),
                None => Ok(()),
            }
        };
        tokio::pin!(feed);
        let drain = pump(&mut channel, &self.stdio);
        tokio::pin!(drain);

        // Once the channel closes, input the command never read is dropped:
        // a writer still waiting for window space would otherwise wait forever.
        let output = tokio::select! {
            drained = &mut drain => drained?,
            fed = &mut feed => {
                fed?;
                drain.await?
            }
        };

        let duration = start.elapsed();
        let status = output.decode()?;

        debug!(
            command = %command_line,
            status = status,
            duration = ?duration,
            "remote command completed"
        );

        Ok(CommandResult {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration,
        })
    }

    /// Execute command line on remote host over a fresh connection
    #[instrument(skip(self), fields(host = %self.credentials.host))]
    async fn execute_remote(&self, command_line: &str) -> Result<CommandResult, ExecError> {
        debug!(command = %command_line, "executing remote command");

        let auth = AuthMethod::select(
            self.credentials.password.as_deref(),
            self.credentials.key_path.as_deref(),
        )?;

        let mut session = self.connect().await?;
        let result = self.run_session(&mut session, &auth, command_line).await;

        if let Err(e) = session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!(error = %e, "SSH disconnect failed");
        }
        debug!(host = %self.credentials.host, "SSH disconnected");

        result
    }
}

/// Everything a session reported before closing
#[derive(Debug, Default)]
struct SessionOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
    exit_signal: Option<String>,
}

impl SessionOutput {
    fn decode(&self) -> Result<i32, ExecError> {
        if let Some(signal) = &self.exit_signal {
            return Err(ExecError::Signaled {
                signal: signal.clone(),
            });
        }
        self.exit_status
            .map(u32::cast_signed)
            .ok_or(ExecError::MissingExitStatus)
    }
}

async fn deliver(chunk: &[u8], sink: Option<&Sink>, buf: &mut Vec<u8>) -> Result<(), ExecError> {
    match sink {
        Some(sink) => sink.write(chunk).await.map_err(ExecError::from),
        None => {
            buf.extend_from_slice(chunk);
            Ok(())
        }
    }
}

/// Drain channel messages until the channel closes
///
/// Stdout and stderr share one ordered message stream, so a single loop
/// drains both without risk of one blocking the other.
async fn pump(
    channel: &mut Channel<client::Msg>,
    stdio: &Stdio,
) -> Result<SessionOutput, ExecError> {
    let mut output = SessionOutput::default();

    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => {
                deliver(&data, stdio.stdout.as_ref(), &mut output.stdout).await?;
            }
            Some(ChannelMsg::ExtendedData { data, ext }) if ext == SSH_EXTENDED_DATA_STDERR => {
                deliver(&data, stdio.stderr.as_ref(), &mut output.stderr).await?;
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                output.exit_status = Some(exit_status);
            }
            Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                output.exit_signal = Some(format!("{signal_name:?}"));
            }
            Some(ChannelMsg::Failure) => {
                return Err(ExecError::SessionError(
                    "remote host refused to execute the command".to_string(),
                ));
            }
            Some(ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }

    for sink in [stdio.stdout.as_ref(), stdio.stderr.as_ref()].into_iter().flatten() {
        sink.flush().await?;
    }

    Ok(output)
}

#[async_trait]
impl Runner for SshExecutor {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandResult, ExecError> {
        self.execute_remote(&join_command(program, args)).await
    }

    fn format_run(&self, program: &str, args: &[&str]) -> String {
        format!(
            "ssh {}@{} {}",
            self.user,
            self.credentials.host,
            join_command(program, args)
        )
        .trim()
        .to_string()
    }

    async fn shell(&self, command_line: &str) -> Result<CommandResult, ExecError> {
        self.execute_remote(&shell_line(&self.shell, command_line))
            .await
    }

    fn format_shell(&self, command_line: &str) -> String {
        format!(
            "ssh {}@{} {}",
            self.user,
            self.credentials.host,
            shell_line(&self.shell, command_line)
        )
        .trim()
        .to_string()
    }

    fn executor_type(&self) -> &'static str {
        "ssh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password_executor(host: &str, port: u16) -> SshExecutor {
        let credentials = Credentials::new(host)
            .with_port(port)
            .with_user("nobody-in-particular")
            .with_password("wrong");
        SshExecutor::new(RemoteConfig::new(credentials)).unwrap()
    }

    #[test]
    fn test_defaults_filled_in() {
        let executor = SshExecutor::new(RemoteConfig::default()).unwrap();
        let credentials = executor.credentials();

        assert_eq!(executor.shell, DEFAULT_SHELL);
        assert_eq!(credentials.host, "localhost");
        assert_eq!(credentials.port, 22);
        assert_eq!(executor.user(), current_username().unwrap());
        assert!(
            credentials
                .key_path
                .as_ref()
                .is_some_and(|p| p.ends_with(".ssh/id_rsa"))
        );
        assert_eq!(executor.host_key_policy, HostKeyPolicy::KnownHosts);
    }

    #[test]
    fn test_password_skips_default_key() {
        let executor = password_executor("build01", 2222);

        assert!(executor.credentials().key_path.is_none());
        assert_eq!(executor.credentials().port, 2222);
        assert_eq!(executor.user(), "nobody-in-particular");
        assert_eq!(executor.host(), "build01");
    }

    #[test]
    fn test_empty_fields_take_defaults() {
        let credentials = Credentials::new("")
            .with_port(0)
            .with_user("nobody-in-particular")
            .with_password("wrong");
        let config = RemoteConfig::new(credentials).with_shell("");
        let executor = SshExecutor::new(config).unwrap();

        assert_eq!(executor.host(), "localhost");
        assert_eq!(executor.credentials().port, 22);
        assert_eq!(
            executor.format_shell("true"),
            r#"ssh nobody-in-particular@localhost /bin/sh -c "true""#
        );
    }

    #[test]
    fn test_unknown_user_without_credentials_fails() {
        let credentials = Credentials::new("build01").with_user("no-such-user-xyzzy");
        let err = SshExecutor::new(RemoteConfig::new(credentials)).unwrap_err();

        assert!(matches!(err, ExecError::ConfigError(_)));
    }

    #[test]
    fn test_format() {
        let executor = password_executor("build01", 22);

        assert_eq!(
            executor.format_run("uname", &["-a"]),
            "ssh nobody-in-particular@build01 uname -a"
        );
        assert_eq!(
            executor.format_run("uname", &[]),
            "ssh nobody-in-particular@build01 uname"
        );
        assert_eq!(
            executor.format_shell("uname -a"),
            r#"ssh nobody-in-particular@build01 /bin/sh -c "uname -a""#
        );
        assert_eq!(executor.executor_type(), "ssh");
    }

    #[test]
    fn test_decode_exit_status() {
        let output = SessionOutput {
            exit_status: Some(6),
            ..Default::default()
        };
        assert_eq!(output.decode().unwrap(), 6);

        let missing = SessionOutput::default();
        assert!(matches!(missing.decode(), Err(ExecError::MissingExitStatus)));

        let signaled = SessionOutput {
            exit_status: Some(0),
            exit_signal: Some("KILL".to_string()),
            ..Default::default()
        };
        assert!(matches!(signaled.decode(), Err(ExecError::Signaled { .. })));
    }

    #[tokio::test]
    async fn test_connection_refused_names_user_and_host() {
        // Nothing listens on port 1 of the loopback interface.
        let executor = password_executor("127.0.0.1", 1);
        let err = executor.shell("exit 0").await.unwrap_err();

        assert!(matches!(err, ExecError::ConnectionFailed { .. }));
        let message = err.to_string();
        assert!(message.contains("nobody-in-particular@127.0.0.1"));
    }

    #[tokio::test]
    async fn test_missing_key_file_fails_before_connecting() {
        if std::env::var_os(crate::keys::AGENT_SOCK_ENV).is_some() {
            return;
        }
        let credentials = Credentials::new("127.0.0.1")
            .with_port(1)
            .with_key_path("/nonexistent/id_rsa");
        let executor = SshExecutor::new(RemoteConfig::new(credentials)).unwrap();

        let err = executor.run("true", &[]).await.unwrap_err();

        assert!(matches!(err, ExecError::SshKeyError { ref path, .. } if path == "/nonexistent/id_rsa"));
    }
}
