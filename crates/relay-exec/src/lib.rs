//! relay-exec: Local and remote command execution
//!
//! Runs commands on this machine or over SSH behind one [`Runner`] trait and
//! captures stdout, stderr and the exit status.
//!
//! ```no_run
//! use relay_exec::{LocalExecutor, Runner};
//!
//! # async fn demo() -> Result<(), relay_exec::ExecError> {
//! let local = LocalExecutor::default();
//! let result = local.shell("ls /etc | wc -l").await?;
//! println!("{} ({})", result.stdout.trim(), result.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod io;
pub mod keys;
pub mod local;
pub mod result;
pub mod ssh;
pub mod standard;
pub mod traits;

pub use config::{Credentials, ExecutorConfig, HostKeyPolicy, LocalConfig, RemoteConfig};
pub use error::ExecError;
pub use executor::Executor;
pub use io::{SharedBuffer, Sink, Source, Stdio};
pub use local::LocalExecutor;
pub use result::CommandResult;
pub use ssh::SshExecutor;
pub use traits::Runner;
