//! relay CLI
//!
//! Runs one command locally or over SSH and reports its output and status

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use relay_exec::{
    Credentials, Executor, ExecutorConfig, HostKeyPolicy, LocalConfig, RemoteConfig, Runner,
    Source, Stdio,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "Run a command locally or over SSH", long_about = None)]
struct Cli {
    /// Executor configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    target: TargetArgs,

    /// Shell used by the `shell` subcommand
    #[arg(long, global = true)]
    shell: Option<String>,

    /// Forward this process's stdin to the command
    #[arg(long, global = true)]
    stdin: bool,

    /// Print the command that would run and exit
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print the result as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// SSH target; any of these selects the SSH executor
#[derive(Args, Debug, Default)]
struct TargetArgs {
    /// Remote host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Remote port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Remote account
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Password for the remote account
    #[arg(long, global = true, env = "RELAY_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Private key file
    #[arg(short, long, global = true)]
    key: Option<PathBuf>,

    /// Accept any host key
    #[arg(long, global = true)]
    insecure: bool,
}

impl TargetArgs {
    fn is_remote(&self) -> bool {
        self.host.is_some()
            || self.port.is_some()
            || self.user.is_some()
            || self.password.is_some()
            || self.key.is_some()
            || self.insecure
    }

    fn apply(&self, credentials: &mut Credentials) {
        if let Some(host) = &self.host {
            credentials.host.clone_from(host);
        }
        if let Some(port) = self.port {
            credentials.port = port;
        }
        if let Some(user) = &self.user {
            credentials.user = Some(user.clone());
        }
        if let Some(password) = &self.password {
            credentials.password = Some(password.clone());
        }
        if let Some(key) = &self.key {
            credentials.key_path = Some(key.clone());
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a program directly, without a shell
    Run {
        /// Program to execute
        program: String,
        /// Arguments passed verbatim
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run a command line through the shell
    Shell {
        /// Command line passed to `<shell> -c`
        command_line: String,
    },
}

fn build_config(cli: &Cli) -> Result<ExecutorConfig> {
    let mut config = match &cli.config {
        Some(path) => ExecutorConfig::load(path)?,
        None if cli.target.is_remote() => ExecutorConfig::Ssh(RemoteConfig::default()),
        None => ExecutorConfig::Local(LocalConfig::default()),
    };

    match &mut config {
        ExecutorConfig::Local(local) => {
            if let Some(shell) = &cli.shell {
                local.shell.clone_from(shell);
            }
            if cli.target.is_remote() {
                eyre::bail!("SSH options given but the configuration selects a local executor");
            }
        }
        ExecutorConfig::Ssh(remote) => {
            if let Some(shell) = &cli.shell {
                remote.shell.clone_from(shell);
            }
            cli.target.apply(&mut remote.credentials);
            if cli.target.insecure {
                remote.host_key_policy = HostKeyPolicy::AcceptAny;
            }
        }
    }

    if cli.stdin {
        config = config.with_stdio(Stdio::default().with_stdin(Source::new(tokio::io::stdin())));
    }

    Ok(config)
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let executor = Executor::from_config(build_config(&cli)?)?;
    tracing::debug!(executor = executor.executor_type(), "executor ready");

    let result = match &cli.command {
        Commands::Run { program, args } => {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            if cli.dry_run {
                println!("{}", executor.format_run(program, &args));
                return Ok(());
            }
            executor.run(program, &args).await?
        }
        Commands::Shell { command_line } => {
            if cli.dry_run {
                println!("{}", executor.format_shell(command_line));
                return Ok(());
            }
            executor.shell(command_line).await?
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
    }

    std::process::exit(result.status);
}
