//! Binary entry point for the replication CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

use replication::config::{ConfigError, ConfigSource, OrthoConfigSource, ReplicationConfig};
use replication::logging::init_tracing;
use replication::ssh::{OpenSshSessionFactory, RemoteTarget, SshError, SshHelper};

mod cli;

use cli::{Cli, ExecCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("ssh error: {0}")]
    Ssh(#[from] SshError),
    #[error("remote command terminated without an exit status")]
    MissingExitCode,
    #[error("invalid command argument: {0}")]
    InvalidCommand(String),
    #[error("failed to render configuration: {0}")]
    Render(String),
    #[error("remote command worker failed: {0}")]
    Worker(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Exec(command) => exec_command(command).await,
        Cli::ShowConfig => show_config(),
    }
}

async fn exec_command(args: ExecCommand) -> Result<i32, CliError> {
    validate_command_args(&args.command)?;
    let target = RemoteTarget::parse(&args.target)?;
    let remote_command = render_remote_command(&args.command);
    let config = OrthoConfigSource::default().load()?;

    let mut helper = SshHelper::new(&config, OpenSshSessionFactory::from_config(&config));
    if let Some(secs) = args.timeout {
        helper = helper.with_command_timeout((secs > 0).then_some(Duration::from_secs(secs)));
    }
    let sink = helper.new_error_buffer_stream();
    let worker_sink = Arc::clone(&sink);

    debug!(%target, command = %remote_command, "executing remote command");
    let outcome = tokio::task::spawn_blocking(move || {
        helper.execute_remote_ssh(&target, &remote_command, worker_sink)
    })
    .await
    .map_err(|err| CliError::Worker(err.to_string()))?;

    let output = sink.to_string();
    if !output.is_empty() {
        writeln!(io::stderr(), "{output}").ok();
    }
    outcome?.ok_or(CliError::MissingExitCode)
}

fn show_config() -> Result<i32, CliError> {
    let config = OrthoConfigSource::default().load()?;
    let rendered = render_config(&config)?;
    writeln!(io::stdout(), "{rendered}").ok();
    Ok(0)
}

fn render_config(config: &ReplicationConfig) -> Result<String, CliError> {
    let document = serde_json::json!({
        "version": config.version(),
        "events_directory": config.events_directory().as_str(),
        "settings": config.settings(),
    });
    serde_json::to_string_pretty(&document).map_err(|err| CliError::Render(err.to_string()))
}

fn render_remote_command(args: &[String]) -> String {
    args.iter()
        .map(|arg| escape(arg.as_str().into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn validate_command_args(args: &[String]) -> Result<(), CliError> {
    let has_control = args
        .iter()
        .any(|arg| arg.chars().any(|ch| ch.is_ascii_control()));
    if has_control {
        return Err(CliError::InvalidCommand(String::from(concat!(
            "command arguments must not contain control characters (ASCII ",
            "0x00-0x1F or 0x7F, e.g. newline, carriage return, tab, NUL)"
        ))));
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
