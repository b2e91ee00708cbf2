//! Command-line interface definitions for the `replication` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `replication` binary.
#[derive(Debug, Parser)]
#[command(
    name = "replication",
    about = "Run replication maintenance commands against remote nodes",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run a command on a replication node over SSH.
    #[command(name = "exec", about = "Run a command on a replication node over SSH")]
    Exec(ExecCommand),
    /// Print the active replication configuration.
    #[command(name = "show-config", about = "Print the active replication configuration")]
    ShowConfig,
}

/// Arguments for the `replication exec` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ExecCommand {
    /// Destination as `ssh://[user@]host[:port]` or `[user@]host:path`.
    #[arg(value_name = "TARGET")]
    pub(crate) target: String,
    /// Override the configured command timeout, in seconds. Zero waits
    /// without bound.
    #[arg(long, value_name = "SECS")]
    pub(crate) timeout: Option<u64>,
    /// Command to execute on the remote node (use -- to separate flags).
    #[arg(required = true, trailing_var_arg = true)]
    pub(crate) command: Vec<String>,
}
