//! CLI struct definitions for the repokeep command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use crate::core::config::DEFAULT_CONFIG_PATH;
use crate::core::repository::SourceKind;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "repokeep",
    version = env!("CARGO_PKG_VERSION"),
    about = "Backs up a remote forge's repositories and application state into a verified local store."
)]
pub(crate) struct Cli {
    /// Configuration file.
    #[clap(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// Log warnings and errors only; quiet client tools.
    #[clap(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,
    /// Log debug detail, including every command run.
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,
    /// Log byte counts while streaming artifacts.
    #[clap(long, global = true)]
    pub progress: bool,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Run a backup pass over every enabled source kind
    Run(RunCli),
    /// List repositories present on the remote host for one kind
    List(ListCli),
    /// Re-verify the local verified copies of dump-only repositories
    Verify(VerifyCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct RunCli {
    /// Only back up this source kind.
    #[clap(long, value_enum)]
    pub only: Option<SourceKind>,
    /// Output format.
    #[clap(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ListCli {
    #[clap(value_enum)]
    pub kind: SourceKind,
    /// Output format.
    #[clap(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(clap::Args, Debug)]
pub(crate) struct VerifyCli {
    /// Repository to verify (all verified copies when omitted).
    pub name: Option<String>,
    /// Output format.
    #[clap(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}
