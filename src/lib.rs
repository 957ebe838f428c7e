//! repokeep: verified backups of a remote forge.
//!
//! repokeep copies a remote application server's version-control
//! repositories and application state into a local storage tree, one
//! subtree per source kind:
//!
//! - **application**: configured files as a tarball plus a database dump
//! - **git**, **mercurial**, **bazaar**: native mirrors, cloned once and
//!   updated incrementally afterwards
//! - **subversion**: the dump-verify pipeline. An incremental sync decides
//!   whether anything changed; when it did, a full dump of a remote hot copy
//!   is restored into a scratch repository, verified, and only then promoted
//!   to the verified copy (`<name>.std`), keeping one previous generation.
//!
//! # Examples
//!
//! ```bash
//! # Back up everything the configuration enables
//! repokeep run
//!
//! # Only the dump-only repositories, machine-readable report
//! repokeep run --only subversion --format json
//!
//! # Re-check every verified copy on disk
//! repokeep verify
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: configuration, errors, command channels, layout, compression
//! - [`strategies`]: one replication strategy per source kind
//! - [`orchestrator`]: per-kind gating, aggregation and reporting

pub mod core;
pub mod orchestrator;
pub mod strategies;

mod cli;

use crate::cli::{Cli, Command, ListCli, OutputFormat, RunCli, VerifyCli};
use crate::core::command::{CommandRunner, SystemRunner};
use crate::core::config::BackupConfig;
use crate::core::logging;
use crate::core::remote::{self, RemoteChannel};
use crate::core::repository::SourceKind;
use crate::core::time;
use crate::orchestrator::Orchestrator;
use crate::strategies::dump_verify::DumpVerifyStrategy;
use crate::strategies::subversion::SubversionTool;
use crate::strategies::{StrategyContext, registry};

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use std::sync::Arc;

/// Parses the command line and runs it. `Ok(false)` means the command ran
/// but some backup or verification failed.
pub fn run() -> anyhow::Result<bool> {
    let cli = Cli::parse();

    let mut cfg = BackupConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if cli.quiet {
        cfg.quiet = true;
        cfg.verbose = false;
    }
    if cli.verbose {
        cfg.verbose = true;
        cfg.quiet = false;
    }
    cfg.progress |= cli.progress;
    cfg.validate()?;

    let level = logging::resolve_level(&cfg.log_level, cfg.quiet, cfg.verbose)
        .map_err(anyhow::Error::msg)?;
    logging::init_logging(level);

    let channel: Arc<dyn RemoteChannel> = Arc::from(remote::channel_for(&cfg.remote_host, &cfg.ssh));
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);

    match cli.command {
        Command::Run(run_cli) => run_backup(cfg, channel, runner, run_cli),
        Command::List(list_cli) => list_repositories(&cfg, channel, runner, list_cli),
        Command::Verify(verify_cli) => verify_copies(&cfg, channel, runner, verify_cli),
    }
}

fn run_backup(
    mut cfg: BackupConfig,
    channel: Arc<dyn RemoteChannel>,
    runner: Arc<dyn CommandRunner>,
    run_cli: RunCli,
) -> anyhow::Result<bool> {
    if let Some(only) = run_cli.only {
        cfg.restrict_to(only);
    }
    let ctx = Arc::new(StrategyContext::from_config(&cfg, channel, runner.clone()));
    let entries = registry(&cfg, ctx.clone());
    let report = Orchestrator::new(entries, ctx.layout.clone(), runner, cfg.parallel).run();

    match run_cli.format {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report.to_json())?),
    }
    Ok(report.success())
}

fn list_repositories(
    cfg: &BackupConfig,
    channel: Arc<dyn RemoteChannel>,
    runner: Arc<dyn CommandRunner>,
    list_cli: ListCli,
) -> anyhow::Result<bool> {
    let ctx = Arc::new(StrategyContext::from_config(cfg, channel, runner));
    let entry = registry(cfg, ctx)
        .into_iter()
        .find(|e| e.kind() == list_cli.kind)
        .with_context(|| format!("no strategy registered for {}", list_cli.kind))?;
    let names = entry.strategy.enumerate()?;

    match list_cli.format {
        OutputFormat::Text => {
            for name in &names {
                println!("{name}");
            }
        }
        OutputFormat::Json => {
            let envelope = time::command_envelope(
                "list",
                "ok",
                serde_json::json!({ "kind": list_cli.kind, "repositories": names }),
            );
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
    }
    Ok(true)
}

fn verify_copies(
    cfg: &BackupConfig,
    channel: Arc<dyn RemoteChannel>,
    runner: Arc<dyn CommandRunner>,
    verify_cli: VerifyCli,
) -> anyhow::Result<bool> {
    let kind = SourceKind::Subversion;
    let ctx = Arc::new(StrategyContext::from_config(cfg, channel.clone(), runner.clone()));
    let tool = SubversionTool::new(channel, runner);
    let strategy = DumpVerifyStrategy::new(kind, Box::new(tool), ctx, cfg.remote_root(kind));
    let results = strategy.verify_copies(verify_cli.name.as_deref())?;
    let all_ok = results.iter().all(|(_, r)| r.is_ok());

    match verify_cli.format {
        OutputFormat::Text => {
            if results.is_empty() {
                println!("no verified copies under {}", cfg.storage_root.display());
            }
            for (name, result) in &results {
                match result {
                    Ok(()) => println!("{}/{}: {}", kind, name, "verified".green()),
                    Err(e) => println!("{}/{}: {} ({})", kind, name, "failed".red().bold(), e),
                }
            }
        }
        OutputFormat::Json => {
            let copies: Vec<serde_json::Value> = results
                .iter()
                .map(|(name, result)| match result {
                    Ok(()) => serde_json::json!({ "name": name, "verified": true }),
                    Err(e) => serde_json::json!({
                        "name": name,
                        "verified": false,
                        "error": e.to_string(),
                    }),
                })
                .collect();
            let envelope = time::command_envelope(
                "verify",
                if all_ok { "ok" } else { "failed" },
                serde_json::json!({ "kind": kind, "copies": copies }),
            );
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
    }
    Ok(all_ok)
}
