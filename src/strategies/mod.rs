//! Replication strategies, one per source kind.
//!
//! Every kind is served by a [`ReplicationStrategy`] trait object. The
//! [`registry`] builds them from the configuration in the fixed kind order.

pub mod application;
pub mod dump_verify;
pub mod enumerate;
pub mod mirror;
pub mod subversion;

use crate::core::command::CommandRunner;
use crate::core::compress::CompressionKind;
use crate::core::config::{BackupConfig, KindSettings};
use crate::core::error::RepokeepError;
use crate::core::layout::StorageLayout;
use crate::core::remote::RemoteChannel;
use crate::core::repository::SourceKind;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use application::ApplicationStrategy;
use dump_verify::DumpVerifyStrategy;
use mirror::{BazaarTool, GitTool, MercurialTool, MirrorStrategy};
use subversion::SubversionTool;

/// Collaborators and settings every strategy shares.
pub struct StrategyContext {
    pub channel: Arc<dyn RemoteChannel>,
    pub runner: Arc<dyn CommandRunner>,
    pub layout: StorageLayout,
    pub compression: CompressionKind,
    pub quiet: bool,
    pub progress: bool,
}

impl StrategyContext {
    pub fn from_config(
        cfg: &BackupConfig,
        channel: Arc<dyn RemoteChannel>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            channel,
            runner,
            layout: StorageLayout::new(&cfg.storage_root),
            compression: cfg.compression,
            quiet: cfg.quiet,
            progress: cfg.progress,
        }
    }
}

/// What happened to one repository or single target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RepoStatus {
    /// Incremental sync found nothing new; no dump or restore was done.
    Unchanged,
    /// Mirror-capable repository cloned or pulled (per branch for
    /// hierarchical sources).
    Mirrored { cloned: usize, updated: usize },
    /// Fresh dump produced, restored, verified and promoted.
    Dumped {
        artifact: PathBuf,
        sha256: String,
        bytes: u64,
    },
    /// Single-target archive written.
    Archived {
        artifact: PathBuf,
        sha256: String,
        bytes: u64,
    },
    /// Nothing configured for this target.
    Skipped,
}

pub trait ReplicationStrategy: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Repositories present on the remote host for this kind.
    fn enumerate(&self) -> Result<Vec<String>, RepokeepError>;

    /// Replicates one enumerated repository.
    fn replicate(&self, name: &str) -> Result<RepoStatus, RepokeepError>;

    /// Kind-specific targets that are not enumerated repositories.
    fn single_targets(&self) -> Vec<(String, Result<RepoStatus, RepokeepError>)> {
        Vec::new()
    }
}

/// A strategy together with the gate and group policy the orchestrator applies.
pub struct SourceEntry {
    pub settings: KindSettings,
    pub strategy: Box<dyn ReplicationStrategy>,
}

impl SourceEntry {
    pub fn kind(&self) -> SourceKind {
        self.strategy.kind()
    }
}

pub fn registry(cfg: &BackupConfig, ctx: Arc<StrategyContext>) -> Vec<SourceEntry> {
    SourceKind::ALL
        .into_iter()
        .map(|kind| SourceEntry {
            settings: cfg.kind_settings(kind),
            strategy: build_strategy(cfg, kind, ctx.clone()),
        })
        .collect()
}

fn build_strategy(
    cfg: &BackupConfig,
    kind: SourceKind,
    ctx: Arc<StrategyContext>,
) -> Box<dyn ReplicationStrategy> {
    let root = cfg.remote_root(kind);
    match kind {
        SourceKind::Application => {
            Box::new(ApplicationStrategy::new(ctx, cfg.sources.application.clone()))
        }
        SourceKind::Git => Box::new(MirrorStrategy::new(GitTool, ctx, root)),
        SourceKind::Mercurial => Box::new(MirrorStrategy::new(MercurialTool, ctx, root)),
        SourceKind::Bazaar => Box::new(MirrorStrategy::new(BazaarTool, ctx, root)),
        SourceKind::Subversion => {
            let tool = SubversionTool::new(ctx.channel.clone(), ctx.runner.clone());
            Box::new(DumpVerifyStrategy::new(kind, Box::new(tool), ctx, root))
        }
    }
}
