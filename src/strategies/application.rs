//! Application state: configured files as one tarball plus a database dump.

use crate::core::artifact::{self, ArtifactInfo};
use crate::core::config::ApplicationConfig;
use crate::core::error::RepokeepError;
use crate::core::repository::SourceKind;
use crate::strategies::{RepoStatus, ReplicationStrategy, StrategyContext};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

pub const FILES_TARGET: &str = "files";
pub const DATABASE_TARGET: &str = "database";

pub struct ApplicationStrategy {
    ctx: Arc<StrategyContext>,
    config: ApplicationConfig,
}

impl ApplicationStrategy {
    pub fn new(ctx: Arc<StrategyContext>, config: ApplicationConfig) -> Self {
        Self { ctx, config }
    }

    fn artifact_path(&self, base: &str) -> PathBuf {
        self.ctx
            .layout
            .kind_dir(SourceKind::Application)
            .join(format!("{}{}", base, self.ctx.compression.extension()))
    }

    fn archive_files(&self) -> Result<RepoStatus, RepokeepError> {
        if self.config.files.is_empty() {
            return Ok(RepoStatus::Skipped);
        }
        let relative = self
            .config
            .files
            .iter()
            .map(|f| tar_member(f))
            .collect::<Result<Vec<_>, _>>()?;

        let mut argv = vec!["tar", "-cf", "-", "-C", "/"];
        argv.extend(relative.iter().map(String::as_str));
        self.stream(FILES_TARGET, "files.tar", &argv)
    }

    fn dump_database(&self) -> Result<RepoStatus, RepokeepError> {
        if self.config.database_command.is_empty() {
            return Ok(RepoStatus::Skipped);
        }
        let argv: Vec<&str> = self
            .config
            .database_command
            .iter()
            .map(String::as_str)
            .collect();
        self.stream(DATABASE_TARGET, "database.sql", &argv)
    }

    /// Streams the remote command's stdout into a rotated artifact.
    fn stream(&self, target: &str, base: &str, argv: &[&str]) -> Result<RepoStatus, RepokeepError> {
        let kind_dir = self.ctx.layout.kind_dir(SourceKind::Application);
        self.ctx.layout.ensure(&kind_dir)?;
        let path = self.artifact_path(base);

        let mut remote_error = None;
        let written = artifact::write_rotated(&path, self.ctx.compression, self.ctx.progress, |sink| {
            let out = self.ctx.channel.execute_to(argv, sink).map_err(|e| {
                let detail = e.detail();
                remote_error = Some(e);
                io::Error::other(detail)
            })?;
            if out.success() {
                Ok(())
            } else {
                Err(io::Error::other(out.describe_failure(argv)))
            }
        });

        match written {
            Ok(ArtifactInfo {
                path, sha256, bytes, ..
            }) => {
                tracing::info!(
                    name = target,
                    artifact = %path.display(),
                    sha256 = %sha256,
                    bytes,
                    "application artifact written"
                );
                Ok(RepoStatus::Archived {
                    artifact: path,
                    sha256,
                    bytes,
                })
            }
            Err(e) => Err(match remote_error {
                Some(unreachable @ RepokeepError::RemoteUnreachable { .. }) => unreachable,
                _ => RepokeepError::ArchiveFailed {
                    target: target.to_string(),
                    detail: e.to_string(),
                },
            }),
        }
    }
}

/// Absolute remote path as a member name relative to `/`.
fn tar_member(path: &str) -> Result<String, RepokeepError> {
    let p = Path::new(path);
    let plain = p.is_absolute()
        && p.components()
            .all(|c| matches!(c, Component::RootDir | Component::Normal(_)));
    let relative = path.trim_start_matches('/');
    if !plain || relative.is_empty() {
        return Err(RepokeepError::ArchiveFailed {
            target: FILES_TARGET.to_string(),
            detail: format!("`{path}` must be an absolute path below /"),
        });
    }
    Ok(relative.to_string())
}

impl ReplicationStrategy for ApplicationStrategy {
    fn kind(&self) -> SourceKind {
        SourceKind::Application
    }

    fn enumerate(&self) -> Result<Vec<String>, RepokeepError> {
        Ok(Vec::new())
    }

    fn replicate(&self, name: &str) -> Result<RepoStatus, RepokeepError> {
        Err(RepokeepError::ArchiveFailed {
            target: name.to_string(),
            detail: "application state has no enumerated repositories".to_string(),
        })
    }

    fn single_targets(&self) -> Vec<(String, Result<RepoStatus, RepokeepError>)> {
        vec![
            (FILES_TARGET.to_string(), self.archive_files()),
            (DATABASE_TARGET.to_string(), self.dump_database()),
        ]
    }
}
