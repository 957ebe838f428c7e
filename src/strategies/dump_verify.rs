//! Dump-verify pipeline for dump-only repositories.
//!
//! Per repository and run:
//!
//! 1. `verify_remote`: the remote copy must pass its own integrity check.
//! 2. `try_sync`: incrementally sync the local sync target, appending the
//!    report to `<name>.sync`. An empty log with every local artifact in
//!    place ends the run here.
//! 3. `full_dump`: stream a dump of a remote hot copy into
//!    `<name>.dump<ext>.part`.
//! 4. `verify_restore`: load the staged dump into `<name>.tmp` and verify it.
//! 5. `rotate`: move the staged dump into place (the current one becomes
//!    `.old`), demote a still-good `<name>.std` to `<name>.old`, promote
//!    `.tmp` to `.std` and verify it once more.
//!
//! Only a failed sync is recovered from (by taking the full dump). `.std` is
//! only ever replaced by a verified restore. `<name>.sync` is removed only
//! once a run ends unchanged or fully promoted; a leftover non-empty log
//! means the changes it records were never dumped, so the next run dumps.

use crate::core::artifact::{self, ArtifactInfo, StagedArtifact};
use crate::core::compress::CompressionKind;
use crate::core::error::RepokeepError;
use crate::core::lock::RepoLock;
use crate::core::repository::{DumpPaths, Repository, SourceKind, shadows_dump_paths};
use crate::strategies::enumerate::{RepositoryEnumerator, is_valid_name};
use crate::strategies::{RepoStatus, ReplicationStrategy, StrategyContext};
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Capabilities a dump-only source kind provides to the pipeline.
pub trait DumpTool: Send + Sync {
    /// Asks the remote repository to check its own integrity.
    fn verify_remote(&self, repo: &Repository) -> Result<(), RepokeepError>;

    /// Creates the local incremental-sync target if it does not exist yet.
    /// Returns true when this call created it.
    fn prepare_sync_target(&self, repo: &Repository, target: &Path)
    -> Result<bool, RepokeepError>;

    /// Brings `target` up to date, writing the tool's change report to `log`.
    /// Nothing is written when there was nothing to sync.
    fn sync(
        &self,
        repo: &Repository,
        target: &Path,
        log: &mut dyn Write,
    ) -> Result<(), RepokeepError>;

    /// Streams a full serialized dump of a frozen remote copy into `sink`.
    fn dump(&self, repo: &Repository, sink: &mut dyn Write) -> Result<(), RepokeepError>;

    /// Creates an empty local repository at `path`.
    fn create(&self, path: &Path) -> Result<(), RepokeepError>;

    /// Loads a dump stream into the repository at `path`.
    fn load(&self, path: &Path, source: &mut dyn Read) -> Result<(), RepokeepError>;

    /// Independent integrity check of a local repository.
    fn verify_local(&self, path: &Path) -> Result<(), RepokeepError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncVerdict {
    Unchanged,
    Changed,
    /// An earlier run recorded changes it never turned into a verified dump.
    Pending,
    FreshTarget,
    Failed,
}

pub struct DumpVerifyPipeline<'a> {
    tool: &'a dyn DumpTool,
    compression: CompressionKind,
    progress: bool,
}

impl<'a> DumpVerifyPipeline<'a> {
    pub fn new(tool: &'a dyn DumpTool, compression: CompressionKind, progress: bool) -> Self {
        Self {
            tool,
            compression,
            progress,
        }
    }

    pub fn paths(&self, repo: &Repository) -> DumpPaths {
        DumpPaths::new(repo, self.compression.extension())
    }

    pub fn run(&self, repo: &Repository) -> Result<RepoStatus, RepokeepError> {
        fs::create_dir_all(&repo.kind_dir)
            .map_err(|e| RepokeepError::storage(&repo.kind_dir, e))?;
        let paths = self.paths(repo);
        let lock = RepoLock::acquire(&paths.lock, &repo.name)?;
        debug!(repo = %repo.label(), lock = %lock.path().display(), "repository locked");

        debug!(repo = %repo.label(), "verifying remote repository");
        self.tool.verify_remote(repo)?;

        let verdict = self.try_sync(repo, &paths);
        match slow_path_reason(verdict, &paths) {
            Some(reason) => {
                info!(repo = %repo.label(), reason, "taking full dump");
                mark_pending(&paths.sync_log, reason)?;
            }
            None => {
                info!(repo = %repo.label(), "unchanged since last verified dump");
                clear_sync_log(repo, &paths.sync_log);
                return Ok(RepoStatus::Unchanged);
            }
        }

        let staged = self.full_dump(repo, &paths)?;
        if let Err(e) = self.verify_restore(repo, &paths, staged.path()) {
            if let Err(discard) = staged.discard() {
                warn!(repo = %repo.label(), error = %discard, "cannot remove rejected dump");
            }
            return Err(e);
        }
        let dump = self.rotate(repo, &paths, staged)?;
        clear_sync_log(repo, &paths.sync_log);

        info!(
            repo = %repo.label(),
            artifact = %dump.path.display(),
            sha256 = %dump.sha256,
            bytes = dump.bytes,
            rotated = dump.rotated,
            "dump verified and promoted"
        );
        Ok(RepoStatus::Dumped {
            artifact: dump.path,
            sha256: dump.sha256,
            bytes: dump.bytes,
        })
    }

    fn try_sync(&self, repo: &Repository, paths: &DumpPaths) -> SyncVerdict {
        let pending = fs::metadata(&paths.sync_log).is_ok_and(|m| m.len() > 0);
        if pending {
            warn!(repo = %repo.label(), "changes from an earlier run were never dumped");
        }

        let created = match self.tool.prepare_sync_target(repo, &paths.mirror) {
            Ok(created) => created,
            Err(e) => {
                warn!(repo = %repo.label(), error = %e, "sync target unavailable");
                return SyncVerdict::Failed;
            }
        };

        // Appending keeps the evidence of earlier unfinished runs.
        let synced = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&paths.sync_log)
            .map_err(RepokeepError::from)
            .and_then(|mut log| {
                self.tool.sync(repo, &paths.mirror, &mut log)?;
                log.flush()?;
                Ok(())
            });
        if let Err(e) = synced {
            warn!(
                repo = %repo.label(),
                error = %e,
                recoverable = e.is_recoverable(),
                "incremental sync failed"
            );
            return SyncVerdict::Failed;
        }
        if created {
            return SyncVerdict::FreshTarget;
        }
        if pending {
            return SyncVerdict::Pending;
        }

        match fs::read(&paths.sync_log) {
            Ok(log) if String::from_utf8_lossy(&log).trim().is_empty() => SyncVerdict::Unchanged,
            Ok(_) => SyncVerdict::Changed,
            Err(e) => {
                warn!(repo = %repo.label(), error = %e, "sync log unreadable");
                SyncVerdict::Failed
            }
        }
    }

    fn full_dump(
        &self,
        repo: &Repository,
        paths: &DumpPaths,
    ) -> Result<StagedArtifact, RepokeepError> {
        let mut dump_error = None;
        let written = artifact::write_staged(&paths.dump, self.compression, self.progress, |sink| {
            self.tool.dump(repo, sink).map_err(|e| {
                let detail = e.detail();
                dump_error = Some(e);
                io::Error::other(detail)
            })
        });
        match written {
            Ok(staged) => {
                debug!(
                    repo = %repo.label(),
                    staged = %staged.path().display(),
                    "dump artifact written"
                );
                Ok(staged)
            }
            Err(io_err) => Err(match dump_error {
                // The channel could not even be reached; keep that distinct.
                Some(e @ RepokeepError::RemoteUnreachable { .. }) => e,
                Some(e) => RepokeepError::DumpFailed {
                    repo: repo.name.clone(),
                    detail: e.detail(),
                },
                None => RepokeepError::DumpFailed {
                    repo: repo.name.clone(),
                    detail: io_err.to_string(),
                },
            }),
        }
    }

    fn verify_restore(
        &self,
        repo: &Repository,
        paths: &DumpPaths,
        dump: &Path,
    ) -> Result<(), RepokeepError> {
        let failed = |detail: String| RepokeepError::RestoreFailed {
            repo: repo.name.clone(),
            detail,
        };

        if paths.tmp.exists() {
            warn!(repo = %repo.label(), "removing restore scratch left by an earlier run");
            fs::remove_dir_all(&paths.tmp)
                .map_err(|e| failed(format!("cannot clear {}: {}", paths.tmp.display(), e)))?;
        }
        self.tool
            .create(&paths.tmp)
            .map_err(|e| failed(e.detail()))?;
        let mut reader = self
            .compression
            .open(dump)
            .map_err(|e| failed(format!("cannot open {}: {}", dump.display(), e)))?;
        self.tool
            .load(&paths.tmp, &mut reader)
            .map_err(|e| failed(e.detail()))?;
        self.tool
            .verify_local(&paths.tmp)
            .map_err(|e| failed(e.detail()))?;
        debug!(repo = %repo.label(), "restored copy verified");
        Ok(())
    }

    fn rotate(
        &self,
        repo: &Repository,
        paths: &DumpPaths,
        staged: StagedArtifact,
    ) -> Result<ArtifactInfo, RepokeepError> {
        let failed = |detail: String| RepokeepError::RotationFailed {
            repo: repo.name.clone(),
            detail,
        };

        let dump = staged
            .commit()
            .map_err(|e| failed(format!("cannot put dump artifact in place: {e}")))?;
        if paths.std.exists() {
            match self.tool.verify_local(&paths.std) {
                Ok(()) => {
                    remove_dir_if_exists(&paths.old).map_err(|e| failed(e.to_string()))?;
                    fs::rename(&paths.std, &paths.old).map_err(|e| failed(e.to_string()))?;
                }
                Err(e) => {
                    warn!(
                        repo = %repo.label(),
                        error = %e,
                        "previous verified copy no longer verifies, discarding it"
                    );
                    fs::remove_dir_all(&paths.std).map_err(|e| failed(e.to_string()))?;
                }
            }
        }
        fs::rename(&paths.tmp, &paths.std).map_err(|e| failed(e.to_string()))?;
        if let Err(e) = self.tool.verify_local(&paths.std) {
            // `.std` is either absent or verifiable; park the copy as scratch.
            if let Err(park) = fs::rename(&paths.std, &paths.tmp) {
                warn!(repo = %repo.label(), error = %park, "cannot move unverifiable copy aside");
            }
            return Err(failed(format!(
                "promoted copy fails verification: {}",
                e.detail()
            )));
        }
        Ok(dump)
    }
}

/// Why the full dump has to run, or `None` when the run can stop after sync.
fn slow_path_reason(verdict: SyncVerdict, paths: &DumpPaths) -> Option<&'static str> {
    match verdict {
        SyncVerdict::FreshTarget => Some("sync target was just created"),
        SyncVerdict::Failed => Some("incremental sync failed"),
        SyncVerdict::Changed => Some("sync reported changes"),
        SyncVerdict::Pending => Some("an earlier run did not finish its dump"),
        SyncVerdict::Unchanged if !paths.dump.exists() => Some("no current dump artifact"),
        SyncVerdict::Unchanged if !paths.std.exists() => Some("no verified copy"),
        SyncVerdict::Unchanged if paths.tmp.exists() => Some("restore scratch left by a failed run"),
        SyncVerdict::Unchanged => None,
    }
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Records in the sync log that a full dump is under way, so a run that
/// dies before promotion leaves non-empty evidence behind.
fn mark_pending(sync_log: &Path, reason: &str) -> Result<(), RepokeepError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(sync_log)
        .and_then(|mut log| writeln!(log, "repokeep: full dump pending ({reason})"))
        .map_err(|e| RepokeepError::storage(sync_log, e))
}

fn clear_sync_log(repo: &Repository, sync_log: &Path) {
    match fs::remove_file(sync_log) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            warn!(repo = %repo.label(), error = %e, "cannot remove sync log");
        }
        _ => {}
    }
}

/// Strategy driving the pipeline for every enumerated repository of a kind.
pub struct DumpVerifyStrategy {
    kind: SourceKind,
    tool: Box<dyn DumpTool>,
    ctx: Arc<StrategyContext>,
    remote_root: String,
}

impl DumpVerifyStrategy {
    pub fn new(
        kind: SourceKind,
        tool: Box<dyn DumpTool>,
        ctx: Arc<StrategyContext>,
        remote_root: String,
    ) -> Self {
        Self {
            kind,
            tool,
            ctx,
            remote_root,
        }
    }

    pub fn repository(&self, name: &str) -> Repository {
        Repository::new(
            self.kind,
            name,
            &self.remote_root,
            &self.ctx.layout.kind_dir(self.kind),
        )
    }

    fn pipeline(&self) -> DumpVerifyPipeline<'_> {
        DumpVerifyPipeline::new(self.tool.as_ref(), self.ctx.compression, self.ctx.progress)
    }

    /// Re-verifies local `<name>.std` copies; all of them when `only` is None.
    pub fn verify_copies(
        &self,
        only: Option<&str>,
    ) -> Result<Vec<(String, Result<(), RepokeepError>)>, RepokeepError> {
        let kind_dir = self.ctx.layout.kind_dir(self.kind);
        let mut names = match only {
            Some(name) if !is_valid_name(name) || shadows_dump_paths(name) => {
                return Err(RepokeepError::Config(format!(
                    "`{name}` is not a valid repository name"
                )));
            }
            Some(name) => vec![name.to_string()],
            None => verified_copy_names(&kind_dir)?,
        };
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| {
                let paths = self.pipeline().paths(&self.repository(&name));
                let result = if paths.std.is_dir() {
                    self.tool.verify_local(&paths.std)
                } else {
                    Err(RepokeepError::RestoreFailed {
                        repo: name.clone(),
                        detail: format!("no verified copy at {}", paths.std.display()),
                    })
                };
                (name, result)
            })
            .collect())
    }
}

fn verified_copy_names(kind_dir: &Path) -> Result<Vec<String>, RepokeepError> {
    if !kind_dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(kind_dir).map_err(|e| RepokeepError::storage(kind_dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        if let Some(name) = file_name.strip_suffix(".std") {
            if entry.path().is_dir() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

impl ReplicationStrategy for DumpVerifyStrategy {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn enumerate(&self) -> Result<Vec<String>, RepokeepError> {
        let mut names =
            RepositoryEnumerator::new(self.ctx.channel.as_ref()).list(&self.remote_root)?;
        names.retain(|name| {
            let shadows = shadows_dump_paths(name);
            if shadows {
                warn!(
                    kind = %self.kind,
                    repo = %name,
                    "skipping repository whose name collides with local dump files"
                );
            }
            !shadows
        });
        Ok(names)
    }

    fn replicate(&self, name: &str) -> Result<RepoStatus, RepokeepError> {
        self.pipeline().run(&self.repository(name))
    }
}
