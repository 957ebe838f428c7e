//! Mirror strategy for sources with native incremental replication.
//!
//! Clone once when the local target is absent, pull/update afterwards.
//! Hierarchical sources (Bazaar shared repositories) are walked branch by
//! branch with the same clone-or-update decision per branch.

use crate::core::command::CommandSpec;
use crate::core::error::RepokeepError;
use crate::core::repository::{Repository, SourceKind};
use crate::strategies::enumerate::{RepositoryEnumerator, is_valid_name};
use crate::strategies::{RepoStatus, ReplicationStrategy, StrategyContext};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Native tooling of one mirror-capable source kind.
pub trait MirrorTool: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// URL the local client pulls `path` on `host` from.
    fn remote_url(&self, host: &str, path: &str) -> String;

    fn clone_command(&self, url: &str, target: &Path, quiet: bool) -> CommandSpec;

    fn update_command(&self, url: &str, target: &Path, quiet: bool) -> CommandSpec;

    /// Whether `target` already holds a usable local copy.
    fn is_present(&self, target: &Path) -> bool;

    /// Repositories may contain nested branches that are mirrored one by one.
    fn hierarchical(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GitTool;

impl MirrorTool for GitTool {
    fn kind(&self) -> SourceKind {
        SourceKind::Git
    }

    fn remote_url(&self, host: &str, path: &str) -> String {
        if host == "localhost" {
            path.to_string()
        } else {
            format!("ssh://{host}{path}")
        }
    }

    fn clone_command(&self, url: &str, target: &Path, quiet: bool) -> CommandSpec {
        let mut spec = CommandSpec::new("git").arg("clone").arg("--mirror");
        if quiet {
            spec = spec.arg("--quiet");
        }
        spec.arg(url).path_arg(target)
    }

    // `git remote update` has no quiet switch; it only reports on change.
    fn update_command(&self, _url: &str, target: &Path, _quiet: bool) -> CommandSpec {
        CommandSpec::new("git")
            .arg("--git-dir")
            .path_arg(target)
            .arg("remote")
            .arg("update")
            .arg("--prune")
    }

    fn is_present(&self, target: &Path) -> bool {
        target.join("HEAD").is_file()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MercurialTool;

impl MirrorTool for MercurialTool {
    fn kind(&self) -> SourceKind {
        SourceKind::Mercurial
    }

    fn remote_url(&self, host: &str, path: &str) -> String {
        if host == "localhost" {
            path.to_string()
        } else {
            // hg wants a second slash for absolute remote paths.
            format!("ssh://{host}/{path}")
        }
    }

    fn clone_command(&self, url: &str, target: &Path, quiet: bool) -> CommandSpec {
        let mut spec = CommandSpec::new("hg").arg("clone").arg("-U");
        if quiet {
            spec = spec.arg("-q");
        }
        spec.arg(url).path_arg(target)
    }

    fn update_command(&self, url: &str, target: &Path, quiet: bool) -> CommandSpec {
        let mut spec = CommandSpec::new("hg").arg("-R").path_arg(target).arg("pull");
        if quiet {
            spec = spec.arg("-q");
        }
        spec.arg(url)
    }

    fn is_present(&self, target: &Path) -> bool {
        target.join(".hg").is_dir()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BazaarTool;

impl MirrorTool for BazaarTool {
    fn kind(&self) -> SourceKind {
        SourceKind::Bazaar
    }

    fn remote_url(&self, host: &str, path: &str) -> String {
        if host == "localhost" {
            path.to_string()
        } else {
            format!("bzr+ssh://{host}{path}")
        }
    }

    fn clone_command(&self, url: &str, target: &Path, quiet: bool) -> CommandSpec {
        let mut spec = CommandSpec::new("bzr").arg("branch");
        if quiet {
            spec = spec.arg("-q");
        }
        spec.arg("--use-existing-dir").arg(url).path_arg(target)
    }

    fn update_command(&self, url: &str, target: &Path, quiet: bool) -> CommandSpec {
        let mut spec = CommandSpec::new("bzr").arg("pull");
        if quiet {
            spec = spec.arg("-q");
        }
        spec.arg("-d").path_arg(target).arg(url)
    }

    fn is_present(&self, target: &Path) -> bool {
        target.join(".bzr").is_dir()
    }

    fn hierarchical(&self) -> bool {
        true
    }
}

/// One clone-or-update unit: a whole repository, or a branch inside one.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MirrorTarget {
    remote_path: String,
    local_path: PathBuf,
}

pub struct MirrorStrategy<T: MirrorTool> {
    tool: T,
    ctx: Arc<StrategyContext>,
    remote_root: String,
}

impl<T: MirrorTool> MirrorStrategy<T> {
    pub fn new(tool: T, ctx: Arc<StrategyContext>, remote_root: String) -> Self {
        Self {
            tool,
            ctx,
            remote_root,
        }
    }

    fn repository(&self, name: &str) -> Repository {
        let kind = self.tool.kind();
        Repository::new(kind, name, &self.remote_root, &self.ctx.layout.kind_dir(kind))
    }

    fn targets(&self, repo: &Repository) -> Result<Vec<MirrorTarget>, RepokeepError> {
        let whole = MirrorTarget {
            remote_path: repo.remote_path.clone(),
            local_path: repo.local_path(),
        };
        if !self.tool.hierarchical() {
            return Ok(vec![whole]);
        }

        let argv = [
            "find",
            repo.remote_path.as_str(),
            "-type",
            "d",
            "-path",
            "*/.bzr/branch",
        ];
        let out = self.ctx.channel.execute(&argv)?;
        if !out.success() {
            return Err(RepokeepError::MirrorFailed {
                repo: repo.name.clone(),
                detail: out.describe_failure(&argv),
            });
        }

        let mut targets = Vec::new();
        for line in out.stdout_lines() {
            match branch_relative_path(&repo.remote_path, &line) {
                Some(rel) if rel.is_empty() => targets.push(whole.clone()),
                Some(rel) => targets.push(MirrorTarget {
                    remote_path: format!("{}/{}", repo.remote_path, rel),
                    local_path: repo.local_path().join(&rel),
                }),
                None => tracing::warn!(
                    repo = %repo.label(),
                    entry = %line,
                    "skipping branch with unsafe path"
                ),
            }
        }
        targets.sort_by(|a, b| a.local_path.cmp(&b.local_path));
        Ok(targets)
    }

    /// Clones or updates one target. Returns true when it was cloned.
    fn mirror_one(&self, repo: &Repository, target: &MirrorTarget) -> Result<bool, RepokeepError> {
        let failed = |detail: String| RepokeepError::MirrorFailed {
            repo: repo.name.clone(),
            detail,
        };
        let url = self
            .tool
            .remote_url(self.ctx.channel.host(), &target.remote_path);
        let present = self.tool.is_present(&target.local_path);

        let spec = if present {
            self.tool
                .update_command(&url, &target.local_path, self.ctx.quiet)
        } else {
            // A half-finished clone from an earlier run would make the clone
            // refuse the directory. Hierarchical parents hold sibling
            // branches, so only flat targets are cleared.
            if target.local_path.exists() && !self.tool.hierarchical() {
                tracing::warn!(
                    repo = %repo.label(),
                    path = %target.local_path.display(),
                    "removing incomplete mirror"
                );
                fs::remove_dir_all(&target.local_path).map_err(|e| failed(e.to_string()))?;
            }
            if let Some(parent) = target.local_path.parent() {
                fs::create_dir_all(parent).map_err(|e| failed(e.to_string()))?;
            }
            if self.tool.hierarchical() {
                fs::create_dir_all(&target.local_path).map_err(|e| failed(e.to_string()))?;
            }
            self.tool
                .clone_command(&url, &target.local_path, self.ctx.quiet)
        };

        let out = self
            .ctx
            .runner
            .run(&spec)
            .map_err(|e| failed(format!("cannot run `{spec}`: {e}")))?;
        if !out.success() {
            return Err(failed(out.describe_failure(&spec)));
        }
        tracing::debug!(
            repo = %repo.label(),
            path = %target.local_path.display(),
            cloned = !present,
            "mirror target done"
        );
        Ok(!present)
    }
}

/// Branch location relative to the repository root, from a `find` hit on
/// `<branch>/.bzr/branch`. Every component must be a plain name.
fn branch_relative_path(repo_root: &str, hit: &str) -> Option<String> {
    let branch = hit.strip_suffix("/.bzr/branch")?;
    let rel = branch.strip_prefix(repo_root)?;
    if rel.is_empty() {
        return Some(String::new());
    }
    let rel = rel.strip_prefix('/')?;
    rel.split('/')
        .all(is_valid_name)
        .then(|| rel.to_string())
}

impl<T: MirrorTool> ReplicationStrategy for MirrorStrategy<T> {
    fn kind(&self) -> SourceKind {
        self.tool.kind()
    }

    fn enumerate(&self) -> Result<Vec<String>, RepokeepError> {
        RepositoryEnumerator::new(self.ctx.channel.as_ref()).list(&self.remote_root)
    }

    fn replicate(&self, name: &str) -> Result<RepoStatus, RepokeepError> {
        let repo = self.repository(name);
        let (mut cloned, mut updated) = (0, 0);
        for target in self.targets(&repo)? {
            if self.mirror_one(&repo, &target)? {
                cloned += 1;
            } else {
                updated += 1;
            }
        }
        tracing::info!(repo = %repo.label(), cloned, updated, "mirrored");
        Ok(RepoStatus::Mirrored { cloned, updated })
    }
}
