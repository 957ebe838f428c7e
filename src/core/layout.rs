//! Storage layout manager.
//!
//! Maps source kinds onto subdirectories of the storage root, creates missing
//! directories and applies the per-kind group ownership policy.

use crate::core::command::{CommandRunner, CommandSpec};
use crate::core::error::RepokeepError;
use crate::core::repository::SourceKind;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind_dir(&self, kind: SourceKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    /// Idempotent `mkdir -p`.
    pub fn ensure(&self, path: &Path) -> Result<(), RepokeepError> {
        if path.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(path).map_err(|e| RepokeepError::storage(path, e))?;
        tracing::debug!(path = %path.display(), "created storage directory");
        Ok(())
    }

    /// Makes `path` group-owned by `group` with group rwx, and sets the
    /// set-group-ID bit on every directory so new files inherit the group.
    /// No-op without a configured group.
    pub fn apply_group_policy(
        &self,
        runner: &dyn CommandRunner,
        path: &Path,
        group: Option<&str>,
    ) -> Result<(), RepokeepError> {
        let Some(group) = group.filter(|g| !g.trim().is_empty()) else {
            return Ok(());
        };
        for spec in group_policy_commands(path, group) {
            let out = runner
                .run(&spec)
                .map_err(|e| RepokeepError::PermissionPolicyFailed {
                    path: path.to_path_buf(),
                    detail: format!("cannot run `{}`: {}", spec, e),
                })?;
            if !out.success() {
                return Err(RepokeepError::PermissionPolicyFailed {
                    path: path.to_path_buf(),
                    detail: out.describe_failure(&spec),
                });
            }
        }
        tracing::debug!(path = %path.display(), group, "applied group policy");
        Ok(())
    }
}

fn group_policy_commands(path: &Path, group: &str) -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("chgrp").arg("-R").arg(group).path_arg(path),
        CommandSpec::new("chmod").arg("-R").arg("g+rwX").path_arg(path),
        CommandSpec::new("find")
            .path_arg(path)
            .args(["-type", "d", "-exec", "chmod", "g+s", "{}", "+"]),
    ]
}
