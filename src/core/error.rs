use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline or orchestration step an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Enumerate,
    Layout,
    VerifyRemote,
    TrySync,
    FullDump,
    VerifyRestore,
    Rotate,
    Mirror,
    Archive,
    GroupPolicy,
    Config,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Enumerate => "enumerate",
            Stage::Layout => "layout",
            Stage::VerifyRemote => "verify_remote",
            Stage::TrySync => "try_sync",
            Stage::FullDump => "full_dump",
            Stage::VerifyRestore => "verify_restore",
            Stage::Rotate => "rotate",
            Stage::Mirror => "mirror",
            Stage::Archive => "archive",
            Stage::GroupPolicy => "group_policy",
            Stage::Config => "config",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum RepokeepError {
    #[error("Remote host `{host}` unreachable: {detail}")]
    RemoteUnreachable { host: String, detail: String },
    #[error("Remote repository `{repo}` failed its integrity check: {detail}")]
    RemoteCorrupt { repo: String, detail: String },
    #[error("Incremental sync of `{repo}` failed: {detail}")]
    SyncFailed { repo: String, detail: String },
    #[error("Full dump of `{repo}` failed: {detail}")]
    DumpFailed { repo: String, detail: String },
    #[error("Restore of `{repo}` from its dump failed, backup may be lost: {detail}")]
    RestoreFailed { repo: String, detail: String },
    #[error("Rotation of `{repo}` failed, local copies need manual inspection: {detail}")]
    RotationFailed { repo: String, detail: String },
    #[error("Mirror of `{repo}` failed: {detail}")]
    MirrorFailed { repo: String, detail: String },
    #[error("Listing `{root}` on the remote host failed: {detail}")]
    EnumerationFailed { root: String, detail: String },
    #[error("Archive `{target}` failed: {detail}")]
    ArchiveFailed { target: String, detail: String },
    #[error("Group policy on {} failed: {detail}", path.display())]
    PermissionPolicyFailed { path: PathBuf, detail: String },
    #[error("Storage path {} unusable: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Repository `{repo}` is locked by another run")]
    Locked { repo: String },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RepokeepError {
    pub fn stage(&self) -> Stage {
        match self {
            RepokeepError::RemoteUnreachable { .. } => Stage::VerifyRemote,
            RepokeepError::RemoteCorrupt { .. } => Stage::VerifyRemote,
            RepokeepError::SyncFailed { .. } => Stage::TrySync,
            RepokeepError::DumpFailed { .. } => Stage::FullDump,
            RepokeepError::RestoreFailed { .. } => Stage::VerifyRestore,
            RepokeepError::RotationFailed { .. } => Stage::Rotate,
            RepokeepError::MirrorFailed { .. } => Stage::Mirror,
            RepokeepError::EnumerationFailed { .. } => Stage::Enumerate,
            RepokeepError::ArchiveFailed { .. } => Stage::Archive,
            RepokeepError::PermissionPolicyFailed { .. } => Stage::GroupPolicy,
            RepokeepError::Storage { .. } | RepokeepError::Locked { .. } | RepokeepError::Io(_) => {
                Stage::Layout
            }
            RepokeepError::Config(_) => Stage::Config,
        }
    }

    /// Only a failed incremental sync has a fallback (the full dump).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RepokeepError::SyncFailed { .. })
    }

    /// Restore and rotation failures leave the local store in a state an
    /// operator has to look at before the next scheduled run.
    pub fn needs_operator(&self) -> bool {
        matches!(
            self,
            RepokeepError::RestoreFailed { .. } | RepokeepError::RotationFailed { .. }
        )
    }

    /// The underlying failure text without the variant's own framing.
    pub fn detail(&self) -> String {
        match self {
            RepokeepError::RemoteUnreachable { detail, .. }
            | RepokeepError::RemoteCorrupt { detail, .. }
            | RepokeepError::SyncFailed { detail, .. }
            | RepokeepError::DumpFailed { detail, .. }
            | RepokeepError::RestoreFailed { detail, .. }
            | RepokeepError::RotationFailed { detail, .. }
            | RepokeepError::MirrorFailed { detail, .. }
            | RepokeepError::EnumerationFailed { detail, .. }
            | RepokeepError::ArchiveFailed { detail, .. }
            | RepokeepError::PermissionPolicyFailed { detail, .. } => detail.clone(),
            RepokeepError::Storage { path, source } => format!("{}: {}", path.display(), source),
            RepokeepError::Config(msg) => msg.clone(),
            RepokeepError::Io(e) => e.to_string(),
            RepokeepError::Locked { .. } => self.to_string(),
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RepokeepError::Storage {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_sync_failures_are_recoverable() {
        let sync = RepokeepError::SyncFailed {
            repo: "demo".into(),
            detail: "svnsync exited 1".into(),
        };
        let restore = RepokeepError::RestoreFailed {
            repo: "demo".into(),
            detail: "load failed".into(),
        };
        assert!(sync.is_recoverable());
        assert!(!restore.is_recoverable());
        assert!(restore.needs_operator());
        assert_eq!(restore.stage(), Stage::VerifyRestore);
    }

    #[test]
    fn restore_failure_message_warns_about_loss() {
        let err = RepokeepError::RestoreFailed {
            repo: "demo".into(),
            detail: "bad header".into(),
        };
        assert!(err.to_string().contains("backup may be lost"));
    }
}
