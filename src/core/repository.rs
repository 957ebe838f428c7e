//! Backup targets and their on-disk names.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// One category of backed-up subsystem.
///
/// `ALL` is the fixed order the orchestrator drives kinds in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Application,
    Git,
    Mercurial,
    Bazaar,
    Subversion,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Application,
        SourceKind::Git,
        SourceKind::Mercurial,
        SourceKind::Bazaar,
        SourceKind::Subversion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Application => "application",
            SourceKind::Git => "git",
            SourceKind::Mercurial => "mercurial",
            SourceKind::Bazaar => "bazaar",
            SourceKind::Subversion => "subversion",
        }
    }

    /// Subdirectory of the storage root holding this kind's backups.
    pub fn dir_name(self) -> &'static str {
        self.as_str()
    }

    pub fn default_remote_root(self) -> &'static str {
        match self {
            SourceKind::Application => "/",
            SourceKind::Git => "/var/lib/git",
            SourceKind::Mercurial => "/var/lib/hg",
            SourceKind::Bazaar => "/var/lib/bzr",
            SourceKind::Subversion => "/var/lib/svn",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A repository identified by (kind, name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub kind: SourceKind,
    pub name: String,
    /// Path of the repository on the remote host.
    pub remote_path: String,
    /// Directory holding every local file for this kind.
    pub kind_dir: PathBuf,
}

impl Repository {
    pub fn new(kind: SourceKind, name: &str, remote_root: &str, kind_dir: &Path) -> Self {
        let remote_path = format!("{}/{}", remote_root.trim_end_matches('/'), name);
        Self {
            kind,
            name: name.to_string(),
            remote_path,
            kind_dir: kind_dir.to_path_buf(),
        }
    }

    /// Local working copy: the mirror for mirror kinds, the incremental-sync
    /// target for dump-only kinds.
    pub fn local_path(&self) -> PathBuf {
        self.kind_dir.join(&self.name)
    }

    pub fn label(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

/// Every local path the dump-verify pipeline touches for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpPaths {
    /// Incremental-sync target.
    pub mirror: PathBuf,
    /// Current dump artifact `<name>.dump<ext>`.
    pub dump: PathBuf,
    /// Rotated predecessor `<name>.dump<ext>.old`.
    pub dump_old: PathBuf,
    /// Output of the last incremental sync `<name>.sync`.
    pub sync_log: PathBuf,
    /// Last verified-good restore.
    pub std: PathBuf,
    /// Previous verified generation.
    pub old: PathBuf,
    /// In-progress restore scratch.
    pub tmp: PathBuf,
    pub lock: PathBuf,
}

impl DumpPaths {
    pub fn new(repo: &Repository, extension: &str) -> Self {
        let at = |suffix: &str| repo.kind_dir.join(format!("{}{}", repo.name, suffix));
        let dump = at(&format!(".dump{extension}"));
        let dump_old = with_old_suffix(&dump);
        Self {
            mirror: repo.local_path(),
            dump,
            dump_old,
            sync_log: at(".sync"),
            std: at(".std"),
            old: at(".old"),
            tmp: at(".tmp"),
            lock: at(".lock"),
        }
    }
}

/// Suffixes the dump-verify pipeline appends to a repository name.
const DUMP_LOCAL_SUFFIXES: [&str; 6] = [".std", ".old", ".tmp", ".sync", ".lock", ".part"];

/// Whether a repository called `name` would have its sync target land on
/// another repository's dump-verify files, e.g. `demo.old` or `demo.dump.xz`.
pub fn shadows_dump_paths(name: &str) -> bool {
    name.ends_with(".dump")
        || name.contains(".dump.")
        || DUMP_LOCAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// `<path>.old`, the rotated name of a single-file artifact.
pub fn with_old_suffix(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".old");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_paths_follow_layout() {
        let repo = Repository::new(
            SourceKind::Subversion,
            "demo",
            "/var/lib/svn/",
            Path::new("/srv/backup/subversion"),
        );
        assert_eq!(repo.remote_path, "/var/lib/svn/demo");
        let paths = DumpPaths::new(&repo, ".xz");
        assert_eq!(paths.dump, PathBuf::from("/srv/backup/subversion/demo.dump.xz"));
        assert_eq!(
            paths.dump_old,
            PathBuf::from("/srv/backup/subversion/demo.dump.xz.old")
        );
        assert_eq!(paths.std, PathBuf::from("/srv/backup/subversion/demo.std"));
        assert_eq!(paths.tmp, PathBuf::from("/srv/backup/subversion/demo.tmp"));
        assert_eq!(paths.sync_log, PathBuf::from("/srv/backup/subversion/demo.sync"));
        assert_eq!(paths.mirror, PathBuf::from("/srv/backup/subversion/demo"));
    }

    #[test]
    fn names_ending_in_pipeline_suffixes_shadow_other_repositories() {
        for name in [
            "demo.old",
            "demo.std",
            "demo.tmp",
            "demo.sync",
            "demo.lock",
            "demo.dump",
            "demo.dump.xz",
            "demo.dump.gz.old",
        ] {
            assert!(shadows_dump_paths(name), "{name}");
        }
        for name in ["demo", "web-site_v2.0", "old", "dumpster", "release.2024"] {
            assert!(!shadows_dump_paths(name), "{name}");
        }
    }

    #[test]
    fn kinds_run_in_fixed_order() {
        let names: Vec<&str> = SourceKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(
            names,
            ["application", "git", "mercurial", "bazaar", "subversion"]
        );
    }
}
