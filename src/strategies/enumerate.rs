//! Repository enumerator.

use crate::core::error::RepokeepError;
use crate::core::remote::RemoteChannel;
use regex::Regex;
use std::sync::LazyLock;

/// Names we are willing to turn into local paths and remote arguments.
static REPO_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._+-]*$").expect("valid repository name pattern")
});

pub struct RepositoryEnumerator<'a> {
    channel: &'a dyn RemoteChannel,
}

impl<'a> RepositoryEnumerator<'a> {
    pub fn new(channel: &'a dyn RemoteChannel) -> Self {
        Self { channel }
    }

    /// Lists the entries of `root` on the remote host, sorted.
    ///
    /// Entries whose names are not safe as path components are skipped with a
    /// warning.
    pub fn list(&self, root: &str) -> Result<Vec<String>, RepokeepError> {
        let argv = ["ls", "-1", root];
        let out = self.channel.execute(&argv)?;
        if !out.success() {
            return Err(RepokeepError::EnumerationFailed {
                root: root.to_string(),
                detail: out.describe_failure(&argv),
            });
        }

        let mut names = Vec::new();
        for entry in out.stdout_lines() {
            if is_valid_name(&entry) {
                names.push(entry);
            } else {
                tracing::warn!(root, entry = %entry, "skipping remote entry with unsafe name");
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}

pub fn is_valid_name(name: &str) -> bool {
    REPO_NAME.is_match(name)
}
