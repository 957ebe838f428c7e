//! Subversion implementation of the dump-only capability set.
//!
//! Remote side: `svnadmin verify`, `svnadmin hotcopy` into a `mktemp -d`
//! scratch directory, `svnadmin dump` of that hot copy. Local side: `svnsync`
//! for the incremental-sync target and `svnadmin create/load/verify` for
//! restores. `svnsync` opens its own `svn+ssh` tunnel, so it gets the
//! channel's ssh command line through `SVN_SSH`.

use crate::core::command::{CommandRunner, CommandSpec};
use crate::core::error::RepokeepError;
use crate::core::remote::RemoteChannel;
use crate::core::repository::Repository;
use crate::strategies::dump_verify::DumpTool;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

const REMOTE_SCRATCH_TEMPLATE: &str = "/tmp/repokeep.XXXXXXXX";
const PERMISSIVE_REVPROP_HOOK: &str = "#!/bin/sh\nexit 0\n";

pub struct SubversionTool {
    channel: Arc<dyn RemoteChannel>,
    runner: Arc<dyn CommandRunner>,
}

impl SubversionTool {
    pub fn new(channel: Arc<dyn RemoteChannel>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { channel, runner }
    }

    /// URL svnsync pulls from.
    pub fn source_url(&self, repo: &Repository) -> String {
        if self.channel.host() == "localhost" {
            format!("file://{}", repo.remote_path)
        } else {
            format!("svn+ssh://{}{}", self.channel.host(), repo.remote_path)
        }
    }

    /// `svnsync <subcommand>` set up to reach the host the way the channel does.
    fn svnsync(&self, subcommand: &str) -> CommandSpec {
        let spec = CommandSpec::new("svnsync")
            .arg(subcommand)
            .arg("--non-interactive");
        match self.channel.tunnel_command() {
            Some(tunnel) => spec.env("SVN_SSH", tunnel),
            None => spec,
        }
    }

    fn run_local(&self, spec: &CommandSpec) -> Result<Vec<u8>, RepokeepError> {
        let out = self.runner.run(spec)?;
        if !out.success() {
            return Err(io::Error::other(out.describe_failure(spec)).into());
        }
        Ok(out.stdout)
    }

    fn initialize_sync_target(&self, repo: &Repository, target: &Path) -> Result<(), RepokeepError> {
        self.run_local(&CommandSpec::new("svnadmin").arg("create").path_arg(target))?;

        // svnsync needs to set revision properties on the target.
        let hooks = target.join("hooks");
        fs::create_dir_all(&hooks)?;
        let hook = hooks.join("pre-revprop-change");
        fs::write(&hook, PERMISSIVE_REVPROP_HOOK)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&hook, fs::Permissions::from_mode(0o755))?;
        }

        self.run_local(
            &self
                .svnsync("initialize")
                .arg(file_url(target))
                .arg(self.source_url(repo)),
        )?;
        Ok(())
    }

    fn dump_from_scratch(
        &self,
        repo: &Repository,
        scratch: &str,
        sink: &mut dyn Write,
    ) -> Result<(), RepokeepError> {
        let hotcopy = format!("{}/{}", scratch, repo.name);
        let argv = ["svnadmin", "hotcopy", repo.remote_path.as_str(), hotcopy.as_str()];
        let out = self.channel.execute(&argv)?;
        if !out.success() {
            return Err(RepokeepError::DumpFailed {
                repo: repo.name.clone(),
                detail: out.describe_failure(&argv),
            });
        }

        let argv = ["svnadmin", "dump", "-q", hotcopy.as_str()];
        let out = self.channel.execute_to(&argv, sink)?;
        if !out.success() {
            return Err(RepokeepError::DumpFailed {
                repo: repo.name.clone(),
                detail: out.describe_failure(&argv),
            });
        }
        tracing::debug!(repo = %repo.label(), bytes = out.streamed, "dump streamed");
        Ok(())
    }
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

fn sync_failed(repo: &Repository, e: RepokeepError) -> RepokeepError {
    match e {
        e @ RepokeepError::SyncFailed { .. } => e,
        other => RepokeepError::SyncFailed {
            repo: repo.name.clone(),
            detail: other.detail(),
        },
    }
}

impl DumpTool for SubversionTool {
    fn verify_remote(&self, repo: &Repository) -> Result<(), RepokeepError> {
        let argv = ["svnadmin", "verify", "-q", repo.remote_path.as_str()];
        let out = self.channel.execute(&argv)?;
        if !out.success() {
            return Err(RepokeepError::RemoteCorrupt {
                repo: repo.name.clone(),
                detail: out.describe_failure(&argv),
            });
        }
        Ok(())
    }

    fn prepare_sync_target(
        &self,
        repo: &Repository,
        target: &Path,
    ) -> Result<bool, RepokeepError> {
        if target.join("format").is_file() {
            return Ok(false);
        }
        if target.exists() {
            tracing::warn!(
                repo = %repo.label(),
                path = %target.display(),
                "discarding incomplete sync target"
            );
            fs::remove_dir_all(target).map_err(|e| sync_failed(repo, e.into()))?;
        }
        if let Err(e) = self.initialize_sync_target(repo, target) {
            let _ = fs::remove_dir_all(target);
            return Err(sync_failed(repo, e));
        }
        Ok(true)
    }

    fn sync(
        &self,
        repo: &Repository,
        target: &Path,
        log: &mut dyn Write,
    ) -> Result<(), RepokeepError> {
        let spec = self.svnsync("synchronize").arg(file_url(target));
        let stdout = self.run_local(&spec).map_err(|e| sync_failed(repo, e))?;
        log.write_all(&stdout)
            .map_err(|e| sync_failed(repo, e.into()))
    }

    fn dump(&self, repo: &Repository, sink: &mut dyn Write) -> Result<(), RepokeepError> {
        let argv = ["mktemp", "-d", REMOTE_SCRATCH_TEMPLATE];
        let out = self.channel.execute(&argv)?;
        let scratch = out.stdout_lines().into_iter().next();
        let scratch = match scratch {
            Some(path) if out.success() && path.starts_with("/tmp/") => path,
            _ => {
                return Err(RepokeepError::DumpFailed {
                    repo: repo.name.clone(),
                    detail: out.describe_failure(&argv),
                });
            }
        };

        let result = self.dump_from_scratch(repo, &scratch, sink);

        let cleanup = ["rm", "-rf", scratch.as_str()];
        match self.channel.execute(&cleanup) {
            Ok(out) if out.success() => {}
            Ok(out) => tracing::warn!(
                repo = %repo.label(),
                detail = %out.describe_failure(&cleanup),
                "remote scratch cleanup failed"
            ),
            Err(e) => tracing::warn!(
                repo = %repo.label(),
                error = %e,
                "remote scratch cleanup failed"
            ),
        }
        result
    }

    fn create(&self, path: &Path) -> Result<(), RepokeepError> {
        self.run_local(&CommandSpec::new("svnadmin").arg("create").path_arg(path))
            .map(|_| ())
    }

    fn load(&self, path: &Path, source: &mut dyn Read) -> Result<(), RepokeepError> {
        let spec = CommandSpec::new("svnadmin")
            .arg("load")
            .arg("-q")
            .path_arg(path);
        let out = self.runner.run_with_stdin(&spec, source)?;
        if !out.success() {
            return Err(io::Error::other(out.describe_failure(&spec)).into());
        }
        Ok(())
    }

    fn verify_local(&self, path: &Path) -> Result<(), RepokeepError> {
        self.run_local(
            &CommandSpec::new("svnadmin")
                .arg("verify")
                .arg("-q")
                .path_arg(path),
        )
        .map(|_| ())
    }
}
