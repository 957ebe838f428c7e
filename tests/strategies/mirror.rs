#[path = "../support/mod.rs"]
mod support;

use repokeep::core::compress::CompressionKind;
use repokeep::core::error::{RepokeepError, Stage};
use repokeep::core::layout::StorageLayout;
use repokeep::strategies::mirror::{BazaarTool, GitTool, MercurialTool, MirrorStrategy};
use repokeep::strategies::{RepoStatus, ReplicationStrategy, StrategyContext};
use std::fs;
use std::sync::Arc;
use support::{RecordingRunner, ScriptedChannel};
use tempfile::tempdir;

#[test]
fn test_git_enumerates_and_clones_absent_repository() {
    let tmp = tempdir().unwrap();
    let channel = Arc::new(ScriptedChannel::new("forge").answer("ls -1 /var/lib/git", 0, "site\ntools\n"));
    let runner = Arc::new(RecordingRunner::default());
    let ctx = support::context(tmp.path(), channel, runner.clone());
    let strategy = MirrorStrategy::new(GitTool, ctx, "/var/lib/git".to_string());

    assert_eq!(strategy.enumerate().unwrap(), vec!["site", "tools"]);
    let status = strategy.replicate("site").unwrap();

    assert_eq!(
        status,
        RepoStatus::Mirrored {
            cloned: 1,
            updated: 0
        }
    );
    let target = tmp.path().join("git").join("site");
    assert_eq!(
        runner.calls(),
        vec![format!(
            "git clone --mirror ssh://forge/var/lib/git/site {}",
            target.display()
        )]
    );
}

#[test]
fn test_git_updates_present_mirror() {
    let tmp = tempdir().unwrap();
    let target = tmp.path().join("git").join("site");
    fs::create_dir_all(&target).unwrap();
    fs::write(target.join("HEAD"), "ref: refs/heads/main\n").unwrap();

    let runner = Arc::new(RecordingRunner::default());
    let ctx = support::context(tmp.path(), Arc::new(ScriptedChannel::new("forge")), runner.clone());
    let strategy = MirrorStrategy::new(GitTool, ctx, "/var/lib/git".to_string());

    let status = strategy.replicate("site").unwrap();

    assert_eq!(
        status,
        RepoStatus::Mirrored {
            cloned: 0,
            updated: 1
        }
    );
    assert_eq!(
        runner.calls(),
        vec![format!(
            "git --git-dir {} remote update --prune",
            target.display()
        )]
    );
}

#[test]
fn test_incomplete_mirror_is_cleared_before_clone() {
    let tmp = tempdir().unwrap();
    let target = tmp.path().join("git").join("site");
    fs::create_dir_all(&target).unwrap();
    fs::write(target.join("packed-refs"), "partial").unwrap();

    let runner = Arc::new(RecordingRunner::default());
    let ctx = support::context(tmp.path(), Arc::new(ScriptedChannel::new("forge")), runner.clone());
    MirrorStrategy::new(GitTool, ctx, "/var/lib/git".to_string())
        .replicate("site")
        .unwrap();

    assert!(!target.join("packed-refs").exists());
    assert!(runner.calls()[0].starts_with("git clone --mirror "));
}

#[test]
fn test_failed_clone_is_a_mirror_failure() {
    let tmp = tempdir().unwrap();
    let runner = Arc::new(RecordingRunner::default().failing("hg"));
    let ctx = support::context(tmp.path(), Arc::new(ScriptedChannel::new("forge")), runner);
    let err = MirrorStrategy::new(MercurialTool, ctx, "/var/lib/hg".to_string())
        .replicate("site")
        .unwrap_err();

    assert!(matches!(err, RepokeepError::MirrorFailed { .. }));
    assert_eq!(err.stage(), Stage::Mirror);
    assert!(err.to_string().contains("hg: failed"));
}

#[test]
fn test_quiet_flag_is_passed_to_client() {
    let tmp = tempdir().unwrap();
    let runner = Arc::new(RecordingRunner::default());
    let ctx = Arc::new(StrategyContext {
        channel: Arc::new(ScriptedChannel::new("forge")),
        runner: runner.clone(),
        layout: StorageLayout::new(tmp.path()),
        compression: CompressionKind::None,
        quiet: true,
        progress: false,
    });
    MirrorStrategy::new(MercurialTool, ctx, "/var/lib/hg".to_string())
        .replicate("site")
        .unwrap();

    let target = tmp.path().join("mercurial").join("site");
    assert_eq!(
        runner.calls(),
        vec![format!(
            "hg clone -U -q ssh://forge//var/lib/hg/site {}",
            target.display()
        )]
    );
}

#[test]
fn test_bazaar_mirrors_each_branch() {
    let tmp = tempdir().unwrap();
    let channel = Arc::new(ScriptedChannel::new("forge").answer(
        "find /var/lib/bzr/proj",
        0,
        "/var/lib/bzr/proj/trunk/.bzr/branch\n/var/lib/bzr/proj/branches/fix-1/.bzr/branch\n/var/lib/bzr/proj/bad name/.bzr/branch\n",
    ));
    let local = tmp.path().join("bazaar").join("proj");
    fs::create_dir_all(local.join("trunk").join(".bzr")).unwrap();

    let runner = Arc::new(RecordingRunner::default());
    let ctx = support::context(tmp.path(), channel, runner.clone());
    let status = MirrorStrategy::new(BazaarTool, ctx, "/var/lib/bzr".to_string())
        .replicate("proj")
        .unwrap();

    assert_eq!(
        status,
        RepoStatus::Mirrored {
            cloned: 1,
            updated: 1
        }
    );
    let fix = local.join("branches").join("fix-1");
    let trunk = local.join("trunk");
    assert_eq!(
        runner.calls(),
        vec![
            format!(
                "bzr branch --use-existing-dir bzr+ssh://forge/var/lib/bzr/proj/branches/fix-1 {}",
                fix.display()
            ),
            format!(
                "bzr pull -d {} bzr+ssh://forge/var/lib/bzr/proj/trunk",
                trunk.display()
            ),
        ]
    );
    assert!(fix.is_dir());
}

#[test]
fn test_unreachable_host_fails_enumeration() {
    let tmp = tempdir().unwrap();
    let channel = Arc::new(ScriptedChannel::new("forge").offline());
    let ctx = support::context(tmp.path(), channel, Arc::new(RecordingRunner::default()));
    let err = MirrorStrategy::new(GitTool, ctx, "/var/lib/git".to_string())
        .enumerate()
        .unwrap_err();

    assert!(matches!(err, RepokeepError::RemoteUnreachable { .. }));
}
