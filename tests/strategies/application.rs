#[path = "../support/mod.rs"]
mod support;

use repokeep::core::compress::CompressionKind;
use repokeep::core::config::ApplicationConfig;
use repokeep::core::error::{RepokeepError, Stage};
use repokeep::core::repository::with_old_suffix;
use repokeep::strategies::application::ApplicationStrategy;
use repokeep::strategies::{RepoStatus, ReplicationStrategy};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use support::{RecordingRunner, ScriptedChannel};
use tempfile::tempdir;

fn config(files: &[&str], database_command: &[&str]) -> ApplicationConfig {
    ApplicationConfig {
        enabled: true,
        group: None,
        files: files.iter().map(|f| f.to_string()).collect(),
        database_command: database_command.iter().map(|a| a.to_string()).collect(),
    }
}

fn gunzip(path: &Path) -> String {
    let mut out = String::new();
    CompressionKind::Gzip
        .open(path)
        .unwrap()
        .read_to_string(&mut out)
        .unwrap();
    out
}

fn run(root: &Path, channel: ScriptedChannel, cfg: ApplicationConfig) -> Vec<(String, Result<RepoStatus, RepokeepError>)> {
    let ctx = support::context(root, Arc::new(channel), Arc::new(RecordingRunner::default()));
    ApplicationStrategy::new(ctx, cfg).single_targets()
}

#[test]
fn test_files_are_streamed_into_tarball() {
    let tmp = tempdir().unwrap();
    let channel = ScriptedChannel::new("forge").answer("tar -cf - -C / etc/forge var/www/forge", 0, "TARDATA");

    let results = run(tmp.path(), channel, config(&["/etc/forge", "/var/www/forge"], &[]));

    assert_eq!(results[0].0, "files");
    let artifact = tmp.path().join("application").join("files.tar.gz");
    match &results[0].1 {
        Ok(RepoStatus::Archived { artifact: path, bytes, sha256 }) => {
            assert_eq!(path, &artifact);
            assert_eq!(*bytes, 7);
            assert_eq!(sha256.len(), 64);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(gunzip(&artifact), "TARDATA");
    assert_eq!(results[1].0, "database");
    assert!(matches!(results[1].1, Ok(RepoStatus::Skipped)));
}

#[test]
fn test_database_dump_rotates_previous_generation() {
    let tmp = tempdir().unwrap();
    let cfg = config(&[], &["pg_dump", "forge"]);

    let first = ScriptedChannel::new("forge").answer("pg_dump forge", 0, "CREATE TABLE one;");
    run(tmp.path(), first, cfg.clone());
    let second = ScriptedChannel::new("forge").answer("pg_dump forge", 0, "CREATE TABLE two;");
    let results = run(tmp.path(), second, cfg);

    assert!(matches!(results[0].1, Ok(RepoStatus::Skipped)));
    assert!(matches!(results[1].1, Ok(RepoStatus::Archived { .. })));
    let artifact = tmp.path().join("application").join("database.sql.gz");
    assert_eq!(gunzip(&artifact), "CREATE TABLE two;");
    assert_eq!(gunzip(&with_old_suffix(&artifact)), "CREATE TABLE one;");
}

#[test]
fn test_failed_archive_leaves_no_partial_artifact() {
    let tmp = tempdir().unwrap();
    let channel = ScriptedChannel::new("forge").answer("tar", 2, "partial");

    let results = run(tmp.path(), channel, config(&["/etc/forge"], &[]));

    let err = results[0].1.as_ref().unwrap_err();
    assert!(matches!(err, RepokeepError::ArchiveFailed { .. }));
    assert_eq!(err.stage(), Stage::Archive);
    assert!(!tmp.path().join("application").join("files.tar.gz").exists());
}

#[test]
fn test_unreachable_host_is_reported_as_such() {
    let tmp = tempdir().unwrap();
    let channel = ScriptedChannel::new("forge").offline();

    let results = run(tmp.path(), channel, config(&[], &["pg_dump", "forge"]));

    assert!(matches!(
        results[1].1,
        Err(RepokeepError::RemoteUnreachable { .. })
    ));
}

#[test]
fn test_relative_file_paths_are_rejected_before_contacting_host() {
    let tmp = tempdir().unwrap();
    let channel = Arc::new(ScriptedChannel::new("forge"));
    let ctx = support::context(tmp.path(), channel.clone(), Arc::new(RecordingRunner::default()));

    let results = ApplicationStrategy::new(ctx, config(&["etc/forge"], &[])).single_targets();

    assert!(matches!(results[0].1, Err(RepokeepError::ArchiveFailed { .. })));
    assert!(channel.calls().is_empty());
}
