//! Single-file artifacts with two-generation rotation.

use crate::core::compress::{CompressionKind, ProgressWriter};
use crate::core::repository::with_old_suffix;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Result of writing one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    /// Uncompressed bytes streamed into the artifact.
    pub bytes: u64,
    /// SHA-256 of the artifact file as stored.
    pub sha256: String,
    /// Whether a previous generation was moved to `.old`.
    pub rotated: bool,
}

/// Moves `path` to `path.old`, replacing any older generation.
/// Returns false when there was nothing to rotate.
pub fn rotate(path: &Path) -> io::Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    fs::rename(path, with_old_suffix(path))?;
    Ok(true)
}

pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// `<path>.part`, where an artifact is written before it is put in place.
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// A complete artifact sitting at `<path>.part`, not yet in place.
#[derive(Debug)]
pub struct StagedArtifact {
    part: PathBuf,
    target: PathBuf,
    bytes: u64,
    sha256: String,
}

impl StagedArtifact {
    /// Where the staged content can be read back from.
    pub fn path(&self) -> &Path {
        &self.part
    }

    /// Rotates the current artifact to `.old` and moves this one into place.
    pub fn commit(self) -> io::Result<ArtifactInfo> {
        let rotated = rotate(&self.target)?;
        fs::rename(&self.part, &self.target)?;
        Ok(ArtifactInfo {
            path: self.target,
            bytes: self.bytes,
            sha256: self.sha256,
            rotated,
        })
    }

    pub fn discard(self) -> io::Result<()> {
        fs::remove_file(&self.part)
    }
}

/// Streams a new artifact for `path` through `compression` into
/// `<path>.part`. `produce` writes the uncompressed content. The current
/// artifact is not touched; on failure the partial file is removed.
pub fn write_staged<F>(
    path: &Path,
    compression: CompressionKind,
    progress: bool,
    produce: F,
) -> io::Result<StagedArtifact>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let part = part_path(path);
    let written = write_new(&part, compression, progress, produce)
        .and_then(|bytes| Ok((bytes, sha256_file(&part)?)));
    match written {
        Ok((bytes, sha256)) => Ok(StagedArtifact {
            part,
            target: path.to_path_buf(),
            bytes,
            sha256,
        }),
        Err(e) => {
            let _ = fs::remove_file(&part);
            Err(e)
        }
    }
}

/// Writes a new artifact and, once it is complete, rotates the current one
/// at `path` to `.old` and puts the new one in its place. A failed write
/// leaves the current artifact and its `.old` as they were.
pub fn write_rotated<F>(
    path: &Path,
    compression: CompressionKind,
    progress: bool,
    produce: F,
) -> io::Result<ArtifactInfo>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    write_staged(path, compression, progress, produce)?.commit()
}

fn write_new<F>(
    part: &Path,
    compression: CompressionKind,
    progress: bool,
    produce: F,
) -> io::Result<u64>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let label = part
        .file_name()
        .map(|n| n.to_string_lossy().trim_end_matches(".part").to_string())
        .unwrap_or_default();
    let mut sink = ProgressWriter::new(compression.create(part)?, label.as_str(), progress);
    produce(&mut sink)?;
    sink.flush()?;
    let streamed = sink.bytes();
    sink.into_inner().finish()?;
    if progress {
        tracing::info!(
            artifact = %label,
            streamed = %crate::core::output::human_bytes(streamed),
            "transfer complete"
        );
    }
    Ok(streamed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_keeps_exactly_one_previous_generation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("files.tar");

        for generation in ["one", "two", "three"] {
            write_rotated(&path, CompressionKind::None, false, |w| {
                w.write_all(generation.as_bytes())
            })
            .unwrap();
        }

        assert_eq!(fs::read_to_string(&path).unwrap(), "three");
        assert_eq!(fs::read_to_string(with_old_suffix(&path)).unwrap(), "two");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn failed_write_leaves_current_generation_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.sql");
        fs::write(&path, "good").unwrap();
        fs::write(with_old_suffix(&path), "older").unwrap();

        let err = write_rotated(&path, CompressionKind::None, false, |w| {
            w.write_all(b"half")?;
            Err(io::Error::other("connection dropped"))
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "connection dropped");
        assert_eq!(fs::read_to_string(&path).unwrap(), "good");
        assert_eq!(fs::read_to_string(with_old_suffix(&path)).unwrap(), "older");
        assert!(!part_path(&path).exists());
    }

    #[test]
    fn staged_artifact_is_only_rotated_in_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.dump");
        fs::write(&path, "current").unwrap();

        let staged = write_staged(&path, CompressionKind::None, false, |w| w.write_all(b"next"))
            .unwrap();
        assert_eq!(fs::read_to_string(staged.path()).unwrap(), "next");
        assert_eq!(fs::read_to_string(&path).unwrap(), "current");
        assert!(!with_old_suffix(&path).exists());

        let info = staged.commit().unwrap();
        assert!(info.rotated);
        assert_eq!(info.bytes, 4);
        assert_eq!(fs::read_to_string(&path).unwrap(), "next");
        assert_eq!(fs::read_to_string(with_old_suffix(&path)).unwrap(), "current");
        assert!(!part_path(&path).exists());
    }

    #[test]
    fn discarded_artifact_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.dump");
        let staged = write_staged(&path, CompressionKind::None, false, |w| w.write_all(b"bad"))
            .unwrap();
        staged.discard().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn info_reports_digest_of_stored_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.dump");
        let info = write_rotated(&path, CompressionKind::None, false, |w| w.write_all(b"abc"))
            .unwrap();
        assert_eq!(info.bytes, 3);
        assert!(!info.rotated);
        assert_eq!(
            info.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
