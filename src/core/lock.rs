//! Per-repository run lock.
//!
//! The lock is an OS advisory lock on `<name>.lock`, so a crashed run never
//! leaves a stale lock behind.

use crate::core::error::RepokeepError;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct RepoLock {
    file: File,
    path: PathBuf,
}

impl RepoLock {
    pub fn acquire(path: &Path, repo: &str) -> Result<Self, RepokeepError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| RepokeepError::storage(path, e))?;
        match file.try_lock() {
            Ok(()) => Ok(Self {
                file,
                path: path.to_path_buf(),
            }),
            Err(TryLockError::WouldBlock) => Err(RepokeepError::Locked {
                repo: repo.to_string(),
            }),
            Err(TryLockError::Error(e)) => Err(RepokeepError::storage(path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
