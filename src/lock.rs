//! Single-instance run lock
//!
//! An advisory exclusive lock on a well-known file. The check never blocks:
//! a second run finds the lock held and aborts.

use crate::error::CollectorError;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub struct RunLock {
    lock: RwLock<File>,
    path: PathBuf,
}

impl RunLock {
    /// Open (creating if needed) the lock file
    pub fn open(path: &Path) -> Result<Self, CollectorError> {
        let lock_io = |source: io::Error| CollectorError::LockIo {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(lock_io)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(lock_io)?;
        Ok(Self {
            lock: RwLock::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock without waiting; held until the guard is dropped
    pub fn try_acquire(&mut self) -> Result<RwLockWriteGuard<'_, File>, CollectorError> {
        let path = self.path.clone();
        self.lock.try_write().map_err(|e| {
            if e.kind() == io::ErrorKind::WouldBlock {
                CollectorError::RunConflict { path }
            } else {
                CollectorError::LockIo { path, source: e }
            }
        })
    }
}
