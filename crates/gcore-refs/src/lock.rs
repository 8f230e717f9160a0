use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use gcore_types::{IoError, IoResultExt};

use crate::error::{RefError, Result};
use crate::names::LOCK_EXT;

/// Exclusive `<file>.lock` used to replace a file atomically.
///
/// Creating the lock fails with [`RefError::Locked`] if another writer holds
/// it. Content is written to the lock and renamed over the target on
/// [`commit`](Self::commit); dropping an uncommitted lock removes it.
#[derive(Debug)]
pub(crate) struct LockFile {
    target: PathBuf,
    lock_path: PathBuf,
    file: Option<File>,
}

impl LockFile {
    pub(crate) fn acquire(target: &Path) -> Result<Self> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }
        let mut lock_name = target.as_os_str().to_owned();
        lock_name.push(LOCK_EXT);
        let lock_path = PathBuf::from(lock_name);

        let file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(RefError::Locked { path: lock_path });
            }
            Err(e) => return Err(IoError::new(lock_path, e).into()),
        };
        Ok(Self {
            target: target.to_path_buf(),
            lock_path,
            file: Some(file),
        })
    }

    pub(crate) fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(bytes).with_path(&self.lock_path)?;
        }
        Ok(())
    }

    /// Flush the lock to disk and rename it over the target.
    pub(crate) fn commit(mut self) -> Result<()> {
        if let Some(file) = &self.file {
            file.sync_all().with_path(&self.lock_path)?;
        }
        fs::rename(&self.lock_path, &self.target).with_path(&self.target)?;
        self.file = None;
        Ok(())
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

/// Replace `target` with `bytes` through a lock file.
pub(crate) fn write_locked(target: &Path, bytes: &[u8]) -> Result<()> {
    let mut lock = LockFile::acquire(target)?;
    lock.write_all(bytes)?;
    lock.commit()
}
