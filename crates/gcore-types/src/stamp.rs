use std::io;
use std::path::Path;
use std::time::SystemTime;

/// Cheap freshness token for an on-disk file.
///
/// Two stamps compare equal when the file has the same modification time,
/// size and (on Unix) inode. Caches keep the stamp taken when they loaded a
/// file and reload when a fresh stamp differs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStamp {
    mtime: Option<SystemTime>,
    size: u64,
    ino: u64,
}

impl FileStamp {
    /// Stamp `path`, or `None` if it does not exist.
    pub fn of(path: &Path) -> io::Result<Option<Self>> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(Some(Self {
                mtime: meta.modified().ok(),
                size: meta.len(),
                ino: inode(&meta),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// True if `path` no longer matches this stamp (including if it vanished).
    pub fn is_stale(&self, path: &Path) -> io::Result<bool> {
        Ok(Self::of(path)?.as_ref() != Some(self))
    }
}

#[cfg(unix)]
fn inode(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode(_meta: &std::fs::Metadata) -> u64 {
    0
}
