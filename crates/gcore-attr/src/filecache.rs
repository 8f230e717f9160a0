//! Stamp-checked cache of parsed rule files.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use gcore_types::{FileStamp, StrMap};

struct Entry<T> {
    stamp: FileStamp,
    value: Arc<T>,
}

/// Parsed files keyed by name, reloaded when the file on disk changes.
///
/// Files are read and parsed with the lock released; the new entry is then
/// swapped in, so readers holding the previous `Arc` keep a consistent view.
pub(crate) struct FileCache<T> {
    entries: Mutex<StrMap<Entry<T>>>,
}

impl<T> FileCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(StrMap::new()),
        }
    }

    /// Return the parsed contents of `path`, or `None` if it is missing or
    /// unreadable. Read failures are logged and treated as an empty source.
    pub fn load(&self, key: &str, path: &Path, parse: impl FnOnce(&str) -> T) -> Option<Arc<T>> {
        let stamp = match FileStamp::of(path) {
            Ok(Some(stamp)) => stamp,
            Ok(None) => {
                self.lock().remove(key);
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot stat rule file");
                return None;
            }
        };

        if let Some(entry) = self.lock().lookup(key) {
            if entry.stamp == stamp {
                return Some(Arc::clone(&entry.value));
            }
        }

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read rule file");
                return None;
            }
        };
        let value = Arc::new(parse(&String::from_utf8_lossy(&bytes)));
        tracing::debug!(key, path = %path.display(), "loaded rule file");

        let entry = Entry {
            stamp,
            value: Arc::clone(&value),
        };
        if let Err(e) = self.lock().insert(key.to_string(), entry) {
            tracing::warn!(key, error = %e, "cannot cache rule file");
        }
        Some(value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Drop every entry.
    pub fn flush(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StrMap<Entry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
