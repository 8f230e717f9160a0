//! Reference logs under `$GIT_DIR/logs/`.
//!
//! Each line records one update of a reference:
//!
//! ```text
//! <old-hex> <new-hex> Name <email> 1234567890 +0000\t<message>
//! ```
//!
//! Lines are stored oldest first; [`Reflog`] indexes them newest first, so
//! entry 0 is the most recent update.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use gcore_types::{IoError, IoResultExt, ObjectId, Signature, OID_HEXSZ};

use crate::error::{RefError, Result};
use crate::fs::prune_empty_parents;
use crate::lock::write_locked;
use crate::names::{HEAD, HEADS_DIR, NOTES_DIR, REMOTES_DIR};

/// One recorded update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReflogEntry {
    pub old: ObjectId,
    pub new: ObjectId,
    pub committer: Signature,
    pub message: String,
}

impl ReflogEntry {
    fn to_line(&self) -> String {
        if self.message.is_empty() {
            format!("{} {} {}\n", self.old, self.new, self.committer)
        } else {
            format!("{} {} {}\t{}\n", self.old, self.new, self.committer, self.message)
        }
    }

    fn parse(line: &str) -> Option<Self> {
        let bytes = line.as_bytes();
        if bytes.len() < 2 * OID_HEXSZ + 2
            || bytes[OID_HEXSZ] != b' '
            || bytes[2 * OID_HEXSZ + 1] != b' '
        {
            return None;
        }
        let old = ObjectId::from_hex(&line[..OID_HEXSZ]).ok()?;
        let new = ObjectId::from_hex(&line[OID_HEXSZ + 1..2 * OID_HEXSZ + 1]).ok()?;
        let rest = &line[2 * OID_HEXSZ + 2..];
        let (sig, message) = match rest.split_once('\t') {
            Some((sig, message)) => (sig, message),
            None => (rest, ""),
        };
        let committer = Signature::parse(sig).ok()?;
        Some(Self {
            old,
            new,
            committer,
            message: message.to_string(),
        })
    }
}

/// Collapse a message onto one line.
fn clean_message(message: &str) -> String {
    message
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The log of one reference, loaded in memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reflog {
    name: String,
    /// Oldest first, as on disk.
    entries: Vec<ReflogEntry>,
}

impl Reflog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry `idx`, counting back from the newest (0).
    pub fn entry(&self, idx: usize) -> Option<&ReflogEntry> {
        let pos = self.entries.len().checked_sub(idx + 1)?;
        self.entries.get(pos)
    }

    /// Entries from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &ReflogEntry> + '_ {
        self.entries.iter().rev()
    }

    /// Record an update to `new`. The old id is taken from the newest entry.
    pub fn append(&mut self, new: ObjectId, committer: Signature, message: &str) {
        let old = self.entries.last().map(|e| e.new).unwrap_or_else(ObjectId::zero);
        self.entries.push(ReflogEntry {
            old,
            new,
            committer,
            message: clean_message(message),
        });
    }

    /// Remove entry `idx`.
    ///
    /// With `rewrite_previous` the entry that followed the dropped one has
    /// its old id rewritten so the history stays continuous; dropping the
    /// oldest entry zeroes the old id of the new oldest entry instead.
    pub fn drop_entry(&mut self, idx: usize, rewrite_previous: bool) -> Result<()> {
        let count = self.entries.len();
        let pos = count
            .checked_sub(idx + 1)
            .ok_or_else(|| RefError::NoReflogEntry {
                name: self.name.clone(),
                index: idx,
            })?;
        let removed = self.entries.remove(pos);

        if !rewrite_previous || idx == 0 || count == 1 {
            return Ok(());
        }
        // The newer neighbour now sits where the dropped entry was.
        if let Some(newer) = self.entries.get_mut(pos) {
            newer.old = if pos == 0 { ObjectId::zero() } else { removed.old };
        }
        Ok(())
    }

    fn parse(name: &str, text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (n, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let entry = ReflogEntry::parse(line).ok_or_else(|| RefError::CorruptReflog {
                name: name.to_string(),
                line: n + 1,
            })?;
            entries.push(entry);
        }
        Ok(Self {
            name: name.to_string(),
            entries,
        })
    }

    fn serialize(&self) -> String {
        self.entries.iter().map(ReflogEntry::to_line).collect()
    }
}

/// Whether an update to `name` should be logged.
///
/// With `log_all_ref_updates` on, branches, remote-tracking refs, notes and
/// `HEAD` always get a log. Anything else is logged only if it already has
/// one.
pub fn should_log(name: &str, log_all_ref_updates: bool, has_log: bool) -> bool {
    if has_log {
        return true;
    }
    log_all_ref_updates
        && (name == HEAD
            || name.starts_with(HEADS_DIR)
            || name.starts_with(REMOTES_DIR)
            || name.starts_with(NOTES_DIR))
}

/// Reflog files under a git directory.
#[derive(Clone, Debug)]
pub struct ReflogStore {
    logs_dir: PathBuf,
}

impl ReflogStore {
    pub fn new(git_dir: &Path) -> Self {
        Self {
            logs_dir: git_dir.join("logs"),
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.logs_dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    /// Load the log for `name`; a missing log reads as empty.
    pub fn read(&self, name: &str) -> Result<Reflog> {
        let path = self.path_for(name);
        match fs::read_to_string(&path) {
            Ok(text) => Reflog::parse(name, &text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Reflog::new(name)),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => Err(RefError::CorruptReflog {
                name: name.to_string(),
                line: 0,
            }),
            Err(e) => Err(IoError::new(path, e).into()),
        }
    }

    /// Append one entry to the log file, creating it if needed.
    pub fn append(
        &self,
        name: &str,
        old: &ObjectId,
        new: &ObjectId,
        committer: &Signature,
        message: &str,
    ) -> Result<()> {
        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }
        let entry = ReflogEntry {
            old: *old,
            new: *new,
            committer: committer.clone(),
            message: clean_message(message),
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_path(&path)?;
        file.write_all(entry.to_line().as_bytes()).with_path(&path)?;
        Ok(())
    }

    pub fn entry_count(&self, name: &str) -> Result<usize> {
        Ok(self.read(name)?.len())
    }

    pub fn entry(&self, name: &str, idx: usize) -> Result<ReflogEntry> {
        self.read(name)?
            .entry(idx)
            .cloned()
            .ok_or_else(|| RefError::NoReflogEntry {
                name: name.to_string(),
                index: idx,
            })
    }

    /// Drop entry `idx` from the stored log and rewrite it.
    pub fn drop_entry(&self, name: &str, idx: usize, rewrite_previous: bool) -> Result<()> {
        let mut log = self.read(name)?;
        log.drop_entry(idx, rewrite_previous)?;
        self.write(&log)
    }

    /// Replace the stored log with `log`.
    pub fn write(&self, log: &Reflog) -> Result<()> {
        write_locked(&self.path_for(log.name()), log.serialize().as_bytes())
    }

    /// Move the log of `old` to `new`, if there is one.
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        let from = self.path_for(old);
        if !from.is_file() {
            return Ok(());
        }
        let to = self.path_for(new);
        // Park the file first: `new` may need the directory `old` occupies.
        let parked = tempfile::Builder::new()
            .prefix(".tmp-renamed-log")
            .tempfile_in(&self.logs_dir)
            .with_path(&self.logs_dir)?
            .into_temp_path();
        fs::rename(&from, &parked).with_path(&from)?;
        prune_empty_parents(&from, &self.logs_dir);

        let placed = to
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| fs::rename(&parked, &to));
        let Err(e) = placed else {
            return Ok(());
        };
        let err = RefError::from(IoError::new(&to, e));
        let restored = from
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| fs::rename(&parked, &from));
        match restored {
            Ok(()) => {
                tracing::warn!(old, new, error = %err, "reflog rename failed, restored old log");
                Err(err)
            }
            Err(rollback) => {
                // Leave the log where it is rather than deleting it with the temp path.
                let stranded = parked
                    .keep()
                    .map_err(|e| RefError::from(IoError::new(&from, e.error)))?;
                tracing::error!(old, new, error = %err, stranded = %stranded.display(), "reflog rename failed and old log could not be restored");
                Err(RefError::RenameRollback {
                    old: old.to_string(),
                    new: new.to_string(),
                    source: Box::new(err),
                    rollback: Box::new(IoError::new(stranded, rollback).into()),
                })
            }
        }
    }

    /// Remove the log of `name`. Missing logs are fine.
    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                prune_empty_parents(&path, &self.logs_dir);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IoError::new(path, e).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcore_types::{ErrorCode, Time};

    fn sig() -> Signature {
        Signature::new("Ann Author", "ann@example.com", Time::new(1_700_000_000, 60)).unwrap()
    }

    fn id(b: u8) -> ObjectId {
        ObjectId::from_hash([b; 20])
    }

    #[test]
    fn append_and_read_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReflogStore::new(dir.path());
        store.append("refs/heads/main", &ObjectId::zero(), &id(1), &sig(), "branch: Created").unwrap();
        store.append("refs/heads/main", &id(1), &id(2), &sig(), "commit: second\n\nbody").unwrap();

        let log = store.read("refs/heads/main").unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.entry(0).unwrap().new, id(2));
        assert_eq!(log.entry(0).unwrap().message, "commit: second body");
        assert_eq!(log.entry(1).unwrap().old, ObjectId::zero());
        assert!(log.entry(2).is_none());
        assert_eq!(store.entry_count("refs/heads/main").unwrap(), 2);

        let raw = fs::read_to_string(store.path_for("refs/heads/main")).unwrap();
        let first = raw.lines().next().unwrap();
        assert_eq!(
            first,
            format!("{} {} Ann Author <ann@example.com> 1700000000 +0100\tbranch: Created", ObjectId::zero(), id(1))
        );
    }

    #[test]
    fn missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReflogStore::new(dir.path());
        assert!(store.read("refs/heads/none").unwrap().is_empty());
        assert_eq!(store.entry("refs/heads/none", 0).unwrap_err().code(), ErrorCode::NotFound);
    }

    #[test]
    fn malformed_line_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReflogStore::new(dir.path());
        let path = store.path_for("HEAD");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not a reflog line\n").unwrap();
        assert!(matches!(
            store.read("HEAD"),
            Err(RefError::CorruptReflog { line: 1, .. })
        ));
    }

    #[test]
    fn drop_rewrites_history() {
        let mut log = Reflog::new("refs/heads/x");
        for b in 1..=4 {
            log.append(id(b), sig(), "update");
        }
        // newest..oldest: 4 3 2 1
        log.drop_entry(1, true).unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log.entry(0).unwrap().new, id(4));
        assert_eq!(log.entry(0).unwrap().old, id(2));

        log.drop_entry(2, true).unwrap();
        assert_eq!(log.entry(1).unwrap().new, id(2));
        assert_eq!(log.entry(1).unwrap().old, ObjectId::zero());

        assert!(log.drop_entry(5, false).is_err());
    }

    #[test]
    fn write_rename_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReflogStore::new(dir.path());
        let mut log = Reflog::new("refs/heads/a");
        log.append(id(1), sig(), "one");
        store.write(&log).unwrap();
        assert_eq!(store.read("refs/heads/a").unwrap(), log);

        store.rename("refs/heads/a", "refs/heads/a/b").unwrap();
        assert!(!store.exists("refs/heads/a"));
        assert_eq!(store.read("refs/heads/a/b").unwrap().len(), 1);

        store.delete("refs/heads/a/b").unwrap();
        assert!(!store.exists("refs/heads/a/b"));
        assert!(!store.logs_dir().join("refs/heads/a").exists());
        store.delete("refs/heads/a/b").unwrap();
    }

    #[test]
    fn failed_rename_restores_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReflogStore::new(dir.path());
        let mut log = Reflog::new("refs/heads/a");
        log.append(id(1), sig(), "one");
        store.write(&log).unwrap();
        let mut other = Reflog::new("refs/heads/x");
        other.append(id(2), sig(), "two");
        store.write(&other).unwrap();

        // `logs/refs/heads/x` is a file, so `x/y` cannot be created.
        let err = store.rename("refs/heads/a", "refs/heads/x/y").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Io);
        assert_eq!(store.read("refs/heads/a").unwrap(), log);
        assert_eq!(store.read("refs/heads/x").unwrap(), other);

        let leftovers: Vec<_> = fs::read_dir(store.logs_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n.to_string_lossy().starts_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn logging_policy() {
        assert!(should_log("refs/heads/main", true, false));
        assert!(should_log("HEAD", true, false));
        assert!(should_log("refs/notes/commits", true, false));
        assert!(!should_log("refs/tags/v1", true, false));
        assert!(should_log("refs/tags/v1", true, true));
        assert!(!should_log("refs/heads/main", false, false));
    }
}
