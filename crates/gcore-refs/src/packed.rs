//! The `packed-refs` file and its in-memory table.
//!
//! ```text
//! # pack-refs with: peeled fully-peeled sorted
//! 6fa8a902cc1d18527e1355773c86721945475d37 refs/tags/v0.4
//! ^2ec0cb7959b0bf965d54f95453f5b4b34e8d3100
//! 8496071c1b46c854b31185ea97743be6a8774479 refs/heads/main
//! ```
//!
//! A `^` line records what the annotated tag above it peels to and is only
//! valid directly after a `refs/tags/` entry.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gcore_types::{FileStamp, IoError, IoResultExt, ObjectId, StrMap, OID_HEXSZ};

use crate::error::{RefError, Result};
use crate::lock::write_locked;
use crate::names::TAGS_DIR;
use crate::reference::{RefFlags, Reference};

pub const PACKED_REFS_HEADER: &str = "# pack-refs with: peeled fully-peeled sorted ";

/// One entry of the packed table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedRef {
    pub name: String,
    pub id: ObjectId,
    pub peeled: Option<ObjectId>,
    pub flags: RefFlags,
}

impl PackedRef {
    pub fn new(name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            name: name.into(),
            id,
            peeled: None,
            flags: RefFlags::NONE,
        }
    }

    pub fn set_peeled(&mut self, peeled: ObjectId) {
        self.peeled = Some(peeled);
        self.flags.insert(RefFlags::HAS_PEEL);
    }

    pub fn has_peel(&self) -> bool {
        self.flags.contains(RefFlags::HAS_PEEL)
    }

    pub fn to_reference(&self) -> Reference {
        let reference = Reference::direct(self.name.clone(), self.id).with_flags(RefFlags::PACKED);
        match self.peeled {
            Some(peeled) => reference.with_peeled(peeled),
            None => reference,
        }
    }
}

/// Name-indexed set of packed references.
#[derive(Debug, Default)]
pub struct PackedRefs {
    refs: StrMap<PackedRef>,
}

impl PackedRefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PackedRef> {
        self.refs.lookup(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.refs.contains_key(name)
    }

    /// Insert or replace the entry with the same name.
    pub fn insert(&mut self, entry: PackedRef) -> Result<Option<PackedRef>> {
        Ok(self.refs.insert(entry.name.clone(), entry)?)
    }

    pub fn remove(&mut self, name: &str) -> Option<PackedRef> {
        self.refs.remove(name)
    }

    /// Entries ordered by name.
    pub fn sorted(&self) -> Vec<&PackedRef> {
        let mut entries: Vec<&PackedRef> = self.refs.values().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.refs.keys().map(String::as_str)
    }

    /// An independent copy to modify before publishing.
    pub fn duplicate(&self) -> Result<Self> {
        let mut copy = Self::new();
        for entry in self.refs.values() {
            copy.insert(entry.clone())?;
        }
        Ok(copy)
    }

    /// Parse the file contents. Any malformed line fails the whole load.
    pub fn parse(content: &[u8], path: &Path) -> Result<Self> {
        let corrupt = |line: usize, reason: &str| {
            RefError::corrupted(path, format!("line {}: {reason}", line + 1))
        };
        let text = std::str::from_utf8(content)
            .map_err(|_| RefError::corrupted(path, "file is not valid UTF-8"))?;

        let mut table = Self::new();
        let mut last: Option<String> = None;
        let mut in_header = true;

        for (n, raw) in text.split_terminator('\n').enumerate() {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if in_header && line.starts_with('#') {
                continue;
            }
            in_header = false;

            if let Some(hex) = line.strip_prefix('^') {
                let name = last
                    .take()
                    .ok_or_else(|| corrupt(n, "peel line does not follow a reference"))?;
                if !name.starts_with(TAGS_DIR) {
                    return Err(corrupt(n, "peel line follows a reference that is not a tag"));
                }
                let peeled =
                    ObjectId::from_hex(hex).map_err(|_| corrupt(n, "invalid peeled object id"))?;
                if let Some(entry) = table.refs.lookup_mut(name.as_str()) {
                    entry.set_peeled(peeled);
                }
                continue;
            }

            if line.len() <= OID_HEXSZ + 1 || line.as_bytes()[OID_HEXSZ] != b' ' {
                return Err(corrupt(n, "expected '<oid> <name>'"));
            }
            let id = ObjectId::from_hex(&line[..OID_HEXSZ])
                .map_err(|_| corrupt(n, "invalid object id"))?;
            let name = &line[OID_HEXSZ + 1..];
            table.insert(PackedRef::new(name, id))?;
            last = Some(name.to_string());
        }
        Ok(table)
    }

    /// Render the sorted file contents, header included.
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(PACKED_REFS_HEADER.len() + 1 + self.len() * 64);
        out.push_str(PACKED_REFS_HEADER);
        out.push('\n');
        for entry in self.sorted() {
            out.push_str(&format!("{} {}\n", entry.id, entry.name));
            if let Some(peeled) = entry.peeled.filter(|_| entry.has_peel()) {
                out.push_str(&format!("^{peeled}\n"));
            }
        }
        out
    }
}

struct PackedState {
    stamp: Option<FileStamp>,
    table: Arc<PackedRefs>,
}

/// `packed-refs` on disk plus a cached parse of it.
///
/// Readers get an `Arc` snapshot. The file is stat'ed on every load and
/// reparsed only when its stamp changed; the parse happens outside the lock
/// and the new table is published afterwards, so a reader holding an old
/// snapshot keeps a consistent view.
pub struct PackedRefsFile {
    path: PathBuf,
    state: Mutex<PackedState>,
}

impl PackedRefsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(PackedState {
                stamp: None,
                table: Arc::new(PackedRefs::new()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> MutexGuard<'_, PackedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current table, reloading the file if it changed since the last load.
    pub fn load(&self) -> Result<Arc<PackedRefs>> {
        let stamp = FileStamp::of(&self.path).with_path(&self.path)?;
        {
            let state = self.state();
            if state.stamp == stamp {
                return Ok(Arc::clone(&state.table));
            }
        }

        let table = match stamp {
            None => PackedRefs::new(),
            Some(_) => match fs::read(&self.path) {
                Ok(content) => PackedRefs::parse(&content, &self.path)?,
                Err(e) if e.kind() == io::ErrorKind::NotFound => PackedRefs::new(),
                Err(e) => return Err(IoError::new(&self.path, e).into()),
            },
        };
        tracing::debug!(path = %self.path.display(), refs = table.len(), "reloaded packed-refs");

        let table = Arc::new(table);
        let mut state = self.state();
        state.stamp = stamp;
        state.table = Arc::clone(&table);
        Ok(table)
    }

    /// Atomically replace the file with `table` and publish it.
    pub fn write(&self, table: PackedRefs) -> Result<()> {
        write_locked(&self.path, table.serialize().as_bytes())?;
        let stamp = FileStamp::of(&self.path).with_path(&self.path)?;
        let mut state = self.state();
        state.stamp = stamp;
        state.table = Arc::new(table);
        Ok(())
    }
}

impl std::fmt::Debug for PackedRefsFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedRefsFile")
            .field("path", &self.path)
            .finish()
    }
}
