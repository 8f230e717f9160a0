use std::cmp::Ordering;
use std::fmt;

use gcore_types::{ObjectId, OID_RAWSZ};

use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectKind, RawObject};

/// Mode of a tree entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryMode {
    /// Normal file (0o100644).
    Regular,
    /// Executable file (0o100755).
    Executable,
    /// Symbolic link (0o120000).
    Symlink,
    /// Subtree / directory (0o040000).
    Directory,
    /// Submodule commit (0o160000).
    Gitlink,
}

impl EntryMode {
    pub fn mode_bits(&self) -> u32 {
        match self {
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Directory => 0o040000,
            Self::Gitlink => 0o160000,
        }
    }

    /// Parse from an octal mode value.
    ///
    /// `100664` is accepted as a regular file; older tools wrote it.
    pub fn from_mode_bits(bits: u32) -> Option<Self> {
        match bits {
            0o100644 | 0o100664 => Some(Self::Regular),
            0o100755 => Some(Self::Executable),
            0o120000 => Some(Self::Symlink),
            0o040000 => Some(Self::Directory),
            0o160000 => Some(Self::Gitlink),
            _ => None,
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Directory)
    }

    /// Kind of object an entry with this mode points at.
    pub fn object_kind(&self) -> ObjectKind {
        match self {
            Self::Directory => ObjectKind::Tree,
            Self::Gitlink => ObjectKind::Commit,
            _ => ObjectKind::Blob,
        }
    }
}

impl fmt::Display for EntryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06o}", self.mode_bits())
    }
}

/// A single entry in a tree object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: EntryMode,
    pub name: String,
    pub id: ObjectId,
}

impl TreeEntry {
    pub fn new(mode: EntryMode, name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            id,
        }
    }

    /// Git ordering: names compare bytewise, with directories compared as
    /// though their name ended in `/`.
    pub fn git_cmp(&self, other: &Self) -> Ordering {
        let a = self.name.as_bytes();
        let b = other.name.as_bytes();
        let common = a.len().min(b.len());
        match a[..common].cmp(&b[..common]) {
            Ordering::Equal => {}
            ord => return ord,
        }
        let tail = |name: &[u8], mode: EntryMode| match name.get(common) {
            Some(&c) => c,
            None if mode.is_tree() => b'/',
            None => 0,
        };
        tail(a, self.mode).cmp(&tail(b, other.mode))
    }
}

/// Directory listing object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// Build a tree; entries are put into git order.
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(TreeEntry::git_cmp);
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binary form: `"<octal mode> <name>\0<20 raw bytes>"` per entry.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * 48);
        for entry in &self.entries {
            // Trees are written without the leading zero.
            out.extend_from_slice(format!("{:o} ", entry.mode.mode_bits()).as_bytes());
            out.extend_from_slice(entry.name.as_bytes());
            out.push(0);
            out.extend_from_slice(entry.id.as_bytes());
        }
        out
    }

    pub fn parse(data: &[u8]) -> StoreResult<Self> {
        let bad = |reason: String| StoreError::malformed(ObjectKind::Tree, reason);
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let space = data[pos..]
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| bad(format!("missing mode separator at offset {pos}")))?;
            let mode_str = std::str::from_utf8(&data[pos..pos + space])
                .map_err(|_| bad(format!("non-ASCII mode at offset {pos}")))?;
            let bits = u32::from_str_radix(mode_str, 8)
                .map_err(|_| bad(format!("invalid mode {mode_str:?}")))?;
            let mode = EntryMode::from_mode_bits(bits)
                .ok_or_else(|| bad(format!("unsupported mode {mode_str}")))?;
            pos += space + 1;

            let nul = data[pos..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| bad(format!("unterminated name at offset {pos}")))?;
            let name = std::str::from_utf8(&data[pos..pos + nul])
                .map_err(|_| bad(format!("entry name at offset {pos} is not UTF-8")))?;
            if name.is_empty() || name.contains('/') || name == "." || name == ".." {
                return Err(bad(format!("invalid entry name {name:?}")));
            }
            pos += nul + 1;

            let raw = data
                .get(pos..pos + OID_RAWSZ)
                .ok_or_else(|| bad(format!("truncated id for {name:?}")))?;
            let id = ObjectId::from_raw(raw)?;
            pos += OID_RAWSZ;

            entries.push(TreeEntry::new(mode, name, id));
        }
        Ok(Self { entries })
    }

    pub fn to_raw(&self) -> RawObject {
        RawObject::new(ObjectKind::Tree, self.serialize())
    }

    pub fn from_raw(obj: &RawObject) -> StoreResult<Self> {
        if obj.kind != ObjectKind::Tree {
            return Err(StoreError::malformed(
                ObjectKind::Tree,
                format!("expected tree, got {}", obj.kind),
            ));
        }
        Self::parse(&obj.data)
    }
}
