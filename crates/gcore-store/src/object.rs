use std::fmt;
use std::str::FromStr;

use gcore_types::ObjectId;

use crate::hasher::ObjectHasher;

/// The four object types of the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    /// Name used in object headers (`"blob"`, `"tree"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }

    /// Numeric type code used by the pack format.
    pub fn type_code(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
        }
    }

    pub fn from_type_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Commit),
            2 => Some(Self::Tree),
            3 => Some(Self::Blob),
            4 => Some(Self::Tag),
            _ => None,
        }
    }

    pub fn from_bytes(name: &[u8]) -> Option<Self> {
        match name {
            b"commit" => Some(Self::Commit),
            b"tree" => Some(Self::Tree),
            b"blob" => Some(Self::Blob),
            b"tag" => Some(Self::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes()).ok_or_else(|| format!("unknown object type {s:?}"))
    }
}

/// A typed, uninterpreted object payload.
///
/// `RawObject` is the unit of storage. Backends never look inside `data`;
/// the typed wrappers ([`Commit`](crate::Commit), [`Tree`](crate::Tree), ...)
/// parse it on demand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawObject {
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

impl RawObject {
    pub fn new(kind: ObjectKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    /// Size of the payload in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Compute the content-addressed id over header and payload.
    pub fn compute_id(&self) -> ObjectId {
        ObjectHasher::hash(self.kind, &self.data)
    }
}

/// Canonical object header: `"<type> <decimal length>\0"`.
pub fn object_header(kind: ObjectKind, len: usize) -> Vec<u8> {
    format!("{} {}\0", kind.as_str(), len).into_bytes()
}

/// Split a decompressed object into `(kind, declared length, header length)`.
pub fn parse_header(buf: &[u8]) -> Result<(ObjectKind, usize, usize), String> {
    let nul = buf
        .iter()
        .take(64)
        .position(|&b| b == 0)
        .ok_or("header is not NUL-terminated")?;
    let header = &buf[..nul];
    let space = header
        .iter()
        .position(|&b| b == b' ')
        .ok_or("header has no type/size separator")?;
    let kind = ObjectKind::from_bytes(&header[..space]).ok_or_else(|| {
        format!(
            "unknown object type {:?}",
            String::from_utf8_lossy(&header[..space])
        )
    })?;
    let size_str = std::str::from_utf8(&header[space + 1..]).map_err(|_| "size is not ASCII")?;
    if size_str.is_empty() || !size_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid object size {size_str:?}"));
    }
    let size = size_str
        .parse::<usize>()
        .map_err(|e| format!("invalid object size {size_str:?}: {e}"))?;
    Ok((kind, size, nul + 1))
}

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// Raw file content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
}

impl Blob {
    /// How far into the content to look for a NUL byte.
    const BINARY_PROBE: usize = 8000;

    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Heuristic: content with a NUL byte near the start is binary.
    pub fn is_binary(&self) -> bool {
        self.data.iter().take(Self::BINARY_PROBE).any(|&b| b == 0)
    }

    pub fn to_raw(&self) -> RawObject {
        RawObject::new(ObjectKind::Blob, self.data.clone())
    }

    pub fn from_raw(obj: &RawObject) -> Option<Self> {
        (obj.kind == ObjectKind::Blob).then(|| Self::new(obj.data.clone()))
    }
}
