use gcore_types::{ErrorCode, IoError, ObjectId, TableError, TypeError};

use crate::object::ObjectKind;

/// Errors from object database operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No backend holds the requested object.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// No object matches an abbreviated id.
    #[error("no object matches prefix {0}")]
    PrefixNotFound(String),

    /// More than one object matches an abbreviated id.
    #[error("ambiguous object prefix {0}")]
    Ambiguous(String),

    /// Abbreviated ids must carry at least a few hex digits.
    #[error("object prefix {prefix:?} is shorter than {min} characters")]
    PrefixTooShort { prefix: String, min: usize },

    /// Stored content hashes to a different id than it was filed under.
    #[error("hash mismatch for {id}: content hashes to {computed}")]
    HashMismatch { id: ObjectId, computed: ObjectId },

    /// The stored data is malformed or cannot be decoded.
    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: ObjectId, reason: String },

    /// A storage file (pack, index, ...) is damaged.
    #[error("corrupt object storage: {0}")]
    CorruptStorage(String),

    /// Object content failed to parse as its declared type.
    #[error("malformed {kind} object: {reason}")]
    Malformed { kind: ObjectKind, reason: String },

    /// The object exists but is not of the requested type.
    #[error("object {id} is a {actual}, not a {expected}")]
    TypeMismatch {
        id: ObjectId,
        expected: ObjectKind,
        actual: ObjectKind,
    },

    /// A write stream received a different number of bytes than declared.
    #[error("write stream declared {declared} bytes but received {written}")]
    StreamLength { declared: u64, written: u64 },

    /// Cache bucket counts must be a power of two of at least 8.
    #[error("invalid cache size {0}: must be a power of two >= 8")]
    InvalidCacheSize(usize),

    /// No registered backend accepts writes.
    #[error("no writable backend configured")]
    NoWritableBackend,

    /// Storage backend is read-only.
    #[error("backend is read-only")]
    ReadOnly,

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Io(#[from] IoError),
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) | Self::PrefixNotFound(_) => ErrorCode::NotFound,
            Self::Ambiguous(_) => ErrorCode::Ambiguous,
            Self::HashMismatch { .. }
            | Self::CorruptObject { .. }
            | Self::CorruptStorage(_)
            | Self::Malformed { .. } => ErrorCode::Corrupted,
            Self::PrefixTooShort { .. }
            | Self::TypeMismatch { .. }
            | Self::StreamLength { .. }
            | Self::InvalidCacheSize(_)
            | Self::NoWritableBackend
            | Self::ReadOnly => ErrorCode::Invalid,
            Self::Type(e) => e.code(),
            Self::Table(e) => e.code(),
            Self::Io(_) => ErrorCode::Io,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }

    pub(crate) fn malformed(kind: ObjectKind, reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
