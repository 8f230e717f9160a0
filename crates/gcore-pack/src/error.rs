use gcore_store::StoreError;
use gcore_types::{ErrorCode, IoError, ObjectId, TableError, TypeError};
use thiserror::Error;

use crate::delta::DeltaError;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("invalid {what} magic: got {actual:02x?}")]
    InvalidMagic { what: &'static str, actual: Vec<u8> },

    #[error("unsupported {what} version: {version}")]
    UnsupportedVersion { what: &'static str, version: u32 },

    #[error("{what} checksum mismatch")]
    ChecksumMismatch { what: &'static str },

    #[error("corrupt pack entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("CRC32 mismatch for object {id}")]
    CrcMismatch { id: ObjectId },

    #[error("bad delta at offset {offset}: {source}")]
    Delta {
        offset: u64,
        #[source]
        source: DeltaError,
    },

    #[error("delta base not found: {0}")]
    DeltaBaseNotFound(ObjectId),

    #[error("delta chain at offset {offset} is deeper than {max}")]
    DeltaChainTooDeep { offset: u64, max: usize },

    #[error("index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("ambiguous object prefix {0}")]
    Ambiguous(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Io(#[from] IoError),
}

impl PackError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidMagic { .. }
            | Self::UnsupportedVersion { .. }
            | Self::ChecksumMismatch { .. }
            | Self::CorruptEntry { .. }
            | Self::CrcMismatch { .. }
            | Self::Delta { .. }
            | Self::DeltaChainTooDeep { .. }
            | Self::IndexCorrupted(_) => ErrorCode::Corrupted,
            Self::DeltaBaseNotFound(_) => ErrorCode::NotFound,
            Self::Ambiguous(_) => ErrorCode::Ambiguous,
            Self::Store(e) => e.code(),
            Self::Type(e) => e.code(),
            Self::Table(e) => e.code(),
            Self::Io(_) => ErrorCode::Io,
        }
    }

    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptEntry {
            offset,
            reason: reason.into(),
        }
    }
}

impl From<PackError> for StoreError {
    fn from(err: PackError) -> Self {
        match err {
            PackError::Store(e) => e,
            PackError::Type(e) => StoreError::Type(e),
            PackError::Table(e) => StoreError::Table(e),
            PackError::Io(e) => StoreError::Io(e),
            PackError::Ambiguous(prefix) => StoreError::Ambiguous(prefix),
            PackError::DeltaBaseNotFound(id) => {
                StoreError::CorruptStorage(format!("pack delta base {id} is missing"))
            }
            other => StoreError::CorruptStorage(other.to_string()),
        }
    }
}

pub type PackResult<T> = Result<T, PackError>;
