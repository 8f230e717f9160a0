use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Coarse classification shared by every error type in the workspace.
///
/// Each crate keeps its own error enum with precise variants; `code()` on
/// those enums maps them onto this taxonomy so callers can branch on the
/// kind of failure without matching crate-specific variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    Corrupted,
    AlreadyExists,
    InvalidName,
    TooManyRedirects,
    OutOfMemory,
    Io,
    Ambiguous,
    /// Caller supplied an argument the operation cannot accept.
    Invalid,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::Corrupted => "corrupted",
            Self::AlreadyExists => "already exists",
            Self::InvalidName => "invalid name",
            Self::TooManyRedirects => "too many redirects",
            Self::OutOfMemory => "out of memory",
            Self::Io => "i/o error",
            Self::Ambiguous => "ambiguous",
            Self::Invalid => "invalid argument",
        };
        f.write_str(s)
    }
}

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("object id {0} was already added to the shortener")]
    DuplicateOid(String),

    #[error("unable to shorten object id: trie is full")]
    ShortenerFull,
}

impl TypeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidHex(_) | Self::InvalidLength { .. } | Self::InvalidSignature(_) => {
                ErrorCode::Invalid
            }
            Self::DuplicateOid(_) => ErrorCode::Ambiguous,
            Self::ShortenerFull => ErrorCode::OutOfMemory,
        }
    }
}

/// An I/O failure tagged with the path it happened on.
#[derive(Debug, Error)]
#[error("I/O error at {}: {source}", path.display())]
pub struct IoError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl IoError {
    pub fn new(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == io::ErrorKind::NotFound
    }
}

impl From<walkdir::Error> for IoError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(Path::to_path_buf).unwrap_or_default();
        let source = err
            .into_io_error()
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop while walking directory"));
        Self { path, source }
    }
}

/// Attach path context to `std::io` results.
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T, IoError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T, IoError> {
        self.map_err(|source| IoError::new(path, source))
    }
}
