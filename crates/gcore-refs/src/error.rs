//! Error types for reference operations.

use std::path::PathBuf;

use gcore_types::{ErrorCode, IoError, TableError, TypeError};
use thiserror::Error;

/// Errors that can occur during reference operations.
#[derive(Debug, Error)]
pub enum RefError {
    /// The reference was not found.
    #[error("reference not found: {name}")]
    NotFound { name: String },

    /// A reference with this name already exists.
    #[error("reference already exists: {name}")]
    AlreadyExists { name: String },

    /// The name would shadow or be shadowed by an existing reference's path.
    #[error("reference {name} conflicts with existing reference {existing}")]
    NameConflict { name: String, existing: String },

    /// The reference name failed normalization.
    #[error("invalid reference name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// A symbolic chain was longer than the configured nesting bound.
    #[error("reference {name} exceeds {max} levels of symbolic nesting")]
    TooManyRedirects { name: String, max: usize },

    /// A loose ref or the packed-refs file could not be parsed.
    #[error("corrupted reference storage at {}: {reason}", path.display())]
    Corrupted { path: PathBuf, reason: String },

    /// A reflog line could not be parsed.
    #[error("corrupted reflog for {name} at line {line}")]
    CorruptReflog { name: String, line: usize },

    /// Someone else holds the `.lock` file.
    #[error("reference is locked: {}", path.display())]
    Locked { path: PathBuf },

    /// The operation needs a direct reference but found a symbolic one.
    #[error("reference {name} is symbolic, not direct")]
    NotDirect { name: String },

    /// Reflog index past the last entry.
    #[error("reflog for {name} has no entry {index}")]
    NoReflogEntry { name: String, index: usize },

    /// Peeling a tag for the packed file failed.
    #[error("unable to peel {name}: {reason}")]
    Peel { name: String, reason: String },

    /// A rename failed and the old reference could not be restored either.
    #[error("rename of {old} to {new} failed and rollback also failed: {rollback}")]
    RenameRollback {
        old: String,
        new: String,
        #[source]
        source: Box<RefError>,
        rollback: Box<RefError>,
    },

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Io(#[from] IoError),
}

impl RefError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } | Self::NoReflogEntry { .. } => ErrorCode::NotFound,
            Self::AlreadyExists { .. } | Self::NameConflict { .. } | Self::Locked { .. } => {
                ErrorCode::AlreadyExists
            }
            Self::InvalidName { .. } => ErrorCode::InvalidName,
            Self::TooManyRedirects { .. } => ErrorCode::TooManyRedirects,
            Self::Corrupted { .. } | Self::CorruptReflog { .. } => ErrorCode::Corrupted,
            Self::NotDirect { .. } | Self::Peel { .. } => ErrorCode::Invalid,
            Self::RenameRollback { rollback, .. } => rollback.code(),
            Self::Type(e) => e.code(),
            Self::Table(e) => e.code(),
            Self::Io(_) => ErrorCode::Io,
        }
    }

    pub(crate) fn not_found(name: &str) -> Self {
        Self::NotFound {
            name: name.to_string(),
        }
    }

    pub(crate) fn invalid_name(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupted(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for ref operations.
pub type Result<T> = std::result::Result<T, RefError>;
