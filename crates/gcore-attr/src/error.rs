//! Error types for attribute and ignore lookups.

use gcore_types::{ErrorCode, IoError, TableError};
use thiserror::Error;

/// Errors that can occur while evaluating attributes or ignore rules.
#[derive(Debug, Error)]
pub enum AttrError {
    /// A macro or attribute name contains characters git does not allow.
    #[error("invalid attribute name {name:?}")]
    InvalidName { name: String },

    /// A query path was empty or escaped the working directory.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// A session ignore rule could not be compiled.
    #[error("invalid ignore pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: ignore::Error,
    },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Io(#[from] IoError),
}

impl AttrError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidName { .. } => ErrorCode::InvalidName,
            Self::InvalidPath { .. } | Self::Pattern { .. } => ErrorCode::Invalid,
            Self::Table(e) => e.code(),
            Self::Io(_) => ErrorCode::Io,
        }
    }
}

/// Convenience alias for attribute results.
pub type Result<T> = std::result::Result<T, AttrError>;
