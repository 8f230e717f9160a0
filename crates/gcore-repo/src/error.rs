use std::path::PathBuf;

use gcore_types::{ErrorCode, IoError, TableError, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("not a gcore repository: {}", path.display())]
    NotARepository { path: PathBuf },

    #[error("operation requires a working directory, but {} is bare", path.display())]
    BareRepository { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot parse {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot serialize configuration: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error(transparent)]
    Store(#[from] gcore_store::StoreError),

    #[error(transparent)]
    Pack(#[from] gcore_pack::PackError),

    #[error(transparent)]
    Ref(#[from] gcore_refs::RefError),

    #[error(transparent)]
    Attr(#[from] gcore_attr::AttrError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Io(#[from] IoError),
}

impl RepoError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotARepository { .. } => ErrorCode::NotFound,
            Self::BareRepository { .. } | Self::Config(_) | Self::ConfigWrite(_) => {
                ErrorCode::Invalid
            }
            Self::ConfigParse { .. } => ErrorCode::Corrupted,
            Self::Store(e) => e.code(),
            Self::Pack(e) => e.code(),
            Self::Ref(e) => e.code(),
            Self::Attr(e) => e.code(),
            Self::Type(e) => e.code(),
            Self::Table(e) => e.code(),
            Self::Io(_) => ErrorCode::Io,
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;
