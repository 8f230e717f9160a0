//! Repository handle for gcore.
//!
//! [`Repository`] opens a git directory and wires up everything stored in
//! it: the object database (loose objects plus packs) behind a striped
//! object cache, the reference database with reflogs, and the attribute and
//! ignore caches. Settings come from `$GIT_DIR/gcore.toml` ([`RepoConfig`]).
//!
//! # Example
//!
//! ```no_run
//! use gcore_repo::Repository;
//!
//! let repo = Repository::init("/tmp/demo", false)?;
//! let blob = repo.write_blob(b"hello")?;
//! repo.reference_create("refs/heads/main", blob, false, "demo")?;
//! # Ok::<(), gcore_repo::RepoError>(())
//! ```

pub mod config;
pub mod error;
pub mod repository;

pub use config::{
    AttrConfig, CacheConfig, CoreConfig, OdbConfig, RefsConfig, RepoConfig, UserConfig,
    CONFIG_FILE,
};
pub use error::{RepoError, RepoResult};
pub use repository::{Repository, DEFAULT_BRANCH, MIN_SHORT_ID};
