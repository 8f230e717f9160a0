//! Reference database for gcore.
//!
//! References give human-readable names (`refs/heads/main`, `HEAD`, ...) to
//! object ids, either directly or through another reference.
//!
//! # Architecture
//!
//! - **Loose references** are one file per name under the git directory,
//!   holding `<hex-id>\n` or `ref: <target>\n`.
//! - **Packed references** live together in `packed-refs`. A loose file
//!   always shadows a packed entry with the same name.
//! - **Reflogs** under `logs/` record every update of a reference.
//!
//! # Modules
//!
//! - [`error`]: error types for ref operations
//! - [`names`]: name normalization and availability checks
//! - [`reference`]: [`Reference`] and [`RefTarget`]
//! - [`traits`]: the [`RefdbBackend`] storage interface
//! - [`fs`]: the filesystem backend [`FsRefdb`]
//! - [`packed`]: the `packed-refs` parser and cache
//! - [`reflog`]: reflog reading and writing
//! - [`refdb`]: the [`Refdb`] front end

pub mod error;
pub mod fs;
mod lock;
pub mod names;
pub mod packed;
pub mod refdb;
pub mod reference;
pub mod reflog;
pub mod traits;

pub use error::{RefError, Result};
pub use fs::FsRefdb;
pub use names::{normalize_name, reference_available, RefNameFlags};
pub use packed::{PackedRef, PackedRefs, PackedRefsFile, PACKED_REFS_HEADER};
pub use refdb::{Refdb, DEFAULT_MAX_NESTING, MAX_NESTING};
pub use reference::{RefFilter, RefFlags, RefTarget, Reference};
pub use reflog::{Reflog, ReflogEntry, ReflogStore};
pub use traits::{NoPeel, PeelError, Peeler, RefdbBackend};
