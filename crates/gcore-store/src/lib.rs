//! Object storage for gcore.
//!
//! Every piece of repository content is an immutable object identified by
//! the SHA-1 of `"<type> <len>\0" + payload`, exactly as git computes it.
//! This crate holds the object model and the machinery that stores and
//! retrieves it.
//!
//! # Object Types
//!
//! - [`Blob`] -- raw file content
//! - [`Tree`] -- directory listing in git entry order
//! - [`Commit`] -- snapshot plus history, in canonical text form
//! - [`Tag`] -- annotated pointer to another object
//!
//! # Storage
//!
//! The [`Odb`] front dispatches to any number of [`OdbBackend`]s in
//! priority order and verifies the hash of everything it returns:
//!
//! - [`LooseBackend`] -- one zlib file per object under `objects/xx/`
//! - [`InMemoryBackend`] -- `OidMap`-based store for tests and embedding
//!
//! Pack files live in the `gcore-pack` crate, which plugs in as another
//! backend.
//!
//! # Caching
//!
//! [`ObjectCache`] is a fixed array of independently locked buckets, one
//! object each, handing out `Arc<CachedObject>` handles.

pub mod cache;
pub mod commit;
pub mod error;
pub mod hasher;
pub mod loose;
pub mod memory;
pub mod object;
pub mod odb;
pub mod tag;
pub mod traits;
pub mod tree;

pub use cache::{CachedObject, ObjectCache, DEFAULT_CACHE_BUCKETS, MIN_CACHE_BUCKETS};
pub use commit::Commit;
pub use error::{StoreError, StoreResult};
pub use hasher::{sha1_digest, ObjectHasher};
pub use loose::{LooseBackend, LooseWriteStream};
pub use memory::InMemoryBackend;
pub use object::{object_header, parse_header, Blob, ObjectKind, RawObject};
pub use odb::{Odb, LOOSE_PRIORITY, PACKED_PRIORITY};
pub use tag::Tag;
pub use traits::{BufferedWriteStream, ObjectSink, OdbBackend, OdbWriteStream};
pub use tree::{EntryMode, Tree, TreeEntry};
