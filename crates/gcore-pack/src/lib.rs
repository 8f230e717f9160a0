//! Git pack files for gcore.
//!
//! Reads and writes git's pack v2 / index v2 formats so repositories can hold
//! many objects in one zlib-compressed, delta-encoded file.
//!
//! # Architecture
//!
//! - **Pack file** (`.pack`): `PACK` header, entries, SHA-1 trailer
//! - **Pack index** (`.idx`): fan-out table + sorted ids, CRC32s and offsets
//! - **PackWriter**: builds packs, optionally delta-compressing objects
//! - **PackReader**: random access through the index, resolving delta chains
//! - **PackBackend**: exposes a directory of packs to the object database

pub mod backend;
pub mod delta;
pub mod entry;
pub mod error;
pub mod index;
pub mod reader;
pub mod writer;

pub use backend::PackBackend;
pub use delta::{apply_delta, encode_delta, DeltaError};
pub use entry::{EntryHeader, EntryKind, OBJ_OFS_DELTA, OBJ_REF_DELTA};
pub use error::{PackError, PackResult};
pub use index::PackIndex;
pub use reader::{PackReader, DEFAULT_MAX_DELTA_DEPTH};
pub use writer::{DeltaBaseRef, PackFile, PackWriter, DEFAULT_WRITE_DEPTH};
