//! Foundation types for gcore.
//!
//! Every other gcore crate depends on `gcore-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`] — 20-byte content hash identifying an object
//! - [`OidShortener`] — shortest unique prefix over a set of ids
//! - [`HashTable`] — open-addressing table behind [`StrMap`], [`OidMap`] and [`IntMap`]
//! - [`Signature`] — identity plus timestamp for commits, tags and reflogs
//! - [`FileStamp`] — freshness token used by file-backed caches
//! - [`ErrorCode`] — the error taxonomy shared by all crates

pub mod error;
pub mod hashtable;
pub mod oid;
pub mod shorten;
pub mod signature;
pub mod stamp;

pub use error::{ErrorCode, IoError, IoResultExt, TypeError};
pub use hashtable::{
    HashTable, IntHash, IntMap, KeyHasher, OidHash, OidMap, OidSet, PutOutcome, StrHash, StrMap,
    StrSet, TableError,
};
pub use oid::{ObjectId, OID_HEXSZ, OID_MINPREFIXLEN, OID_RAWSZ};
pub use shorten::OidShortener;
pub use signature::{Signature, Time};
pub use stamp::FileStamp;
