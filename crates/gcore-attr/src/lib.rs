//! Attribute and ignore rules for gcore.
//!
//! Attributes come from `.gitattributes` files, `$GIT_DIR/info/attributes`
//! and optional global and system files. Ignore rules come from
//! `.gitignore` files, `$GIT_DIR/info/exclude` and an optional global
//! excludes file.
//!
//! Both caches parse each source once and reparse it when its size,
//! mtime or inode changes.
//!
//! # Key Types
//!
//! - [`AttrCache`]: `get`, `get_many`, `foreach` and macros
//! - [`IgnoreCache`]: `is_ignored` plus session rules
//! - [`AttrValue`]: the state of one attribute for one path
//! - [`AttrFile`]: one parsed attribute source

pub mod cache;
pub mod error;
pub mod exclude;
pub mod file;
mod filecache;
mod path;
pub mod value;

pub use cache::{AttrCache, ATTRIBUTES_FILE, INFO_ATTRIBUTES};
pub use error::{AttrError, Result};
pub use exclude::{IgnoreCache, IGNORE_FILE, INFO_EXCLUDE};
pub use file::{AttrFile, AttrRule};
pub use value::{Assignment, AttrValue};
