//! The [`RefdbBackend`] trait defining the reference storage interface.

use gcore_types::ObjectId;

use crate::error::Result;
use crate::reference::Reference;

/// Storage backend for references.
///
/// Backends store and enumerate references by their full name. Name
/// validation, symbolic resolution and reflogs are handled by
/// [`Refdb`](crate::Refdb) on top of this trait.
pub trait RefdbBackend: Send + Sync {
    fn exists(&self, name: &str) -> Result<bool>;

    /// Read a reference by its full name. `Ok(None)` if it does not exist.
    fn lookup(&self, name: &str) -> Result<Option<Reference>>;

    /// Create or overwrite a reference.
    fn write(&self, reference: &Reference) -> Result<()>;

    /// Remove a reference from every tier that holds it.
    ///
    /// Fails with `NotFound` only if no tier had it.
    fn delete(&self, name: &str) -> Result<()>;

    /// Move `old` to `new`, keeping its target.
    fn rename(&self, old: &str, new: &str, force: bool) -> Result<Reference>;

    /// Fold every loose direct reference into the packed tier.
    fn compress(&self, peeler: &dyn Peeler) -> Result<()>;

    /// Visit every reference once. Stops when `cb` returns `false`.
    fn foreach(&self, cb: &mut dyn FnMut(&Reference) -> bool) -> Result<()>;

    /// Every reference name, sorted.
    fn names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        self.foreach(&mut |r| {
            names.push(r.name.clone());
            true
        })?;
        names.sort();
        Ok(names)
    }
}

pub type PeelError = Box<dyn std::error::Error + Send + Sync>;

/// Resolves annotated tags while packing references.
///
/// Returns the object a tag finally points to, or `None` if `id` is not a
/// tag object.
pub trait Peeler {
    fn peel(&self, id: &ObjectId) -> std::result::Result<Option<ObjectId>, PeelError>;
}

impl<F> Peeler for F
where
    F: Fn(&ObjectId) -> std::result::Result<Option<ObjectId>, PeelError>,
{
    fn peel(&self, id: &ObjectId) -> std::result::Result<Option<ObjectId>, PeelError> {
        self(id)
    }
}

/// Peeler for callers without an object database; records no peels.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPeel;

impl Peeler for NoPeel {
    fn peel(&self, _id: &ObjectId) -> std::result::Result<Option<ObjectId>, PeelError> {
        Ok(None)
    }
}
