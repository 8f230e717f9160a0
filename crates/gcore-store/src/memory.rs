use std::sync::{Arc, PoisonError, RwLock};

use gcore_types::{ObjectId, OidMap};

use crate::error::{StoreError, StoreResult};
use crate::object::RawObject;
use crate::traits::{BufferedWriteStream, OdbBackend, OdbWriteStream};
use crate::ObjectKind;

/// In-memory object backend.
///
/// Intended for tests and embedding. Objects live in an [`OidMap`] behind a
/// `RwLock` and are cloned on read and write.
pub struct InMemoryBackend {
    objects: Arc<RwLock<OidMap<RawObject>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(OidMap::new())),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted list of every stored id.
    pub fn all_ids(&self) -> Vec<ObjectId> {
        let map = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<ObjectId> = map.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Store an object under an arbitrary id, bypassing hashing. Lets tests
    /// plant corrupt content.
    pub fn insert_raw(&self, id: ObjectId, object: RawObject) -> StoreResult<()> {
        let mut map = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(id, object)?;
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OdbBackend for InMemoryBackend {
    fn read(&self, id: &ObjectId) -> StoreResult<Option<RawObject>> {
        let map = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.lookup(id).cloned())
    }

    fn read_prefix(
        &self,
        prefix: &ObjectId,
        len: usize,
    ) -> StoreResult<Option<(ObjectId, RawObject)>> {
        let map = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let mut found: Option<(ObjectId, RawObject)> = None;
        for (id, obj) in map.iter() {
            if !id.starts_with(prefix, len) {
                continue;
            }
            if found.is_some() {
                return Err(StoreError::Ambiguous(prefix.to_hex_prefix(len)));
            }
            found = Some((*id, obj.clone()));
        }
        Ok(found)
    }

    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        let map = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.contains_key(id))
    }

    fn write(&self, id: &ObjectId, object: &RawObject) -> StoreResult<()> {
        store_once(&self.objects, id, object.clone())
    }

    fn write_stream(&self, kind: ObjectKind, len: u64) -> StoreResult<Box<dyn OdbWriteStream>> {
        let objects = Arc::clone(&self.objects);
        Ok(Box::new(BufferedWriteStream::new(
            kind,
            len,
            Box::new(move |id, object| store_once(&objects, id, object)),
        )))
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn for_each(&self, cb: &mut dyn FnMut(&ObjectId) -> bool) -> StoreResult<()> {
        for id in self.all_ids() {
            if !cb(&id) {
                break;
            }
        }
        Ok(())
    }
}

fn store_once(objects: &RwLock<OidMap<RawObject>>, id: &ObjectId, object: RawObject) -> StoreResult<()> {
    let mut map = objects.write().unwrap_or_else(PoisonError::into_inner);
    let (i, outcome) = map.put(*id)?;
    if outcome.is_new() {
        map.set_value(i, object);
    }
    Ok(())
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("object_count", &self.len())
            .finish()
    }
}
