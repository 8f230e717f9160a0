use std::sync::{Arc, PoisonError, RwLock};

use gcore_types::{ObjectId, OidSet, OID_HEXSZ, OID_MINPREFIXLEN};

use crate::error::{StoreError, StoreResult};
use crate::hasher::ObjectHasher;
use crate::object::{ObjectKind, RawObject};
use crate::traits::{OdbBackend, OdbWriteStream};

/// Priority of the loose-object backend in a default repository.
pub const LOOSE_PRIORITY: i32 = 2;

/// Priority of the packfile backend in a default repository.
pub const PACKED_PRIORITY: i32 = 1;

struct BackendEntry {
    priority: i32,
    backend: Arc<dyn OdbBackend>,
}

/// The object database: an ordered set of backends behind one interface.
///
/// Reads ask each backend in descending priority and verify that the
/// returned content hashes to the requested id. Writes go to the first
/// writable backend unless some backend already has the object.
pub struct Odb {
    backends: RwLock<Vec<BackendEntry>>,
}

impl Odb {
    /// An empty database with no backends.
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(Vec::new()),
        }
    }

    /// Register a backend. Higher priorities are consulted first; equal
    /// priorities keep registration order.
    pub fn add_backend(&self, backend: Arc<dyn OdbBackend>, priority: i32) {
        let mut backends = self.backends.write().unwrap_or_else(PoisonError::into_inner);
        backends.push(BackendEntry { priority, backend });
        backends.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn backend_count(&self) -> usize {
        self.backends.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn OdbBackend>> {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| Arc::clone(&e.backend))
            .collect()
    }

    /// Hash an object without storing it.
    pub fn hash(kind: ObjectKind, data: &[u8]) -> ObjectId {
        ObjectHasher::hash(kind, data)
    }

    /// Read and verify an object.
    pub fn read(&self, id: &ObjectId) -> StoreResult<RawObject> {
        for backend in self.snapshot() {
            if let Some(obj) = backend.read(id)? {
                let computed = obj.compute_id();
                if computed != *id {
                    return Err(StoreError::HashMismatch { id: *id, computed });
                }
                return Ok(obj);
            }
        }
        Err(StoreError::NotFound(*id))
    }

    /// Type and size of an object, without necessarily inflating it.
    pub fn read_header(&self, id: &ObjectId) -> StoreResult<(ObjectKind, usize)> {
        for backend in self.snapshot() {
            if let Some(header) = backend.read_header(id)? {
                return Ok(header);
            }
        }
        Err(StoreError::NotFound(*id))
    }

    /// Resolve an abbreviated hex id to a unique object.
    pub fn read_prefix(&self, short: &str) -> StoreResult<(ObjectId, RawObject)> {
        if short.len() < OID_MINPREFIXLEN {
            return Err(StoreError::PrefixTooShort {
                prefix: short.to_string(),
                min: OID_MINPREFIXLEN,
            });
        }
        if short.len() >= OID_HEXSZ {
            let id = ObjectId::from_hex(short)?;
            return Ok((id, self.read(&id)?));
        }

        let prefix = ObjectId::from_prefix(short)?;
        let mut found: Option<(ObjectId, RawObject)> = None;
        for backend in self.snapshot() {
            if let Some((id, obj)) = backend.read_prefix(&prefix, short.len())? {
                match &found {
                    Some((seen, _)) if *seen != id => {
                        return Err(StoreError::Ambiguous(short.to_string()));
                    }
                    Some(_) => {}
                    None => found = Some((id, obj)),
                }
            }
        }
        let (id, obj) = found.ok_or_else(|| StoreError::PrefixNotFound(short.to_string()))?;
        let computed = obj.compute_id();
        if computed != id {
            return Err(StoreError::HashMismatch { id, computed });
        }
        Ok((id, obj))
    }

    /// True if any backend has `id`. Content is not verified.
    pub fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        for backend in self.snapshot() {
            if backend.exists(id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Store an object and return its id.
    pub fn write(&self, kind: ObjectKind, data: &[u8]) -> StoreResult<ObjectId> {
        let id = Self::hash(kind, data);
        if self.exists(&id)? {
            return Ok(id);
        }
        let backend = self.writable_backend()?;
        backend.write(&id, &RawObject::new(kind, data.to_vec()))?;
        tracing::debug!(%id, %kind, size = data.len(), "wrote object");
        Ok(id)
    }

    /// Store a [`RawObject`].
    pub fn write_raw(&self, object: &RawObject) -> StoreResult<ObjectId> {
        self.write(object.kind, &object.data)
    }

    /// Open a streaming writer on the highest-priority writable backend.
    pub fn open_write_stream(&self, kind: ObjectKind, len: u64) -> StoreResult<Box<dyn OdbWriteStream>> {
        self.writable_backend()?.write_stream(kind, len)
    }

    fn writable_backend(&self) -> StoreResult<Arc<dyn OdbBackend>> {
        self.snapshot()
            .into_iter()
            .find(|b| b.is_writable())
            .ok_or(StoreError::NoWritableBackend)
    }

    /// Visit every object id once, across all backends.
    pub fn for_each(&self, mut cb: impl FnMut(&ObjectId) -> bool) -> StoreResult<()> {
        let mut seen = OidSet::new();
        let mut table_err = None;
        let mut stopped = false;
        for backend in self.snapshot() {
            backend.for_each(&mut |id| match seen.add(*id) {
                Ok(true) => {
                    let keep_going = cb(id);
                    stopped = !keep_going;
                    keep_going
                }
                Ok(false) => true,
                Err(e) => {
                    table_err = Some(e);
                    false
                }
            })?;
            if let Some(e) = table_err.take() {
                return Err(e.into());
            }
            if stopped {
                break;
            }
        }
        Ok(())
    }

    /// Ask every backend to pick up external changes.
    pub fn refresh(&self) -> StoreResult<()> {
        for backend in self.snapshot() {
            backend.refresh()?;
        }
        Ok(())
    }
}

impl Default for Odb {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Odb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let priorities: Vec<i32> = self
            .backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.priority)
            .collect();
        f.debug_struct("Odb").field("priorities", &priorities).finish()
    }
}
