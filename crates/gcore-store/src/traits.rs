use gcore_types::ObjectId;

use crate::error::{StoreError, StoreResult};
use crate::hasher::ObjectHasher;
use crate::object::{ObjectKind, RawObject};

/// A storage backend for the object database.
///
/// Backends are peers behind the [`Odb`](crate::Odb) front: each is asked in
/// priority order and the first that can answer wins. A backend never
/// verifies hashes itself; the front does that on every read.
///
/// All implementations must be thread-safe. Reads of immutable objects can
/// run concurrently; writers must publish objects atomically so a reader
/// never sees a partially written object.
pub trait OdbBackend: Send + Sync {
    /// Read a full object. `Ok(None)` means "not here, ask the next backend".
    fn read(&self, id: &ObjectId) -> StoreResult<Option<RawObject>>;

    /// Read just the type and size.
    ///
    /// The default implementation reads the whole object.
    fn read_header(&self, id: &ObjectId) -> StoreResult<Option<(ObjectKind, usize)>> {
        Ok(self.read(id)?.map(|obj| (obj.kind, obj.size())))
    }

    /// Find the single object whose id starts with the first `len` hex digits
    /// of `prefix`.
    ///
    /// Returns [`StoreError::Ambiguous`] if more than one object matches.
    fn read_prefix(
        &self,
        prefix: &ObjectId,
        len: usize,
    ) -> StoreResult<Option<(ObjectId, RawObject)>>;

    /// Cheap existence check; content is not verified.
    fn exists(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Persist an object under `id`. Writing an object that already exists is
    /// a no-op.
    fn write(&self, _id: &ObjectId, _object: &RawObject) -> StoreResult<()> {
        Err(StoreError::ReadOnly)
    }

    /// Open a streaming writer for an object of known kind and length.
    fn write_stream(&self, _kind: ObjectKind, _len: u64) -> StoreResult<Box<dyn OdbWriteStream>> {
        Err(StoreError::ReadOnly)
    }

    /// Whether [`write`](OdbBackend::write) is supported.
    fn is_writable(&self) -> bool {
        false
    }

    /// Call `cb` with every object id held by this backend. Returning `false`
    /// from `cb` stops the walk.
    fn for_each(&self, cb: &mut dyn FnMut(&ObjectId) -> bool) -> StoreResult<()>;

    /// Pick up objects written by other processes (e.g. new pack files).
    fn refresh(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// An in-progress object write.
///
/// The id is only known once every byte has been hashed, so the payload is
/// buffered to a provisional location and moved into place by
/// [`finalize`](OdbWriteStream::finalize).
pub trait OdbWriteStream {
    fn write(&mut self, chunk: &[u8]) -> StoreResult<()>;

    /// Check the declared length, publish the object and return its id.
    fn finalize(self: Box<Self>) -> StoreResult<ObjectId>;
}

/// Callback that receives a finished object from a [`BufferedWriteStream`].
pub type ObjectSink = Box<dyn FnOnce(&ObjectId, RawObject) -> StoreResult<()> + Send>;

/// Upper bound on the buffer preallocated from a declared stream length.
const STREAM_PREALLOC_LIMIT: usize = 1 << 20;

/// Write stream that buffers in memory and hands the finished object to a
/// sink, usually a closure over the backend's storage.
pub struct BufferedWriteStream {
    sink: ObjectSink,
    kind: ObjectKind,
    declared: u64,
    hasher: ObjectHasher,
    buf: Vec<u8>,
}

impl BufferedWriteStream {
    pub fn new(kind: ObjectKind, len: u64, sink: ObjectSink) -> Self {
        Self {
            sink,
            kind,
            declared: len,
            hasher: ObjectHasher::new(kind, len as usize),
            buf: Vec::with_capacity(usize::try_from(len).map_or(0, |n| n.min(STREAM_PREALLOC_LIMIT))),
        }
    }
}

impl OdbWriteStream for BufferedWriteStream {
    fn write(&mut self, chunk: &[u8]) -> StoreResult<()> {
        let written = (self.buf.len() + chunk.len()) as u64;
        if written > self.declared {
            return Err(StoreError::StreamLength {
                declared: self.declared,
                written,
            });
        }
        self.hasher.update(chunk);
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    fn finalize(self: Box<Self>) -> StoreResult<ObjectId> {
        let this = *self;
        let written = this.buf.len() as u64;
        if written != this.declared {
            return Err(StoreError::StreamLength {
                declared: this.declared,
                written,
            });
        }
        let id = this.hasher.finalize();
        (this.sink)(&id, RawObject::new(this.kind, this.buf))?;
        Ok(id)
    }
}
