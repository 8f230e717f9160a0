use gcore_types::ObjectId;
use sha1::{Digest, Sha1};

use crate::object::{object_header, ObjectKind};

/// Incremental object hasher.
///
/// The id of an object is the SHA-1 of its canonical header followed by the
/// payload, so the payload length must be known up front. Streaming writers
/// feed chunks through [`update`](ObjectHasher::update) as they arrive.
#[derive(Clone)]
pub struct ObjectHasher {
    inner: Sha1,
}

impl ObjectHasher {
    /// Start hashing an object of `kind` whose payload is `len` bytes.
    pub fn new(kind: ObjectKind, len: usize) -> Self {
        let mut inner = Sha1::new();
        inner.update(object_header(kind, len));
        Self { inner }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finalize(self) -> ObjectId {
        ObjectId::from_hash(self.inner.finalize().into())
    }

    /// One-shot hash of a complete payload.
    pub fn hash(kind: ObjectKind, data: &[u8]) -> ObjectId {
        let mut hasher = Self::new(kind, data.len());
        hasher.update(data);
        hasher.finalize()
    }

    /// Check that `data` hashes to `expected`.
    pub fn verify(kind: ObjectKind, data: &[u8], expected: &ObjectId) -> bool {
        Self::hash(kind, data) == *expected
    }
}

/// Plain SHA-1 over arbitrary bytes, used for file trailers.
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tree_id() {
        let id = ObjectHasher::hash(ObjectKind::Tree, b"");
        assert_eq!(id.to_hex(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
    }

    #[test]
    fn streaming_matches_one_shot() {
        let data = b"hello world\n";
        let mut h = ObjectHasher::new(ObjectKind::Blob, data.len());
        h.update(&data[..5]);
        h.update(&data[5..]);
        let id = h.finalize();
        assert_eq!(id, ObjectHasher::hash(ObjectKind::Blob, data));
        assert_eq!(id.to_hex(), "3b18e512dba79e4c8300dd08aeb37f8e728b8dad");
    }

    #[test]
    fn verify_detects_tampering() {
        let id = ObjectHasher::hash(ObjectKind::Blob, b"abc");
        assert!(ObjectHasher::verify(ObjectKind::Blob, b"abc", &id));
        assert!(!ObjectHasher::verify(ObjectKind::Blob, b"abd", &id));
        assert!(!ObjectHasher::verify(ObjectKind::Tree, b"abc", &id));
    }
}
