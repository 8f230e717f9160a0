//! Striped object cache.
//!
//! A fixed array of buckets, each guarded by its own mutex and holding at
//! most one object. The bucket is chosen by hashing the object id. Storing
//! an object whose bucket is occupied by a different id evicts the occupant;
//! a plain lookup that finds a different id is a miss and leaves the
//! occupant alone.
//!
//! Objects are handed out as `Arc<CachedObject>`. Reference counting is
//! atomic and independent of the bucket locks, so a handle can be dropped at
//! any time without touching the cache.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gcore_types::{KeyHasher, ObjectId, OidHash};

use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectKind, RawObject};

/// Default number of buckets.
pub const DEFAULT_CACHE_BUCKETS: usize = 4096;

/// Smallest accepted bucket count.
pub const MIN_CACHE_BUCKETS: usize = 8;

/// An object shared between the cache and its callers.
#[derive(Debug, PartialEq, Eq)]
pub struct CachedObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

impl CachedObject {
    pub fn new(id: ObjectId, raw: RawObject) -> Self {
        Self {
            id,
            kind: raw.kind,
            data: raw.data,
        }
    }

    pub fn to_raw(&self) -> RawObject {
        RawObject::new(self.kind, self.data.clone())
    }
}

type Bucket = Mutex<Option<Arc<CachedObject>>>;

/// Fixed-size, single-slot-per-bucket object cache.
pub struct ObjectCache {
    buckets: Box<[Bucket]>,
    mask: usize,
}

impl ObjectCache {
    /// Create a cache with `n_buckets` slots (a power of two, at least 8).
    pub fn new(n_buckets: usize) -> StoreResult<Self> {
        if n_buckets < MIN_CACHE_BUCKETS || !n_buckets.is_power_of_two() {
            return Err(StoreError::InvalidCacheSize(n_buckets));
        }
        let mut buckets: Vec<Bucket> = Vec::new();
        buckets
            .try_reserve_exact(n_buckets)
            .map_err(|_| gcore_types::TableError::OutOfMemory { buckets: n_buckets })?;
        buckets.resize_with(n_buckets, || Mutex::new(None));
        Ok(Self {
            buckets: buckets.into_boxed_slice(),
            mask: n_buckets - 1,
        })
    }

    pub fn n_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Bucket index for `id`.
    pub fn bucket_of(&self, id: &ObjectId) -> usize {
        OidHash::hash(id) as usize & self.mask
    }

    fn lock(&self, index: usize) -> MutexGuard<'_, Option<Arc<CachedObject>>> {
        self.buckets[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up `id`. A bucket holding a different object counts as a miss.
    pub fn get(&self, id: &ObjectId) -> Option<Arc<CachedObject>> {
        let slot = self.lock(self.bucket_of(id));
        match slot.as_ref() {
            Some(obj) if obj.id == *id => Some(Arc::clone(obj)),
            _ => None,
        }
    }

    /// Install `object` in its bucket and return a shared handle to whatever
    /// the bucket holds for that id afterwards.
    ///
    /// If the bucket already holds the same id, the existing object is kept
    /// and returned so every caller shares one copy. Otherwise any occupant
    /// is evicted.
    pub fn try_store(&self, object: CachedObject) -> Arc<CachedObject> {
        let index = self.bucket_of(&object.id);
        let evicted;
        let handle = {
            let mut slot = self.lock(index);
            if let Some(existing) = slot.as_ref() {
                if existing.id == object.id {
                    return Arc::clone(existing);
                }
            }
            let fresh = Arc::new(object);
            evicted = slot.replace(Arc::clone(&fresh));
            fresh
        };
        if let Some(old) = evicted {
            tracing::trace!(evicted = %old.id, stored = %handle.id, bucket = index, "cache eviction");
        }
        handle
    }

    /// Drop the cached copy of `id` if present.
    pub fn remove(&self, id: &ObjectId) -> Option<Arc<CachedObject>> {
        let mut slot = self.lock(self.bucket_of(id));
        if slot.as_ref().is_some_and(|obj| obj.id == *id) {
            slot.take()
        } else {
            None
        }
    }

    /// Number of occupied buckets.
    pub fn len(&self) -> usize {
        (0..self.buckets.len())
            .filter(|&i| self.lock(i).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict everything.
    pub fn clear(&self) {
        for i in 0..self.buckets.len() {
            self.lock(i).take();
        }
    }
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("buckets", &self.n_buckets())
            .field("occupied", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn obj_with_prefix(prefix: [u8; 4], tail: u8) -> CachedObject {
        let mut raw = [0u8; 20];
        raw[..4].copy_from_slice(&prefix);
        raw[19] = tail;
        CachedObject {
            id: ObjectId::from_hash(raw),
            kind: ObjectKind::Blob,
            data: vec![tail],
        }
    }

    #[test]
    fn rejects_bad_sizes() {
        assert!(ObjectCache::new(4).is_err());
        assert!(ObjectCache::new(12).is_err());
        assert!(ObjectCache::new(16).is_ok());
    }

    #[test]
    fn store_then_get() {
        let cache = ObjectCache::new(16).unwrap();
        let a = obj_with_prefix([1, 0, 0, 0], 1);
        let id = a.id;
        let stored = cache.try_store(a);
        let got = cache.get(&id).unwrap();
        assert!(Arc::ptr_eq(&stored, &got));
    }

    #[test]
    fn same_id_reconciles_to_existing() {
        let cache = ObjectCache::new(16).unwrap();
        let first = cache.try_store(obj_with_prefix([1, 0, 0, 0], 1));
        let second = cache.try_store(obj_with_prefix([1, 0, 0, 0], 1));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn collision_evicts_previous_occupant() {
        let cache = ObjectCache::new(16).unwrap();
        let a = obj_with_prefix([3, 0, 0, 0], 1);
        let b = obj_with_prefix([3, 0, 0, 0], 2);
        let (a_id, b_id) = (a.id, b.id);
        assert_eq!(cache.bucket_of(&a_id), cache.bucket_of(&b_id));

        let a_handle = cache.try_store(a);
        cache.try_store(b);
        assert!(cache.get(&a_id).is_none());
        assert_eq!(cache.get(&b_id).unwrap().id, b_id);
        // The evicted object stays alive for holders of a handle.
        assert_eq!(a_handle.data, vec![1]);
        assert_eq!(Arc::strong_count(&a_handle), 1);
    }

    #[test]
    fn get_miss_does_not_evict() {
        let cache = ObjectCache::new(16).unwrap();
        let a = obj_with_prefix([5, 0, 0, 0], 1);
        let other = obj_with_prefix([5, 0, 0, 0], 9).id;
        let a_id = a.id;
        cache.try_store(a);
        assert!(cache.get(&other).is_none());
        assert!(cache.get(&a_id).is_some());
    }

    #[test]
    fn remove_and_clear() {
        let cache = ObjectCache::new(8).unwrap();
        let a = obj_with_prefix([1, 0, 0, 0], 1);
        let b = obj_with_prefix([2, 0, 0, 0], 2);
        let a_id = a.id;
        cache.try_store(a);
        cache.try_store(b);
        assert_eq!(cache.len(), 2);
        assert!(cache.remove(&a_id).is_some());
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_store_and_get() {
        let cache = Arc::new(ObjectCache::new(8).unwrap());
        let threads: Vec<_> = (0..8u8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..500u32 {
                        // Two ids per bucket so threads contend and evict.
                        let bucket = (i % 8) as u8;
                        let obj = obj_with_prefix([bucket, 0, 0, 0], ((u32::from(t) + i) % 2) as u8);
                        let id = obj.id;
                        let handle = cache.try_store(obj);
                        assert_eq!(handle.id, id);
                        if let Some(found) = cache.get(&id) {
                            assert_eq!(found.id, id);
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        for bucket in 0..8u8 {
            let a = obj_with_prefix([bucket, 0, 0, 0], 0).id;
            let b = obj_with_prefix([bucket, 0, 0, 0], 1).id;
            let in_a = cache.get(&a).is_some();
            let in_b = cache.get(&b).is_some();
            assert!(in_a ^ in_b, "bucket {bucket} holds exactly one of its objects");
        }
    }
}
