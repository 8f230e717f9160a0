//! Generic open-addressing hash table.
//!
//! Buckets are probed with triangular steps (`i += 1, 2, 3, ...`), which
//! visits every slot of a power-of-two table exactly once. Deleted slots are
//! tombstoned and only reclaimed by a rehash. When live plus tombstoned slots
//! reach 77% of the bucket count the table either rehashes in place (if
//! tombstones dominate) or doubles.
//!
//! Rehashing reuses the existing key/value storage: each live entry is moved
//! to its new bucket, and if that bucket still holds an entry that has not
//! been moved yet, the two are swapped and the displaced entry continues
//! probing. A separate bitmap tracks which new buckets are filled.
//!
//! Slots are addressed by index so callers can `put` a key and then fill or
//! update its value in place, mirroring how the table is used by the object
//! database and the reference cache.

use std::borrow::Borrow;
use std::fmt;
use std::marker::PhantomData;

use thiserror::Error;

use crate::error::ErrorCode;
use crate::oid::ObjectId;

const HASH_UPPER: f64 = 0.77;
const MIN_BUCKETS: usize = 4;

/// Errors from hash table operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("out of memory growing hash table to {buckets} buckets")]
    OutOfMemory { buckets: usize },
}

impl TableError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::OutOfMemory
    }
}

/// Hash strategy for a key type.
pub trait KeyHasher<K: ?Sized> {
    fn hash(key: &K) -> u32;
}

/// x31 string hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrHash;

impl KeyHasher<str> for StrHash {
    fn hash(key: &str) -> u32 {
        let mut bytes = key.bytes();
        let Some(first) = bytes.next() else {
            return 0;
        };
        bytes.fold(u32::from(first), |h, c| {
            (h << 5).wrapping_sub(h).wrapping_add(u32::from(c))
        })
    }
}

impl KeyHasher<String> for StrHash {
    fn hash(key: &String) -> u32 {
        <StrHash as KeyHasher<str>>::hash(key.as_str())
    }
}

/// Object ids are already uniformly distributed; the first four bytes suffice.
#[derive(Debug, Clone, Copy, Default)]
pub struct OidHash;

impl KeyHasher<ObjectId> for OidHash {
    fn hash(key: &ObjectId) -> u32 {
        let b = key.as_bytes();
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
}

/// 64-bit integer mixer.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntHash;

impl KeyHasher<u64> for IntHash {
    fn hash(key: &u64) -> u32 {
        let k = *key;
        ((k >> 33) ^ k ^ (k << 11)) as u32
    }
}

/// Result of [`HashTable::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The key was already present; nothing changed.
    Existing,
    /// The key went into a never-used bucket.
    InsertedEmpty,
    /// The key reused a tombstoned bucket.
    InsertedDeleted,
}

impl PutOutcome {
    pub fn is_new(&self) -> bool {
        !matches!(self, Self::Existing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Empty,
    Deleted,
    Live,
}

/// Open-addressing hash table parameterized by key, value, and hash strategy.
pub struct HashTable<K, V, H> {
    n_buckets: usize,
    size: usize,
    n_occupied: usize,
    upper_bound: usize,
    slots: Vec<Slot>,
    keys: Vec<Option<K>>,
    vals: Vec<Option<V>>,
    _hasher: PhantomData<H>,
}

/// String-keyed map.
pub type StrMap<V> = HashTable<String, V, StrHash>;
/// Object-id-keyed map.
pub type OidMap<V> = HashTable<ObjectId, V, OidHash>;
/// Integer-keyed map.
pub type IntMap<V> = HashTable<u64, V, IntHash>;
/// String set.
pub type StrSet = HashTable<String, (), StrHash>;
/// Object id set.
pub type OidSet = HashTable<ObjectId, (), OidHash>;

impl<K, V, H> HashTable<K, V, H>
where
    K: Eq,
    H: KeyHasher<K>,
{
    /// Create an empty table. No buckets are allocated until the first insert.
    pub fn new() -> Self {
        Self {
            n_buckets: 0,
            size: 0,
            n_occupied: 0,
            upper_bound: 0,
            slots: Vec::new(),
            keys: Vec::new(),
            vals: Vec::new(),
            _hasher: PhantomData,
        }
    }

    /// Create a table sized to hold `n` entries without growing.
    pub fn with_capacity(n: usize) -> Result<Self, TableError> {
        let mut table = Self::new();
        if n > 0 {
            let buckets = ((n as f64) / HASH_UPPER).ceil() as usize + 1;
            table.resize(buckets)?;
        }
        Ok(table)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of buckets (always zero or a power of two).
    pub fn n_buckets(&self) -> usize {
        self.n_buckets
    }

    /// First bucket index, for index-based iteration.
    pub fn begin(&self) -> usize {
        0
    }

    /// One past the last bucket index.
    pub fn end(&self) -> usize {
        self.n_buckets
    }

    /// True if bucket `i` holds a live entry.
    pub fn exists(&self, i: usize) -> bool {
        self.slots.get(i) == Some(&Slot::Live)
    }

    pub fn key_at(&self, i: usize) -> Option<&K> {
        if self.exists(i) {
            self.keys[i].as_ref()
        } else {
            None
        }
    }

    pub fn value_at(&self, i: usize) -> Option<&V> {
        if self.exists(i) {
            self.vals[i].as_ref()
        } else {
            None
        }
    }

    pub fn value_at_mut(&mut self, i: usize) -> Option<&mut V> {
        if self.exists(i) {
            self.vals[i].as_mut()
        } else {
            None
        }
    }

    /// Store `value` in live bucket `i`, returning the previous value.
    ///
    /// Returns `None` without storing anything if `i` is not live.
    pub fn set_value(&mut self, i: usize, value: V) -> Option<V> {
        if !self.exists(i) {
            return None;
        }
        self.vals[i].replace(value)
    }

    /// Locate the bucket holding `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        H: KeyHasher<Q>,
    {
        if self.n_buckets == 0 {
            return None;
        }
        let mask = self.n_buckets - 1;
        let mut i = <H as KeyHasher<Q>>::hash(key) as usize & mask;
        let last = i;
        let mut step = 0;
        loop {
            match self.slots[i] {
                Slot::Empty => return None,
                Slot::Live => {
                    if let Some(k) = &self.keys[i] {
                        if k.borrow() == key {
                            return Some(i);
                        }
                    }
                }
                Slot::Deleted => {}
            }
            step += 1;
            i = (i + step) & mask;
            if i == last {
                return None;
            }
        }
    }

    /// Insert `key` if absent and return its bucket.
    ///
    /// The value of a newly inserted key is empty until [`set_value`] fills
    /// it. An existing key is left untouched.
    ///
    /// [`set_value`]: HashTable::set_value
    pub fn put(&mut self, key: K) -> Result<(usize, PutOutcome), TableError> {
        if self.n_occupied >= self.upper_bound {
            if self.n_buckets > self.size << 1 {
                // Mostly tombstones: rehash at the same size to clear them.
                self.resize(self.n_buckets - 1)?;
            } else {
                self.resize(self.n_buckets + 1)?;
            }
        }

        let mask = self.n_buckets - 1;
        let hash = <H as KeyHasher<K>>::hash(&key) as usize;
        let mut i = hash & mask;
        let mut x = self.n_buckets;
        let mut site = self.n_buckets;

        if self.slots[i] == Slot::Empty {
            x = i;
        } else {
            let last = i;
            let mut step = 0;
            while self.slots[i] != Slot::Empty
                && (self.slots[i] == Slot::Deleted || self.keys[i].as_ref() != Some(&key))
            {
                if self.slots[i] == Slot::Deleted {
                    site = i;
                }
                step += 1;
                i = (i + step) & mask;
                if i == last {
                    x = site;
                    break;
                }
            }
            if x == self.n_buckets {
                x = if self.slots[i] == Slot::Empty && site != self.n_buckets {
                    site
                } else {
                    i
                };
            }
        }

        let outcome = match self.slots[x] {
            Slot::Empty => {
                self.n_occupied += 1;
                PutOutcome::InsertedEmpty
            }
            Slot::Deleted => PutOutcome::InsertedDeleted,
            Slot::Live => return Ok((x, PutOutcome::Existing)),
        };
        self.keys[x] = Some(key);
        self.vals[x] = None;
        self.slots[x] = Slot::Live;
        self.size += 1;
        Ok((x, outcome))
    }

    /// Insert or replace, returning the previous value for `key`.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, TableError> {
        let (i, _) = self.put(key)?;
        Ok(self.vals[i].replace(value))
    }

    /// Tombstone bucket `i`, returning the entry it held.
    ///
    /// Calling this on a bucket that is not live is a no-op.
    pub fn delete_at(&mut self, i: usize) -> Option<(K, Option<V>)> {
        if !self.exists(i) {
            return None;
        }
        self.slots[i] = Slot::Deleted;
        self.size -= 1;
        let key = self.keys[i].take()?;
        Some((key, self.vals[i].take()))
    }

    pub fn lookup<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        H: KeyHasher<Q>,
    {
        self.get(key).and_then(|i| self.vals[i].as_ref())
    }

    pub fn lookup_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        H: KeyHasher<Q>,
    {
        let i = self.get(key)?;
        self.vals[i].as_mut()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        H: KeyHasher<Q>,
    {
        self.get(key).is_some()
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        H: KeyHasher<Q>,
    {
        let i = self.get(key)?;
        self.delete_at(i).and_then(|(_, v)| v)
    }

    /// Drop every entry but keep the bucket allocation.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot::Empty;
        }
        for k in &mut self.keys {
            *k = None;
        }
        for v in &mut self.vals {
            *v = None;
        }
        self.size = 0;
        self.n_occupied = 0;
    }

    /// Live entries whose value has been set.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        (0..self.n_buckets).filter_map(move |i| {
            if self.slots[i] != Slot::Live {
                return None;
            }
            Some((self.keys[i].as_ref()?, self.vals[i].as_ref()?))
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        (0..self.n_buckets).filter_map(move |i| self.key_at(i))
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    /// Rehash into `new_n_buckets` (rounded up to a power of two, minimum 4).
    ///
    /// Requests too small to hold the live entries under the load bound are
    /// ignored. On allocation failure the table is left unchanged.
    pub fn resize(&mut self, new_n_buckets: usize) -> Result<(), TableError> {
        let new_n = new_n_buckets.max(MIN_BUCKETS).next_power_of_two();
        if self.size >= upper_bound_for(new_n) {
            return Ok(());
        }

        let mut placed: Vec<bool> = Vec::new();
        placed
            .try_reserve_exact(new_n)
            .map_err(|_| TableError::OutOfMemory { buckets: new_n })?;
        placed.resize(new_n, false);

        let old_n = self.n_buckets;
        if new_n > old_n {
            let extra = new_n - old_n;
            let oom = |_| TableError::OutOfMemory { buckets: new_n };
            self.keys.try_reserve_exact(extra).map_err(oom)?;
            self.vals.try_reserve_exact(extra).map_err(oom)?;
            self.slots.try_reserve_exact(extra).map_err(oom)?;
            self.keys.resize_with(new_n, || None);
            self.vals.resize_with(new_n, || None);
            self.slots.resize(new_n, Slot::Empty);
        }

        let new_mask = new_n - 1;
        for j in 0..old_n {
            if self.slots[j] != Slot::Live {
                continue;
            }
            let mut key = self.keys[j].take();
            let mut val = self.vals[j].take();
            self.slots[j] = Slot::Deleted;

            loop {
                let Some(k) = key.as_ref() else { break };
                let mut i = <H as KeyHasher<K>>::hash(k) as usize & new_mask;
                let mut step = 0;
                while placed[i] {
                    step += 1;
                    i = (i + step) & new_mask;
                }
                placed[i] = true;
                if i < old_n && self.slots[i] == Slot::Live {
                    // Kick out the unprocessed occupant and keep probing for it.
                    std::mem::swap(&mut key, &mut self.keys[i]);
                    std::mem::swap(&mut val, &mut self.vals[i]);
                    self.slots[i] = Slot::Deleted;
                } else {
                    self.keys[i] = key;
                    self.vals[i] = val;
                    break;
                }
            }
        }

        if new_n < old_n {
            self.keys.truncate(new_n);
            self.vals.truncate(new_n);
            self.keys.shrink_to_fit();
            self.vals.shrink_to_fit();
        }
        self.slots = placed
            .into_iter()
            .map(|filled| if filled { Slot::Live } else { Slot::Empty })
            .collect();
        self.n_buckets = new_n;
        self.n_occupied = self.size;
        self.upper_bound = upper_bound_for(new_n);
        Ok(())
    }
}

fn upper_bound_for(n_buckets: usize) -> usize {
    (n_buckets as f64 * HASH_UPPER + 0.5) as usize
}

impl<K: Eq, V, H: KeyHasher<K>> Default for HashTable<K, V, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug, H> fmt::Debug for HashTable<K, V, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for i in 0..self.n_buckets {
            if self.slots[i] == Slot::Live {
                map.entry(&self.keys[i], &self.vals[i]);
            }
        }
        map.finish()
    }
}

impl<H: KeyHasher<ObjectId>> HashTable<ObjectId, (), H> {
    /// Set-style insert; true when the id was not present before.
    pub fn add(&mut self, oid: ObjectId) -> Result<bool, TableError> {
        let (i, outcome) = self.put(oid)?;
        self.vals[i] = Some(());
        Ok(outcome.is_new())
    }
}

impl<H: KeyHasher<String>> HashTable<String, (), H> {
    /// Set-style insert; true when the name was not present before.
    pub fn add(&mut self, name: impl Into<String>) -> Result<bool, TableError> {
        let (i, outcome) = self.put(name.into())?;
        self.vals[i] = Some(());
        Ok(outcome.is_new())
    }
}
