use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use flate2::read::ZlibDecoder;
use gcore_store::{sha1_digest, ObjectKind, RawObject};
use gcore_types::{IntMap, IoResultExt, ObjectId, OID_RAWSZ};
use memmap2::Mmap;

use crate::delta::{apply_delta, result_size};
use crate::entry::{parse_entry_header, EntryHeader, EntryKind};
use crate::error::{PackError, PackResult};
use crate::index::PackIndex;

/// Magic bytes at the start of every pack.
pub const PACK_MAGIC: [u8; 4] = *b"PACK";

pub const PACK_VERSION: u32 = 2;

/// Size of the `PACK` + version + count header.
pub const PACK_HEADER_LEN: usize = 12;

/// Default cap on delta chain length.
pub const DEFAULT_MAX_DELTA_DEPTH: usize = 50;

/// Resolved delta bases kept per pack before the cache is reset.
const BASE_CACHE_ENTRIES: usize = 256;

enum PackData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl PackData {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => map,
            Self::Owned(buf) => buf,
        }
    }
}

type Resolved = Arc<(ObjectKind, Vec<u8>)>;

/// Reads objects from a pack file using its index for random access.
pub struct PackReader {
    data: PackData,
    index: PackIndex,
    path: Option<PathBuf>,
    /// Entry start offsets in ascending order; an entry ends where the next
    /// begins.
    sorted_offsets: Vec<u64>,
    max_delta_depth: usize,
    base_cache: Mutex<IntMap<Resolved>>,
}

impl PackReader {
    /// Open from raw bytes.
    pub fn from_bytes(pack_data: Vec<u8>, index: PackIndex) -> PackResult<Self> {
        Self::new(PackData::Owned(pack_data), index, None)
    }

    /// Map `pack-*.pack` and read its sibling `.idx`.
    pub fn open(pack_path: &Path) -> PackResult<Self> {
        let index_path = pack_path.with_extension("idx");
        let index_data = std::fs::read(&index_path).with_path(&index_path)?;
        let index = PackIndex::from_bytes(&index_data)?;

        let file = File::open(pack_path).with_path(pack_path)?;
        // SAFETY: pack files are immutable once published; they are only
        // ever replaced by rename, never rewritten in place.
        let map = unsafe { Mmap::map(&file) }.with_path(pack_path)?;
        Self::new(PackData::Mapped(map), index, Some(pack_path.to_path_buf()))
    }

    fn new(data: PackData, index: PackIndex, path: Option<PathBuf>) -> PackResult<Self> {
        let bytes = data.bytes();
        if bytes.len() < PACK_HEADER_LEN + OID_RAWSZ {
            return Err(PackError::corrupt(0, "pack data too short"));
        }
        if bytes[..4] != PACK_MAGIC {
            return Err(PackError::InvalidMagic {
                what: "pack",
                actual: bytes[..4].to_vec(),
            });
        }
        let version = be_u32(&bytes[4..8]);
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion {
                what: "pack",
                version,
            });
        }
        let count = be_u32(&bytes[8..12]) as usize;
        if count != index.object_count() {
            return Err(PackError::IndexCorrupted(format!(
                "pack holds {count} objects but index lists {}",
                index.object_count()
            )));
        }
        if bytes[bytes.len() - OID_RAWSZ..] != index.pack_checksum {
            return Err(PackError::ChecksumMismatch { what: "pack" });
        }
        let body_end = (bytes.len() - OID_RAWSZ) as u64;
        if let Some(&bad) = index
            .offsets
            .iter()
            .find(|&&o| o < PACK_HEADER_LEN as u64 || o >= body_end)
        {
            return Err(PackError::IndexCorrupted(format!(
                "offset {bad} lies outside the pack"
            )));
        }

        let mut sorted_offsets = index.offsets.clone();
        sorted_offsets.sort_unstable();

        Ok(Self {
            data,
            index,
            path,
            sorted_offsets,
            max_delta_depth: DEFAULT_MAX_DELTA_DEPTH,
            base_cache: Mutex::new(IntMap::new()),
        })
    }

    /// Cap the number of deltas followed when resolving one object.
    pub fn with_max_delta_depth(mut self, depth: usize) -> Self {
        self.max_delta_depth = depth;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Access the index.
    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    pub fn object_count(&self) -> usize {
        self.index.object_count()
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains(id)
    }

    /// List all object ids in index order.
    pub fn object_ids(&self) -> &[ObjectId] {
        &self.index.object_ids
    }

    /// Hash the whole pack and compare it with its trailer.
    pub fn verify_checksum(&self) -> PackResult<()> {
        let bytes = self.data.bytes();
        let split = bytes.len() - OID_RAWSZ;
        if sha1_digest(&bytes[..split])[..] != bytes[split..] {
            return Err(PackError::ChecksumMismatch { what: "pack" });
        }
        Ok(())
    }

    /// Read an object by id, resolving deltas.
    pub fn read_object(&self, id: &ObjectId) -> PackResult<Option<RawObject>> {
        let Some((offset, crc)) = self.index.lookup(id) else {
            return Ok(None);
        };
        self.check_crc(id, offset, crc)?;
        let resolved = self.resolve(offset)?;
        Ok(Some(RawObject::new(resolved.0, resolved.1.clone())))
    }

    /// Type and size of an object, inflating as little as possible.
    pub fn read_header(&self, id: &ObjectId) -> PackResult<Option<(ObjectKind, usize)>> {
        let Some((offset, _)) = self.index.lookup(id) else {
            return Ok(None);
        };
        let header = self.entry_header(offset)?;
        let size = match header.kind {
            EntryKind::Full(kind) => return Ok(Some((kind, header.size as usize))),
            _ => {
                // The result size sits at the front of the delta.
                let prefix = self.inflate_prefix(offset, &header, 20)?;
                result_size(&prefix).map_err(|source| PackError::Delta { offset, source })?
            }
        };
        let kind = self.base_kind(offset)?;
        Ok(Some((kind, size)))
    }

    fn body(&self) -> &[u8] {
        let bytes = self.data.bytes();
        &bytes[..bytes.len() - OID_RAWSZ]
    }

    fn entry_header(&self, offset: u64) -> PackResult<EntryHeader> {
        parse_entry_header(self.body(), offset)
    }

    fn entry_end(&self, offset: u64) -> usize {
        let next = self.sorted_offsets.partition_point(|&o| o <= offset);
        self.sorted_offsets
            .get(next)
            .map(|&o| o as usize)
            .unwrap_or(self.body().len())
    }

    fn check_crc(&self, id: &ObjectId, offset: u64, expected: u32) -> PackResult<()> {
        let raw = &self.body()[offset as usize..self.entry_end(offset)];
        if crc32fast::hash(raw) != expected {
            return Err(PackError::CrcMismatch { id: *id });
        }
        Ok(())
    }

    fn inflate(&self, offset: u64, header: &EntryHeader) -> PackResult<Vec<u8>> {
        let end = self.entry_end(offset);
        let compressed = self
            .body()
            .get(header.data_start..end)
            .ok_or_else(|| PackError::corrupt(offset, "entry data out of range"))?;
        let size = usize::try_from(header.size)
            .map_err(|_| PackError::corrupt(offset, "entry size overflow"))?;
        // The header size is untrusted: preallocate at most 8x the compressed span.
        let mut out = Vec::with_capacity(size.min(compressed.len().saturating_mul(8)));
        ZlibDecoder::new(compressed)
            .take(header.size.saturating_add(1))
            .read_to_end(&mut out)
            .map_err(|e| PackError::corrupt(offset, format!("inflate failed: {e}")))?;
        if out.len() != size {
            return Err(PackError::corrupt(
                offset,
                format!("inflated {} bytes, header says {size}", out.len()),
            ));
        }
        Ok(out)
    }

    fn inflate_prefix(&self, offset: u64, header: &EntryHeader, limit: u64) -> PackResult<Vec<u8>> {
        let end = self.entry_end(offset);
        let compressed = self
            .body()
            .get(header.data_start..end)
            .ok_or_else(|| PackError::corrupt(offset, "entry data out of range"))?;
        let mut out = Vec::new();
        ZlibDecoder::new(compressed)
            .take(limit)
            .read_to_end(&mut out)
            .map_err(|e| PackError::corrupt(offset, format!("inflate failed: {e}")))?;
        Ok(out)
    }

    fn base_offset(&self, offset: u64, kind: &EntryKind) -> PackResult<Option<u64>> {
        match kind {
            EntryKind::Full(_) => Ok(None),
            EntryKind::OfsDelta { base_offset } => Ok(Some(*base_offset)),
            EntryKind::RefDelta { base } => match self.index.lookup(base) {
                Some((base_offset, _)) if base_offset != offset => Ok(Some(base_offset)),
                Some(_) => Err(PackError::corrupt(offset, "ref-delta refers to itself")),
                None => Err(PackError::DeltaBaseNotFound(*base)),
            },
        }
    }

    /// Follow delta bases from `offset` to the full object at the bottom.
    fn base_kind(&self, offset: u64) -> PackResult<ObjectKind> {
        let mut current = offset;
        for _ in 0..=self.max_delta_depth {
            let header = self.entry_header(current)?;
            match self.base_offset(current, &header.kind)? {
                None => {
                    if let EntryKind::Full(kind) = header.kind {
                        return Ok(kind);
                    }
                }
                Some(next) => current = next,
            }
        }
        Err(PackError::DeltaChainTooDeep {
            offset,
            max: self.max_delta_depth,
        })
    }

    fn cached(&self, offset: u64) -> Option<Resolved> {
        let cache = self.base_cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.lookup(&offset).cloned()
    }

    fn remember(&self, offset: u64, object: &Resolved) {
        let mut cache = self.base_cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.len() >= BASE_CACHE_ENTRIES {
            cache.clear();
        }
        // A full table only costs a future cache miss.
        let _ = cache.insert(offset, Arc::clone(object));
    }

    /// Resolve the entry at `offset` to its final type and content.
    ///
    /// Delta chains are walked iteratively: deltas are collected down to a
    /// full object (or a cached intermediate), then applied bottom-up.
    fn resolve(&self, offset: u64) -> PackResult<Resolved> {
        let mut chain: Vec<(u64, Vec<u8>)> = Vec::new();
        let mut current = offset;
        let mut base = loop {
            if let Some(hit) = self.cached(current) {
                break hit;
            }
            let header = self.entry_header(current)?;
            match self.base_offset(current, &header.kind)? {
                None => {
                    let EntryKind::Full(kind) = header.kind else {
                        return Err(PackError::corrupt(current, "delta without base"));
                    };
                    let data = self.inflate(current, &header)?;
                    break Arc::new((kind, data));
                }
                Some(next) => {
                    if chain.len() >= self.max_delta_depth {
                        return Err(PackError::DeltaChainTooDeep {
                            offset,
                            max: self.max_delta_depth,
                        });
                    }
                    chain.push((current, self.inflate(current, &header)?));
                    current = next;
                }
            }
        };

        if !chain.is_empty() {
            self.remember(current, &base);
        }
        while let Some((delta_offset, delta)) = chain.pop() {
            let data = apply_delta(&base.1, &delta).map_err(|source| PackError::Delta {
                offset: delta_offset,
                source,
            })?;
            base = Arc::new((base.0, data));
            if !chain.is_empty() {
                self.remember(delta_offset, &base);
            }
        }
        Ok(base)
    }
}

impl std::fmt::Debug for PackReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackReader")
            .field("path", &self.path)
            .field("objects", &self.object_count())
            .field("max_delta_depth", &self.max_delta_depth)
            .finish()
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(buf)
}
