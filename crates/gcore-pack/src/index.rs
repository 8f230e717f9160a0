use gcore_store::sha1_digest;
use gcore_types::{ObjectId, OID_RAWSZ};

use crate::error::{PackError, PackResult};

/// Magic bytes of a version 2 index.
pub const IDX_MAGIC: [u8; 4] = [0xff, b't', b'O', b'c'];

pub const IDX_VERSION: u32 = 2;

/// Offsets at or above this go to the large-offset table.
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

/// Pack index for fast random-access lookups.
///
/// Layout is git's pack index v2:
/// - magic `\377tOc` and version 2
/// - fan-out table: 256 entries counting objects with first byte <= index
/// - sorted object ids
/// - CRC32 of each packed entry (parallel)
/// - 31-bit offsets, or an index into the 64-bit offset table (parallel)
/// - 64-bit offset table
/// - pack checksum, then a checksum of everything above
#[derive(Clone, Debug)]
pub struct PackIndex {
    pub fan_out: [u32; 256],
    pub object_ids: Vec<ObjectId>,
    pub crc32s: Vec<u32>,
    pub offsets: Vec<u64>,
    pub pack_checksum: [u8; OID_RAWSZ],
}

impl PackIndex {
    /// Build an index from (id, crc32, offset) entries and a pack checksum.
    pub fn build(mut entries: Vec<(ObjectId, u32, u64)>, pack_checksum: [u8; OID_RAWSZ]) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut fan_out = [0u32; 256];
        let mut object_ids = Vec::with_capacity(entries.len());
        let mut crc32s = Vec::with_capacity(entries.len());
        let mut offsets = Vec::with_capacity(entries.len());

        for (id, crc, offset) in &entries {
            fan_out[id.as_bytes()[0] as usize] += 1;
            object_ids.push(*id);
            crc32s.push(*crc);
            offsets.push(*offset);
        }
        for i in 1..256 {
            fan_out[i] += fan_out[i - 1];
        }

        Self {
            fan_out,
            object_ids,
            crc32s,
            offsets,
            pack_checksum,
        }
    }

    fn bucket(&self, first_byte: u8) -> std::ops::Range<usize> {
        let first = first_byte as usize;
        let start = if first == 0 {
            0
        } else {
            self.fan_out[first - 1] as usize
        };
        start..self.fan_out[first] as usize
    }

    fn position(&self, id: &ObjectId) -> Option<usize> {
        let range = self.bucket(id.as_bytes()[0]);
        let start = range.start;
        self.object_ids[range]
            .binary_search(id)
            .ok()
            .map(|pos| start + pos)
    }

    /// Look up an object's (offset, crc32) by id.
    pub fn lookup(&self, id: &ObjectId) -> Option<(u64, u32)> {
        self.position(id).map(|i| (self.offsets[i], self.crc32s[i]))
    }

    /// Find the single id starting with the first `len` hex digits of
    /// `prefix`.
    pub fn lookup_prefix(&self, prefix: &ObjectId, len: usize) -> PackResult<Option<ObjectId>> {
        let range = if len >= 2 {
            self.bucket(prefix.as_bytes()[0])
        } else {
            0..self.object_ids.len()
        };
        let slice = &self.object_ids[range];
        let first = slice.partition_point(|id| id.ncmp(prefix, len).is_lt());
        let mut matches = slice[first..]
            .iter()
            .take_while(|id| id.starts_with(prefix, len));
        match (matches.next(), matches.next()) {
            (None, _) => Ok(None),
            (Some(id), None) => Ok(Some(*id)),
            (Some(_), Some(_)) => Err(PackError::Ambiguous(prefix.to_hex_prefix(len))),
        }
    }

    /// Total object count.
    pub fn object_count(&self) -> usize {
        self.object_ids.len()
    }

    /// Check if an object exists.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.position(id).is_some()
    }

    /// Serialize to the on-disk format, trailing checksum included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let n = self.object_ids.len();
        let mut buf = Vec::with_capacity(8 + 256 * 4 + n * (OID_RAWSZ + 8) + 2 * OID_RAWSZ);
        buf.extend_from_slice(&IDX_MAGIC);
        buf.extend_from_slice(&IDX_VERSION.to_be_bytes());
        for &count in &self.fan_out {
            buf.extend_from_slice(&count.to_be_bytes());
        }
        for id in &self.object_ids {
            buf.extend_from_slice(id.as_bytes());
        }
        for &crc in &self.crc32s {
            buf.extend_from_slice(&crc.to_be_bytes());
        }
        let mut large = Vec::new();
        for &offset in &self.offsets {
            if offset < u64::from(LARGE_OFFSET_FLAG) {
                buf.extend_from_slice(&(offset as u32).to_be_bytes());
            } else {
                let slot = LARGE_OFFSET_FLAG | large.len() as u32;
                buf.extend_from_slice(&slot.to_be_bytes());
                large.push(offset);
            }
        }
        for offset in large {
            buf.extend_from_slice(&offset.to_be_bytes());
        }
        buf.extend_from_slice(&self.pack_checksum);
        let checksum = sha1_digest(&buf);
        buf.extend_from_slice(&checksum);
        buf
    }

    /// Parse and verify an on-disk index.
    pub fn from_bytes(data: &[u8]) -> PackResult<Self> {
        let mut r = Cursor { data, pos: 0 };

        let magic = r.take(4)?;
        if magic != IDX_MAGIC {
            return Err(PackError::InvalidMagic {
                what: "index",
                actual: magic.to_vec(),
            });
        }
        let version = r.u32()?;
        if version != IDX_VERSION {
            return Err(PackError::UnsupportedVersion {
                what: "index",
                version,
            });
        }

        if data.len() < 2 * OID_RAWSZ {
            return Err(PackError::IndexCorrupted("missing trailer".into()));
        }
        let body_len = data.len() - OID_RAWSZ;
        if sha1_digest(&data[..body_len])[..] != data[body_len..] {
            return Err(PackError::ChecksumMismatch { what: "index" });
        }

        let mut fan_out = [0u32; 256];
        for slot in fan_out.iter_mut() {
            *slot = r.u32()?;
        }
        if fan_out.windows(2).any(|w| w[0] > w[1]) {
            return Err(PackError::IndexCorrupted("fan-out is not monotonic".into()));
        }

        let count = fan_out[255] as usize;
        if r.remaining() < count * (OID_RAWSZ + 8) + 2 * OID_RAWSZ {
            return Err(PackError::IndexCorrupted(format!(
                "{count} objects do not fit in {} bytes",
                data.len()
            )));
        }

        let mut object_ids = Vec::with_capacity(count);
        for _ in 0..count {
            object_ids.push(ObjectId::from_raw(r.take(OID_RAWSZ)?)?);
        }
        if object_ids.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PackError::IndexCorrupted("object ids are not sorted".into()));
        }

        let mut crc32s = Vec::with_capacity(count);
        for _ in 0..count {
            crc32s.push(r.u32()?);
        }

        let mut small = Vec::with_capacity(count);
        for _ in 0..count {
            small.push(r.u32()?);
        }
        let large_count = small.iter().filter(|&&o| o & LARGE_OFFSET_FLAG != 0).count();
        let mut large = Vec::with_capacity(large_count);
        for _ in 0..large_count {
            large.push(r.u64()?);
        }
        let offsets = small
            .into_iter()
            .map(|o| {
                if o & LARGE_OFFSET_FLAG == 0 {
                    Ok(u64::from(o))
                } else {
                    large
                        .get((o & !LARGE_OFFSET_FLAG) as usize)
                        .copied()
                        .ok_or_else(|| PackError::IndexCorrupted("large offset out of range".into()))
                }
            })
            .collect::<PackResult<Vec<u64>>>()?;

        let mut pack_checksum = [0u8; OID_RAWSZ];
        pack_checksum.copy_from_slice(r.take(OID_RAWSZ)?);
        if r.remaining() != OID_RAWSZ {
            return Err(PackError::IndexCorrupted("unexpected trailing data".into()));
        }

        Ok(Self {
            fan_out,
            object_ids,
            crc32s,
            offsets,
            pack_checksum,
        })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> PackResult<&'a [u8]> {
        let slice = self
            .data
            .get(self.pos..self.pos + n)
            .ok_or_else(|| PackError::IndexCorrupted("data truncated".into()))?;
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> PackResult<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    fn u64(&mut self) -> PackResult<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }
}
