use gcore_store::ObjectKind;
use gcore_types::{ObjectId, OID_RAWSZ};

use crate::error::{PackError, PackResult};

/// Pack type code for an offset delta.
pub const OBJ_OFS_DELTA: u8 = 6;

/// Pack type code for a reference delta.
pub const OBJ_REF_DELTA: u8 = 7;

/// Longest entry header we accept (type/size varint plus ofs varint).
const MAX_HEADER_BYTES: usize = 32;

/// What a pack entry holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// Complete object.
    Full(ObjectKind),
    /// Delta against the entry at an earlier offset in the same pack.
    OfsDelta { base_offset: u64 },
    /// Delta against an object named by id.
    RefDelta { base: ObjectId },
}

impl EntryKind {
    pub fn type_code(&self) -> u8 {
        match self {
            Self::Full(kind) => kind.type_code(),
            Self::OfsDelta { .. } => OBJ_OFS_DELTA,
            Self::RefDelta { .. } => OBJ_REF_DELTA,
        }
    }

    pub fn is_delta(&self) -> bool {
        !matches!(self, Self::Full(_))
    }
}

/// Parsed entry header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryHeader {
    pub kind: EntryKind,
    /// Inflated size of the entry's payload (the delta itself for deltas).
    pub size: u64,
    /// Absolute position of the zlib stream.
    pub data_start: usize,
}

/// Encode the type/size header: type in bits 4-6 of the first byte, size as
/// a little-endian varint with 4 bits in the first byte.
pub fn encode_entry_header(type_code: u8, size: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    let mut byte = ((type_code & 0x07) << 4) | (size & 0x0f) as u8;
    let mut rest = size >> 4;
    while rest != 0 {
        out.push(byte | 0x80);
        byte = (rest & 0x7f) as u8;
        rest >>= 7;
    }
    out.push(byte);
    out
}

/// Encode the backwards distance of an OFS_DELTA base.
///
/// Each continuation byte implicitly adds one before shifting, so the
/// encoding has no redundant forms.
pub fn encode_ofs_distance(mut distance: u64) -> Vec<u8> {
    let mut buf = [0u8; 10];
    let mut pos = buf.len() - 1;
    buf[pos] = (distance & 0x7f) as u8;
    distance >>= 7;
    while distance != 0 {
        distance -= 1;
        pos -= 1;
        buf[pos] = 0x80 | (distance & 0x7f) as u8;
        distance >>= 7;
    }
    buf[pos..].to_vec()
}

/// Parse the entry header at `offset` within `data`.
///
/// `data` must be the pack body without its trailing checksum.
pub fn parse_entry_header(data: &[u8], offset: u64) -> PackResult<EntryHeader> {
    let start = usize::try_from(offset).map_err(|_| PackError::corrupt(offset, "offset overflow"))?;
    let byte_at = |pos: usize| -> PackResult<u8> {
        data.get(pos)
            .copied()
            .ok_or_else(|| PackError::corrupt(offset, "truncated entry header"))
    };

    let mut pos = start;
    let mut byte = byte_at(pos)?;
    pos += 1;
    let type_code = (byte >> 4) & 0x07;
    let mut size = u64::from(byte & 0x0f);
    let mut shift = 4u32;
    while byte & 0x80 != 0 {
        if pos - start >= MAX_HEADER_BYTES || shift > 63 {
            return Err(PackError::corrupt(offset, "entry header too long"));
        }
        byte = byte_at(pos)?;
        pos += 1;
        size |= u64::from(byte & 0x7f) << shift;
        shift += 7;
    }

    let kind = match type_code {
        OBJ_OFS_DELTA => {
            let mut c = byte_at(pos)?;
            pos += 1;
            let mut distance = u64::from(c & 0x7f);
            while c & 0x80 != 0 {
                if pos - start >= MAX_HEADER_BYTES {
                    return Err(PackError::corrupt(offset, "ofs-delta offset too long"));
                }
                c = byte_at(pos)?;
                pos += 1;
                distance = ((distance + 1) << 7) | u64::from(c & 0x7f);
            }
            if distance == 0 || distance > offset {
                return Err(PackError::corrupt(
                    offset,
                    format!("ofs-delta base distance {distance} out of range"),
                ));
            }
            EntryKind::OfsDelta {
                base_offset: offset - distance,
            }
        }
        OBJ_REF_DELTA => {
            let raw = data
                .get(pos..pos + OID_RAWSZ)
                .ok_or_else(|| PackError::corrupt(offset, "truncated ref-delta base"))?;
            pos += OID_RAWSZ;
            EntryKind::RefDelta {
                base: ObjectId::from_raw(raw)?,
            }
        }
        code => EntryKind::Full(
            ObjectKind::from_type_code(code)
                .ok_or_else(|| PackError::corrupt(offset, format!("unknown object type {code}")))?,
        ),
    };

    Ok(EntryHeader {
        kind,
        size,
        data_start: pos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_header_is_one_byte() {
        // blob (3), size 5
        assert_eq!(encode_entry_header(3, 5), vec![0x35]);
    }

    #[test]
    fn header_roundtrip_with_continuation() {
        for size in [0u64, 15, 16, 1000, 1 << 20, u32::MAX as u64] {
            let bytes = encode_entry_header(1, size);
            let header = parse_entry_header(&bytes, 0).unwrap();
            assert_eq!(header.kind, EntryKind::Full(ObjectKind::Commit));
            assert_eq!(header.size, size);
            assert_eq!(header.data_start, bytes.len());
        }
    }

    #[test]
    fn ofs_distance_encoding_matches_git() {
        assert_eq!(encode_ofs_distance(1), vec![0x01]);
        assert_eq!(encode_ofs_distance(127), vec![0x7f]);
        // 128 = ((0 + 1) << 7) | 0
        assert_eq!(encode_ofs_distance(128), vec![0x80, 0x00]);
        assert_eq!(encode_ofs_distance(300), vec![0x81, 0x2c]);
    }

    #[test]
    fn ofs_delta_header_resolves_base() {
        let mut data = vec![0u8; 400];
        let mut entry = encode_entry_header(OBJ_OFS_DELTA, 9);
        entry.extend(encode_ofs_distance(300));
        data.extend_from_slice(&entry);
        let header = parse_entry_header(&data, 400).unwrap();
        assert_eq!(header.kind, EntryKind::OfsDelta { base_offset: 100 });
    }

    #[test]
    fn ofs_delta_before_start_is_corrupt() {
        let mut data = encode_entry_header(OBJ_OFS_DELTA, 9);
        data.extend(encode_ofs_distance(50));
        assert!(parse_entry_header(&data, 0).is_err());
    }

    #[test]
    fn ref_delta_reads_base_id() {
        let mut data = encode_entry_header(OBJ_REF_DELTA, 4);
        data.extend_from_slice(&[0xab; 20]);
        let header = parse_entry_header(&data, 0).unwrap();
        assert_eq!(
            header.kind,
            EntryKind::RefDelta {
                base: ObjectId::from_hash([0xab; 20])
            }
        );
        assert_eq!(header.data_start, data.len());
    }

    #[test]
    fn unknown_type_and_truncation() {
        assert!(parse_entry_header(&[0x55], 0).is_err()); // type 5 is reserved
        assert!(parse_entry_header(&[0xb5], 0).is_err()); // continuation with no next byte
        assert!(parse_entry_header(&[], 0).is_err());
    }
}
