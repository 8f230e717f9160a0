//! Git delta format.
//!
//! A delta starts with two little-endian base-128 varints (base size, result
//! size) followed by instructions:
//!
//! - `1xxxxxxx` copy: the low 4 bits select offset bytes, the next 3 bits
//!   select size bytes; a size of 0 means `0x10000`.
//! - `0xxxxxxx` insert: the next `x` (1..=127) literal bytes.
//! - `0x00` is reserved and rejected.

use gcore_types::IntMap;
use thiserror::Error;

/// Largest size a single copy instruction can express.
const MAX_COPY: usize = 0xff_ffff;

/// Largest literal run a single insert instruction can carry.
const MAX_INSERT: usize = 0x7f;

/// Block size used to index the base when encoding.
const BLOCK: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeltaError {
    #[error("delta is truncated")]
    Truncated,
    #[error("delta header varint overflows")]
    HeaderOverflow,
    #[error("delta expects a base of {expected} bytes, got {actual}")]
    BaseSizeMismatch { expected: usize, actual: usize },
    #[error("copy instruction reaches outside the base")]
    CopyOutOfRange,
    #[error("instruction would exceed the declared result size")]
    OutputOverrun,
    #[error("reserved instruction 0")]
    BadCommandZero,
    #[error("delta produced {actual} bytes but declared {expected}")]
    ResultSizeMismatch { expected: usize, actual: usize },
}

fn read_size(delta: &[u8], pos: &mut usize) -> Result<usize, DeltaError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *delta.get(*pos).ok_or(DeltaError::Truncated)?;
        *pos += 1;
        if shift > 63 {
            return Err(DeltaError::HeaderOverflow);
        }
        value |= u64::from(byte & 0x7f) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    usize::try_from(value).map_err(|_| DeltaError::HeaderOverflow)
}

fn write_size(out: &mut Vec<u8>, mut value: usize) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Read the declared result size without applying the delta.
pub fn result_size(delta: &[u8]) -> Result<usize, DeltaError> {
    let mut pos = 0;
    read_size(delta, &mut pos)?;
    read_size(delta, &mut pos)
}

/// Apply `delta` to `base`.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, DeltaError> {
    let mut pos = 0usize;
    let base_size = read_size(delta, &mut pos)?;
    let size = read_size(delta, &mut pos)?;
    if base_size != base.len() {
        return Err(DeltaError::BaseSizeMismatch {
            expected: base_size,
            actual: base.len(),
        });
    }

    // The declared size comes from the pack; trust it only as an upper bound.
    let mut out = Vec::with_capacity(size.min(base.len() + delta.len()));
    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;

        if cmd & 0x80 != 0 {
            let mut off = 0usize;
            let mut len = 0usize;
            for i in 0..4 {
                if cmd & (1 << i) != 0 {
                    let byte = *delta.get(pos).ok_or(DeltaError::Truncated)?;
                    off |= usize::from(byte) << (8 * i);
                    pos += 1;
                }
            }
            for i in 0..3 {
                if cmd & (0x10 << i) != 0 {
                    let byte = *delta.get(pos).ok_or(DeltaError::Truncated)?;
                    len |= usize::from(byte) << (8 * i);
                    pos += 1;
                }
            }
            if len == 0 {
                len = 0x10000;
            }
            let end = off.checked_add(len).ok_or(DeltaError::CopyOutOfRange)?;
            if end > base.len() {
                return Err(DeltaError::CopyOutOfRange);
            }
            if out.len() + len > size {
                return Err(DeltaError::OutputOverrun);
            }
            out.extend_from_slice(&base[off..end]);
        } else if cmd != 0 {
            let len = usize::from(cmd);
            let literal = delta.get(pos..pos + len).ok_or(DeltaError::Truncated)?;
            if out.len() + len > size {
                return Err(DeltaError::OutputOverrun);
            }
            out.extend_from_slice(literal);
            pos += len;
        } else {
            return Err(DeltaError::BadCommandZero);
        }
    }

    if out.len() != size {
        return Err(DeltaError::ResultSizeMismatch {
            expected: size,
            actual: out.len(),
        });
    }
    Ok(out)
}

fn block_key(block: &[u8]) -> u64 {
    let mut lo = [0u8; 8];
    let mut hi = [0u8; 8];
    lo.copy_from_slice(&block[..8]);
    hi.copy_from_slice(&block[8..BLOCK]);
    u64::from_le_bytes(lo) ^ u64::from_le_bytes(hi).rotate_left(29)
}

fn emit_copy(out: &mut Vec<u8>, mut off: usize, mut len: usize) {
    while len > 0 {
        let chunk = len.min(MAX_COPY);
        let mut cmd = 0x80u8;
        let mut args = Vec::with_capacity(7);
        for i in 0..4 {
            let byte = ((off >> (8 * i)) & 0xff) as u8;
            if byte != 0 {
                cmd |= 1 << i;
                args.push(byte);
            }
        }
        for i in 0..3 {
            let byte = ((chunk >> (8 * i)) & 0xff) as u8;
            if byte != 0 {
                cmd |= 0x10 << i;
                args.push(byte);
            }
        }
        out.push(cmd);
        out.extend_from_slice(&args);
        off += chunk;
        len -= chunk;
    }
}

fn flush_insert(out: &mut Vec<u8>, pending: &mut Vec<u8>) {
    for chunk in pending.chunks(MAX_INSERT) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
    pending.clear();
}

/// Encode `target` as a delta against `base`.
///
/// Aligned 16-byte blocks of the base are indexed; runs of the target that
/// start on an indexed block become copies and everything else is inserted
/// literally. The result always applies cleanly, though it is not minimal.
pub fn encode_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(target.len() / 2 + 16);
    write_size(&mut out, base.len());
    write_size(&mut out, target.len());

    let mut index: IntMap<usize> = IntMap::new();
    for (i, block) in base.chunks_exact(BLOCK).enumerate() {
        // First occurrence wins; a failed insert only costs compression.
        if index.lookup(&block_key(block)).is_none() {
            let _ = index.insert(block_key(block), i * BLOCK);
        }
    }

    let mut pending = Vec::new();
    let mut pos = 0usize;
    while pos < target.len() {
        let candidate = target
            .get(pos..pos + BLOCK)
            .and_then(|block| index.lookup(&block_key(block)).copied())
            .filter(|&off| base[off..off + BLOCK] == target[pos..pos + BLOCK]);
        match candidate {
            Some(off) => {
                let mut len = BLOCK;
                while off + len < base.len()
                    && pos + len < target.len()
                    && base[off + len] == target[pos + len]
                {
                    len += 1;
                }
                flush_insert(&mut out, &mut pending);
                emit_copy(&mut out, off, len);
                pos += len;
            }
            None => {
                pending.push(target[pos]);
                pos += 1;
            }
        }
    }
    flush_insert(&mut out, &mut pending);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn insert_only() {
        // base size 0, result size 5, insert 5 bytes
        let delta = [0x00, 0x05, 0x05, b'h', b'e', b'l', b'l', b'o'];
        assert_eq!(apply_delta(b"", &delta).unwrap(), b"hello");
    }

    #[test]
    fn copy_then_insert() {
        // base "base" (4), result "base!" (5): copy off 0 len 4, insert "!"
        let delta = [0x04, 0x05, 0x90, 0x04, 0x01, b'!'];
        assert_eq!(apply_delta(b"base", &delta).unwrap(), b"base!");
    }

    #[test]
    fn copy_size_zero_means_64k() {
        let base = vec![7u8; 0x10000];
        let mut delta = Vec::new();
        write_size(&mut delta, base.len());
        write_size(&mut delta, base.len());
        delta.push(0x80);
        assert_eq!(apply_delta(&base, &delta).unwrap(), base);
    }

    #[test]
    fn rejects_bad_deltas() {
        assert_eq!(
            apply_delta(b"abc", &[0x04, 0x01, 0x01, b'x']),
            Err(DeltaError::BaseSizeMismatch { expected: 4, actual: 3 })
        );
        assert_eq!(apply_delta(b"", &[0x00, 0x01, 0x00]), Err(DeltaError::BadCommandZero));
        assert_eq!(
            apply_delta(b"ab", &[0x02, 0x04, 0x90, 0x04]),
            Err(DeltaError::CopyOutOfRange)
        );
        assert_eq!(
            apply_delta(b"", &[0x00, 0x01, 0x02, b'a', b'b']),
            Err(DeltaError::OutputOverrun)
        );
        assert_eq!(apply_delta(b"", &[0x00, 0x03, 0x02, b'a']), Err(DeltaError::Truncated));
        assert_eq!(
            apply_delta(b"", &[0x00, 0x03, 0x01, b'a']),
            Err(DeltaError::ResultSizeMismatch { expected: 3, actual: 1 })
        );
    }

    #[test]
    fn huge_declared_size_fails_without_allocating_it() {
        // base 1, result 2^56, insert "x"
        let mut delta = vec![0x01];
        delta.extend_from_slice(&[0x80; 8]);
        delta.extend_from_slice(&[0x01, 0x01, b'x']);
        assert!(matches!(
            apply_delta(b"a", &delta),
            Err(DeltaError::ResultSizeMismatch { actual: 1, .. }) | Err(DeltaError::HeaderOverflow)
        ));
    }

    #[test]
    fn encoder_uses_copies_for_shared_content() {
        let base: Vec<u8> = (0..4096u32).flat_map(|i| i.to_le_bytes()).collect();
        let mut target = base.clone();
        target[100] ^= 0xff;
        target.extend_from_slice(b"tail");
        let delta = encode_delta(&base, &target);
        assert!(delta.len() < target.len() / 10);
        assert_eq!(apply_delta(&base, &delta).unwrap(), target);
        assert_eq!(result_size(&delta).unwrap(), target.len());
    }

    proptest! {
        #[test]
        fn encoded_delta_applies(
            base in proptest::collection::vec(any::<u8>(), 0..600),
            edits in proptest::collection::vec((any::<u16>(), any::<u8>()), 0..8),
        ) {
            let mut target = base.clone();
            for (at, byte) in edits {
                if target.is_empty() {
                    target.push(byte);
                } else {
                    let at = usize::from(at) % target.len();
                    target.insert(at, byte);
                }
            }
            let delta = encode_delta(&base, &target);
            prop_assert_eq!(apply_delta(&base, &delta).unwrap(), target);
        }
    }
}
