use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Size of a raw object id in bytes.
pub const OID_RAWSZ: usize = 20;

/// Size of a hex-formatted object id.
pub const OID_HEXSZ: usize = OID_RAWSZ * 2;

/// Shortest prefix accepted when resolving abbreviated ids.
pub const OID_MINPREFIXLEN: usize = 4;

/// Content-addressed identifier for any stored object.
///
/// An `ObjectId` is the hash of an object's canonical header and payload.
/// Ordering is plain byte order, which is also the order of the lowercase
/// hex form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; OID_RAWSZ]);

impl ObjectId {
    /// Create an `ObjectId` from a pre-computed hash.
    pub const fn from_hash(hash: [u8; OID_RAWSZ]) -> Self {
        Self(hash)
    }

    /// Copy an `ObjectId` out of a raw byte slice of exactly [`OID_RAWSZ`] bytes.
    pub fn from_raw(raw: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; OID_RAWSZ] = raw.try_into().map_err(|_| TypeError::InvalidLength {
            expected: OID_RAWSZ,
            actual: raw.len(),
        })?;
        Ok(Self(arr))
    }

    /// The all-zero id. Reflogs use it as the "previous" value of a new ref.
    pub const fn zero() -> Self {
        Self([0u8; OID_RAWSZ])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; OID_RAWSZ]
    }

    /// The raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; OID_RAWSZ] {
        &self.0
    }

    /// Lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The first `len` hex digits (clamped to the full width).
    pub fn to_hex_prefix(&self, len: usize) -> String {
        let mut s = self.to_hex();
        s.truncate(len.min(OID_HEXSZ));
        s
    }

    /// Short hex representation (first 7 characters).
    pub fn short_hex(&self) -> String {
        self.to_hex_prefix(7)
    }

    /// Loose-object path form: `xx/remaining-38`.
    pub fn fmt_path(&self) -> String {
        let hex = self.to_hex();
        format!("{}/{}", &hex[..2], &hex[2..])
    }

    /// Parse a full-width hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        if s.len() != OID_HEXSZ {
            return Err(TypeError::InvalidLength {
                expected: OID_HEXSZ,
                actual: s.len(),
            });
        }
        let mut arr = [0u8; OID_RAWSZ];
        hex::decode_to_slice(s, &mut arr).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Ok(Self(arr))
    }

    /// Parse an abbreviated hex id of 1..=40 digits, zero-filling the rest.
    ///
    /// The caller keeps track of the prefix length; use [`ObjectId::ncmp`]
    /// to compare only the significant digits.
    pub fn from_prefix(s: &str) -> Result<Self, TypeError> {
        if s.is_empty() || s.len() > OID_HEXSZ {
            return Err(TypeError::InvalidLength {
                expected: OID_HEXSZ,
                actual: s.len(),
            });
        }
        let mut padded = String::with_capacity(OID_HEXSZ);
        padded.push_str(s);
        while padded.len() < OID_HEXSZ {
            padded.push('0');
        }
        Self::from_hex(&padded)
    }

    /// Compare the first `n` hex digits of two ids.
    pub fn ncmp(&self, other: &ObjectId, n: usize) -> Ordering {
        let n = n.min(OID_HEXSZ);
        let full = n / 2;
        match self.0[..full].cmp(&other.0[..full]) {
            Ordering::Equal if n % 2 == 1 => (self.0[full] >> 4).cmp(&(other.0[full] >> 4)),
            ord => ord,
        }
    }

    /// True when the first `n` hex digits of `self` match `prefix`.
    pub fn starts_with(&self, prefix: &ObjectId, n: usize) -> bool {
        self.ncmp(prefix, n) == Ordering::Equal
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; OID_RAWSZ]> for ObjectId {
    fn from(bytes: [u8; OID_RAWSZ]) -> Self {
        Self(bytes)
    }
}

impl From<ObjectId> for [u8; OID_RAWSZ] {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
