//! Shortest-unique-prefix computation over a set of hex object ids.
//!
//! Ids are inserted into a 16-ary trie keyed by hex digit. A branch that
//! holds a single id is stored as a leaf carrying the remaining digits; the
//! leaf is split only when a second id arrives that shares its prefix. The
//! answer is the length of the deepest point at which two ids diverge, plus
//! one.

use crate::error::TypeError;
use crate::oid::OID_HEXSZ;

/// Hard cap on trie nodes; indexes are stored as `i16` so leaf markers can be
/// negative.
const MAX_NODES: usize = i16::MAX as usize;

#[derive(Clone, Debug, Default)]
struct TrieNode {
    /// Remaining hex digits of the single id held by a leaf.
    tail: Option<Vec<u8>>,
    /// 0 = empty, positive = internal node index, negative = leaf index.
    children: [i16; 16],
}

/// Incrementally computes the minimum prefix length that keeps every added
/// id unique.
#[derive(Clone, Debug)]
pub struct OidShortener {
    nodes: Vec<TrieNode>,
    min_length: usize,
    full: bool,
}

impl OidShortener {
    /// Create a shortener whose answers never drop below `min_length`.
    pub fn new(min_length: usize) -> Self {
        Self {
            nodes: vec![TrieNode::default()],
            min_length: min_length.min(OID_HEXSZ),
            full: false,
        }
    }

    /// Current minimal unique prefix length.
    pub fn min_length(&self) -> usize {
        self.min_length
    }

    /// Add a full-width hex id and return the updated minimal prefix length.
    pub fn add(&mut self, text_oid: &str) -> Result<usize, TypeError> {
        if self.full {
            return Err(TypeError::ShortenerFull);
        }
        if text_oid.len() != OID_HEXSZ {
            return Err(TypeError::InvalidLength {
                expected: OID_HEXSZ,
                actual: text_oid.len(),
            });
        }
        let digits = text_oid
            .bytes()
            .map(from_hex_digit)
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| TypeError::InvalidHex(text_oid.to_string()))?;

        let mut idx = 0usize;
        let mut is_leaf = false;
        let mut depth = 0usize;
        let mut placed = false;

        while depth < OID_HEXSZ {
            let c = digits[depth] as usize;

            if is_leaf {
                // Split the leaf: push its tail one level down.
                let tail = self.nodes[idx].tail.take().unwrap_or_default();
                let (&first, rest) = tail
                    .split_first()
                    .ok_or_else(|| TypeError::DuplicateOid(text_oid.to_string()))?;
                self.push_leaf(idx, first as usize, rest.to_vec())?;
            }

            let child = self.nodes[idx].children[c];
            if child == 0 {
                self.push_leaf(idx, c, digits[depth + 1..].to_vec())?;
                placed = true;
                break;
            }

            is_leaf = child < 0;
            if is_leaf {
                self.nodes[idx].children[c] = -child;
            }
            idx = child.unsigned_abs() as usize;
            depth += 1;
        }

        if !placed {
            return Err(TypeError::DuplicateOid(text_oid.to_string()));
        }

        if depth + 1 > self.min_length {
            self.min_length = depth + 1;
        }
        Ok(self.min_length)
    }

    fn push_leaf(&mut self, parent: usize, push_at: usize, tail: Vec<u8>) -> Result<(), TypeError> {
        let leaf = self.nodes.len();
        if leaf >= MAX_NODES {
            self.full = true;
            return Err(TypeError::ShortenerFull);
        }
        self.nodes.push(TrieNode {
            tail: Some(tail),
            children: [0; 16],
        });
        self.nodes[parent].children[push_at] = -(leaf as i16);
        Ok(())
    }
}

fn from_hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad(prefix: &str) -> String {
        format!("{prefix}{}", "0".repeat(OID_HEXSZ - prefix.len()))
    }

    #[test]
    fn single_id_keeps_minimum() {
        let mut s = OidShortener::new(4);
        assert_eq!(s.add(&pad("abcdef")).unwrap(), 4);
    }

    #[test]
    fn diverging_ids_grow_prefix() {
        let mut s = OidShortener::new(1);
        assert_eq!(s.add(&pad("22")).unwrap(), 1);
        assert_eq!(s.add(&pad("23")).unwrap(), 2);
        assert_eq!(s.add(&pad("2345a")).unwrap(), 3);
        assert_eq!(s.add(&pad("9")).unwrap(), 3);
    }

    #[test]
    fn split_leaf_then_extend() {
        let mut s = OidShortener::new(0);
        s.add(&pad("aaaa1")).unwrap();
        assert_eq!(s.add(&pad("aaaa2")).unwrap(), 5);
        assert_eq!(s.add(&pad("aaab")).unwrap(), 5);
        assert_eq!(s.add(&pad("aaaa10001")).unwrap(), 9);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut s = OidShortener::new(4);
        let id = pad("1234");
        s.add(&id).unwrap();
        assert!(matches!(s.add(&id), Err(TypeError::DuplicateOid(_))));
    }

    #[test]
    fn invalid_input() {
        let mut s = OidShortener::new(4);
        assert!(s.add("abc").is_err());
        assert!(matches!(s.add(&pad("xyz")), Err(TypeError::InvalidHex(_))));
    }
}
