use gcore_types::{ObjectId, Signature};

use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectKind, RawObject};

/// A commit object.
///
/// Headers the model does not know about (`gpgsig`, `mergetag`, ...) are
/// kept in [`extra_headers`](Commit::extra_headers) so a parsed commit
/// serializes back to the same bytes and keeps its id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    pub encoding: Option<String>,
    pub extra_headers: Vec<(String, String)>,
    pub message: String,
}

impl Commit {
    pub fn new(
        tree: ObjectId,
        parents: Vec<ObjectId>,
        author: Signature,
        committer: Signature,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tree,
            parents,
            author,
            committer,
            encoding: None,
            extra_headers: Vec::new(),
            message: message.into(),
        }
    }

    /// First line of the message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = String::with_capacity(256 + self.message.len());
        out.push_str(&format!("tree {}\n", self.tree));
        for parent in &self.parents {
            out.push_str(&format!("parent {parent}\n"));
        }
        out.push_str(&format!("author {}\n", self.author));
        out.push_str(&format!("committer {}\n", self.committer));
        if let Some(encoding) = &self.encoding {
            out.push_str(&format!("encoding {encoding}\n"));
        }
        write_extra_headers(&mut out, &self.extra_headers);
        out.push('\n');
        out.push_str(&self.message);
        out.into_bytes()
    }

    pub fn parse(data: &[u8]) -> StoreResult<Self> {
        let bad = |reason: &str| StoreError::malformed(ObjectKind::Commit, reason);
        let text = std::str::from_utf8(data).map_err(|_| bad("commit is not valid UTF-8"))?;
        let (headers, message) = split_headers(text);

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut encoding = None;
        let mut extra_headers = Vec::new();

        for (key, value) in headers {
            match key {
                "tree" if tree.is_none() => tree = Some(ObjectId::from_hex(&value)?),
                "parent" if author.is_none() => parents.push(ObjectId::from_hex(&value)?),
                "author" if author.is_none() => author = Some(Signature::parse(&value)?),
                "committer" if committer.is_none() => {
                    committer = Some(Signature::parse(&value)?)
                }
                "encoding" if encoding.is_none() => encoding = Some(value),
                "tree" | "parent" | "author" | "committer" | "encoding" => {
                    return Err(StoreError::malformed(
                        ObjectKind::Commit,
                        format!("unexpected {key} header"),
                    ));
                }
                _ => extra_headers.push((key.to_string(), value)),
            }
        }

        Ok(Self {
            tree: tree.ok_or_else(|| bad("missing tree header"))?,
            parents,
            author: author.ok_or_else(|| bad("missing author header"))?,
            committer: committer.ok_or_else(|| bad("missing committer header"))?,
            encoding,
            extra_headers,
            message: message.to_string(),
        })
    }

    pub fn to_raw(&self) -> RawObject {
        RawObject::new(ObjectKind::Commit, self.serialize())
    }

    pub fn from_raw(obj: &RawObject) -> StoreResult<Self> {
        if obj.kind != ObjectKind::Commit {
            return Err(StoreError::malformed(
                ObjectKind::Commit,
                format!("expected commit, got {}", obj.kind),
            ));
        }
        Self::parse(&obj.data)
    }
}

/// Split an object's text into header key/value pairs and the message.
///
/// Continuation lines (starting with a space) are folded into the previous
/// header's value, joined by `\n`.
pub(crate) fn split_headers(text: &str) -> (Vec<(&str, String)>, &str) {
    let mut headers: Vec<(&str, String)> = Vec::new();
    let mut rest = text;
    loop {
        let (line, after) = match rest.find('\n') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };
        if line.is_empty() {
            return (headers, after);
        }
        if let Some(cont) = line.strip_prefix(' ') {
            if let Some((_, value)) = headers.last_mut() {
                value.push('\n');
                value.push_str(cont);
            }
        } else {
            match line.split_once(' ') {
                Some((key, value)) => headers.push((key, value.to_string())),
                None => headers.push((line, String::new())),
            }
        }
        if after.is_empty() {
            return (headers, "");
        }
        rest = after;
    }
}

pub(crate) fn write_extra_headers(out: &mut String, headers: &[(String, String)]) {
    for (key, value) in headers {
        out.push_str(key);
        out.push(' ');
        out.push_str(&value.replace('\n', "\n "));
        out.push('\n');
    }
}
