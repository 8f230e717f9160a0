use gcore_types::{ObjectId, Signature};

use crate::commit::{split_headers, write_extra_headers};
use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectKind, RawObject};
use crate::odb::Odb;

/// Upper bound on tag-to-tag hops while peeling.
const MAX_PEEL_DEPTH: usize = 64;

/// An annotated tag object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub target: ObjectId,
    pub target_kind: ObjectKind,
    pub name: String,
    pub tagger: Option<Signature>,
    pub extra_headers: Vec<(String, String)>,
    pub message: String,
}

impl Tag {
    pub fn new(
        target: ObjectId,
        target_kind: ObjectKind,
        name: impl Into<String>,
        tagger: Option<Signature>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            target,
            target_kind,
            name: name.into(),
            tagger,
            extra_headers: Vec::new(),
            message: message.into(),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = String::with_capacity(128 + self.message.len());
        out.push_str(&format!("object {}\n", self.target));
        out.push_str(&format!("type {}\n", self.target_kind));
        out.push_str(&format!("tag {}\n", self.name));
        if let Some(tagger) = &self.tagger {
            out.push_str(&format!("tagger {tagger}\n"));
        }
        write_extra_headers(&mut out, &self.extra_headers);
        out.push('\n');
        out.push_str(&self.message);
        out.into_bytes()
    }

    pub fn parse(data: &[u8]) -> StoreResult<Self> {
        let bad = |reason: &str| StoreError::malformed(ObjectKind::Tag, reason);
        let text = std::str::from_utf8(data).map_err(|_| bad("tag is not valid UTF-8"))?;
        let (headers, message) = split_headers(text);

        let mut target = None;
        let mut target_kind = None;
        let mut name = None;
        let mut tagger = None;
        let mut extra_headers = Vec::new();

        for (key, value) in headers {
            match key {
                "object" if target.is_none() => target = Some(ObjectId::from_hex(&value)?),
                "type" if target_kind.is_none() => {
                    let kind = value
                        .parse::<ObjectKind>()
                        .map_err(|e| StoreError::malformed(ObjectKind::Tag, e))?;
                    target_kind = Some(kind);
                }
                "tag" if name.is_none() => name = Some(value),
                "tagger" if tagger.is_none() => tagger = Some(Signature::parse(&value)?),
                "object" | "type" | "tag" | "tagger" => {
                    return Err(StoreError::malformed(
                        ObjectKind::Tag,
                        format!("duplicate {key} header"),
                    ));
                }
                _ => extra_headers.push((key.to_string(), value)),
            }
        }

        Ok(Self {
            target: target.ok_or_else(|| bad("missing object header"))?,
            target_kind: target_kind.ok_or_else(|| bad("missing type header"))?,
            name: name.ok_or_else(|| bad("missing tag header"))?,
            tagger,
            extra_headers,
            message: message.to_string(),
        })
    }

    pub fn to_raw(&self) -> RawObject {
        RawObject::new(ObjectKind::Tag, self.serialize())
    }

    pub fn from_raw(obj: &RawObject) -> StoreResult<Self> {
        if obj.kind != ObjectKind::Tag {
            return Err(StoreError::malformed(
                ObjectKind::Tag,
                format!("expected tag, got {}", obj.kind),
            ));
        }
        Self::parse(&obj.data)
    }

    /// Follow this tag (and any tags it points at) to the first non-tag
    /// object.
    pub fn peel(&self, odb: &Odb) -> StoreResult<(ObjectId, ObjectKind)> {
        let mut id = self.target;
        for _ in 0..MAX_PEEL_DEPTH {
            let obj = odb.read(&id)?;
            if obj.kind != ObjectKind::Tag {
                return Ok((id, obj.kind));
            }
            id = Tag::parse(&obj.data)?.target;
        }
        Err(StoreError::CorruptObject {
            id: self.target,
            reason: format!("tag chain longer than {MAX_PEEL_DEPTH}"),
        })
    }
}
