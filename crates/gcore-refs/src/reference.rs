//! Core reference types.

use std::fmt;
use std::ops::BitOr;

use gcore_types::ObjectId;

use crate::names::{HEADS_DIR, NOTES_DIR, REMOTES_DIR, TAGS_DIR};

/// What a reference points at.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RefTarget {
    /// Points straight at an object.
    Direct(ObjectId),
    /// Names another reference.
    Symbolic(String),
}

impl RefTarget {
    pub fn id(&self) -> Option<&ObjectId> {
        match self {
            Self::Direct(id) => Some(id),
            Self::Symbolic(_) => None,
        }
    }

    pub fn symbolic(&self) -> Option<&str> {
        match self {
            Self::Direct(_) => None,
            Self::Symbolic(name) => Some(name),
        }
    }
}

/// Where a reference was found and what extra data came with it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RefFlags(u8);

impl RefFlags {
    pub const NONE: Self = Self(0);
    /// Read from its own file under the git directory.
    pub const LOOSE: Self = Self(1);
    /// Read from `packed-refs`.
    pub const PACKED: Self = Self(2);
    /// Carries a peeled id from a `^` line.
    pub const HAS_PEEL: Self = Self(4);
    /// Was loose before being folded into `packed-refs`.
    pub const WAS_LOOSE: Self = Self(8);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl BitOr for RefFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A named reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    pub target: RefTarget,
    /// For packed annotated tags: the object the tag finally points to.
    pub peeled: Option<ObjectId>,
    pub flags: RefFlags,
}

impl Reference {
    pub fn direct(name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            name: name.into(),
            target: RefTarget::Direct(id),
            peeled: None,
            flags: RefFlags::NONE,
        }
    }

    pub fn symbolic(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: RefTarget::Symbolic(target.into()),
            peeled: None,
            flags: RefFlags::NONE,
        }
    }

    pub fn with_peeled(mut self, peeled: ObjectId) -> Self {
        self.peeled = Some(peeled);
        self.flags.insert(RefFlags::HAS_PEEL);
        self
    }

    pub fn with_flags(mut self, flags: RefFlags) -> Self {
        self.flags.insert(flags);
        self
    }

    pub fn id(&self) -> Option<&ObjectId> {
        self.target.id()
    }

    pub fn symbolic_target(&self) -> Option<&str> {
        self.target.symbolic()
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self.target, RefTarget::Symbolic(_))
    }

    pub fn is_branch(&self) -> bool {
        self.name.starts_with(HEADS_DIR)
    }

    pub fn is_tag(&self) -> bool {
        self.name.starts_with(TAGS_DIR)
    }

    pub fn is_remote(&self) -> bool {
        self.name.starts_with(REMOTES_DIR)
    }

    pub fn is_note(&self) -> bool {
        self.name.starts_with(NOTES_DIR)
    }

    pub fn is_packed(&self) -> bool {
        self.flags.contains(RefFlags::PACKED)
    }

    /// Contents of the loose file for this reference.
    pub fn to_loose_contents(&self) -> String {
        match &self.target {
            RefTarget::Direct(id) => format!("{id}\n"),
            RefTarget::Symbolic(target) => format!("ref: {target}\n"),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            RefTarget::Direct(id) => write!(f, "{id} {}", self.name),
            RefTarget::Symbolic(target) => write!(f, "ref: {target} {}", self.name),
        }
    }
}

/// Which references `foreach` reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefFilter {
    All,
    Direct,
    Symbolic,
}

impl RefFilter {
    pub fn accepts(self, reference: &Reference) -> bool {
        match self {
            Self::All => true,
            Self::Direct => !reference.is_symbolic(),
            Self::Symbolic => reference.is_symbolic(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_contents() {
        let id = ObjectId::from_hash([0xab; 20]);
        assert_eq!(
            Reference::direct("refs/heads/main", id).to_loose_contents(),
            format!("{}\n", "ab".repeat(20))
        );
        assert_eq!(
            Reference::symbolic("HEAD", "refs/heads/main").to_loose_contents(),
            "ref: refs/heads/main\n"
        );
    }

    #[test]
    fn peeled_sets_flag() {
        let r = Reference::direct("refs/tags/v1", ObjectId::from_hash([1; 20]))
            .with_flags(RefFlags::PACKED)
            .with_peeled(ObjectId::from_hash([2; 20]));
        assert!(r.flags.contains(RefFlags::PACKED | RefFlags::HAS_PEEL));
        assert!(!r.flags.contains(RefFlags::LOOSE));
        assert!(r.is_tag() && r.is_packed());
    }

    #[test]
    fn filter() {
        let sym = Reference::symbolic("HEAD", "refs/heads/main");
        assert!(RefFilter::Symbolic.accepts(&sym));
        assert!(!RefFilter::Direct.accepts(&sym));
        assert!(RefFilter::All.accepts(&sym));
    }
}
