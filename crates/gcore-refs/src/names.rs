//! Reference name normalization following git's rules.
//!
//! A valid name:
//! - is non-empty and does not start or end with `/`
//! - contains no control characters, space, `~`, `^`, `:`, `?`, `[`, `*`, `\`
//! - has no component starting with `.` or ending with `.lock`
//! - does not contain `..` or `@{` and does not end with `.`
//!
//! Repeated slashes are collapsed rather than rejected.

use std::ops::BitOr;

use crate::error::{RefError, Result};

pub const REFS_DIR: &str = "refs/";
pub const HEADS_DIR: &str = "refs/heads/";
pub const TAGS_DIR: &str = "refs/tags/";
pub const REMOTES_DIR: &str = "refs/remotes/";
pub const NOTES_DIR: &str = "refs/notes/";
pub const HEAD: &str = "HEAD";
pub const PACKED_REFS_FILE: &str = "packed-refs";
pub const LOCK_EXT: &str = ".lock";

/// Options for [`normalize_name`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefNameFlags(u8);

impl RefNameFlags {
    pub const NONE: Self = Self(0);
    /// Accept any single-component name, not only `HEAD`-style ones.
    pub const ALLOW_ONELEVEL: Self = Self(1);
    /// Accept one `*` wildcard, as in refspecs.
    pub const REFSPEC_PATTERN: Self = Self(2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for RefNameFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

fn is_forbidden_char(c: char) -> bool {
    (c as u32) <= 0x20 || c == '\u{7f}' || matches!(c, '~' | '^' | ':' | '?' | '[' | '*' | '\\')
}

/// `HEAD`, `FETCH_HEAD`, `ORIG_HEAD` and friends.
pub fn is_all_caps(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_uppercase() || b == b'_')
}

/// Validate `name` and return its normalized form.
pub fn normalize_name(name: &str, flags: RefNameFlags) -> Result<String> {
    if name.is_empty() {
        return Err(RefError::invalid_name(name, "name is empty"));
    }
    if name.starts_with('/') {
        return Err(RefError::invalid_name(name, "name starts with '/'"));
    }
    if name.ends_with('/') {
        return Err(RefError::invalid_name(name, "name ends with '/'"));
    }
    if name.ends_with('.') {
        return Err(RefError::invalid_name(name, "name ends with '.'"));
    }
    if name == "@" {
        return Err(RefError::invalid_name(name, "'@' is not a valid name"));
    }
    if name.contains("@{") {
        return Err(RefError::invalid_name(name, "name contains '@{'"));
    }

    let pattern = flags.contains(RefNameFlags::REFSPEC_PATTERN);
    let mut seen_star = false;
    for c in name.chars() {
        if c == '*' && pattern && !seen_star {
            seen_star = true;
            continue;
        }
        if is_forbidden_char(c) {
            return Err(RefError::invalid_name(
                name,
                format!("name contains forbidden character {c:?}"),
            ));
        }
    }

    let components: Vec<&str> = name.split('/').filter(|c| !c.is_empty()).collect();
    for component in &components {
        if component.starts_with('.') {
            return Err(RefError::invalid_name(
                name,
                format!("component {component:?} starts with '.'"),
            ));
        }
        if component.contains("..") {
            return Err(RefError::invalid_name(name, "name contains '..'"));
        }
        if component.ends_with(LOCK_EXT) {
            return Err(RefError::invalid_name(name, "component ends with '.lock'"));
        }
    }

    if components.len() == 1
        && !flags.contains(RefNameFlags::ALLOW_ONELEVEL)
        && !is_all_caps(components[0])
        && !(pattern && components[0] == "*")
    {
        return Err(RefError::invalid_name(
            name,
            "one-level names must be upper case",
        ));
    }

    Ok(components.join("/"))
}

/// Normalize the name of a reference that points straight at an object.
///
/// Such references live under `refs/` unless they are special one-level
/// names like `HEAD` or `ORIG_HEAD`.
pub fn normalize_direct(name: &str) -> Result<String> {
    let normalized = normalize_name(name, RefNameFlags::NONE)?;
    if !normalized.starts_with(REFS_DIR) && !is_all_caps(&normalized) {
        return Err(RefError::invalid_name(name, "name does not start with 'refs/'"));
    }
    Ok(normalized)
}

/// Normalize the name (or target) of a symbolic reference.
pub fn normalize_symbolic(name: &str) -> Result<String> {
    normalize_name(name, RefNameFlags::NONE)
}

pub fn is_valid_name(name: &str) -> bool {
    normalize_name(name, RefNameFlags::NONE).is_ok()
}

/// Check that `new` can be created alongside `existing` names.
///
/// A reference is stored as a file, so `refs/heads/a` and `refs/heads/a/b`
/// cannot coexist. `old` is skipped since a rename frees its slot.
pub fn reference_available<'a>(
    existing: impl IntoIterator<Item = &'a str>,
    new: &str,
    old: Option<&str>,
) -> Result<()> {
    for name in existing {
        if Some(name) == old || name == new {
            continue;
        }
        let (short, long) = if name.len() < new.len() {
            (name, new)
        } else {
            (new, name)
        };
        if long.starts_with(short) && long.as_bytes().get(short.len()) == Some(&b'/') {
            return Err(RefError::NameConflict {
                name: new.to_string(),
                existing: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Match `name` against a glob where `*` spans any run of characters
/// (slashes included) and `?` matches exactly one.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let p = pattern.as_bytes();
    let n = name.as_bytes();
    let (mut pi, mut ni) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ni < n.len() {
        match p.get(pi) {
            Some(b'*') => {
                backtrack = Some((pi, ni));
                pi += 1;
            }
            Some(&c) if c == b'?' || c == n[ni] => {
                pi += 1;
                ni += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    pi = star + 1;
                    ni = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    p[pi..].iter().all(|&c| c == b'*')
}

/// Strip the well-known namespace prefix for display.
pub fn shorthand(name: &str) -> &str {
    for prefix in [HEADS_DIR, TAGS_DIR, REMOTES_DIR, REFS_DIR] {
        if let Some(rest) = name.strip_prefix(prefix) {
            return rest;
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcore_types::ErrorCode;

    fn norm(name: &str) -> Result<String> {
        normalize_name(name, RefNameFlags::NONE)
    }

    #[test]
    fn valid_nested_names() {
        assert_eq!(norm("refs/heads/main").unwrap(), "refs/heads/main");
        assert_eq!(norm("refs/heads/feature/auth").unwrap(), "refs/heads/feature/auth");
        assert_eq!(norm("refs/tags/v1.0").unwrap(), "refs/tags/v1.0");
        assert_eq!(norm("HEAD").unwrap(), "HEAD");
        assert_eq!(norm("FETCH_HEAD").unwrap(), "FETCH_HEAD");
    }

    #[test]
    fn duplicate_slashes_collapse() {
        assert_eq!(norm("refs//heads///main").unwrap(), "refs/heads/main");
    }

    #[test]
    fn reject_empty_and_slash_boundaries() {
        assert!(norm("").is_err());
        assert!(norm("/refs/heads/x").is_err());
        assert!(norm("refs/heads/x/").is_err());
    }

    #[test]
    fn reject_dots() {
        assert!(norm("refs/heads/a..b").is_err());
        assert!(norm("refs/heads/.hidden").is_err());
        assert!(norm("refs/heads/trailing.").is_err());
        assert!(norm("refs/heads/main.lock").is_err());
        assert!(norm("refs/heads/main.lock/x").is_err());
    }

    #[test]
    fn reject_forbidden_chars() {
        for bad in [
            "refs/heads/a b",
            "refs/heads/a\tb",
            "refs/heads/a~b",
            "refs/heads/a^b",
            "refs/heads/a:b",
            "refs/heads/a?b",
            "refs/heads/a*b",
            "refs/heads/a[b",
            "refs/heads/a\\b",
            "refs/heads/a\u{7f}b",
            "refs/heads/ref@{0}",
        ] {
            let err = norm(bad).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidName, "{bad:?}");
        }
    }

    #[test]
    fn one_level_names() {
        assert!(norm("main").is_err());
        assert!(normalize_name("main", RefNameFlags::ALLOW_ONELEVEL).is_ok());
        assert!(normalize_direct("ORIG_HEAD").is_ok());
        assert!(normalize_direct("heads/main").is_err());
        assert!(normalize_symbolic("refs/heads/main").is_ok());
    }

    #[test]
    fn refspec_pattern_allows_one_star() {
        let flags = RefNameFlags::REFSPEC_PATTERN;
        assert!(normalize_name("refs/heads/*", flags).is_ok());
        assert!(normalize_name("refs/heads/feature-*", flags).is_ok());
        assert!(normalize_name("refs/*/*", flags).is_err());
        assert!(normalize_name("refs/heads/*", RefNameFlags::NONE).is_err());
    }

    #[test]
    fn availability_checks_path_prefixes() {
        let existing = ["refs/heads/a", "refs/heads/b/c"];
        assert!(reference_available(existing, "refs/heads/a/b", None).is_err());
        assert!(reference_available(existing, "refs/heads/b", None).is_err());
        assert!(reference_available(existing, "refs/heads/ab", None).is_ok());
        assert!(reference_available(existing, "refs/heads/a/b", Some("refs/heads/a")).is_ok());
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("refs/heads/*", "refs/heads/main"));
        assert!(glob_match("refs/heads/*", "refs/heads/feature/x"));
        assert!(glob_match("refs/*/v?", "refs/tags/v1"));
        assert!(!glob_match("refs/tags/*", "refs/heads/main"));
        assert!(glob_match("*", "HEAD"));
        assert!(!glob_match("refs/heads/m", "refs/heads/main"));
    }

    proptest::proptest! {
        #[test]
        fn normalization_is_idempotent(parts in proptest::collection::vec("[a-z0-9_-]{1,8}", 1..5)) {
            let name = format!("refs/{}", parts.join("//"));
            let once = normalize_name(&name, RefNameFlags::NONE).unwrap();
            proptest::prop_assert!(!once.contains("//"));
            proptest::prop_assert_eq!(normalize_name(&once, RefNameFlags::NONE).unwrap(), once);
        }
    }

    #[test]
    fn shorthand_strips_namespace() {
        assert_eq!(shorthand("refs/heads/main"), "main");
        assert_eq!(shorthand("refs/remotes/origin/x"), "origin/x");
        assert_eq!(shorthand("HEAD"), "HEAD");
    }
}
