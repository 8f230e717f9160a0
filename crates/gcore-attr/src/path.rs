//! Helpers for repository-relative query paths.

use std::path::Path;

use crate::error::{AttrError, Result};

/// A query path relative to the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueryPath {
    /// Slash-separated, without leading `./` or trailing `/`.
    pub rel: String,
    pub is_dir: bool,
}

impl QueryPath {
    /// Normalize `path`. A trailing `/` marks a directory; otherwise the
    /// working directory (if any) is consulted.
    pub fn new(path: &str, workdir: Option<&Path>) -> Result<Self> {
        let mut rel = path.replace('\\', "/");
        while let Some(rest) = rel.strip_prefix("./") {
            rel = rest.to_string();
        }
        if rel.starts_with('/') {
            return Err(AttrError::InvalidPath {
                path: path.to_string(),
                reason: "path must be relative to the working directory".into(),
            });
        }
        let mut is_dir = false;
        while rel.ends_with('/') {
            rel.pop();
            is_dir = true;
        }
        if rel.is_empty() {
            return Err(AttrError::InvalidPath {
                path: path.to_string(),
                reason: "path is empty".into(),
            });
        }
        if !is_dir {
            is_dir = workdir.map_or(false, |wd| wd.join(&rel).is_dir());
        }
        Ok(Self { rel, is_dir })
    }

    /// Directories containing the path, closest first, ending with `""`
    /// for the root.
    pub fn parent_dirs(&self) -> Vec<&str> {
        let mut dirs = Vec::new();
        let mut current = self.rel.as_str();
        while let Some((parent, _)) = current.rsplit_once('/') {
            dirs.push(parent);
            current = parent;
        }
        dirs.push("");
        dirs
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.rel.split('/')
    }
}

/// `dir/name`, or just `name` at the root.
pub(crate) fn join_rel(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_prefix_and_trailing_slash() {
        let q = QueryPath::new("./a/b/", None).unwrap();
        assert_eq!(q.rel, "a/b");
        assert!(q.is_dir);
        let q = QueryPath::new("a/b.txt", None).unwrap();
        assert!(!q.is_dir);
    }

    #[test]
    fn rejects_absolute_and_empty() {
        assert!(QueryPath::new("/etc/passwd", None).is_err());
        assert!(QueryPath::new("./", None).is_err());
        assert!(QueryPath::new("", None).is_err());
    }

    #[test]
    fn parent_dirs_closest_first() {
        let q = QueryPath::new("a/b/c.txt", None).unwrap();
        assert_eq!(q.parent_dirs(), vec!["a/b", "a", ""]);
        let q = QueryPath::new("top.txt", None).unwrap();
        assert_eq!(q.parent_dirs(), vec![""]);
    }

    #[test]
    fn workdir_detects_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        assert!(QueryPath::new("sub", Some(dir.path())).unwrap().is_dir);
        assert!(!QueryPath::new("file", Some(dir.path())).unwrap().is_dir);
    }

    #[test]
    fn join_rel_at_root() {
        assert_eq!(join_rel("", ".gitignore"), ".gitignore");
        assert_eq!(join_rel("a/b", ".gitignore"), "a/b/.gitignore");
    }
}
