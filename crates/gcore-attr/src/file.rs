//! Parsing of one `.gitattributes`-style file into rules and macros.
//!
//! ```text
//! # comment
//! [attr]binary -diff -merge -text
//! *.png   binary
//! /build/ -diff
//! docs/*.md  text eol=lf
//! ```
//!
//! Patterns follow gitignore syntax and are compiled with the `ignore`
//! crate, rooted at the directory holding the file.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::value::{is_valid_attr_name, Assignment};

const MACRO_PREFIX: &str = "[attr]";

/// A pattern and the assignments it applies.
#[derive(Debug)]
pub struct AttrRule {
    pattern: String,
    matcher: Gitignore,
    assignments: Vec<Assignment>,
}

impl AttrRule {
    fn compile(root: &Path, pattern: &str, assignments: Vec<Assignment>) -> Option<Self> {
        let mut builder = GitignoreBuilder::new(root);
        let built = builder
            .add_line(None, pattern)
            .map_err(|e| e.to_string())
            .and_then(|b| b.build().map_err(|e| e.to_string()));
        match built {
            Ok(matcher) => Some(Self {
                pattern: pattern.to_string(),
                matcher,
                assignments,
            }),
            Err(reason) => {
                tracing::debug!(pattern, %reason, "skipping unparsable attribute pattern");
                None
            }
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    /// Whether the rule applies to `path`, an absolute path under the root.
    pub fn matches(&self, path: &Path, is_dir: bool) -> bool {
        self.matcher.matched(path, is_dir).is_ignore()
    }
}

/// Parsed contents of one attribute source.
#[derive(Debug)]
pub struct AttrFile {
    source: String,
    root: PathBuf,
    rules: Vec<AttrRule>,
    macros: Vec<(String, Vec<Assignment>)>,
}

impl AttrFile {
    /// Parse `text`. Malformed lines are skipped, never fatal.
    ///
    /// `root` is the directory patterns are anchored to. `[attr]` lines are
    /// only honored when `allow_macros` is set.
    pub fn parse(source: &str, text: &str, root: &Path, allow_macros: bool) -> Self {
        let mut rules = Vec::new();
        let mut macros = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let (head, rest) = match line.split_once(char::is_whitespace) {
                Some((head, rest)) => (head, rest),
                None => (line, ""),
            };

            if let Some(name) = head.strip_prefix(MACRO_PREFIX) {
                if !allow_macros {
                    tracing::debug!(source, name, "macro definitions are not allowed here");
                    continue;
                }
                if !is_valid_attr_name(name) {
                    tracing::debug!(source, name, "skipping macro with invalid name");
                    continue;
                }
                macros.push((name.to_string(), Assignment::parse_all(rest)));
                continue;
            }

            if head.starts_with('!') {
                tracing::debug!(source, pattern = head, "negative patterns are not allowed");
                continue;
            }
            let assignments = Assignment::parse_all(rest);
            if assignments.is_empty() {
                continue;
            }
            if let Some(rule) = AttrRule::compile(root, head, assignments) {
                rules.push(rule);
            }
        }

        Self {
            source: source.to_string(),
            root: root.to_path_buf(),
            rules,
            macros,
        }
    }

    /// A file with no rules, used where a source is missing.
    pub fn empty(source: &str, root: &Path) -> Self {
        Self::parse(source, "", root, false)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rules(&self) -> &[AttrRule] {
        &self.rules
    }

    pub fn macros(&self) -> &[(String, Vec<Assignment>)] {
        &self.macros
    }
}
