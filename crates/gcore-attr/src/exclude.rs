//! The [`IgnoreCache`]: `.gitignore` evaluation on top of the `ignore`
//! crate's gitignore engine.
//!
//! Rules are consulted in this order, and the first source with an
//! opinion decides:
//!
//! 1. built-in names (`.`, `..`, `.git`) and rules added for this session
//! 2. `.gitignore` in the path's directory, then each parent up to the root
//! 3. `$GIT_DIR/info/exclude`
//! 4. the user's excludes file (`core.excludes_file`)
//!
//! A path inside an ignored directory is ignored as well.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::Match;

use crate::error::{AttrError, Result};
use crate::filecache::FileCache;
use crate::path::{join_rel, QueryPath};

pub const IGNORE_FILE: &str = ".gitignore";
pub const INFO_EXCLUDE: &str = "info/exclude";

const BUILTIN_IGNORES: [&str; 3] = [".", "..", ".git"];

struct SessionRules {
    lines: Vec<String>,
    matcher: Arc<Gitignore>,
}

/// Cached ignore sources for one repository.
pub struct IgnoreCache {
    git_dir: PathBuf,
    workdir: Option<PathBuf>,
    excludes_file: Option<PathBuf>,
    files: FileCache<Gitignore>,
    session: Mutex<SessionRules>,
}

impl IgnoreCache {
    pub fn new(git_dir: impl Into<PathBuf>, workdir: Option<PathBuf>) -> Self {
        Self {
            git_dir: git_dir.into(),
            workdir,
            excludes_file: None,
            files: FileCache::new(),
            session: Mutex::new(SessionRules {
                lines: Vec::new(),
                matcher: Arc::new(Gitignore::empty()),
            }),
        }
    }

    pub fn with_excludes_file(mut self, path: Option<PathBuf>) -> Self {
        self.excludes_file = path;
        self
    }

    /// Whether `path` (relative to the working directory) is ignored.
    pub fn is_ignored(&self, path: &str) -> Result<bool> {
        let query = QueryPath::new(path, self.workdir.as_deref())?;
        if query.components().any(|c| BUILTIN_IGNORES.contains(&c)) {
            return Ok(true);
        }
        let target = self.base().join(&query.rel);

        let session = Arc::clone(&self.lock_session().matcher);
        if let Some(ignored) = decide(&session, &target, query.is_dir) {
            return Ok(ignored);
        }

        for matcher in self.sources(&query) {
            if let Some(ignored) = decide(&matcher, &target, query.is_dir) {
                return Ok(ignored);
            }
        }
        Ok(false)
    }

    /// Add one or more newline-separated rules for the lifetime of this
    /// cache. They take precedence over every file.
    pub fn add_ignore_rule(&self, rules: &str) -> Result<()> {
        let mut session = self.lock_session();
        let mut lines = session.lines.clone();
        lines.extend(rules.lines().map(str::to_string));

        let mut builder = GitignoreBuilder::new(self.base());
        for line in &lines {
            builder
                .add_line(None, line)
                .map_err(|source| AttrError::Pattern {
                    pattern: line.clone(),
                    source,
                })?;
        }
        let matcher = builder.build().map_err(|source| AttrError::Pattern {
            pattern: rules.to_string(),
            source,
        })?;

        session.lines = lines;
        session.matcher = Arc::new(matcher);
        Ok(())
    }

    /// Forget the rules added with [`add_ignore_rule`](Self::add_ignore_rule).
    pub fn clear_ignore_rules(&self) {
        let mut session = self.lock_session();
        session.lines.clear();
        session.matcher = Arc::new(Gitignore::empty());
    }

    pub fn flush(&self) {
        self.files.flush();
    }

    pub fn is_cached(&self, key: &str) -> bool {
        self.files.contains(key)
    }

    fn base(&self) -> &Path {
        self.workdir.as_deref().unwrap_or(&self.git_dir)
    }

    fn sources(&self, query: &QueryPath) -> Vec<Arc<Gitignore>> {
        let base = self.base().to_path_buf();
        let mut sources = Vec::new();

        if let Some(workdir) = &self.workdir {
            for dir in query.parent_dirs() {
                let key = join_rel(dir, IGNORE_FILE);
                sources.extend(self.load(&key, &workdir.join(&key), &workdir.join(dir)));
            }
        }
        let exclude = self.git_dir.join(INFO_EXCLUDE);
        sources.extend(self.load(INFO_EXCLUDE, &exclude, &base));
        if let Some(path) = &self.excludes_file {
            sources.extend(self.load(&path.display().to_string(), path, &base));
        }
        sources
    }

    fn load(&self, key: &str, path: &Path, root: &Path) -> Option<Arc<Gitignore>> {
        self.files.load(key, path, |text| compile(key, text, root))
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, SessionRules> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `Some(true)` if ignored, `Some(false)` if re-included by a `!` rule,
/// `None` if no rule applies.
fn decide(matcher: &Gitignore, target: &Path, is_dir: bool) -> Option<bool> {
    if matcher.is_empty() {
        return None;
    }
    match matcher.matched_path_or_any_parents(target, is_dir) {
        Match::Ignore(_) => Some(true),
        Match::Whitelist(_) => Some(false),
        Match::None => None,
    }
}

/// Build a matcher from file contents, skipping lines that do not parse.
fn compile(source: &str, text: &str, root: &Path) -> Gitignore {
    let mut builder = GitignoreBuilder::new(root);
    for line in text.lines() {
        if let Err(e) = builder.add_line(None, line) {
            tracing::debug!(source, line, error = %e, "skipping invalid ignore pattern");
        }
    }
    builder.build().unwrap_or_else(|e| {
        tracing::warn!(source, error = %e, "cannot compile ignore file");
        Gitignore::empty()
    })
}

impl fmt::Debug for IgnoreCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IgnoreCache")
            .field("git_dir", &self.git_dir)
            .field("workdir", &self.workdir)
            .field("session_rules", &self.lock_session().lines.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, IgnoreCache) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git/info")).unwrap();
        let cache = IgnoreCache::new(dir.path().join(".git"), Some(dir.path().to_path_buf()));
        (dir, cache)
    }

    fn write(dir: &TempDir, rel: &str, contents: &str) {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn builtins_are_always_ignored() {
        let (_dir, cache) = setup();
        assert!(cache.is_ignored(".git").unwrap());
        assert!(cache.is_ignored(".git/config").unwrap());
        assert!(cache.is_ignored("sub/.git").unwrap());
        assert!(!cache.is_ignored("src/main.rs").unwrap());
    }

    #[test]
    fn gitignore_patterns() {
        let (dir, cache) = setup();
        write(&dir, ".gitignore", "*.o\n/target/\n");
        assert!(cache.is_ignored("a/b/x.o").unwrap());
        assert!(cache.is_ignored("target/").unwrap());
        assert!(cache.is_ignored("target/debug/app").unwrap());
        assert!(!cache.is_ignored("src/target.rs").unwrap());
        assert!(cache.is_cached(IGNORE_FILE));
    }

    #[test]
    fn closer_file_wins_and_negation_is_honored() {
        let (dir, cache) = setup();
        write(&dir, ".gitignore", "*.log\n");
        write(&dir, "keep/.gitignore", "!important.log\n");
        assert!(cache.is_ignored("debug.log").unwrap());
        assert!(cache.is_ignored("keep/other.log").unwrap());
        assert!(!cache.is_ignored("keep/important.log").unwrap());
    }

    #[test]
    fn info_exclude_and_excludes_file() {
        let (dir, cache) = setup();
        write(&dir, ".git/info/exclude", "secret.txt\n");
        let global = dir.path().join("global-ignore");
        fs::write(&global, "*.swp\n").unwrap();
        let cache = cache.with_excludes_file(Some(global));
        assert!(cache.is_ignored("secret.txt").unwrap());
        assert!(cache.is_ignored("src/.main.rs.swp").unwrap());
        assert!(!cache.is_ignored("src/main.rs").unwrap());
    }

    #[test]
    fn worktree_overrides_info_exclude() {
        let (dir, cache) = setup();
        write(&dir, ".git/info/exclude", "*.gen\n");
        write(&dir, ".gitignore", "!keep.gen\n");
        assert!(cache.is_ignored("drop.gen").unwrap());
        assert!(!cache.is_ignored("keep.gen").unwrap());
    }

    #[test]
    fn session_rules_take_precedence() {
        let (dir, cache) = setup();
        write(&dir, ".gitignore", "!*.tmp\n");
        assert!(!cache.is_ignored("x.tmp").unwrap());
        cache.add_ignore_rule("*.tmp\nscratch/").unwrap();
        assert!(cache.is_ignored("x.tmp").unwrap());
        assert!(cache.is_ignored("scratch/").unwrap());
        cache.clear_ignore_rules();
        assert!(!cache.is_ignored("x.tmp").unwrap());
    }

    #[test]
    fn edits_are_reloaded() {
        let (dir, cache) = setup();
        write(&dir, ".gitignore", "a\n");
        assert!(cache.is_ignored("a").unwrap());
        write(&dir, ".gitignore", "bb\n");
        assert!(!cache.is_ignored("a").unwrap());
        assert!(cache.is_ignored("bb").unwrap());
        cache.flush();
        assert!(!cache.is_cached(IGNORE_FILE));
    }
}
