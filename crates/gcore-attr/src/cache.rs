//! The [`AttrCache`]: attribute lookup across every attribute source.
//!
//! Sources are consulted in precedence order:
//!
//! 1. `$GIT_DIR/info/attributes`
//! 2. `.gitattributes` in the path's directory, then each parent up to the
//!    root of the working directory
//! 3. the user's attributes file (`core.attributes_file`)
//! 4. the system attributes file
//!
//! Within one file the last matching rule wins. Across files the first
//! source that assigns an attribute decides its value.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use gcore_types::{StrMap, StrSet};

use crate::error::{AttrError, Result};
use crate::file::AttrFile;
use crate::filecache::FileCache;
use crate::path::{join_rel, QueryPath};
use crate::value::{is_valid_attr_name, Assignment, AttrValue};

pub const ATTRIBUTES_FILE: &str = ".gitattributes";
pub const INFO_ATTRIBUTES: &str = "info/attributes";

/// Macro expansion stops after this many nested levels.
const MAX_MACRO_DEPTH: usize = 16;

type MacroTable = StrMap<Arc<Vec<Assignment>>>;

/// Cached attribute sources for one repository.
pub struct AttrCache {
    git_dir: PathBuf,
    workdir: Option<PathBuf>,
    attributes_file: Option<PathBuf>,
    system_file: Option<PathBuf>,
    files: FileCache<AttrFile>,
    macros: Mutex<MacroTable>,
}

impl AttrCache {
    /// Create a cache for the repository at `git_dir`. Bare repositories
    /// pass `None` for `workdir` and only see `info/attributes` and the
    /// global sources.
    pub fn new(git_dir: impl Into<PathBuf>, workdir: Option<PathBuf>) -> Self {
        let mut macros = MacroTable::new();
        let binary = Assignment::parse_all("-diff -merge -text");
        if let Err(e) = macros.insert("binary".to_string(), Arc::new(binary)) {
            tracing::warn!(error = %e, "cannot register built-in binary macro");
        }
        Self {
            git_dir: git_dir.into(),
            workdir,
            attributes_file: None,
            system_file: None,
            files: FileCache::new(),
            macros: Mutex::new(macros),
        }
    }

    pub fn with_attributes_file(mut self, path: Option<PathBuf>) -> Self {
        self.attributes_file = path;
        self
    }

    pub fn with_system_file(mut self, path: Option<PathBuf>) -> Self {
        self.system_file = path;
        self
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    /// Value of attribute `name` for `path`.
    pub fn get(&self, path: &str, name: &str) -> Result<AttrValue> {
        let resolved = self.resolve(path)?;
        Ok(resolved
            .into_iter()
            .find(|a| a.name == name)
            .map(|a| a.value)
            .unwrap_or_default())
    }

    /// Values of several attributes, in the order of `names`.
    pub fn get_many(&self, path: &str, names: &[&str]) -> Result<Vec<AttrValue>> {
        let resolved = self.resolve(path)?;
        Ok(names
            .iter()
            .map(|name| {
                resolved
                    .iter()
                    .find(|a| a.name == *name)
                    .map(|a| a.value.clone())
                    .unwrap_or_default()
            })
            .collect())
    }

    /// Call `cb` once for every attribute assigned to `path`, with the
    /// highest-precedence value. Stops when `cb` returns `false`.
    pub fn foreach(&self, path: &str, mut cb: impl FnMut(&str, &AttrValue) -> bool) -> Result<()> {
        for assignment in self.resolve(path)? {
            if !cb(&assignment.name, &assignment.value) {
                break;
            }
        }
        Ok(())
    }

    /// Define (or redefine) macro `name` as the assignments in `values`.
    pub fn add_macro(&self, name: &str, values: &str) -> Result<()> {
        if !is_valid_attr_name(name) {
            return Err(AttrError::InvalidName {
                name: name.to_string(),
            });
        }
        let expansion = Arc::new(Assignment::parse_all(values));
        self.lock_macros().insert(name.to_string(), expansion)?;
        Ok(())
    }

    /// Drop every cached file. Macros added by callers are kept.
    pub fn flush(&self) {
        self.files.flush();
    }

    /// Whether the source with this cache key is currently loaded.
    pub fn is_cached(&self, key: &str) -> bool {
        self.files.contains(key)
    }

    fn resolve(&self, path: &str) -> Result<Vec<Assignment>> {
        let query = QueryPath::new(path, self.workdir.as_deref())?;
        let sources = self.sources(&query);
        let macros = self.macro_table(&sources)?;
        let target = self.base().join(&query.rel);

        let mut seen = StrSet::new();
        let mut out = Vec::new();
        for file in &sources {
            for rule in file.rules().iter().rev() {
                if !rule.matches(&target, query.is_dir) {
                    continue;
                }
                let mut expanded = Vec::new();
                expand(rule.assignments(), &macros, 0, &mut expanded);
                for assignment in expanded.into_iter().rev() {
                    if seen.add(assignment.name.clone())? {
                        out.push(assignment);
                    }
                }
            }
        }
        Ok(out)
    }

    fn base(&self) -> &Path {
        self.workdir.as_deref().unwrap_or(&self.git_dir)
    }

    fn sources(&self, query: &QueryPath) -> Vec<Arc<AttrFile>> {
        let base = self.base().to_path_buf();
        let mut sources = Vec::new();

        let info = self.git_dir.join(INFO_ATTRIBUTES);
        sources.extend(self.load(INFO_ATTRIBUTES, &info, &base, true));

        if let Some(workdir) = &self.workdir {
            for dir in query.parent_dirs() {
                let key = join_rel(dir, ATTRIBUTES_FILE);
                let root = workdir.join(dir);
                sources.extend(self.load(&key, &workdir.join(&key), &root, dir.is_empty()));
            }
        }

        for path in [&self.attributes_file, &self.system_file].into_iter().flatten() {
            let key = path.display().to_string();
            sources.extend(self.load(&key, path, &base, false));
        }
        sources
    }

    fn load(&self, key: &str, path: &Path, root: &Path, allow_macros: bool) -> Option<Arc<AttrFile>> {
        self.files
            .load(key, path, |text| AttrFile::parse(key, text, root, allow_macros))
    }

    /// Caller and built-in macros, overlaid with definitions from the
    /// sources that may define them. Higher-precedence files win.
    fn macro_table(&self, sources: &[Arc<AttrFile>]) -> Result<MacroTable> {
        let mut table = MacroTable::new();
        for (name, expansion) in self.lock_macros().iter() {
            table.insert(name.clone(), Arc::clone(expansion))?;
        }
        for file in sources.iter().rev() {
            for (name, expansion) in file.macros() {
                table.insert(name.clone(), Arc::new(expansion.clone()))?;
            }
        }
        Ok(table)
    }

    fn lock_macros(&self) -> std::sync::MutexGuard<'_, MacroTable> {
        self.macros.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Append `assignments` to `out`, followed by the expansion of every macro
/// they set.
fn expand(assignments: &[Assignment], macros: &MacroTable, depth: usize, out: &mut Vec<Assignment>) {
    for assignment in assignments {
        out.push(assignment.clone());
        if assignment.value != AttrValue::True || depth >= MAX_MACRO_DEPTH {
            continue;
        }
        if let Some(expansion) = macros.lookup(assignment.name.as_str()) {
            expand(expansion, macros, depth + 1, out);
        }
    }
}

impl fmt::Debug for AttrCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttrCache")
            .field("git_dir", &self.git_dir)
            .field("workdir", &self.workdir)
            .field("cached_files", &self.files.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Repo {
        dir: TempDir,
    }

    impl Repo {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir_all(dir.path().join(".git/info")).unwrap();
            Self { dir }
        }

        fn write(&self, rel: &str, contents: &str) {
            let path = self.dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }

        fn cache(&self) -> AttrCache {
            AttrCache::new(
                self.dir.path().join(".git"),
                Some(self.dir.path().to_path_buf()),
            )
        }
    }

    #[test]
    fn closer_file_overrides_parent() {
        let repo = Repo::new();
        repo.write(".gitattributes", "*.txt text\n");
        repo.write("a/b/.gitattributes", "*.txt -text\n");
        let cache = repo.cache();

        assert_eq!(cache.get("a/b/c.txt", "text").unwrap(), AttrValue::False);
        assert_eq!(cache.get("a/c.txt", "text").unwrap(), AttrValue::True);
        assert_eq!(cache.get("a/b/c.rs", "text").unwrap(), AttrValue::Unspecified);
    }

    #[test]
    fn last_rule_in_a_file_wins() {
        let repo = Repo::new();
        repo.write(".gitattributes", "* eol=lf\n*.bat eol=crlf\n");
        let cache = repo.cache();
        assert_eq!(
            cache.get("run.bat", "eol").unwrap(),
            AttrValue::Value("crlf".into())
        );
        assert_eq!(
            cache.get("run.sh", "eol").unwrap(),
            AttrValue::Value("lf".into())
        );
    }

    #[test]
    fn info_attributes_beats_worktree() {
        let repo = Repo::new();
        repo.write(".gitattributes", "*.c diff=cpp\n");
        repo.write(".git/info/attributes", "*.c -diff\n");
        let cache = repo.cache();
        assert_eq!(cache.get("main.c", "diff").unwrap(), AttrValue::False);
    }

    #[test]
    fn binary_macro_expands() {
        let repo = Repo::new();
        repo.write(".gitattributes", "*.png binary\n");
        let cache = repo.cache();
        let values = cache
            .get_many("img/logo.png", &["binary", "diff", "merge", "text", "eol"])
            .unwrap();
        assert_eq!(
            values,
            vec![
                AttrValue::True,
                AttrValue::False,
                AttrValue::False,
                AttrValue::False,
                AttrValue::Unspecified,
            ]
        );
    }

    #[test]
    fn later_assignment_on_a_line_beats_macro() {
        let repo = Repo::new();
        repo.write(".gitattributes", "*.pdf binary diff=pdf\n");
        let cache = repo.cache();
        assert_eq!(
            cache.get("doc.pdf", "diff").unwrap(),
            AttrValue::Value("pdf".into())
        );
        assert_eq!(cache.get("doc.pdf", "merge").unwrap(), AttrValue::False);
    }

    #[test]
    fn macros_from_subdirectories_are_ignored() {
        let repo = Repo::new();
        repo.write(".gitattributes", "[attr]gen -diff\n*.pb gen\n");
        repo.write("sub/.gitattributes", "[attr]other -merge\n*.x other\n");
        let cache = repo.cache();
        assert_eq!(cache.get("sub/a.pb", "diff").unwrap(), AttrValue::False);
        assert_eq!(cache.get("sub/a.x", "other").unwrap(), AttrValue::True);
        assert_eq!(cache.get("sub/a.x", "merge").unwrap(), AttrValue::Unspecified);
    }

    #[test]
    fn caller_macros() {
        let repo = Repo::new();
        repo.write(".gitattributes", "*.lock generated\n");
        let cache = repo.cache();
        cache.add_macro("generated", "-diff linguist=yes").unwrap();
        assert_eq!(cache.get("Cargo.lock", "diff").unwrap(), AttrValue::False);
        assert_eq!(
            cache.get("Cargo.lock", "linguist").unwrap(),
            AttrValue::Value("yes".into())
        );
        assert!(cache.add_macro("-bad", "x").is_err());
    }

    #[test]
    fn unset_is_reported() {
        let repo = Repo::new();
        repo.write(".gitattributes", "*.txt text\n");
        repo.write("raw/.gitattributes", "*.txt !text\n");
        let cache = repo.cache();
        assert_eq!(cache.get("raw/x.txt", "text").unwrap(), AttrValue::Unset);
    }

    #[test]
    fn anchored_patterns_are_relative_to_their_file() {
        let repo = Repo::new();
        repo.write("sub/.gitattributes", "/only-here.txt tag\n");
        let cache = repo.cache();
        assert!(cache.get("sub/only-here.txt", "tag").unwrap().is_true());
        assert!(cache.get("sub/deeper/only-here.txt", "tag").unwrap().is_unspecified());
        assert!(cache.get("only-here.txt", "tag").unwrap().is_unspecified());
    }

    #[test]
    fn directory_patterns_need_directories() {
        let repo = Repo::new();
        repo.write(".gitattributes", "vendor/ export-ignore\n");
        fs::create_dir_all(repo.dir.path().join("vendor")).unwrap();
        let cache = repo.cache();
        assert!(cache.get("vendor", "export-ignore").unwrap().is_true());
        assert!(cache.get("lib/vendor/", "export-ignore").unwrap().is_true());
        assert!(cache.get("other/vendor", "export-ignore").unwrap().is_unspecified());
    }

    #[test]
    fn foreach_reports_each_attribute_once() {
        let repo = Repo::new();
        repo.write(".gitattributes", "*.md text\n*.md text eol=lf\n");
        let cache = repo.cache();
        let mut seen = Vec::new();
        cache
            .foreach("README.md", |name, value| {
                seen.push((name.to_string(), value.clone()));
                true
            })
            .unwrap();
        seen.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            seen,
            vec![
                ("eol".to_string(), AttrValue::Value("lf".into())),
                ("text".to_string(), AttrValue::True),
            ]
        );
    }

    #[test]
    fn global_and_system_sources_have_lowest_precedence() {
        let repo = Repo::new();
        let global = repo.dir.path().join("global-attrs");
        let system = repo.dir.path().join("system-attrs");
        fs::write(&global, "*.c diff=global\n").unwrap();
        fs::write(&system, "*.c diff=system merge=system\n").unwrap();
        let cache = repo
            .cache()
            .with_attributes_file(Some(global.clone()))
            .with_system_file(Some(system));
        assert_eq!(
            cache.get("x.c", "diff").unwrap(),
            AttrValue::Value("global".into())
        );
        assert_eq!(
            cache.get("x.c", "merge").unwrap(),
            AttrValue::Value("system".into())
        );
        assert!(cache.is_cached(&global.display().to_string()));
    }

    #[test]
    fn edits_are_picked_up_and_flush_drops_entries() {
        let repo = Repo::new();
        repo.write(".gitattributes", "*.c a\n");
        let cache = repo.cache();
        assert!(cache.get("x.c", "a").unwrap().is_true());
        assert!(cache.is_cached(".gitattributes"));

        repo.write(".gitattributes", "*.c -a bb\n");
        assert!(cache.get("x.c", "a").unwrap().is_false());

        cache.flush();
        assert!(!cache.is_cached(".gitattributes"));
    }

    #[test]
    fn bare_repository_uses_info_attributes() {
        let repo = Repo::new();
        repo.write(".git/info/attributes", "*.bin binary\n");
        repo.write(".gitattributes", "*.bin text\n");
        let cache = AttrCache::new(repo.dir.path().join(".git"), None);
        assert!(cache.get("x.bin", "text").unwrap().is_false());
    }

    #[test]
    fn invalid_path_is_an_error() {
        let repo = Repo::new();
        let err = repo.cache().get("/abs", "text").unwrap_err();
        assert_eq!(err.code(), gcore_types::ErrorCode::Invalid);
    }
}
