use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gcore_attr::{AttrCache, AttrValue, IgnoreCache};
use gcore_pack::{PackBackend, PackFile, PackWriter};
use gcore_refs::{
    PeelError, Peeler, RefError, RefFilter, RefTarget, Refdb, Reference,
};
use gcore_store::{
    Blob, CachedObject, Commit, LooseBackend, ObjectCache, ObjectKind, Odb, StoreError, Tag, Tree,
    LOOSE_PRIORITY, PACKED_PRIORITY,
};
use gcore_types::{ErrorCode, IoResultExt, ObjectId, OidSet, OidShortener};

use crate::config::RepoConfig;
use crate::error::{RepoError, RepoResult};

/// Shortest abbreviation handed out by [`Repository::short_id`].
pub const MIN_SHORT_ID: usize = 7;

/// Branch `HEAD` points at in a fresh repository.
pub const DEFAULT_BRANCH: &str = "refs/heads/main";

const DOT_GIT: &str = ".git";
const INIT_DIRS: [&str; 6] = [
    "objects/info",
    "objects/pack",
    "refs/heads",
    "refs/tags",
    "info",
    "logs",
];
/// Delta window used by [`Repository::pack_objects`].
const PACK_DELTA_WINDOW: usize = 10;

/// An open repository: object database, references, caches and rules.
pub struct Repository {
    git_dir: PathBuf,
    workdir: Option<PathBuf>,
    config: RepoConfig,
    odb: Odb,
    refdb: Refdb,
    cache: Option<ObjectCache>,
    attr_cache: AttrCache,
    ignore_cache: IgnoreCache,
}

impl Repository {
    /// Create a repository at `path` and open it.
    ///
    /// A non-bare repository keeps its data in `path/.git`. Running `init`
    /// on an existing repository only fills in missing directories.
    pub fn init(path: impl AsRef<Path>, bare: bool) -> RepoResult<Self> {
        let path = path.as_ref();
        let git_dir = if bare {
            path.to_path_buf()
        } else {
            path.join(DOT_GIT)
        };
        for dir in INIT_DIRS {
            let dir = git_dir.join(dir);
            std::fs::create_dir_all(&dir).with_path(&dir)?;
        }

        let head = git_dir.join("HEAD");
        if !head.exists() {
            std::fs::write(&head, format!("ref: {DEFAULT_BRANCH}\n")).with_path(&head)?;
        }
        if !git_dir.join(crate::config::CONFIG_FILE).exists() {
            let mut config = RepoConfig::default();
            config.core.bare = bare;
            config.save(&git_dir)?;
        }
        tracing::info!(git_dir = %git_dir.display(), bare, "initialized repository");
        Self::open(path)
    }

    /// Open the repository at `path`, either a working directory holding
    /// `.git` or a git directory itself.
    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        let path = path.as_ref();
        let dot_git = path.join(DOT_GIT);
        let (git_dir, workdir) = if is_git_dir(&dot_git) {
            (dot_git, Some(path.to_path_buf()))
        } else if is_git_dir(path) {
            let workdir = match path.file_name() {
                Some(name) if name == DOT_GIT => path.parent().map(Path::to_path_buf),
                _ => None,
            };
            (path.to_path_buf(), workdir)
        } else {
            return Err(RepoError::NotARepository {
                path: path.to_path_buf(),
            });
        };

        let config = RepoConfig::load(&git_dir)?;
        let workdir = if config.core.bare { None } else { workdir };
        Self::from_parts(git_dir, workdir, config)
    }

    /// Open the first repository found at `start` or any of its parents.
    pub fn discover(start: impl AsRef<Path>) -> RepoResult<Self> {
        let start = start.as_ref();
        for dir in start.ancestors() {
            if is_git_dir(&dir.join(DOT_GIT)) || is_git_dir(dir) {
                tracing::debug!(start = %start.display(), found = %dir.display(), "discovered repository");
                return Self::open(dir);
            }
        }
        Err(RepoError::NotARepository {
            path: start.to_path_buf(),
        })
    }

    fn from_parts(git_dir: PathBuf, workdir: Option<PathBuf>, config: RepoConfig) -> RepoResult<Self> {
        config.validate()?;
        let objects = git_dir.join("objects");

        let odb = Odb::new();
        odb.add_backend(Arc::new(LooseBackend::new(&objects)), LOOSE_PRIORITY);
        let packs = PackBackend::with_max_delta_depth(objects.join("pack"), config.odb.max_delta_depth)?;
        odb.add_backend(Arc::new(packs), PACKED_PRIORITY);

        let refdb = Refdb::open(&git_dir)
            .with_max_nesting(config.refs.max_nesting)
            .with_log_all_ref_updates(config.core.log_all_ref_updates)
            .with_identity(config.user.name.clone(), config.user.email.clone());

        let cache = if config.cache.enabled {
            Some(ObjectCache::new(config.cache.buckets)?)
        } else {
            None
        };

        let base = workdir.clone().unwrap_or_else(|| git_dir.clone());
        let resolve = |p: &Option<PathBuf>| p.as_ref().map(|p| base.join(p));
        let attr_cache = AttrCache::new(&git_dir, workdir.clone())
            .with_attributes_file(resolve(&config.core.attributes_file))
            .with_system_file(resolve(&config.attr.system_file));
        let ignore_cache = IgnoreCache::new(&git_dir, workdir.clone())
            .with_excludes_file(resolve(&config.core.excludes_file));

        tracing::debug!(
            git_dir = %git_dir.display(),
            bare = workdir.is_none(),
            "opened repository"
        );
        Ok(Self {
            git_dir,
            workdir,
            config,
            odb,
            refdb,
            cache,
            attr_cache,
            ignore_cache,
        })
    }

    // ---- Accessors ----

    /// The git directory.
    pub fn path(&self) -> &Path {
        &self.git_dir
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    pub fn is_bare(&self) -> bool {
        self.workdir.is_none()
    }

    pub fn odb(&self) -> &Odb {
        &self.odb
    }

    pub fn refdb(&self) -> &Refdb {
        &self.refdb
    }

    /// The object cache, unless disabled by `cache.enabled = false`.
    pub fn cache(&self) -> Option<&ObjectCache> {
        self.cache.as_ref()
    }

    pub fn attr_cache(&self) -> &AttrCache {
        &self.attr_cache
    }

    pub fn ignore_cache(&self) -> &IgnoreCache {
        &self.ignore_cache
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    // ---- Objects ----

    /// Load an object through the cache. With `kind` set, an object of any
    /// other type fails with `TypeMismatch`.
    pub fn lookup(&self, id: &ObjectId, kind: Option<ObjectKind>) -> RepoResult<Arc<CachedObject>> {
        let object = match self.cache.as_ref().and_then(|c| c.get(id)) {
            Some(hit) => hit,
            None => {
                let raw = self.odb.read(id)?;
                let object = CachedObject::new(*id, raw);
                match &self.cache {
                    Some(cache) => cache.try_store(object),
                    None => Arc::new(object),
                }
            }
        };
        if let Some(expected) = kind {
            if object.kind != expected {
                return Err(StoreError::TypeMismatch {
                    id: *id,
                    expected,
                    actual: object.kind,
                }
                .into());
            }
        }
        Ok(object)
    }

    pub fn lookup_commit(&self, id: &ObjectId) -> RepoResult<Commit> {
        let object = self.lookup(id, Some(ObjectKind::Commit))?;
        Ok(Commit::parse(&object.data)?)
    }

    pub fn lookup_tree(&self, id: &ObjectId) -> RepoResult<Tree> {
        let object = self.lookup(id, Some(ObjectKind::Tree))?;
        Ok(Tree::parse(&object.data)?)
    }

    pub fn lookup_blob(&self, id: &ObjectId) -> RepoResult<Blob> {
        let object = self.lookup(id, Some(ObjectKind::Blob))?;
        Ok(Blob::new(object.data.clone()))
    }

    pub fn lookup_tag(&self, id: &ObjectId) -> RepoResult<Tag> {
        let object = self.lookup(id, Some(ObjectKind::Tag))?;
        Ok(Tag::parse(&object.data)?)
    }

    pub fn write_blob(&self, data: &[u8]) -> RepoResult<ObjectId> {
        Ok(self.odb.write(ObjectKind::Blob, data)?)
    }

    pub fn write_tree(&self, tree: &Tree) -> RepoResult<ObjectId> {
        Ok(self.odb.write_raw(&tree.to_raw())?)
    }

    /// Write `commit`. With `update_ref`, the reference (followed through
    /// symbolic links, so `HEAD` moves its branch) is pointed at the new
    /// commit.
    pub fn write_commit(&self, commit: &Commit, update_ref: Option<&str>) -> RepoResult<ObjectId> {
        let id = self.odb.write_raw(&commit.to_raw())?;
        if let Some(name) = update_ref {
            let target = self.final_ref_name(name)?;
            let message = if commit.parents.is_empty() {
                format!("commit (initial): {}", commit.summary())
            } else {
                format!("commit: {}", commit.summary())
            };
            self.refdb.create(&target, id, true, &message)?;
        }
        Ok(id)
    }

    pub fn write_tag(&self, tag: &Tag) -> RepoResult<ObjectId> {
        Ok(self.odb.write_raw(&tag.to_raw())?)
    }

    /// Resolve `refname` and peel annotated tags down to a commit.
    pub fn peel_to_commit(&self, refname: &str) -> RepoResult<(ObjectId, Commit)> {
        let id = self.refdb.name_to_id(refname)?;
        let object = self.lookup(&id, None)?;
        let (id, kind) = match object.kind {
            ObjectKind::Tag => Tag::parse(&object.data)?.peel(&self.odb)?,
            kind => (id, kind),
        };
        if kind != ObjectKind::Commit {
            return Err(StoreError::TypeMismatch {
                id,
                expected: ObjectKind::Commit,
                actual: kind,
            }
            .into());
        }
        Ok((id, self.lookup_commit(&id)?))
    }

    /// Write the objects `ids` into a new delta-compressed pack under
    /// `objects/pack` and make it visible to the object database.
    pub fn pack_objects(&self, ids: &[ObjectId]) -> RepoResult<PackFile> {
        let mut writer =
            PackWriter::new(&self.git_dir.join("objects/pack")).with_delta_window(PACK_DELTA_WINDOW);
        for id in ids {
            writer.add_raw(&self.odb.read(id)?)?;
        }
        let pack = writer.finish()?;
        self.odb.refresh()?;
        tracing::info!(pack = %pack.name(), objects = pack.object_count, "packed objects");
        Ok(pack)
    }

    /// Shortest prefix of `id`, at least [`MIN_SHORT_ID`] digits, that is
    /// unique among every object in the database.
    pub fn short_id(&self, id: &ObjectId) -> RepoResult<String> {
        let mut shortener = OidShortener::new(MIN_SHORT_ID);
        let mut seen = OidSet::new();
        let mut len = MIN_SHORT_ID;
        let mut failure: Option<RepoError> = None;

        let mut add = |oid: &ObjectId| -> RepoResult<()> {
            if seen.add(*oid)? {
                len = shortener.add(&oid.to_hex())?;
            }
            Ok(())
        };
        self.odb.for_each(|oid| match add(oid) {
            Ok(()) => true,
            Err(e) => {
                failure = Some(e);
                false
            }
        })?;
        if let Some(e) = failure {
            return Err(e);
        }
        add(id)?;
        Ok(id.to_hex_prefix(len))
    }

    // ---- References ----

    pub fn head(&self) -> RepoResult<Reference> {
        Ok(self.refdb.head()?)
    }

    pub fn reference_create(
        &self,
        name: &str,
        id: ObjectId,
        force: bool,
        message: &str,
    ) -> RepoResult<Reference> {
        Ok(self.refdb.create(name, id, force, message)?)
    }

    pub fn reference_symbolic_create(
        &self,
        name: &str,
        target: &str,
        force: bool,
        message: &str,
    ) -> RepoResult<Reference> {
        Ok(self.refdb.symbolic_create(name, target, force, message)?)
    }

    pub fn reference_lookup(&self, name: &str) -> RepoResult<Reference> {
        Ok(self.refdb.lookup(name)?)
    }

    /// Follow `name` for at most `max_hops` symbolic hops, or the
    /// configured bound when `None`.
    pub fn reference_lookup_resolved(
        &self,
        name: &str,
        max_hops: Option<usize>,
    ) -> RepoResult<Reference> {
        Ok(self.refdb.lookup_resolved(name, max_hops)?)
    }

    pub fn reference_name_to_id(&self, name: &str) -> RepoResult<ObjectId> {
        Ok(self.refdb.name_to_id(name)?)
    }

    pub fn reference_rename(
        &self,
        old: &str,
        new: &str,
        force: bool,
        message: &str,
    ) -> RepoResult<Reference> {
        Ok(self.refdb.rename(old, new, force, message)?)
    }

    pub fn reference_delete(&self, name: &str) -> RepoResult<()> {
        Ok(self.refdb.delete(name)?)
    }

    /// Pack loose references, recording peeled targets of annotated tags.
    pub fn reference_compress(&self) -> RepoResult<()> {
        Ok(self.refdb.compress(&OdbPeeler { odb: &self.odb })?)
    }

    pub fn reference_foreach(
        &self,
        filter: RefFilter,
        cb: impl FnMut(&Reference) -> bool,
    ) -> RepoResult<()> {
        Ok(self.refdb.foreach(filter, cb)?)
    }

    pub fn reference_foreach_glob(
        &self,
        pattern: &str,
        cb: impl FnMut(&Reference) -> bool,
    ) -> RepoResult<()> {
        Ok(self.refdb.foreach_glob(pattern, cb)?)
    }

    /// Follow symbolic links from `name` to the reference that should be
    /// written. The chain may end at a reference that does not exist yet.
    fn final_ref_name(&self, name: &str) -> RepoResult<String> {
        let mut current = name.to_string();
        for _ in 0..=self.refdb.max_nesting() {
            match self.refdb.lookup(&current) {
                Ok(Reference {
                    target: RefTarget::Symbolic(target),
                    ..
                }) => current = target,
                Ok(_) => return Ok(current),
                Err(e) if e.code() == ErrorCode::NotFound => return Ok(current),
                Err(e) => return Err(e.into()),
            }
        }
        Err(RefError::TooManyRedirects {
            name: name.to_string(),
            max: self.refdb.max_nesting(),
        }
        .into())
    }

    // ---- Attributes ----

    pub fn attr_get(&self, path: &str, name: &str) -> RepoResult<AttrValue> {
        Ok(self.attr_cache.get(path, name)?)
    }

    pub fn attr_get_many(&self, path: &str, names: &[&str]) -> RepoResult<Vec<AttrValue>> {
        Ok(self.attr_cache.get_many(path, names)?)
    }

    pub fn attr_foreach(
        &self,
        path: &str,
        cb: impl FnMut(&str, &AttrValue) -> bool,
    ) -> RepoResult<()> {
        Ok(self.attr_cache.foreach(path, cb)?)
    }

    pub fn is_path_ignored(&self, path: &str) -> RepoResult<bool> {
        Ok(self.ignore_cache.is_ignored(path)?)
    }

    pub fn add_ignore_rule(&self, rules: &str) -> RepoResult<()> {
        Ok(self.ignore_cache.add_ignore_rule(rules)?)
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("git_dir", &self.git_dir)
            .field("workdir", &self.workdir)
            .field("odb", &self.odb)
            .field("refdb", &self.refdb)
            .finish()
    }
}

/// A git directory has `HEAD`, `objects/` and `refs/`.
fn is_git_dir(path: &Path) -> bool {
    path.join("HEAD").is_file() && path.join("objects").is_dir() && path.join("refs").is_dir()
}

/// Peels annotated tags through the object database for `packed-refs`.
struct OdbPeeler<'a> {
    odb: &'a Odb,
}

impl Peeler for OdbPeeler<'_> {
    fn peel(&self, id: &ObjectId) -> Result<Option<ObjectId>, PeelError> {
        let object = self.odb.read(id)?;
        if object.kind != ObjectKind::Tag {
            return Ok(None);
        }
        let (peeled, _) = Tag::parse(&object.data)?.peel(self.odb)?;
        Ok(Some(peeled))
    }
}
