use std::path::Path;
use std::sync::Arc;

use gcore_types::{ObjectId, Signature};

use crate::error::{RefError, Result};
use crate::fs::FsRefdb;
use crate::names::{
    glob_match, normalize_direct, normalize_name, normalize_symbolic, reference_available,
    RefNameFlags, HEAD,
};
use crate::reference::{RefFilter, RefTarget, Reference};
use crate::reflog::{should_log, ReflogStore};
use crate::traits::{Peeler, RefdbBackend};

/// Symbolic hops followed by default when resolving a name.
pub const DEFAULT_MAX_NESTING: usize = 5;
/// Upper bound on the configurable nesting depth.
pub const MAX_NESTING: usize = 10;

const UNKNOWN_IDENTITY: &str = "unknown";

/// Front end of the reference database.
///
/// Validates names, follows symbolic chains, keeps `HEAD` consistent across
/// renames and records reflog entries, delegating storage to a
/// [`RefdbBackend`].
pub struct Refdb {
    backend: Arc<dyn RefdbBackend>,
    reflog: ReflogStore,
    max_nesting: usize,
    log_all_ref_updates: bool,
    identity: (String, String),
}

impl Refdb {
    /// Filesystem refdb for `git_dir`.
    pub fn open(git_dir: &Path) -> Self {
        Self::with_backend(Arc::new(FsRefdb::open(git_dir)), git_dir)
    }

    pub fn with_backend(backend: Arc<dyn RefdbBackend>, git_dir: &Path) -> Self {
        Self {
            backend,
            reflog: ReflogStore::new(git_dir),
            max_nesting: DEFAULT_MAX_NESTING,
            log_all_ref_updates: true,
            identity: (UNKNOWN_IDENTITY.into(), UNKNOWN_IDENTITY.into()),
        }
    }

    /// Symbolic hops followed by [`resolve`](Self::resolve), capped at
    /// [`MAX_NESTING`].
    pub fn with_max_nesting(mut self, max: usize) -> Self {
        self.max_nesting = max.min(MAX_NESTING);
        self
    }

    pub fn with_log_all_ref_updates(mut self, enabled: bool) -> Self {
        self.log_all_ref_updates = enabled;
        self
    }

    /// Name and email recorded in reflog entries.
    pub fn with_identity(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.identity = (name.into(), email.into());
        self
    }

    pub fn backend(&self) -> &Arc<dyn RefdbBackend> {
        &self.backend
    }

    pub fn reflog(&self) -> &ReflogStore {
        &self.reflog
    }

    pub fn max_nesting(&self) -> usize {
        self.max_nesting
    }

    fn committer(&self) -> Result<Signature> {
        Ok(Signature::now(&self.identity.0, &self.identity.1)?)
    }

    fn log_update(&self, name: &str, old: &ObjectId, new: &ObjectId, message: &str) -> Result<()> {
        if !should_log(name, self.log_all_ref_updates, self.reflog.exists(name)) {
            return Ok(());
        }
        self.reflog.append(name, old, new, &self.committer()?, message)
    }

    /// Current resolved id of `name`, or zero if it does not resolve.
    fn current_id(&self, name: &str) -> ObjectId {
        match self.resolve(name) {
            Ok(reference) => reference.id().copied().unwrap_or_else(ObjectId::zero),
            Err(_) => ObjectId::zero(),
        }
    }

    fn ensure_available(&self, name: &str, old: Option<&str>) -> Result<()> {
        let names = self.backend.names()?;
        reference_available(names.iter().map(String::as_str), name, old)
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        let name = normalize_symbolic(name)?;
        self.backend.exists(&name)
    }

    /// Look up `name` without following symbolic targets.
    pub fn lookup(&self, name: &str) -> Result<Reference> {
        let name = normalize_symbolic(name)?;
        self.backend
            .lookup(&name)?
            .ok_or_else(|| RefError::not_found(&name))
    }

    /// Look up `name` and follow symbolic targets for at most `max_hops`
    /// hops (the configured nesting bound when `None`). With zero hops the
    /// reference is returned as found.
    pub fn lookup_resolved(&self, name: &str, max_hops: Option<usize>) -> Result<Reference> {
        let max = max_hops.unwrap_or(self.max_nesting).min(MAX_NESTING);
        let mut current = self.lookup(name)?;
        let mut hops = 0;
        while let RefTarget::Symbolic(target) = &current.target {
            if hops == max {
                return Err(RefError::TooManyRedirects {
                    name: name.to_string(),
                    max,
                });
            }
            current = self.lookup(target)?;
            hops += 1;
        }
        Ok(current)
    }

    /// Follow `name` to the direct reference it ends at.
    pub fn resolve(&self, name: &str) -> Result<Reference> {
        self.lookup_resolved(name, None)
    }

    /// The object id `name` finally points at.
    pub fn name_to_id(&self, name: &str) -> Result<ObjectId> {
        let reference = self.resolve(name)?;
        reference.id().copied().ok_or(RefError::NotDirect {
            name: reference.name,
        })
    }

    /// Create a direct reference.
    pub fn create(&self, name: &str, id: ObjectId, force: bool, message: &str) -> Result<Reference> {
        let name = normalize_direct(name)?;
        let exists = self.backend.exists(&name)?;
        if exists && !force {
            return Err(RefError::AlreadyExists { name });
        }
        self.ensure_available(&name, None)?;

        let old = if exists { self.current_id(&name) } else { ObjectId::zero() };
        let reference = Reference::direct(name.clone(), id);
        self.backend.write(&reference)?;
        self.log_update(&name, &old, &id, message)?;
        Ok(reference)
    }

    /// Create a symbolic reference pointing at `target`.
    pub fn symbolic_create(
        &self,
        name: &str,
        target: &str,
        force: bool,
        message: &str,
    ) -> Result<Reference> {
        let name = normalize_symbolic(name)?;
        let target = normalize_symbolic(target)?;
        let exists = self.backend.exists(&name)?;
        if exists && !force {
            return Err(RefError::AlreadyExists { name });
        }
        self.ensure_available(&name, None)?;

        let old = if exists { self.current_id(&name) } else { ObjectId::zero() };
        let reference = Reference::symbolic(name.clone(), target.clone());
        self.backend.write(&reference)?;
        let new = self.current_id(&target);
        if !new.is_zero() && new != old {
            self.log_update(&name, &old, &new, message)?;
        }
        Ok(reference)
    }

    /// Point an existing direct reference at `id`.
    pub fn set_target(&self, name: &str, id: ObjectId, message: &str) -> Result<Reference> {
        let current = self.lookup(name)?;
        let old = *current.id().ok_or_else(|| RefError::NotDirect {
            name: current.name.clone(),
        })?;
        let reference = Reference::direct(current.name, id);
        self.backend.write(&reference)?;
        self.log_update(&reference.name, &old, &id, message)?;
        Ok(reference)
    }

    /// Delete `name` and its reflog.
    pub fn delete(&self, name: &str) -> Result<()> {
        let name = normalize_symbolic(name)?;
        self.backend.delete(&name)?;
        self.reflog.delete(&name)
    }

    /// Rename `old` to `new`, moving its reflog and retargeting `HEAD` if it
    /// pointed at `old`.
    pub fn rename(&self, old: &str, new: &str, force: bool, message: &str) -> Result<Reference> {
        let current = self.lookup(old)?;
        let new = if current.is_symbolic() {
            normalize_symbolic(new)?
        } else {
            normalize_direct(new)?
        };

        let renamed = self.backend.rename(&current.name, &new, force)?;
        if force {
            self.reflog.delete(&new)?;
        }
        self.reflog.rename(&current.name, &new)?;

        let head = self.backend.lookup(HEAD)?;
        if head.as_ref().and_then(Reference::symbolic_target) == Some(current.name.as_str()) {
            self.backend.write(&Reference::symbolic(HEAD, new.clone()))?;
            tracing::debug!(from = %current.name, to = %new, "moved HEAD with renamed branch");
        }

        if let Some(id) = renamed.id() {
            self.log_update(&new, id, id, message)?;
        }
        Ok(renamed)
    }

    /// Pack every loose direct reference, peeling tags through `peeler`.
    pub fn compress(&self, peeler: &dyn Peeler) -> Result<()> {
        self.backend.compress(peeler)
    }

    pub fn foreach(
        &self,
        filter: RefFilter,
        mut cb: impl FnMut(&Reference) -> bool,
    ) -> Result<()> {
        self.backend.foreach(&mut |r| !filter.accepts(r) || cb(r))
    }

    /// Visit references whose name matches the `*` glob `pattern`.
    pub fn foreach_glob(&self, pattern: &str, mut cb: impl FnMut(&Reference) -> bool) -> Result<()> {
        normalize_name(pattern, RefNameFlags::REFSPEC_PATTERN | RefNameFlags::ALLOW_ONELEVEL)?;
        self.backend
            .foreach(&mut |r| !glob_match(pattern, &r.name) || cb(r))
    }

    /// Every reference name, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        self.backend.names()
    }

    /// The direct reference `HEAD` resolves to.
    ///
    /// Fails with `NotFound` naming the branch when it is unborn.
    pub fn head(&self) -> Result<Reference> {
        self.resolve(HEAD)
    }

    /// Point `HEAD` at the branch `refname`, which need not exist yet.
    pub fn set_head(&self, refname: &str) -> Result<()> {
        let refname = normalize_symbolic(refname)?;
        let old = self.current_id(HEAD);
        self.backend.write(&Reference::symbolic(HEAD, refname.clone()))?;
        let new = self.current_id(&refname);
        if !new.is_zero() && new != old {
            self.log_update(HEAD, &old, &new, &format!("checkout: moving to {refname}"))?;
        }
        Ok(())
    }

    /// Detach `HEAD` at `id`.
    pub fn set_head_detached(&self, id: ObjectId) -> Result<()> {
        let old = self.current_id(HEAD);
        self.backend.write(&Reference::direct(HEAD, id))?;
        self.log_update(HEAD, &old, &id, &format!("checkout: moving to {id}"))
    }

    pub fn is_head_detached(&self) -> Result<bool> {
        Ok(matches!(
            self.backend.lookup(HEAD)?,
            Some(Reference {
                target: RefTarget::Direct(_),
                ..
            })
        ))
    }

    /// `HEAD` names a branch that has no commits yet.
    pub fn is_branch_unborn(&self) -> Result<bool> {
        match self.backend.lookup(HEAD)? {
            Some(Reference {
                target: RefTarget::Symbolic(target),
                ..
            }) => Ok(!self.backend.exists(&target)?),
            _ => Ok(false),
        }
    }
}

impl std::fmt::Debug for Refdb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Refdb")
            .field("logs", &self.reflog.logs_dir())
            .field("max_nesting", &self.max_nesting)
            .field("log_all_ref_updates", &self.log_all_ref_updates)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::NoPeel;
    use gcore_types::ErrorCode;

    fn id(b: u8) -> ObjectId {
        ObjectId::from_hash([b; 20])
    }

    fn setup() -> (tempfile::TempDir, Refdb) {
        let dir = tempfile::tempdir().unwrap();
        let db = Refdb::open(dir.path()).with_identity("Tester", "t@example.com");
        (dir, db)
    }

    #[test]
    fn create_lookup_delete() {
        let (_dir, db) = setup();
        let created = db.create("refs/heads/main", id(1), false, "branch: Created").unwrap();
        assert_eq!(db.lookup("refs/heads/main").unwrap().target, created.target);

        let err = db.create("refs/heads/main", id(2), false, "").unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyExists);
        db.create("refs/heads/main", id(2), true, "reset").unwrap();
        assert_eq!(db.name_to_id("refs/heads/main").unwrap(), id(2));

        let log = db.reflog().read("refs/heads/main").unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.entry(0).unwrap().old, id(1));
        assert_eq!(log.entry(0).unwrap().committer.name, "Tester");

        db.delete("refs/heads/main").unwrap();
        assert_eq!(db.lookup("refs/heads/main").unwrap_err().code(), ErrorCode::NotFound);
        assert!(!db.reflog().exists("refs/heads/main"));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let (_dir, db) = setup();
        for bad in ["refs/heads/a..b", "main", "refs/heads/x.lock", ""] {
            let err = db.create(bad, id(1), false, "").unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidName, "{bad:?}");
        }
        let err = db.create("refs/heads/a", id(1), false, "").and_then(|_| {
            db.create("refs/heads/a/b", id(1), false, "")
        });
        assert!(matches!(err, Err(RefError::NameConflict { .. })));
    }

    #[test]
    fn symbolic_chains_respect_nesting_bound() {
        let (_dir, db) = setup();
        db.create("refs/heads/base", id(7), false, "").unwrap();
        let mut target = "refs/heads/base".to_string();
        for i in 0..6 {
            let name = format!("refs/heads/link{i}");
            db.symbolic_create(&name, &target, false, "").unwrap();
            target = name;
        }
        // link4 is five hops from base, link5 six.
        assert_eq!(db.name_to_id("refs/heads/link4").unwrap(), id(7));
        let err = db.name_to_id("refs/heads/link5").unwrap_err();
        assert!(matches!(err, RefError::TooManyRedirects { max: 5, .. }));
        assert_eq!(err.code(), ErrorCode::TooManyRedirects);

        let resolved = db.lookup_resolved("refs/heads/link5", Some(6)).unwrap();
        assert_eq!(resolved.id(), Some(&id(7)));
        let unresolved = db.lookup_resolved("refs/heads/link5", Some(0)).unwrap();
        assert_eq!(unresolved.symbolic_target(), Some("refs/heads/link4"));
    }

    #[test]
    fn symbolic_cycle_is_bounded() {
        let (_dir, db) = setup();
        db.symbolic_create("refs/heads/a", "refs/heads/b", false, "").unwrap();
        db.symbolic_create("refs/heads/b", "refs/heads/a", false, "").unwrap();
        let err = db.resolve("refs/heads/a").unwrap_err();
        assert_eq!(err.code(), ErrorCode::TooManyRedirects);
    }

    #[test]
    fn rename_moves_head_and_reflog() {
        let (dir, db) = setup();
        db.create("refs/heads/main", id(1), false, "branch: Created").unwrap();
        db.set_head("refs/heads/main").unwrap();

        let renamed = db.rename("refs/heads/main", "refs/heads/trunk", false, "renamed").unwrap();
        assert_eq!(renamed.id(), Some(&id(1)));
        assert_eq!(db.lookup("refs/heads/main").unwrap_err().code(), ErrorCode::NotFound);
        assert_eq!(
            db.lookup("HEAD").unwrap().symbolic_target(),
            Some("refs/heads/trunk")
        );
        assert_eq!(db.head().unwrap().name, "refs/heads/trunk");

        assert!(!dir.path().join("logs/refs/heads/main").exists());
        let log = db.reflog().read("refs/heads/trunk").unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.entry(0).unwrap().message, "renamed");
    }

    #[test]
    fn rename_reports_unreadable_head() {
        let (dir, db) = setup();
        db.create("refs/heads/main", id(1), false, "").unwrap();
        std::fs::write(dir.path().join("HEAD"), "garbage\n").unwrap();

        let err = db.rename("refs/heads/main", "refs/heads/trunk", false, "").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Corrupted);
        assert_eq!(db.name_to_id("refs/heads/trunk").unwrap(), id(1));
    }

    #[test]
    fn rename_without_head_succeeds() {
        let (_dir, db) = setup();
        db.create("refs/heads/main", id(1), false, "").unwrap();
        db.rename("refs/heads/main", "refs/heads/trunk", false, "").unwrap();
        assert_eq!(db.lookup("HEAD").unwrap_err().code(), ErrorCode::NotFound);
    }

    #[test]
    fn set_target_requires_direct_reference() {
        let (_dir, db) = setup();
        db.create("refs/heads/main", id(1), false, "").unwrap();
        db.symbolic_create("refs/heads/alias", "refs/heads/main", false, "").unwrap();
        db.set_target("refs/heads/main", id(2), "commit").unwrap();
        assert_eq!(db.name_to_id("refs/heads/alias").unwrap(), id(2));

        let err = db.set_target("refs/heads/alias", id(3), "").unwrap_err();
        assert!(matches!(err, RefError::NotDirect { .. }));
        assert_eq!(db.set_target("refs/heads/none", id(3), "").unwrap_err().code(), ErrorCode::NotFound);
    }

    #[test]
    fn head_states() {
        let (_dir, db) = setup();
        db.set_head("refs/heads/main").unwrap();
        assert!(db.is_branch_unborn().unwrap());
        assert!(!db.is_head_detached().unwrap());
        assert_eq!(db.head().unwrap_err().code(), ErrorCode::NotFound);

        db.create("refs/heads/main", id(1), false, "").unwrap();
        assert!(!db.is_branch_unborn().unwrap());
        assert_eq!(db.head().unwrap().id(), Some(&id(1)));

        db.set_head_detached(id(2)).unwrap();
        assert!(db.is_head_detached().unwrap());
        assert_eq!(db.head().unwrap().id(), Some(&id(2)));
        assert_eq!(db.reflog().read("HEAD").unwrap().entry(0).unwrap().old, id(1));
    }

    #[test]
    fn tags_are_not_logged_by_default() {
        let (dir, db) = setup();
        db.create("refs/tags/v1", id(1), false, "").unwrap();
        assert!(!db.reflog().exists("refs/tags/v1"));

        let quiet = Refdb::open(dir.path()).with_log_all_ref_updates(false);
        quiet.create("refs/heads/quiet", id(1), false, "").unwrap();
        assert!(!quiet.reflog().exists("refs/heads/quiet"));
    }

    #[test]
    fn glob_and_filters() {
        let (_dir, db) = setup();
        db.create("refs/heads/main", id(1), false, "").unwrap();
        db.create("refs/heads/feature/x", id(2), false, "").unwrap();
        db.create("refs/tags/v1", id(3), false, "").unwrap();
        db.symbolic_create("refs/heads/alias", "refs/heads/main", false, "").unwrap();

        let mut heads = Vec::new();
        db.foreach_glob("refs/heads/*", |r| {
            heads.push(r.name.clone());
            true
        })
        .unwrap();
        heads.sort();
        assert_eq!(
            heads,
            vec!["refs/heads/alias", "refs/heads/feature/x", "refs/heads/main"]
        );

        let mut symbolic = Vec::new();
        db.foreach(RefFilter::Symbolic, |r| {
            symbolic.push(r.name.clone());
            true
        })
        .unwrap();
        assert_eq!(symbolic, vec!["refs/heads/alias"]);

        assert_eq!(db.list().unwrap().len(), 4);
    }

    #[test]
    fn compress_keeps_lookups_working() {
        let (dir, db) = setup();
        db.create("refs/heads/main", id(1), false, "").unwrap();
        db.create("refs/tags/v1", id(2), false, "").unwrap();
        db.compress(&NoPeel).unwrap();
        assert!(dir.path().join("packed-refs").exists());
        assert_eq!(db.name_to_id("refs/heads/main").unwrap(), id(1));

        db.delete("refs/tags/v1").unwrap();
        assert_eq!(db.lookup("refs/tags/v1").unwrap_err().code(), ErrorCode::NotFound);
    }
}
