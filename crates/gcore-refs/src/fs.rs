//! Filesystem reference backend: loose files plus `packed-refs`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gcore_types::{IoError, IoResultExt, ObjectId, OID_HEXSZ};
use walkdir::WalkDir;

use crate::error::{RefError, Result};
use crate::lock::write_locked;
use crate::names::{reference_available, LOCK_EXT, PACKED_REFS_FILE, REFS_DIR, TAGS_DIR};
use crate::packed::{PackedRef, PackedRefs, PackedRefsFile};
use crate::reference::{RefFlags, RefTarget, Reference};
use crate::traits::{Peeler, RefdbBackend};

const SYMREF_PREFIX: &str = "ref: ";

/// Remove `path`'s parent directories while they are empty, stopping at
/// `stop`.
pub(crate) fn prune_empty_parents(path: &Path, stop: &Path) {
    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == stop || !d.starts_with(stop) {
            break;
        }
        if fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}

/// Remove a directory tree that contains nothing but empty directories.
fn remove_empty_tree(dir: &Path) -> io::Result<bool> {
    for entry in WalkDir::new(dir) {
        if !entry?.file_type().is_dir() {
            return Ok(false);
        }
    }
    for entry in WalkDir::new(dir).contents_first(true) {
        fs::remove_dir(entry?.path())?;
    }
    Ok(true)
}

/// References stored under a git directory.
///
/// Loose references are files named after the reference and always shadow
/// an entry of the same name in `packed-refs`. Plain writes only touch the
/// loose tier; [`compress`](RefdbBackend::compress) moves loose references
/// into the packed file.
#[derive(Debug)]
pub struct FsRefdb {
    git_dir: PathBuf,
    packed: PackedRefsFile,
}

impl FsRefdb {
    pub fn open(git_dir: impl Into<PathBuf>) -> Self {
        let git_dir = git_dir.into();
        let packed = PackedRefsFile::new(git_dir.join(PACKED_REFS_FILE));
        Self { git_dir, packed }
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Snapshot of the packed tier.
    pub fn packed_refs(&self) -> Result<Arc<PackedRefs>> {
        self.packed.load()
    }

    fn loose_path(&self, name: &str) -> PathBuf {
        self.git_dir.join(name)
    }

    fn parse_loose(path: &Path, name: &str, content: &str) -> Result<Reference> {
        let content = content.trim_end();
        if let Some(target) = content.strip_prefix(SYMREF_PREFIX) {
            let target = target.trim();
            if target.is_empty() {
                return Err(RefError::corrupted(path, "empty symbolic target"));
            }
            return Ok(Reference::symbolic(name, target).with_flags(RefFlags::LOOSE));
        }
        let hex = content
            .get(..OID_HEXSZ)
            .ok_or_else(|| RefError::corrupted(path, "loose reference is too short"))?;
        if content[OID_HEXSZ..]
            .chars()
            .next()
            .is_some_and(|c| !c.is_whitespace())
        {
            return Err(RefError::corrupted(path, "trailing data after object id"));
        }
        let id = ObjectId::from_hex(hex)
            .map_err(|_| RefError::corrupted(path, "invalid object id"))?;
        Ok(Reference::direct(name, id).with_flags(RefFlags::LOOSE))
    }

    fn read_loose(&self, name: &str) -> Result<Option<Reference>> {
        let path = self.loose_path(name);
        match fs::read(&path) {
            Ok(bytes) => {
                let text = std::str::from_utf8(&bytes)
                    .map_err(|_| RefError::corrupted(&path, "reference is not valid UTF-8"))?;
                Self::parse_loose(&path, name, text).map(Some)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            // `refs/heads/a` is a directory once `refs/heads/a/b` exists.
            Err(_) if path.is_dir() => Ok(None),
            Err(e) => Err(IoError::new(path, e).into()),
        }
    }

    /// Names of every loose reference under `refs/`, sorted.
    pub fn loose_names(&self) -> Result<Vec<String>> {
        let refs_dir = self.git_dir.join(REFS_DIR);
        if !refs_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in WalkDir::new(&refs_dir).min_depth(1) {
            let entry = entry.map_err(IoError::from)?;
            if entry.file_type().is_dir() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.git_dir) else {
                continue;
            };
            let Some(name) = rel.to_str().map(|s| s.replace('\\', "/")) else {
                continue;
            };
            if name.ends_with(LOCK_EXT) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    fn all_names(&self) -> Result<Vec<String>> {
        let mut names = self.loose_names()?;
        names.extend(self.packed.load()?.names().map(str::to_owned));
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn write_loose(&self, reference: &Reference) -> Result<()> {
        let path = self.loose_path(&reference.name);
        // An empty directory tree left behind by deleted refs may sit here.
        if path.is_dir() && !remove_empty_tree(&path).with_path(&path)? {
            return Err(RefError::NameConflict {
                name: reference.name.clone(),
                existing: format!("{}/...", reference.name),
            });
        }
        write_locked(&path, reference.to_loose_contents().as_bytes())
    }

    fn remove_loose(&self, name: &str) -> Result<bool> {
        let path = self.loose_path(name);
        if !path.is_file() {
            return Ok(false);
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                prune_empty_parents(&path, &self.git_dir.join(REFS_DIR));
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(IoError::new(path, e).into()),
        }
    }

    /// Drop `names` from the packed file, rewriting it if any were present.
    fn remove_packed(&self, names: &[&str]) -> Result<bool> {
        let current = self.packed.load()?;
        if !names.iter().any(|n| current.contains(n)) {
            return Ok(false);
        }
        let mut table = current.duplicate()?;
        for name in names {
            table.remove(name);
        }
        self.packed.write(table)?;
        Ok(true)
    }

    /// Replace the loose file `old` with `renamed`. Both names are freed
    /// first since `new` may need the directory `old` occupies.
    fn move_loose(&self, old: &str, new: &str, force: bool, renamed: &Reference) -> Result<()> {
        self.remove_loose(old)?;
        if force {
            self.remove_loose(new)?;
        }
        self.write_loose(renamed)
    }

    fn peel_entry(entry: &mut PackedRef, peeler: &dyn Peeler) -> Result<()> {
        if entry.has_peel() || !entry.name.starts_with(TAGS_DIR) {
            return Ok(());
        }
        let peeled = peeler.peel(&entry.id).map_err(|e| RefError::Peel {
            name: entry.name.clone(),
            reason: e.to_string(),
        })?;
        if let Some(peeled) = peeled {
            entry.set_peeled(peeled);
        }
        Ok(())
    }
}

impl RefdbBackend for FsRefdb {
    fn exists(&self, name: &str) -> Result<bool> {
        if self.loose_path(name).is_file() {
            return Ok(true);
        }
        Ok(self.packed.load()?.contains(name))
    }

    fn lookup(&self, name: &str) -> Result<Option<Reference>> {
        if let Some(reference) = self.read_loose(name)? {
            return Ok(Some(reference));
        }
        Ok(self.packed.load()?.get(name).map(PackedRef::to_reference))
    }

    fn write(&self, reference: &Reference) -> Result<()> {
        self.write_loose(reference)
    }

    fn delete(&self, name: &str) -> Result<()> {
        // Packed first: a failed rewrite must leave the loose value visible.
        let packed = self.remove_packed(&[name])?;
        let loose = self.remove_loose(name)?;
        if !loose && !packed {
            return Err(RefError::not_found(name));
        }
        tracing::debug!(reference = name, loose, packed, "deleted reference");
        Ok(())
    }

    fn rename(&self, old: &str, new: &str, force: bool) -> Result<Reference> {
        let existing = self.lookup(old)?.ok_or_else(|| RefError::not_found(old))?;
        if old == new {
            return Ok(existing);
        }
        if !force && self.exists(new)? {
            return Err(RefError::AlreadyExists {
                name: new.to_string(),
            });
        }
        let names = self.all_names()?;
        reference_available(names.iter().map(String::as_str), new, Some(old))?;

        // Nothing has changed yet if the packed rewrite fails.
        self.remove_packed(&[old, new])?;

        let renamed = Reference {
            name: new.to_string(),
            target: existing.target.clone(),
            peeled: None,
            flags: RefFlags::LOOSE,
        };
        if let Err(err) = self.move_loose(old, new, force, &renamed) {
            let restore = Reference {
                flags: RefFlags::LOOSE,
                peeled: None,
                ..existing
            };
            return match self.write_loose(&restore) {
                Ok(()) => {
                    tracing::warn!(old, new, error = %err, "rename failed, restored old reference");
                    Err(err)
                }
                Err(rollback) => {
                    tracing::error!(old, new, error = %err, rollback = %rollback, "rename failed and old reference could not be restored");
                    Err(RefError::RenameRollback {
                        old: old.to_string(),
                        new: new.to_string(),
                        source: Box::new(err),
                        rollback: Box::new(rollback),
                    })
                }
            };
        }
        Ok(renamed)
    }

    fn compress(&self, peeler: &dyn Peeler) -> Result<()> {
        let mut table = self.packed.load()?.duplicate()?;
        let mut packed_loose = Vec::new();

        for name in self.loose_names()? {
            let Some(reference) = self.read_loose(&name)? else {
                continue;
            };
            // Symbolic references always stay loose.
            let RefTarget::Direct(id) = reference.target else {
                continue;
            };
            let mut entry = PackedRef::new(name.clone(), id);
            entry.flags.insert(RefFlags::WAS_LOOSE);
            table.insert(entry)?;
            packed_loose.push((name, id));
        }

        let names: Vec<String> = table.names().map(str::to_owned).collect();
        for name in names {
            let Some(mut entry) = table.get(&name).cloned() else {
                continue;
            };
            Self::peel_entry(&mut entry, peeler)?;
            table.insert(entry)?;
        }

        // The packed file must be durable before any loose file goes away.
        let total = table.len();
        self.packed.write(table)?;

        let mut first_error = None;
        for (name, id) in &packed_loose {
            // Skip refs that changed since they were read.
            match self.read_loose(name) {
                Ok(Some(current)) if current.id() == Some(id) => {}
                Ok(_) => continue,
                Err(e) => {
                    first_error.get_or_insert(e);
                    continue;
                }
            }
            if let Err(e) = self.remove_loose(name) {
                tracing::warn!(reference = %name, error = %e, "failed to remove loose reference after packing");
                first_error.get_or_insert(e);
            }
        }
        tracing::debug!(packed = total, loose = packed_loose.len(), "compressed references");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn foreach(&self, cb: &mut dyn FnMut(&Reference) -> bool) -> Result<()> {
        let packed = self.packed.load()?;
        for entry in packed.sorted() {
            // A loose file with the same name wins.
            let reference = match self.read_loose(&entry.name)? {
                Some(loose) => loose,
                None => entry.to_reference(),
            };
            if !cb(&reference) {
                return Ok(());
            }
        }
        for name in self.loose_names()? {
            if packed.contains(&name) {
                continue;
            }
            let Some(reference) = self.read_loose(&name)? else {
                continue;
            };
            if !cb(&reference) {
                return Ok(());
            }
        }
        Ok(())
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

    fn setup() -> (tempfile::TempDir, FsRefdb) {
        let dir = tempfile::tempdir().unwrap();
        let db = FsRefdb::open(dir.path());
        (dir, db)
    }

    fn collect(db: &FsRefdb) -> Vec<(String, RefTarget)> {
        let mut out = Vec::new();
        db.foreach(&mut |r| {
            out.push((r.name.clone(), r.target.clone()));
            true
        })
        .unwrap();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    #[test]
    fn write_then_lookup() {
        let (_dir, db) = setup();
        db.write(&Reference::direct("refs/heads/main", id(1))).unwrap();
        db.write(&Reference::symbolic("HEAD", "refs/heads/main")).unwrap();

        let main = db.lookup("refs/heads/main").unwrap().unwrap();
        assert_eq!(main.id(), Some(&id(1)));
        assert!(main.flags.contains(RefFlags::LOOSE));
        let head = db.lookup("HEAD").unwrap().unwrap();
        assert_eq!(head.symbolic_target(), Some("refs/heads/main"));
        assert!(db.lookup("refs/heads/none").unwrap().is_none());
    }

    #[test]
    fn corrupt_loose_file() {
        let (dir, db) = setup();
        fs::create_dir_all(dir.path().join("refs/heads")).unwrap();
        fs::write(dir.path().join("refs/heads/bad"), "1234\n").unwrap();
        let err = db.lookup("refs/heads/bad").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Corrupted);

        fs::write(dir.path().join("refs/heads/bad"), format!("{}x\n", id(1))).unwrap();
        assert!(db.lookup("refs/heads/bad").is_err());
    }

    #[test]
    fn loose_shadows_packed() {
        let (dir, db) = setup();
        fs::write(
            dir.path().join("packed-refs"),
            format!("{} refs/heads/main\n", id(1)),
        )
        .unwrap();
        let packed = db.lookup("refs/heads/main").unwrap().unwrap();
        assert!(packed.is_packed());

        db.write(&Reference::direct("refs/heads/main", id(2))).unwrap();
        assert_eq!(db.lookup("refs/heads/main").unwrap().unwrap().id(), Some(&id(2)));
        assert_eq!(collect(&db), vec![("refs/heads/main".into(), RefTarget::Direct(id(2)))]);
    }

    #[test]
    fn delete_from_either_tier() {
        let (dir, db) = setup();
        fs::write(
            dir.path().join("packed-refs"),
            format!("{} refs/heads/a\n{} refs/heads/b\n", id(1), id(2)),
        )
        .unwrap();
        db.write(&Reference::direct("refs/heads/a", id(3))).unwrap();
        db.write(&Reference::direct("refs/heads/c/d", id(4))).unwrap();

        db.delete("refs/heads/a").unwrap();
        assert!(db.lookup("refs/heads/a").unwrap().is_none());
        db.delete("refs/heads/b").unwrap();
        assert!(db.lookup("refs/heads/b").unwrap().is_none());
        db.delete("refs/heads/c/d").unwrap();
        assert!(!dir.path().join("refs/heads/c").exists());
        assert!(dir.path().join("refs").exists());

        let err = db.delete("refs/heads/a").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn rename_across_tiers_and_into_own_directory() {
        let (dir, db) = setup();
        fs::write(
            dir.path().join("packed-refs"),
            format!("{} refs/heads/packed\n", id(9)),
        )
        .unwrap();
        db.write(&Reference::direct("refs/heads/a", id(1))).unwrap();

        let renamed = db.rename("refs/heads/a", "refs/heads/a/b", false).unwrap();
        assert_eq!(renamed.id(), Some(&id(1)));
        assert!(db.lookup("refs/heads/a").unwrap().is_none());
        assert_eq!(db.lookup("refs/heads/a/b").unwrap().unwrap().id(), Some(&id(1)));

        db.rename("refs/heads/packed", "refs/heads/moved", false).unwrap();
        assert!(db.lookup("refs/heads/packed").unwrap().is_none());
        assert!(!db.packed_refs().unwrap().contains("refs/heads/packed"));
        assert_eq!(db.lookup("refs/heads/moved").unwrap().unwrap().id(), Some(&id(9)));
    }

    #[test]
    fn rename_conflicts() {
        let (_dir, db) = setup();
        db.write(&Reference::direct("refs/heads/a", id(1))).unwrap();
        db.write(&Reference::direct("refs/heads/b", id(2))).unwrap();
        db.write(&Reference::direct("refs/heads/c/d", id(3))).unwrap();

        let err = db.rename("refs/heads/a", "refs/heads/b", false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyExists);
        let err = db.rename("refs/heads/a", "refs/heads/c", false).unwrap_err();
        assert!(matches!(err, RefError::NameConflict { .. }));
        let err = db.rename("refs/heads/missing", "refs/heads/x", false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        db.rename("refs/heads/a", "refs/heads/b", true).unwrap();
        assert_eq!(db.lookup("refs/heads/b").unwrap().unwrap().id(), Some(&id(1)));
    }

    #[test]
    fn rename_rolls_back_when_target_locked() {
        let (dir, db) = setup();
        db.write(&Reference::direct("refs/heads/a", id(1))).unwrap();
        fs::create_dir_all(dir.path().join("refs/heads")).unwrap();
        fs::write(dir.path().join("refs/heads/z.lock"), "").unwrap();

        let err = db.rename("refs/heads/a", "refs/heads/z", false).unwrap_err();
        assert!(matches!(err, RefError::Locked { .. }));
        assert_eq!(db.lookup("refs/heads/a").unwrap().unwrap().id(), Some(&id(1)));
    }

    fn packed_and_loose(dir: &tempfile::TempDir, db: &FsRefdb) {
        fs::write(
            dir.path().join("packed-refs"),
            format!("{} refs/heads/a\n", id(1)),
        )
        .unwrap();
        db.write(&Reference::direct("refs/heads/a", id(2))).unwrap();
        fs::write(dir.path().join("packed-refs.lock"), "").unwrap();
    }

    #[test]
    fn rename_keeps_loose_value_when_packed_refs_locked() {
        let (dir, db) = setup();
        packed_and_loose(&dir, &db);

        let err = db.rename("refs/heads/a", "refs/heads/b", false).unwrap_err();
        assert!(matches!(err, RefError::Locked { .. }));
        assert_eq!(db.lookup("refs/heads/a").unwrap().unwrap().id(), Some(&id(2)));
        assert!(db.lookup("refs/heads/b").unwrap().is_none());
    }

    #[test]
    fn delete_keeps_loose_value_when_packed_refs_locked() {
        let (dir, db) = setup();
        packed_and_loose(&dir, &db);

        let err = db.delete("refs/heads/a").unwrap_err();
        assert!(matches!(err, RefError::Locked { .. }));
        assert_eq!(db.lookup("refs/heads/a").unwrap().unwrap().id(), Some(&id(2)));

        fs::remove_file(dir.path().join("packed-refs.lock")).unwrap();
        db.delete("refs/heads/a").unwrap();
        assert!(db.lookup("refs/heads/a").unwrap().is_none());
    }

    #[test]
    fn rename_restores_packed_ref_as_loose_on_failure() {
        let (dir, db) = setup();
        fs::write(
            dir.path().join("packed-refs"),
            format!("{} refs/heads/a\n", id(1)),
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("refs/heads")).unwrap();
        fs::write(dir.path().join("refs/heads/z.lock"), "").unwrap();

        let err = db.rename("refs/heads/a", "refs/heads/z", false).unwrap_err();
        assert!(matches!(err, RefError::Locked { .. }));
        let restored = db.lookup("refs/heads/a").unwrap().unwrap();
        assert_eq!(restored.id(), Some(&id(1)));
        assert!(restored.flags.contains(RefFlags::LOOSE));
        assert!(!db.packed_refs().unwrap().contains("refs/heads/a"));
    }

    #[test]
    fn compress_then_reload_keeps_enumeration() {
        let (dir, db) = setup();
        db.write(&Reference::direct("refs/heads/main", id(1))).unwrap();
        db.write(&Reference::direct("refs/heads/feature/x", id(2))).unwrap();
        db.write(&Reference::direct("refs/tags/v1", id(3))).unwrap();
        db.write(&Reference::symbolic("refs/remotes/origin/HEAD", "refs/remotes/origin/main"))
            .unwrap();
        let before = collect(&db);

        let peeler = |oid: &ObjectId| -> std::result::Result<Option<ObjectId>, crate::traits::PeelError> {
            Ok((*oid == id(3)).then(|| id(4)))
        };
        db.compress(&peeler).unwrap();

        assert!(!dir.path().join("refs/heads/main").exists());
        assert!(!dir.path().join("refs/heads/feature").exists());
        assert!(dir.path().join("refs/remotes/origin/HEAD").exists());
        let text = fs::read_to_string(dir.path().join("packed-refs")).unwrap();
        assert!(text.contains(&format!("{} refs/tags/v1\n^{}\n", id(3), id(4))));

        let reopened = FsRefdb::open(dir.path());
        assert_eq!(collect(&reopened), before);
        let tag = reopened.lookup("refs/tags/v1").unwrap().unwrap();
        assert_eq!(tag.peeled, Some(id(4)));
        assert!(tag.flags.contains(RefFlags::PACKED | RefFlags::HAS_PEEL));
    }

    #[test]
    fn compress_merges_with_existing_packed_file() {
        let (dir, db) = setup();
        fs::write(
            dir.path().join("packed-refs"),
            format!("{} refs/heads/a\n{} refs/heads/b\n", id(1), id(2)),
        )
        .unwrap();
        db.write(&Reference::direct("refs/heads/a", id(5))).unwrap();
        db.compress(&NoPeel).unwrap();

        let packed = db.packed_refs().unwrap();
        assert_eq!(packed.len(), 2);
        assert_eq!(packed.get("refs/heads/a").unwrap().id, id(5));
        assert_eq!(db.loose_names().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn foreach_skips_lock_files_and_stops_early() {
        let (dir, db) = setup();
        db.write(&Reference::direct("refs/heads/a", id(1))).unwrap();
        db.write(&Reference::direct("refs/heads/b", id(2))).unwrap();
        fs::write(dir.path().join("refs/heads/c.lock"), "").unwrap();
        assert_eq!(collect(&db).len(), 2);

        let mut seen = 0;
        db.foreach(&mut |_| {
            seen += 1;
            false
        })
        .unwrap();
        assert_eq!(seen, 1);
        assert_eq!(db.names().unwrap(), vec!["refs/heads/a", "refs/heads/b"]);
    }

    #[test]
    fn write_replaces_empty_directory() {
        let (dir, db) = setup();
        fs::create_dir_all(dir.path().join("refs/heads/x/y")).unwrap();
        db.write(&Reference::direct("refs/heads/x", id(1))).unwrap();
        assert!(dir.path().join("refs/heads/x").is_file());

        db.write(&Reference::direct("refs/heads/p/q", id(1))).unwrap();
        let err = db.write(&Reference::direct("refs/heads/p", id(1))).unwrap_err();
        assert!(matches!(err, RefError::NameConflict { .. }));
    }
}
