use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use gcore_store::{ObjectKind, OdbBackend, RawObject, StoreError, StoreResult};
use gcore_types::{IoError, ObjectId};
use walkdir::WalkDir;

use crate::reader::{PackReader, DEFAULT_MAX_DELTA_DEPTH};

/// Read-only object backend over every pack in `objects/pack/`.
///
/// Packs are discovered by their `.idx` files. A pack that fails to open is
/// logged and skipped so one damaged pack does not hide the rest.
pub struct PackBackend {
    pack_dir: PathBuf,
    max_delta_depth: usize,
    packs: RwLock<Vec<Arc<PackReader>>>,
}

impl PackBackend {
    /// Scan `pack_dir` and open every pack found there.
    pub fn open(pack_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::with_max_delta_depth(pack_dir, DEFAULT_MAX_DELTA_DEPTH)
    }

    pub fn with_max_delta_depth(pack_dir: impl Into<PathBuf>, depth: usize) -> StoreResult<Self> {
        let backend = Self {
            pack_dir: pack_dir.into(),
            max_delta_depth: depth,
            packs: RwLock::new(Vec::new()),
        };
        backend.rescan()?;
        Ok(backend)
    }

    pub fn pack_dir(&self) -> &Path {
        &self.pack_dir
    }

    /// Number of loaded packs.
    pub fn pack_count(&self) -> usize {
        self.packs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Total objects across all packs.
    pub fn total_objects(&self) -> usize {
        self.snapshot().iter().map(|p| p.object_count()).sum()
    }

    fn snapshot(&self) -> Vec<Arc<PackReader>> {
        self.packs.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn pack_paths(&self) -> StoreResult<Vec<PathBuf>> {
        if !self.pack_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.pack_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(IoError::from)?;
            let path = entry.path();
            if entry.file_type().is_file() && path.extension().is_some_and(|e| e == "idx") {
                let pack = path.with_extension("pack");
                if pack.is_file() {
                    paths.push(pack);
                }
            }
        }
        Ok(paths)
    }

    /// Open packs that appeared since the last scan and drop packs whose
    /// files are gone. Already-open packs are kept as they are.
    fn rescan(&self) -> StoreResult<()> {
        let paths = self.pack_paths()?;
        let current = self.snapshot();

        let mut next = Vec::with_capacity(paths.len());
        for path in &paths {
            if let Some(open) = current.iter().find(|p| p.path() == Some(path.as_path())) {
                next.push(Arc::clone(open));
                continue;
            }
            match PackReader::open(path) {
                Ok(reader) => {
                    tracing::debug!(pack = %path.display(), objects = reader.object_count(), "opened pack");
                    next.push(Arc::new(reader.with_max_delta_depth(self.max_delta_depth)));
                }
                Err(e) => {
                    tracing::warn!("skipping corrupt pack {:?}: {}", path, e);
                }
            }
        }

        *self.packs.write().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(())
    }
}

impl OdbBackend for PackBackend {
    fn read(&self, id: &ObjectId) -> StoreResult<Option<RawObject>> {
        for pack in self.snapshot() {
            if let Some(obj) = pack.read_object(id)? {
                return Ok(Some(obj));
            }
        }
        Ok(None)
    }

    fn read_header(&self, id: &ObjectId) -> StoreResult<Option<(ObjectKind, usize)>> {
        for pack in self.snapshot() {
            if let Some(header) = pack.read_header(id)? {
                return Ok(Some(header));
            }
        }
        Ok(None)
    }

    fn read_prefix(
        &self,
        prefix: &ObjectId,
        len: usize,
    ) -> StoreResult<Option<(ObjectId, RawObject)>> {
        let mut found: Option<(ObjectId, Arc<PackReader>)> = None;
        for pack in self.snapshot() {
            if let Some(id) = pack.index().lookup_prefix(prefix, len)? {
                match &found {
                    Some((seen, _)) if *seen != id => {
                        return Err(StoreError::Ambiguous(prefix.to_hex_prefix(len)));
                    }
                    Some(_) => {}
                    None => found = Some((id, pack)),
                }
            }
        }
        match found {
            Some((id, pack)) => Ok(pack.read_object(&id)?.map(|obj| (id, obj))),
            None => Ok(None),
        }
    }

    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.snapshot().iter().any(|p| p.contains(id)))
    }

    fn for_each(&self, cb: &mut dyn FnMut(&ObjectId) -> bool) -> StoreResult<()> {
        for pack in self.snapshot() {
            for id in pack.object_ids() {
                if !cb(id) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn refresh(&self) -> StoreResult<()> {
        self.rescan()
    }
}

impl std::fmt::Debug for PackBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackBackend")
            .field("pack_dir", &self.pack_dir)
            .field("packs", &self.pack_count())
            .finish()
    }
}

