use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use gcore_store::{sha1_digest, ObjectKind, RawObject};
use gcore_types::{IoError, IoResultExt, ObjectId, OidSet, OID_RAWSZ};

use crate::delta::encode_delta;
use crate::entry::{encode_entry_header, encode_ofs_distance, OBJ_OFS_DELTA, OBJ_REF_DELTA};
use crate::error::PackResult;
use crate::index::PackIndex;
use crate::reader::{PACK_MAGIC, PACK_VERSION};

/// Result of writing a pack file.
#[derive(Clone, Debug)]
pub struct PackFile {
    pub pack_path: PathBuf,
    pub index_path: PathBuf,
    pub object_count: usize,
    pub checksum: [u8; OID_RAWSZ],
}

impl PackFile {
    /// Hex form of the pack checksum, as used in the file names.
    pub fn name(&self) -> String {
        ObjectId::from_hash(self.checksum).to_hex()
    }
}

/// How delta bases are referenced when deltas are enabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DeltaBaseRef {
    /// Backwards offset within the pack (OFS_DELTA).
    #[default]
    Offset,
    /// Base object id (REF_DELTA).
    Id,
}

struct PendingEntry {
    id: ObjectId,
    kind: ObjectKind,
    data: Vec<u8>,
}

/// Builds a pack file from a collection of objects.
///
/// With a non-zero delta window each object is compared against up to that
/// many preceding objects of the same kind and stored as a delta when that
/// saves at least half its size.
pub struct PackWriter {
    pack_dir: PathBuf,
    entries: Vec<PendingEntry>,
    seen: OidSet,
    delta_window: usize,
    max_delta_depth: usize,
    base_ref: DeltaBaseRef,
    compression: Compression,
}

/// Longest delta chain the writer produces by default.
pub const DEFAULT_WRITE_DEPTH: usize = 10;

impl PackWriter {
    /// Create a writer that will place `pack-<sha>.{pack,idx}` in `pack_dir`.
    pub fn new(pack_dir: &Path) -> Self {
        Self {
            pack_dir: pack_dir.to_path_buf(),
            entries: Vec::new(),
            seen: OidSet::new(),
            delta_window: 0,
            max_delta_depth: DEFAULT_WRITE_DEPTH,
            base_ref: DeltaBaseRef::Offset,
            compression: Compression::default(),
        }
    }

    pub fn with_delta_window(mut self, window: usize) -> Self {
        self.delta_window = window;
        self
    }

    /// Never build a delta chain longer than `depth`.
    pub fn with_max_delta_depth(mut self, depth: usize) -> Self {
        self.max_delta_depth = depth;
        self
    }

    pub fn with_delta_base_ref(mut self, base_ref: DeltaBaseRef) -> Self {
        self.base_ref = base_ref;
        self
    }

    /// Add an object to the pack. Duplicate ids are ignored.
    pub fn add_object(&mut self, kind: ObjectKind, data: &[u8]) -> PackResult<ObjectId> {
        let id = gcore_store::ObjectHasher::hash(kind, data);
        if self.seen.add(id)? {
            self.entries.push(PendingEntry {
                id,
                kind,
                data: data.to_vec(),
            });
        }
        Ok(id)
    }

    pub fn add_raw(&mut self, obj: &RawObject) -> PackResult<ObjectId> {
        self.add_object(obj.kind, &obj.data)
    }

    /// Number of objects queued.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the pack and index into the pack directory.
    ///
    /// Both files are written to temporaries and renamed into place, the
    /// index last, so a concurrent scanner never sees an index without its
    /// pack.
    pub fn finish(self) -> PackResult<PackFile> {
        let pack_dir = self.pack_dir.clone();
        std::fs::create_dir_all(&pack_dir).with_path(&pack_dir)?;
        let (pack_data, index) = self.build_pack_bytes()?;

        let name = ObjectId::from_hash(index.pack_checksum).to_hex();
        let pack_path = pack_dir.join(format!("pack-{name}.pack"));
        let index_path = pack_dir.join(format!("pack-{name}.idx"));

        write_atomic(&pack_dir, &pack_path, &pack_data)?;
        write_atomic(&pack_dir, &index_path, &index.to_bytes())?;
        tracing::debug!(
            pack = %pack_path.display(),
            objects = index.object_count(),
            bytes = pack_data.len(),
            "wrote pack"
        );

        Ok(PackFile {
            pack_path,
            index_path,
            object_count: index.object_count(),
            checksum: index.pack_checksum,
        })
    }

    /// Build pack bytes and index in memory (no disk I/O).
    pub fn finish_to_bytes(self) -> PackResult<(Vec<u8>, PackIndex)> {
        self.build_pack_bytes()
    }

    fn find_base(&self, i: usize, depths: &[usize]) -> Option<(usize, Vec<u8>)> {
        let target = &self.entries[i];
        let start = i.saturating_sub(self.delta_window);
        let mut best: Option<(usize, Vec<u8>)> = None;
        for j in (start..i).rev() {
            let candidate = &self.entries[j];
            if candidate.kind != target.kind || depths[j] >= self.max_delta_depth {
                continue;
            }
            let delta = encode_delta(&candidate.data, &target.data);
            let better = best.as_ref().map_or(true, |(_, d)| delta.len() < d.len());
            if delta.len() * 2 <= target.data.len() && better {
                best = Some((j, delta));
            }
        }
        best
    }

    fn build_pack_bytes(self) -> PackResult<(Vec<u8>, PackIndex)> {
        let mut pack_data = Vec::new();
        let mut index_entries = Vec::with_capacity(self.entries.len());
        let mut offsets = Vec::with_capacity(self.entries.len());
        let mut depths = Vec::with_capacity(self.entries.len());

        pack_data.extend_from_slice(&PACK_MAGIC);
        pack_data.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack_data.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());

        for (i, entry) in self.entries.iter().enumerate() {
            let offset = pack_data.len() as u64;
            let start = pack_data.len();

            let base = if self.delta_window > 0 {
                self.find_base(i, &depths)
            } else {
                None
            };
            let depth = match &base {
                Some((j, _)) => depths[*j] + 1,
                None => 0,
            };
            match base {
                Some((j, delta)) => {
                    match self.base_ref {
                        DeltaBaseRef::Offset => {
                            pack_data.extend(encode_entry_header(OBJ_OFS_DELTA, delta.len() as u64));
                            pack_data.extend(encode_ofs_distance(offset - offsets[j]));
                        }
                        DeltaBaseRef::Id => {
                            pack_data.extend(encode_entry_header(OBJ_REF_DELTA, delta.len() as u64));
                            pack_data.extend_from_slice(self.entries[j].id.as_bytes());
                        }
                    }
                    pack_data.extend(deflate(&delta, self.compression)?);
                }
                None => {
                    pack_data.extend(encode_entry_header(
                        entry.kind.type_code(),
                        entry.data.len() as u64,
                    ));
                    pack_data.extend(deflate(&entry.data, self.compression)?);
                }
            }

            let crc = crc32fast::hash(&pack_data[start..]);
            offsets.push(offset);
            depths.push(depth);
            index_entries.push((entry.id, crc, offset));
        }

        let checksum = sha1_digest(&pack_data);
        pack_data.extend_from_slice(&checksum);

        let index = PackIndex::build(index_entries, checksum);
        Ok((pack_data, index))
    }
}

fn deflate(data: &[u8], level: Compression) -> PackResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), level);
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| IoError::new("<deflate>", e).into())
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> PackResult<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix("tmp_pack_")
        .tempfile_in(dir)
        .with_path(dir)?;
    tmp.write_all(bytes).with_path(tmp.path())?;
    tmp.as_file().sync_all().with_path(tmp.path())?;
    tmp.persist(target)
        .map_err(|e| IoError::new(target, e.error))?;
    Ok(())
}
