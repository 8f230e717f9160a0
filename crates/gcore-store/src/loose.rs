//! Loose object backend: one zlib-compressed file per object.
//!
//! An object with id `aabbcc...` lives at `objects/aa/bbcc...` and contains
//! `deflate("<type> <len>\0" + payload)`. New objects are written to a
//! temporary file in the objects directory, synced, and renamed into place,
//! so readers only ever see complete files.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use gcore_types::{IoError, IoResultExt, ObjectId};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::hasher::ObjectHasher;
use crate::object::{object_header, parse_header, ObjectKind, RawObject};
use crate::traits::{OdbBackend, OdbWriteStream};

/// Filesystem backend storing each object in its own compressed file.
#[derive(Debug, Clone)]
pub struct LooseBackend {
    objects_dir: PathBuf,
    compression: Compression,
    fsync: bool,
}

impl LooseBackend {
    /// Backend rooted at a repository's `objects/` directory.
    pub fn new(objects_dir: impl Into<PathBuf>) -> Self {
        Self {
            objects_dir: objects_dir.into(),
            compression: Compression::default(),
            fsync: true,
        }
    }

    /// Override the zlib level (0-9).
    pub fn with_compression(mut self, level: u32) -> Self {
        self.compression = Compression::new(level.min(9));
        self
    }

    /// Skip fsync on finalize. Only sensible for throwaway repositories.
    pub fn without_fsync(mut self) -> Self {
        self.fsync = false;
        self
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Path of the file that holds (or would hold) `id`.
    pub fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    fn read_compressed(&self, id: &ObjectId) -> StoreResult<Option<Vec<u8>>> {
        let path = self.object_path(id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IoError::new(path, e).into()),
        }
    }

    fn corrupt(id: &ObjectId, reason: impl Into<String>) -> StoreError {
        StoreError::CorruptObject {
            id: *id,
            reason: reason.into(),
        }
    }

    fn decode(id: &ObjectId, compressed: &[u8]) -> StoreResult<RawObject> {
        let mut inflated = Vec::new();
        ZlibDecoder::new(compressed)
            .read_to_end(&mut inflated)
            .map_err(|e| Self::corrupt(id, format!("failed to inflate: {e}")))?;
        let (kind, size, header_len) =
            parse_header(&inflated).map_err(|reason| Self::corrupt(id, reason))?;
        if inflated.len() - header_len != size {
            return Err(Self::corrupt(
                id,
                format!(
                    "header declares {size} bytes but payload has {}",
                    inflated.len() - header_len
                ),
            ));
        }
        inflated.drain(..header_len);
        Ok(RawObject::new(kind, inflated))
    }

    /// Ids in the fan-out directories whose name starts with `dir_prefix`
    /// (empty for all), in hex order.
    fn scan(&self, dir_prefix: &str) -> StoreResult<Vec<ObjectId>> {
        if !self.objects_dir.is_dir() {
            return Ok(Vec::new());
        }
        let walker = WalkDir::new(&self.objects_dir)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() != 1
                    || e.file_name().to_str().is_some_and(|name| {
                        name.len() == 2
                            && name.bytes().all(|b| b.is_ascii_hexdigit())
                            && name.starts_with(dir_prefix)
                    })
            });

        let mut ids = Vec::new();
        for entry in walker {
            let entry = entry.map_err(IoError::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let dir = entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str());
            let (Some(dir), Some(rest)) = (dir, entry.file_name().to_str()) else {
                continue;
            };
            if let Ok(id) = ObjectId::from_hex(&format!("{dir}{rest}")) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Candidate ids in the fan-out directories matching `prefix`.
    fn prefix_candidates(&self, prefix: &ObjectId, len: usize) -> StoreResult<Vec<ObjectId>> {
        let hex = prefix.to_hex_prefix(len);
        let mut found = self.scan(&hex[..hex.len().min(2)])?;
        found.retain(|id| id.to_hex().starts_with(&hex));
        Ok(found)
    }
}

impl OdbBackend for LooseBackend {
    fn read(&self, id: &ObjectId) -> StoreResult<Option<RawObject>> {
        match self.read_compressed(id)? {
            Some(bytes) => Self::decode(id, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn read_header(&self, id: &ObjectId) -> StoreResult<Option<(ObjectKind, usize)>> {
        let path = self.object_path(id);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IoError::new(path, e).into()),
        };
        // The header is short; inflate only enough to find its NUL.
        let mut head = Vec::with_capacity(64);
        ZlibDecoder::new(file)
            .take(64)
            .read_to_end(&mut head)
            .map_err(|e| Self::corrupt(id, format!("failed to inflate: {e}")))?;
        let (kind, size, _) = parse_header(&head).map_err(|reason| Self::corrupt(id, reason))?;
        Ok(Some((kind, size)))
    }

    fn read_prefix(
        &self,
        prefix: &ObjectId,
        len: usize,
    ) -> StoreResult<Option<(ObjectId, RawObject)>> {
        let candidates = self.prefix_candidates(prefix, len)?;
        match candidates.as_slice() {
            [] => Ok(None),
            [id] => Ok(self.read(id)?.map(|obj| (*id, obj))),
            _ => Err(StoreError::Ambiguous(prefix.to_hex_prefix(len))),
        }
    }

    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.object_path(id).is_file())
    }

    fn write(&self, id: &ObjectId, object: &RawObject) -> StoreResult<()> {
        if self.exists(id)? {
            return Ok(());
        }
        let mut stream = LooseWriteStream::open(self.clone(), object.kind, object.size() as u64)?;
        stream.write(&object.data)?;
        let written = Box::new(stream).finalize()?;
        if written != *id {
            return Err(StoreError::HashMismatch {
                id: *id,
                computed: written,
            });
        }
        Ok(())
    }

    fn write_stream(&self, kind: ObjectKind, len: u64) -> StoreResult<Box<dyn OdbWriteStream>> {
        Ok(Box::new(LooseWriteStream::open(self.clone(), kind, len)?))
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn for_each(&self, cb: &mut dyn FnMut(&ObjectId) -> bool) -> StoreResult<()> {
        for id in self.scan("")? {
            if !cb(&id) {
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Streaming writer for a single loose object.
///
/// Bytes are hashed and deflated into a temporary file as they arrive; the
/// file is renamed to its final path once the id is known.
pub struct LooseWriteStream {
    backend: LooseBackend,
    encoder: ZlibEncoder<NamedTempFile>,
    hasher: ObjectHasher,
    declared: u64,
    written: u64,
}

impl LooseWriteStream {
    fn open(backend: LooseBackend, kind: ObjectKind, len: u64) -> StoreResult<Self> {
        let dir = &backend.objects_dir;
        fs::create_dir_all(dir).with_path(dir)?;
        let tmp = tempfile::Builder::new()
            .prefix("tmp_object_")
            .tempfile_in(dir)
            .with_path(dir)?;
        let mut encoder = ZlibEncoder::new(tmp, backend.compression);
        encoder
            .write_all(&object_header(kind, len as usize))
            .with_path(dir)?;
        Ok(Self {
            backend,
            encoder,
            hasher: ObjectHasher::new(kind, len as usize),
            declared: len,
            written: 0,
        })
    }
}

impl OdbWriteStream for LooseWriteStream {
    fn write(&mut self, chunk: &[u8]) -> StoreResult<()> {
        let written = self.written + chunk.len() as u64;
        if written > self.declared {
            return Err(StoreError::StreamLength {
                declared: self.declared,
                written,
            });
        }
        self.hasher.update(chunk);
        self.encoder
            .write_all(chunk)
            .with_path(&self.backend.objects_dir)?;
        self.written = written;
        Ok(())
    }

    fn finalize(self: Box<Self>) -> StoreResult<ObjectId> {
        let this = *self;
        if this.written != this.declared {
            return Err(StoreError::StreamLength {
                declared: this.declared,
                written: this.written,
            });
        }
        let dir = &this.backend.objects_dir;
        let tmp = this.encoder.finish().with_path(dir)?;
        if this.backend.fsync {
            tmp.as_file().sync_all().with_path(tmp.path())?;
        }

        let id = this.hasher.finalize();
        let target = this.backend.object_path(&id);
        if target.exists() {
            // Same content already published; the temp file is dropped.
            return Ok(id);
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }
        tmp.persist(&target)
            .map_err(|e| IoError::new(&target, e.error))?;
        tracing::trace!(%id, "wrote loose object");
        Ok(id)
    }
}
