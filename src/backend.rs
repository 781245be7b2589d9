use std::path::Path;

use log::{debug, warn};

use crate::chunk::FileChunk;
use crate::registry::DISK_BACKEND_NAME;
use crate::spec::FileSpec;
use crate::{Error, Result};

/// Upper bound on simultaneously open chunk handles per backend.
pub const MAX_OPEN_CHUNK_HANDLES: usize = 2;

/// A storage implementation serving one logical file object.
///
/// Instances double as prototypes: a registry holds one unopened instance
/// per backend name and calls `make_new` to mint a fresh instance for each
/// file to open or create.
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn make_new(&self) -> Box<dyn StorageBackend>;

    /// Creates a new file object for writing, per the spec's first chunk.
    fn create(&mut self, spec: &FileSpec) -> Result<()>;
    /// Opens an existing file object for reading.
    fn open_spec(&mut self, spec: &FileSpec) -> Result<()>;

    /// Reads exactly `buf.len()` bytes at the current position, spanning
    /// chunk boundaries transparently.
    fn read(&mut self, buf: &mut [u8]) -> Result<()>;
    /// Appends `data` at the end of the object. The current position must
    /// be at the end.
    fn write(&mut self, data: &[u8]) -> Result<()>;
    /// Writes `data` at the current position, over existing bytes when
    /// needed, spanning chunk boundaries. Only the last chunk may grow.
    fn overwrite(&mut self, data: &[u8]) -> Result<()>;

    fn set_pos(&mut self, pos: u64) -> Result<()>;
    fn pos(&self) -> u64;
    fn total_size(&self) -> u64;
    fn is_read_only(&self) -> bool;

    /// Starts a new chunk; subsequent appends land in it.
    fn add_chunk(&mut self) -> Result<()>;
    fn chunk_count(&self) -> usize;
    fn chunk_sizes(&self) -> Vec<u64>;
    fn chunk_path(&self, index: usize) -> Option<String>;

    /// Cuts the object at the current position, deleting chunks that fall
    /// entirely past it.
    fn truncate(&mut self) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Chunk file naming: `file`, `file_1`, `file_2`, ... When the head chunk
/// itself ends in `_1`, successors continue its numbering instead.
fn chunk_path_at(head: &str, index: usize) -> String {
    if let Some(base) = head.strip_suffix("_1") {
        format!("{base}_{}", index + 1)
    } else {
        format!("{head}_{index}")
    }
}

/// Follows a symlinked head path to its target, so a symlink to chunk 0
/// discovers the same family as opening chunk 0 directly.
fn resolve_head(head: &str) -> String {
    let is_symlink = Path::new(head)
        .symlink_metadata()
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false);
    if !is_symlink {
        return head.to_string();
    }
    match std::fs::canonicalize(head) {
        Ok(real) => real.to_string_lossy().into_owned(),
        Err(_) => head.to_string(),
    }
}

/// Finds the chunk family of `head` by probing successive suffixes. When
/// `head` itself ends in `_1`, the suffix-less sibling is picked up as
/// chunk 0.
fn discover_chunks(head: &str) -> Vec<String> {
    let head = resolve_head(head);
    let head = head.as_str();
    let mut paths = Vec::new();
    if let Some(base) = head.strip_suffix("_1") {
        if Path::new(base).is_file() {
            paths.push(base.to_string());
        }
    }
    paths.push(head.to_string());
    loop {
        let candidate = chunk_path_at(&paths[0], paths.len());
        if !Path::new(&candidate).is_file() {
            break;
        }
        paths.push(candidate);
    }
    paths
}

/// Local-disk backend: a logical file object stored as one or more plain
/// files, each holding a contiguous byte range.
#[derive(Default)]
pub struct DiskBackend {
    chunks: Vec<FileChunk>,
    pos: u64,
    read_only: bool,
}

impl DiskBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn chunk_index_for(&self, pos: u64) -> Option<usize> {
        self.chunks.iter().position(|chunk| chunk.contains(pos))
    }

    fn last_index(&self) -> usize {
        self.chunks.len().saturating_sub(1)
    }

    fn head_path(&self) -> Result<String> {
        let head = self.chunks.first().ok_or(Error::NotOpen)?;
        Ok(head.path().to_string_lossy().into_owned())
    }

    fn enforce_handle_cap(&mut self, keep: usize) -> Result<()> {
        let mut open = self.chunks.iter().filter(|chunk| chunk.is_open()).count();
        for idx in 0..self.chunks.len() {
            if open <= MAX_OPEN_CHUNK_HANDLES {
                break;
            }
            if idx != keep && self.chunks[idx].is_open() {
                self.chunks[idx].close_handle()?;
                open -= 1;
            }
        }
        Ok(())
    }
}

impl StorageBackend for DiskBackend {
    fn name(&self) -> &'static str {
        DISK_BACKEND_NAME
    }

    fn make_new(&self) -> Box<dyn StorageBackend> {
        Box::new(DiskBackend::new())
    }

    fn create(&mut self, spec: &FileSpec) -> Result<()> {
        if !self.chunks.is_empty() {
            return Err(Error::AlreadyOpen);
        }
        if !spec.is_disk() {
            return Err(Error::BackendMismatch(spec.backend_name.clone()));
        }
        let path = spec
            .chunks
            .first()
            .ok_or(Error::InvalidData("file spec has no chunk path"))?;
        debug!("creating disk file {path}");
        self.chunks.push(FileChunk::create(path, 0)?);
        self.pos = 0;
        self.read_only = false;
        Ok(())
    }

    fn open_spec(&mut self, spec: &FileSpec) -> Result<()> {
        if !self.chunks.is_empty() {
            return Err(Error::AlreadyOpen);
        }
        if !spec.is_disk() {
            return Err(Error::BackendMismatch(spec.backend_name.clone()));
        }
        let head = spec
            .chunks
            .first()
            .ok_or(Error::InvalidData("file spec has no chunk path"))?;
        let paths: Vec<String> = if spec.chunks.len() > 1 {
            // The spec enumerates every chunk; trust it.
            spec.chunks.clone()
        } else {
            discover_chunks(head)
        };
        let mut chunks = Vec::with_capacity(paths.len());
        for path in &paths {
            let offset = chunks.last().map_or(0, |c: &FileChunk| c.offset() + c.size());
            chunks.push(FileChunk::open(path, offset, true)?);
        }
        debug!("opened disk file {head} with {} chunk(s)", chunks.len());
        self.chunks = chunks;
        self.pos = 0;
        self.read_only = true;
        self.enforce_handle_cap(0)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.chunks.is_empty() {
            return Err(Error::NotOpen);
        }
        let requested = buf.len();
        let mut got = 0;
        while got < requested {
            let idx = self
                .chunk_index_for(self.pos)
                .ok_or(Error::NotEnoughData { requested, got })?;
            let chunk = &mut self.chunks[idx];
            let rel = self.pos - chunk.offset();
            let available = (chunk.size() - rel) as usize;
            let take = available.min(requested - got);
            chunk.read(rel, &mut buf[got..got + take])?;
            self.pos += take as u64;
            got += take;
            self.enforce_handle_cap(idx)?;
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.chunks.is_empty() {
            return Err(Error::NotOpen);
        }
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        if self.pos != self.total_size() {
            return Err(Error::Unsupported("write must append at the end"));
        }
        let idx = self.last_index();
        let chunk = &mut self.chunks[idx];
        let rel = self.pos - chunk.offset();
        chunk.write(rel, data)?;
        self.pos += data.len() as u64;
        self.enforce_handle_cap(idx)
    }

    fn overwrite(&mut self, data: &[u8]) -> Result<()> {
        if self.chunks.is_empty() {
            return Err(Error::NotOpen);
        }
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let requested = data.len();
        let mut written = 0;
        while written < requested {
            let idx = match self.chunk_index_for(self.pos) {
                Some(idx) => idx,
                // Allow extending, but only through the last chunk.
                None if self.pos == self.total_size() => self.last_index(),
                None => return Err(Error::PartialWrite { requested, written }),
            };
            let is_last = idx + 1 == self.chunks.len();
            let chunk = &mut self.chunks[idx];
            let rel = self.pos - chunk.offset();
            let take = if is_last {
                requested - written
            } else {
                ((chunk.size() - rel) as usize).min(requested - written)
            };
            chunk.write(rel, &data[written..written + take])?;
            self.pos += take as u64;
            written += take;
            self.enforce_handle_cap(idx)?;
        }
        Ok(())
    }

    fn set_pos(&mut self, pos: u64) -> Result<()> {
        self.pos = pos;
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn total_size(&self) -> u64 {
        self.chunks
            .last()
            .map_or(0, |chunk| chunk.offset() + chunk.size())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn add_chunk(&mut self) -> Result<()> {
        if self.chunks.is_empty() {
            return Err(Error::NotOpen);
        }
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let path = chunk_path_at(&self.head_path()?, self.chunks.len());
        let offset = self.total_size();
        debug!("adding chunk {path} at offset {offset}");
        self.chunks.push(FileChunk::create(&path, offset)?);
        self.pos = offset;
        self.enforce_handle_cap(self.last_index())
    }

    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn chunk_sizes(&self) -> Vec<u64> {
        self.chunks.iter().map(FileChunk::size).collect()
    }

    fn chunk_path(&self, index: usize) -> Option<String> {
        self.chunks
            .get(index)
            .map(|chunk| chunk.path().to_string_lossy().into_owned())
    }

    fn truncate(&mut self) -> Result<()> {
        if self.chunks.is_empty() {
            return Err(Error::NotOpen);
        }
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let pos = self.pos;
        while self.chunks.len() > 1
            && self.chunks.last().map_or(false, |c| c.offset() >= pos)
        {
            let mut chunk = self.chunks.pop().expect("len checked");
            let _ = chunk.close_handle();
            if let Err(err) = std::fs::remove_file(chunk.path()) {
                warn!("failed to remove chunk {}: {err}", chunk.path().display());
            }
        }
        let last = self.chunks.last_mut().ok_or(Error::NotOpen)?;
        last.truncate(pos.saturating_sub(last.offset()))
    }

    fn flush(&mut self) -> Result<()> {
        for chunk in &mut self.chunks {
            chunk.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        for chunk in &mut self.chunks {
            chunk.close_handle()?;
        }
        self.chunks.clear();
        self.pos = 0;
        self.read_only = false;
        Ok(())
    }
}
