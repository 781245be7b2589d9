use std::collections::BTreeSet;

use log::{debug, warn};

use crate::backend::StorageBackend;
use crate::compress::{self, Compression};
use crate::format::{FileHeader, RecordHeader, FILE_HEADER_SIZE, RECORD_HEADER_SIZE};
use crate::index::{load_index_cache, save_index_cache, FileIndex, RecordInfo, INDEX_ENTRY_SIZE};
use crate::layout::LayoutDescriptor;
use crate::record::RecordKind;
use crate::registry::BackendRegistry;
use crate::spec::FileSpec;
use crate::stream::StreamId;
use crate::{registry, Error, Result};

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Use and maintain an index side-cache next to the file (disk only).
    /// Only consulted when the file carries no embedded index.
    pub use_index_cache: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            use_index_cache: false,
        }
    }
}

/// Per-record callback for [`RecordReader::play_all`]. The payload arrives
/// checksum-verified and decompressed.
pub trait RecordPlayer {
    fn process_record(
        &mut self,
        info: &RecordInfo,
        header: &RecordHeader,
        payload: &[u8],
    ) -> Result<()>;
}

/// Result of one playback pass. As with writing, a bad record poisons only
/// its own stream; the pass continues through the other streams.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub records_read: usize,
    pub stream_errors: Vec<(StreamId, Error)>,
}

/// Record file reader.
///
/// The index comes from the file itself when the writer finalized cleanly,
/// from a side-cache when one matches, or from a full scan of the record
/// headers otherwise.
pub struct RecordReader {
    backend: Box<dyn StorageBackend>,
    header: FileHeader,
    index: FileIndex,
    head_path: String,
}

impl RecordReader {
    /// Opens a file addressed by a path, JSON spec, or URI, resolving the
    /// backend through the process-wide registry.
    pub fn open(path_json_uri: &str) -> Result<Self> {
        let spec = FileSpec::from_path_json_uri(path_json_uri)?;
        Self::open_with_registry(&spec, registry::global(), ReaderOptions::default())
    }

    pub fn open_with_registry(
        spec: &FileSpec,
        registry: &BackendRegistry,
        options: ReaderOptions,
    ) -> Result<Self> {
        let mut backend = registry.open(spec)?;
        let mut header_bytes = [0u8; FILE_HEADER_SIZE];
        backend.set_pos(0)?;
        backend.read(&mut header_bytes)?;
        let header = FileHeader::from_bytes(&header_bytes)?;
        let head_path = spec
            .chunks
            .first()
            .cloned()
            .ok_or(Error::InvalidData("file spec has no chunk path"))?;

        let index = Self::load_index(&mut backend, &header, &head_path, &options)?;
        debug!("opened {head_path} with {} indexed records", index.len());
        Ok(Self {
            backend,
            header,
            index,
            head_path,
        })
    }

    fn load_index(
        backend: &mut Box<dyn StorageBackend>,
        header: &FileHeader,
        head_path: &str,
        options: &ReaderOptions,
    ) -> Result<FileIndex> {
        let total_size = backend.total_size();
        if header.index_offset != 0 && header.index_count > 0 {
            if index_region_fits(header, total_size) {
                backend.set_pos(header.index_offset)?;
                return FileIndex::read_from(backend.as_mut(), header.index_count as usize);
            }
            warn!(
                "file header names an index region outside the file ({} entries at offset {}), ignoring it",
                header.index_count, header.index_offset
            );
        }

        // No usable embedded index: the writer did not finalize, or the
        // header is damaged. Try the side-cache before falling back to a
        // scan.
        let cache_path = format!("{head_path}.idx");
        let signature = FileSpec::from_chunks(vec![head_path.to_string()]).signature();
        if options.use_index_cache {
            match load_index_cache(cache_path.as_ref(), signature, total_size) {
                Ok(index) => {
                    debug!("loaded index cache {cache_path}");
                    return Ok(index);
                }
                Err(Error::NotFound(_)) => {}
                Err(err) => debug!("index cache unusable: {err}"),
            }
        }

        let index = Self::rebuild_index(backend.as_mut(), header)?;
        if options.use_index_cache {
            if let Err(err) =
                save_index_cache(cache_path.as_ref(), signature, total_size, &index)
            {
                warn!("could not save index cache {cache_path}: {err}");
            }
        }
        Ok(index)
    }

    /// Rebuilds the index by walking record headers from the start of the
    /// record region. A truncated tail is tolerated: everything before it
    /// stays readable.
    fn rebuild_index(backend: &mut dyn StorageBackend, header: &FileHeader) -> Result<FileIndex> {
        let total_size = backend.total_size();
        let end = if header.index_offset != 0 && index_region_fits(header, total_size) {
            header.index_offset
        } else {
            total_size
        };
        let mut records = Vec::new();
        let mut pos = header.first_record_offset;
        let mut header_bytes = [0u8; RECORD_HEADER_SIZE];
        while pos + RECORD_HEADER_SIZE as u64 <= end {
            backend.set_pos(pos)?;
            backend.read(&mut header_bytes)?;
            let record_header = match RecordHeader::from_bytes(&header_bytes) {
                Ok(record_header) => record_header,
                Err(err) => {
                    warn!("index scan stopped at offset {pos}: {err}");
                    break;
                }
            };
            let next = pos + (RECORD_HEADER_SIZE as u64) + record_header.stored_len as u64;
            if next > end {
                warn!("index scan found truncated record at offset {pos}");
                break;
            }
            records.push(RecordInfo {
                timestamp: record_header.timestamp,
                offset: pos,
                length: RECORD_HEADER_SIZE as u32 + record_header.stored_len,
                format_version: record_header.format_version,
                stream_id: record_header.stream_id,
                kind: record_header.kind,
            });
            pos = next;
        }
        debug!("index rebuilt by scan: {} records", records.len());
        Ok(FileIndex::from_records(records))
    }

    pub fn index(&self) -> &FileIndex {
        &self.index
    }

    pub fn record_count(&self) -> usize {
        self.index.len()
    }

    pub fn stream_ids(&self) -> BTreeSet<StreamId> {
        self.index.stream_ids()
    }

    pub fn time_range(&self) -> Option<(f64, f64)> {
        self.index.time_range()
    }

    pub fn file_header(&self) -> &FileHeader {
        &self.header
    }

    /// Reads, verifies, and decompresses one record.
    pub fn read_record(&mut self, info: &RecordInfo) -> Result<(RecordHeader, Vec<u8>)> {
        let mut header_bytes = [0u8; RECORD_HEADER_SIZE];
        self.backend.set_pos(info.offset)?;
        self.backend.read(&mut header_bytes)?;
        let header = RecordHeader::from_bytes(&header_bytes)?;
        let mut stored = vec![0u8; header.stored_len as usize];
        self.backend.read(&mut stored)?;
        header.validate_crc(&stored)?;
        let payload = match header.compression {
            Compression::None => stored,
            Compression::Zstd => {
                compress::decompress(&stored, header.uncompressed_len as usize)?
            }
        };
        Ok((header, payload))
    }

    /// Returns the layout descriptor carried by a stream's configuration
    /// record.
    pub fn stream_layout(&mut self, stream_id: StreamId) -> Result<LayoutDescriptor> {
        let info = self
            .index
            .records()
            .iter()
            .find(|info| info.stream_id == stream_id && info.kind == RecordKind::Configuration)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("configuration record for {stream_id}")))?;
        let (_, payload) = self.read_record(&info)?;
        let json = std::str::from_utf8(&payload)
            .map_err(|_| Error::InvalidData("configuration record is not utf-8"))?;
        LayoutDescriptor::from_json(json)
    }

    /// Plays every record through `player` in global timestamp order.
    /// A record that fails to read or process poisons only its stream.
    pub fn play_all(&mut self, player: &mut dyn RecordPlayer) -> Result<ReadOutcome> {
        let entries: Vec<RecordInfo> = self.index.records().to_vec();
        let mut outcome = ReadOutcome::default();
        let mut failed_streams: BTreeSet<StreamId> = BTreeSet::new();
        for info in entries {
            if failed_streams.contains(&info.stream_id) {
                continue;
            }
            let step = self
                .read_record(&info)
                .and_then(|(header, payload)| player.process_record(&info, &header, &payload));
            match step {
                Ok(()) => outcome.records_read += 1,
                Err(Error::Io(err)) => return Err(Error::Io(err)),
                Err(err) => {
                    warn!("skipping stream {} after read error: {err}", info.stream_id);
                    failed_streams.insert(info.stream_id);
                    outcome.stream_errors.push((info.stream_id, err));
                }
            }
        }
        Ok(outcome)
    }

    pub fn close(mut self) -> Result<()> {
        self.backend.close()
    }
}

/// Whether the header's embedded index region lies inside the file. A header
/// failing this check is treated as damaged and the index is rebuilt.
fn index_region_fits(header: &FileHeader, total_size: u64) -> bool {
    let index_bytes = header.index_count as u64 * INDEX_ENTRY_SIZE as u64;
    header.index_offset >= header.first_record_offset
        && header
            .index_offset
            .checked_add(index_bytes)
            .map_or(false, |end| end <= total_size)
}
