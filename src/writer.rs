use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, warn};

use crate::backend::StorageBackend;
use crate::compress::{self, Compression, DEFAULT_ZSTD_LEVEL, MIN_COMPRESSION_SIZE};
use crate::format::{FileHeader, RecordHeader, RECORD_HEADER_SIZE};
use crate::index::{save_index_cache, FileIndex, RecordInfo};
use crate::layout::LayoutDescriptor;
use crate::queue::JobQueue;
use crate::record::{DataSource, Record, RecordAllocator, RecordKind};
use crate::registry::BackendRegistry;
use crate::spec::FileSpec;
use crate::stream::StreamId;
use crate::{registry, Error, Result};

#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Zstd level; `None` disables compression entirely.
    pub compression_level: Option<i32>,
    /// Rolls to a new chunk when the current one would grow past this.
    /// Zero means a single chunk of unbounded size.
    pub max_chunk_size: u64,
    /// Save an index side-cache next to the file on finalize (disk only).
    pub save_index_cache: bool,
    pub max_buffer_cache_bytes: usize,
    pub over_alloc_bytes: usize,
    pub over_alloc_percent: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression_level: Some(DEFAULT_ZSTD_LEVEL),
            max_chunk_size: 0,
            save_index_cache: false,
            max_buffer_cache_bytes: crate::record::DEFAULT_MAX_CACHE_BYTES,
            over_alloc_bytes: crate::record::DEFAULT_OVER_ALLOC_BYTES,
            over_alloc_percent: crate::record::DEFAULT_OVER_ALLOC_PERCENT,
        }
    }
}

/// Result of one write pass. Stream errors are isolated: a record that
/// fails to encode poisons only its own stream for the rest of the pass.
#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub records_written: usize,
    pub records_queued: usize,
    pub bytes_written: u64,
    pub stream_errors: Vec<(StreamId, Error)>,
}

enum WriteJob {
    Batch(Vec<Record>),
}

struct WriterInner {
    backend: Box<dyn StorageBackend>,
    index: FileIndex,
    head_path: String,
}

enum WriterState {
    Closed,
    Direct(WriterInner),
    Background {
        queue: Arc<JobQueue<WriteJob>>,
        handle: JoinHandle<(WriterInner, Result<()>)>,
    },
}

/// Record file writer.
///
/// Streams are registered up front; registration emits a configuration
/// record carrying the stream's layout descriptor so readers can map the
/// payloads. Data records queue in the allocator until a write pass moves
/// everything up to a cutoff timestamp into the file, in timestamp order.
/// Writing can run on a background thread fed through a job queue.
pub struct RecordWriter {
    options: WriterOptions,
    allocator: Arc<RecordAllocator>,
    streams: BTreeMap<StreamId, LayoutDescriptor>,
    state: WriterState,
}

impl RecordWriter {
    /// Creates a file addressed by a path, JSON spec, or URI, resolving the
    /// backend through the process-wide registry.
    pub fn create(path_json_uri: &str, options: WriterOptions) -> Result<Self> {
        let spec = FileSpec::from_path_json_uri(path_json_uri)?;
        Self::create_with_registry(&spec, registry::global(), options)
    }

    pub fn create_with_registry(
        spec: &FileSpec,
        registry: &BackendRegistry,
        options: WriterOptions,
    ) -> Result<Self> {
        let mut backend = registry.create(spec)?;
        backend.write(&FileHeader::new().to_bytes())?;
        let head_path = backend
            .chunk_path(0)
            .ok_or(Error::InvalidData("backend created no chunk"))?;
        debug!("created record file {head_path}");
        let allocator = Arc::new(RecordAllocator::with_config(
            options.max_buffer_cache_bytes,
            options.over_alloc_bytes,
            options.over_alloc_percent,
        ));
        Ok(Self {
            options,
            allocator,
            streams: BTreeMap::new(),
            state: WriterState::Direct(WriterInner {
                backend,
                index: FileIndex::new(),
                head_path,
            }),
        })
    }

    /// Registers a stream and queues its configuration record, which holds
    /// the layout descriptor as JSON.
    pub fn register_stream(
        &mut self,
        stream_id: StreamId,
        timestamp: f64,
        descriptor: &LayoutDescriptor,
    ) -> Result<()> {
        if self.streams.contains_key(&stream_id) {
            return Err(Error::InvalidData("stream already registered"));
        }
        let payload = descriptor.to_json().into_bytes();
        self.allocator
            .create_record(timestamp, stream_id, RecordKind::Configuration, 1, &payload)?;
        self.streams.insert(stream_id, descriptor.clone());
        Ok(())
    }

    /// Queues one record. The stream must have been registered.
    pub fn create_record(
        &self,
        timestamp: f64,
        stream_id: StreamId,
        kind: RecordKind,
        format_version: u32,
        source: &dyn DataSource,
    ) -> Result<()> {
        if !self.streams.contains_key(&stream_id) {
            return Err(Error::NotFound(format!("stream {stream_id}")));
        }
        self.allocator
            .create_record(timestamp, stream_id, kind, format_version, source)
    }

    pub fn pending_count(&self) -> usize {
        self.allocator.pending_count()
    }

    /// Moves writing to a background thread. Subsequent write passes queue
    /// batches instead of blocking on I/O.
    pub fn run_in_background(&mut self) -> Result<()> {
        let inner = match std::mem::replace(&mut self.state, WriterState::Closed) {
            WriterState::Direct(inner) => inner,
            other => {
                self.state = other;
                return Err(Error::Unsupported("writer is not in direct mode"));
            }
        };
        let queue = Arc::new(JobQueue::new());
        let worker_queue = Arc::clone(&queue);
        let allocator = Arc::clone(&self.allocator);
        let options = self.options.clone();
        let handle = std::thread::Builder::new()
            .name("trove-writer".to_string())
            .spawn(move || background_loop(inner, worker_queue, allocator, options))?;
        self.state = WriterState::Background { queue, handle };
        Ok(())
    }

    /// Writes (or queues) every pending record with a timestamp at or
    /// before `max_timestamp`.
    pub fn write_records_up_to(&mut self, max_timestamp: f64) -> Result<WriteOutcome> {
        let mut records = Vec::new();
        self.allocator.collect_old_records(max_timestamp, &mut records);
        if records.is_empty() {
            return Ok(WriteOutcome::default());
        }
        match &mut self.state {
            WriterState::Direct(inner) => {
                write_batch(inner, records, &self.allocator, &self.options)
            }
            WriterState::Background { queue, .. } => {
                let queued = records.len();
                if !queue.send_job(WriteJob::Batch(records)) {
                    return Err(Error::NotOpen);
                }
                Ok(WriteOutcome {
                    records_queued: queued,
                    ..Default::default()
                })
            }
            WriterState::Closed => Err(Error::NotOpen),
        }
    }

    /// Flushes every pending record, appends the index, patches the file
    /// header, and closes the file. Returns the final spec, with chunk
    /// paths and sizes filled in.
    pub fn finalize(&mut self) -> Result<FileSpec> {
        self.write_records_up_to(f64::MAX)?;
        let mut inner = match std::mem::replace(&mut self.state, WriterState::Closed) {
            WriterState::Direct(inner) => inner,
            WriterState::Background { queue, handle } => {
                queue.end();
                let (inner, result) = handle
                    .join()
                    .map_err(|_| Error::DataSource("writer thread panicked".to_string()))?;
                result?;
                inner
            }
            WriterState::Closed => return Err(Error::NotOpen),
        };
        self.allocator.purge_cache(0);

        inner.index.sort();
        let index_offset = inner.backend.total_size();
        inner.backend.set_pos(index_offset)?;
        inner.index.write_to(inner.backend.as_mut())?;

        let mut header = FileHeader::new();
        header.index_offset = index_offset;
        header.index_count = inner.index.len() as u32;
        inner.backend.set_pos(0)?;
        inner.backend.overwrite(&header.to_bytes())?;
        inner.backend.flush()?;

        let mut spec = FileSpec::default();
        spec.chunk_sizes = inner.backend.chunk_sizes();
        spec.chunks = (0..inner.backend.chunk_count())
            .filter_map(|idx| inner.backend.chunk_path(idx))
            .collect();
        if inner.backend.name() != crate::registry::DISK_BACKEND_NAME {
            spec.backend_name = inner.backend.name().to_string();
        }

        if self.options.save_index_cache && spec.is_disk() {
            let cache_path = format!("{}.idx", inner.head_path);
            let signature = FileSpec::from_chunks(vec![inner.head_path.clone()]).signature();
            let total = inner.backend.total_size();
            if let Err(err) =
                save_index_cache(cache_path.as_ref(), signature, total, &inner.index)
            {
                warn!("could not save index cache {cache_path}: {err}");
            }
        }

        debug!(
            "finalized {} with {} records in {} chunk(s)",
            inner.head_path,
            inner.index.len(),
            inner.backend.chunk_count()
        );
        inner.backend.close()?;
        Ok(spec)
    }
}

fn background_loop(
    mut inner: WriterInner,
    queue: Arc<JobQueue<WriteJob>>,
    allocator: Arc<RecordAllocator>,
    options: WriterOptions,
) -> (WriterInner, Result<()>) {
    let mut result = Ok(());
    loop {
        match queue.wait_for_job(Duration::from_millis(250)) {
            Some(WriteJob::Batch(records)) => {
                if result.is_err() {
                    // Already failed: drain buffers back to the allocator.
                    for record in records {
                        allocator.recycle(record);
                    }
                    continue;
                }
                if let Err(err) = write_batch(&mut inner, records, &allocator, &options) {
                    warn!("background write failed: {err}");
                    result = Err(err);
                }
            }
            None => {
                if queue.has_ended() && queue.is_empty() {
                    break;
                }
            }
        }
    }
    (inner, result)
}

fn write_batch(
    inner: &mut WriterInner,
    records: Vec<Record>,
    allocator: &RecordAllocator,
    options: &WriterOptions,
) -> Result<WriteOutcome> {
    let mut outcome = WriteOutcome::default();
    let mut failed_streams: BTreeSet<StreamId> = BTreeSet::new();
    let mut iter = records.into_iter();
    while let Some(record) = iter.next() {
        if failed_streams.contains(&record.stream_id) {
            allocator.recycle(record);
            continue;
        }
        let encoded = encode_record(&record, options);
        let (header, compressed) = match encoded {
            Ok(parts) => parts,
            Err(err) => {
                warn!("skipping stream {} after encode error: {err}", record.stream_id);
                failed_streams.insert(record.stream_id);
                outcome.stream_errors.push((record.stream_id, err));
                allocator.recycle(record);
                continue;
            }
        };
        let payload: &[u8] = compressed.as_deref().unwrap_or(&record.buffer);
        let total = (RECORD_HEADER_SIZE + payload.len()) as u64;
        let write_result = append_record(inner, &header, payload, total, options);
        match write_result {
            Ok(offset) => {
                inner.index.add(RecordInfo {
                    timestamp: record.timestamp,
                    offset,
                    length: total as u32,
                    format_version: record.format_version,
                    stream_id: record.stream_id,
                    kind: record.kind,
                });
                outcome.records_written += 1;
                outcome.bytes_written += total;
                allocator.recycle(record);
            }
            Err(err) => {
                // Backend failures are not per-stream; stop the pass.
                allocator.recycle(record);
                for leftover in iter {
                    allocator.recycle(leftover);
                }
                allocator.purge_cache_to_limit();
                return Err(err);
            }
        }
    }
    allocator.purge_cache_to_limit();
    Ok(outcome)
}

fn append_record(
    inner: &mut WriterInner,
    header: &RecordHeader,
    payload: &[u8],
    total: u64,
    options: &WriterOptions,
) -> Result<u64> {
    if options.max_chunk_size > 0 {
        let current = inner.backend.chunk_sizes().last().copied().unwrap_or(0);
        if current > 0 && current + total > options.max_chunk_size {
            inner.backend.add_chunk()?;
        }
    }
    let offset = inner.backend.total_size();
    inner.backend.set_pos(offset)?;
    inner.backend.write(&header.to_bytes())?;
    inner.backend.write(payload)?;
    Ok(offset)
}

/// Builds the on-disk header and, when worthwhile, a compressed payload.
/// Returns `None` for the payload when the record is stored uncompressed.
fn encode_record(
    record: &Record,
    options: &WriterOptions,
) -> Result<(RecordHeader, Option<Vec<u8>>)> {
    let uncompressed_len = record.buffer.len() as u32;
    let mut compression = Compression::None;
    let mut compressed = None;
    if let Some(level) = options.compression_level {
        if record.buffer.len() >= MIN_COMPRESSION_SIZE {
            let candidate = compress::compress(&record.buffer, level)?;
            if candidate.len() < record.buffer.len() {
                compression = Compression::Zstd;
                compressed = Some(candidate);
            }
        }
    }
    let stored: &[u8] = compressed.as_deref().unwrap_or(&record.buffer);
    let header = RecordHeader {
        stored_len: stored.len() as u32,
        uncompressed_len,
        timestamp: record.timestamp,
        format_version: record.format_version,
        stream_id: record.stream_id,
        kind: record.kind,
        compression,
        checksum: RecordHeader::crc32(stored),
    };
    Ok((header, compressed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutDescriptor;

    #[test]
    fn unregistered_stream_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rec.trv");
        let writer =
            RecordWriter::create(&path.to_string_lossy(), WriterOptions::default())
                .expect("create");
        let payload: &[u8] = b"data";
        let err = writer
            .create_record(1.0, StreamId::new(100, 1), RecordKind::Data, 1, &payload)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rec.trv");
        let mut writer =
            RecordWriter::create(&path.to_string_lossy(), WriterOptions::default())
                .expect("create");
        let descriptor = LayoutDescriptor::default();
        writer
            .register_stream(StreamId::new(100, 1), 0.0, &descriptor)
            .expect("register");
        assert!(writer
            .register_stream(StreamId::new(100, 1), 0.0, &descriptor)
            .is_err());
    }

    #[test]
    fn finalize_reports_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rec.trv");
        let mut options = WriterOptions::default();
        options.compression_level = None;
        options.max_chunk_size = 256;
        let mut writer =
            RecordWriter::create(&path.to_string_lossy(), options).expect("create");
        let stream = StreamId::new(100, 1);
        writer
            .register_stream(stream, 0.0, &LayoutDescriptor::default())
            .expect("register");
        for idx in 0..10 {
            let payload = vec![idx as u8; 100];
            writer
                .create_record(idx as f64 + 1.0, stream, RecordKind::Data, 1, &payload)
                .expect("create record");
        }
        writer.write_records_up_to(5.0).expect("partial write");
        let spec = writer.finalize().expect("finalize");
        assert!(spec.chunks.len() > 1);
        assert!(spec.has_chunk_sizes());
        for (path, size) in spec.chunks.iter().zip(spec.chunk_sizes.iter()) {
            assert_eq!(std::fs::metadata(path).expect("chunk exists").len(), *size);
        }
    }
}
