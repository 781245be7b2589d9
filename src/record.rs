use std::collections::VecDeque;
use std::sync::Mutex;

use crate::stream::StreamId;
use crate::{Error, Result};

/// Role of a record within its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Stream setup: layout descriptors, device settings.
    Configuration = 1,
    /// Snapshot of mutable stream state.
    State = 2,
    /// Regular payload.
    Data = 3,
}

impl RecordKind {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(RecordKind::Configuration),
            2 => Ok(RecordKind::State),
            3 => Ok(RecordKind::Data),
            _ => Err(Error::InvalidData("unknown record kind")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecordKind::Configuration => "configuration",
            RecordKind::State => "state",
            RecordKind::Data => "data",
        }
    }
}

/// Producer-side payload serializer. `required_size` is called once to size
/// the record buffer, then `write_into` receives a slice of exactly that
/// length.
pub trait DataSource {
    fn required_size(&self) -> usize;
    fn write_into(&self, buf: &mut [u8]) -> Result<()>;
}

impl DataSource for &[u8] {
    fn required_size(&self) -> usize {
        self.len()
    }

    fn write_into(&self, buf: &mut [u8]) -> Result<()> {
        buf.copy_from_slice(self);
        Ok(())
    }
}

impl DataSource for Vec<u8> {
    fn required_size(&self) -> usize {
        self.len()
    }

    fn write_into(&self, buf: &mut [u8]) -> Result<()> {
        buf.copy_from_slice(self);
        Ok(())
    }
}

/// One pending or recycled record. The buffer keeps its capacity across
/// recycle cycles; `original_size` remembers the payload size the buffer was
/// first allocated for, which fixes its over-allocation budget forever.
#[derive(Debug)]
pub struct Record {
    pub timestamp: f64,
    pub kind: RecordKind,
    pub format_version: u32,
    pub stream_id: StreamId,
    pub buffer: Vec<u8>,
    original_size: usize,
    creation_order: u64,
}

impl Record {
    pub fn payload(&self) -> &[u8] {
        &self.buffer
    }

    pub fn original_size(&self) -> usize {
        self.original_size
    }
}

pub const DEFAULT_MAX_CACHE_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_OVER_ALLOC_BYTES: usize = 0;
pub const DEFAULT_OVER_ALLOC_PERCENT: usize = 0;

/// Record factory with buffer recycling.
///
/// Created records queue up sorted by timestamp until collected for writing;
/// written records come back through `recycle` and their buffers are reused
/// for later records, most recently recycled first. Over-allocation padding
/// is applied once, when a buffer is first allocated, so repeated recycling
/// never grows a buffer past its original budget. Recycling never evicts;
/// the cache is trimmed back to its limit by `purge_cache_to_limit`, which
/// the write pipeline runs once per pass.
pub struct RecordAllocator {
    max_cache_bytes: usize,
    over_alloc_bytes: usize,
    over_alloc_percent: usize,
    state: Mutex<AllocatorState>,
}

#[derive(Default)]
struct AllocatorState {
    // Sorted by (timestamp, creation_order), oldest at the front.
    pending: VecDeque<Record>,
    // Most recently recycled at the front.
    cache: VecDeque<Record>,
    cache_bytes: usize,
    next_order: u64,
}

impl RecordAllocator {
    pub fn new() -> Self {
        Self::with_config(
            DEFAULT_MAX_CACHE_BYTES,
            DEFAULT_OVER_ALLOC_BYTES,
            DEFAULT_OVER_ALLOC_PERCENT,
        )
    }

    pub fn with_config(
        max_cache_bytes: usize,
        over_alloc_bytes: usize,
        over_alloc_percent: usize,
    ) -> Self {
        Self {
            max_cache_bytes,
            over_alloc_bytes,
            over_alloc_percent,
            state: Mutex::new(AllocatorState::default()),
        }
    }

    /// Creates a record from `source` and queues it, reusing a cached buffer
    /// when one is large enough. The payload is serialized outside the lock.
    pub fn create_record(
        &self,
        timestamp: f64,
        stream_id: StreamId,
        kind: RecordKind,
        format_version: u32,
        source: &dyn DataSource,
    ) -> Result<()> {
        let size = source.required_size();
        let mut record = self.claim_buffer(size, timestamp, stream_id, kind, format_version);
        record.buffer.resize(size, 0);
        if let Err(err) = source.write_into(&mut record.buffer) {
            self.recycle(record);
            return Err(err);
        }
        let mut state = self.state.lock().expect("allocator lock");
        let pos = state
            .pending
            .partition_point(|queued| queued.timestamp <= record.timestamp);
        state.pending.insert(pos, record);
        Ok(())
    }

    fn claim_buffer(
        &self,
        size: usize,
        timestamp: f64,
        stream_id: StreamId,
        kind: RecordKind,
        format_version: u32,
    ) -> Record {
        let mut state = self.state.lock().expect("allocator lock");
        state.next_order += 1;
        let creation_order = state.next_order;
        let reusable = state
            .cache
            .iter()
            .position(|cached| cached.buffer.capacity() >= size);
        let (buffer, original_size) = match reusable {
            Some(pos) => {
                let cached = state.cache.remove(pos).expect("cache index");
                state.cache_bytes -= cached.buffer.capacity();
                (cached.buffer, cached.original_size)
            }
            None => {
                let capacity =
                    size + self.over_alloc_bytes + size * self.over_alloc_percent / 100;
                (Vec::with_capacity(capacity), size)
            }
        };
        Record {
            timestamp,
            kind,
            format_version,
            stream_id,
            buffer,
            original_size,
            creation_order,
        }
    }

    /// Moves every pending record with `timestamp <= max_timestamp` into
    /// `out`, oldest first. Calling again with the same cutoff collects
    /// nothing further.
    pub fn collect_old_records(&self, max_timestamp: f64, out: &mut Vec<Record>) {
        let mut state = self.state.lock().expect("allocator lock");
        while let Some(record) = state.pending.front() {
            if record.timestamp > max_timestamp {
                break;
            }
            out.push(state.pending.pop_front().expect("front exists"));
        }
    }

    /// Returns a written record's buffer to the reuse cache. The buffer is
    /// cleared but keeps its capacity. Eviction is deferred: the cache may
    /// sit over its byte limit until the next `purge_cache_to_limit` call.
    pub fn recycle(&self, mut record: Record) {
        record.buffer.clear();
        let capacity = record.buffer.capacity();
        if capacity == 0 || capacity > self.max_cache_bytes {
            return;
        }
        let mut state = self.state.lock().expect("allocator lock");
        state.cache_bytes += capacity;
        state.cache.push_front(record);
    }

    /// Drops cached buffers, oldest first, until the cache fits its
    /// configured byte limit again.
    pub fn purge_cache_to_limit(&self) {
        self.purge_cache(self.max_cache_bytes);
    }

    /// Drops cached buffers, oldest first, until at most `target_bytes`
    /// remain cached.
    pub fn purge_cache(&self, target_bytes: usize) {
        let mut state = self.state.lock().expect("allocator lock");
        while state.cache_bytes > target_bytes {
            let evicted = state.cache.pop_back().expect("cache non-empty");
            state.cache_bytes -= evicted.buffer.capacity();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().expect("allocator lock").pending.len()
    }

    pub fn cache_bytes(&self) -> usize {
        self.state.lock().expect("allocator lock").cache_bytes
    }
}

impl Default for RecordAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn data_record(allocator: &RecordAllocator, timestamp: f64, payload: &[u8]) {
        allocator
            .create_record(timestamp, StreamId::new(100, 1), RecordKind::Data, 1, &payload)
            .expect("create");
    }

    #[test]
    fn collect_is_ordered_and_idempotent() {
        let allocator = RecordAllocator::new();
        data_record(&allocator, 3.0, b"c");
        data_record(&allocator, 1.0, b"a");
        data_record(&allocator, 2.0, b"b");

        let mut collected = Vec::new();
        allocator.collect_old_records(2.0, &mut collected);
        let stamps: Vec<f64> = collected.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![1.0, 2.0]);

        let mut again = Vec::new();
        allocator.collect_old_records(2.0, &mut again);
        assert!(again.is_empty());
        assert_eq!(allocator.pending_count(), 1);
    }

    #[test]
    fn equal_timestamps_keep_creation_order() {
        let allocator = RecordAllocator::new();
        data_record(&allocator, 1.0, b"first");
        data_record(&allocator, 1.0, b"second");
        let mut collected = Vec::new();
        allocator.collect_old_records(1.0, &mut collected);
        assert_eq!(collected[0].payload(), b"first");
        assert_eq!(collected[1].payload(), b"second");
    }

    #[test]
    fn recycled_buffer_is_reused() {
        let allocator = RecordAllocator::with_config(1024, 0, 50);
        data_record(&allocator, 1.0, &[0u8; 100]);
        let mut collected = Vec::new();
        allocator.collect_old_records(1.0, &mut collected);
        let record = collected.pop().expect("one record");
        // 100 bytes + 50% over-allocation.
        assert!(record.buffer.capacity() >= 150);
        allocator.recycle(record);
        assert!(allocator.cache_bytes() >= 150);

        // Fits within the recycled capacity, so no new allocation happens
        // and the over-allocation budget is not re-applied.
        data_record(&allocator, 2.0, &[0u8; 140]);
        assert_eq!(allocator.cache_bytes(), 0);
        let mut collected = Vec::new();
        allocator.collect_old_records(2.0, &mut collected);
        assert_eq!(collected[0].original_size(), 100);
    }

    #[test]
    fn purge_drops_oldest_cached_buffers() {
        let allocator = RecordAllocator::with_config(250, 0, 0);
        for idx in 0..3 {
            data_record(&allocator, idx as f64, &[0u8; 100]);
        }
        let mut collected = Vec::new();
        allocator.collect_old_records(10.0, &mut collected);
        for record in collected {
            allocator.recycle(record);
        }
        // Recycling defers eviction, so the cache sits over its limit
        // until purged back down.
        assert!(allocator.cache_bytes() >= 300);
        allocator.purge_cache_to_limit();
        assert!(allocator.cache_bytes() <= 250);
        assert!(allocator.cache_bytes() > 0);
        allocator.purge_cache(0);
        assert_eq!(allocator.cache_bytes(), 0);
    }

    #[test]
    fn oversized_request_leaves_the_cache_alone() {
        let allocator = RecordAllocator::with_config(1024, 0, 0);
        data_record(&allocator, 1.0, &[0u8; 100]);
        let mut collected = Vec::new();
        allocator.collect_old_records(1.0, &mut collected);
        allocator.recycle(collected.pop().expect("one record"));
        let cached = allocator.cache_bytes();
        assert!(cached >= 100);

        // Too big for the cached buffer: a fresh allocation is made and
        // the cached buffer stays where it is.
        data_record(&allocator, 2.0, &[0u8; 400]);
        assert_eq!(allocator.cache_bytes(), cached);
        let mut collected = Vec::new();
        allocator.collect_old_records(2.0, &mut collected);
        assert_eq!(collected[0].original_size(), 400);
        assert!(collected[0].buffer.capacity() >= 400);
    }

    #[test]
    fn concurrent_producers_do_not_lose_records() {
        let allocator = Arc::new(RecordAllocator::new());
        let mut producers = Vec::new();
        for thread in 0..4u64 {
            let allocator = Arc::clone(&allocator);
            producers.push(std::thread::spawn(move || {
                for idx in 0..50u64 {
                    let timestamp = (thread * 50 + idx) as f64;
                    let payload = vec![thread as u8; 32];
                    allocator
                        .create_record(
                            timestamp,
                            StreamId::new(100, thread as u16),
                            RecordKind::Data,
                            1,
                            &payload,
                        )
                        .expect("create");
                }
            }));
        }
        for producer in producers {
            producer.join().expect("producer");
        }

        let mut collected = Vec::new();
        allocator.collect_old_records(f64::MAX, &mut collected);
        assert_eq!(collected.len(), 200);
        let stamps: Vec<f64> = collected.iter().map(|r| r.timestamp).collect();
        assert!(stamps.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}
