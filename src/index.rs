use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use log::{debug, warn};

use crate::backend::StorageBackend;
use crate::record::RecordKind;
use crate::stream::StreamId;
use crate::{Error, Result};

pub const INDEX_ENTRY_SIZE: usize = 32;

/// One index entry: where a record lives, how long it is on disk
/// (header included), and what it is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordInfo {
    pub timestamp: f64,
    pub offset: u64,
    pub length: u32,
    pub format_version: u32,
    pub stream_id: StreamId,
    pub kind: RecordKind,
}

impl RecordInfo {
    pub fn to_bytes(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        buf[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..16].copy_from_slice(&self.offset.to_le_bytes());
        buf[16..20].copy_from_slice(&self.length.to_le_bytes());
        buf[20..24].copy_from_slice(&self.format_version.to_le_bytes());
        buf[24..26].copy_from_slice(&self.stream_id.type_id.to_le_bytes());
        buf[26..28].copy_from_slice(&self.stream_id.instance.to_le_bytes());
        buf[28] = self.kind as u8;
        buf
    }

    pub fn from_bytes(bytes: &[u8; INDEX_ENTRY_SIZE]) -> Result<Self> {
        Ok(Self {
            timestamp: f64::from_le_bytes(bytes[0..8].try_into().expect("slice length")),
            offset: u64::from_le_bytes(bytes[8..16].try_into().expect("slice length")),
            length: u32::from_le_bytes(bytes[16..20].try_into().expect("slice length")),
            format_version: u32::from_le_bytes(bytes[20..24].try_into().expect("slice length")),
            stream_id: StreamId::new(
                u16::from_le_bytes(bytes[24..26].try_into().expect("slice length")),
                u16::from_le_bytes(bytes[26..28].try_into().expect("slice length")),
            ),
            kind: RecordKind::from_u8(bytes[28])?,
        })
    }
}

/// Sorted record index of one file, kept ordered by timestamp, then stream,
/// then kind.
#[derive(Debug, Default)]
pub struct FileIndex {
    records: Vec<RecordInfo>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(mut records: Vec<RecordInfo>) -> Self {
        sort_records(&mut records);
        Self { records }
    }

    pub fn add(&mut self, info: RecordInfo) {
        self.records.push(info);
    }

    pub fn sort(&mut self) {
        sort_records(&mut self.records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[RecordInfo] {
        &self.records
    }

    pub fn stream_ids(&self) -> BTreeSet<StreamId> {
        self.records.iter().map(|info| info.stream_id).collect()
    }

    pub fn time_range(&self) -> Option<(f64, f64)> {
        let first = self.records.first()?;
        let last = self.records.last()?;
        Some((first.timestamp, last.timestamp))
    }

    /// Appends the serialized index at the backend's current position.
    pub fn write_to(&self, backend: &mut dyn StorageBackend) -> Result<()> {
        let mut data = Vec::with_capacity(self.records.len() * INDEX_ENTRY_SIZE);
        for info in &self.records {
            data.extend_from_slice(&info.to_bytes());
        }
        backend.write(&data)
    }

    /// Reads `count` entries at the backend's current position.
    pub fn read_from(backend: &mut dyn StorageBackend, count: usize) -> Result<Self> {
        let mut data = vec![0u8; count * INDEX_ENTRY_SIZE];
        backend.read(&mut data)?;
        let mut records = Vec::with_capacity(count);
        for entry in data.chunks_exact(INDEX_ENTRY_SIZE) {
            let bytes: &[u8; INDEX_ENTRY_SIZE] = entry.try_into().expect("slice length");
            records.push(RecordInfo::from_bytes(bytes)?);
        }
        Ok(Self::from_records(records))
    }
}

fn sort_records(records: &mut [RecordInfo]) {
    records.sort_by(|a, b| {
        a.timestamp
            .total_cmp(&b.timestamp)
            .then_with(|| a.stream_id.cmp(&b.stream_id))
            .then_with(|| (a.kind as u8).cmp(&(b.kind as u8)))
    });
}

const CACHE_MAGIC: u32 = 0x4956_5254; // "TRVI"
const CACHE_VERSION: u32 = 1;
const CACHE_HEADER_SIZE: usize = 32;

/// Side-cache of a file's index, stored next to the file so later opens
/// skip the rebuild scan. Keyed by the file's spec signature and total
/// size; either changing invalidates the cache.
pub fn save_index_cache(
    path: &Path,
    signature: u32,
    file_size: u64,
    index: &FileIndex,
) -> Result<()> {
    let mut body = Vec::with_capacity(index.len() * INDEX_ENTRY_SIZE);
    for info in index.records() {
        body.extend_from_slice(&info.to_bytes());
    }
    let mut header = [0u8; CACHE_HEADER_SIZE];
    header[0..4].copy_from_slice(&CACHE_MAGIC.to_le_bytes());
    header[4..8].copy_from_slice(&CACHE_VERSION.to_le_bytes());
    header[8..12].copy_from_slice(&signature.to_le_bytes());
    header[12..16].copy_from_slice(&(index.len() as u32).to_le_bytes());
    header[16..24].copy_from_slice(&file_size.to_le_bytes());
    header[24..28].copy_from_slice(&crc32(&body).to_le_bytes());

    // Written to a temp file first, so a crash never leaves a torn cache.
    let tmp_path = path.with_extension("idx.tmp");
    {
        let mut tmp = fs::File::create(&tmp_path)?;
        tmp.write_all(&header)?;
        tmp.write_all(&body)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    debug!("saved index cache {} ({} entries)", path.display(), index.len());
    Ok(())
}

/// Loads a side-cached index, verifying it matches the file it describes.
pub fn load_index_cache(path: &Path, signature: u32, file_size: u64) -> Result<FileIndex> {
    let data = fs::read(path).map_err(|err| crate::error::from_path_io(err, path))?;
    if data.len() < CACHE_HEADER_SIZE {
        return Err(Error::InvalidData("index cache too short"));
    }
    let magic = u32::from_le_bytes(data[0..4].try_into().expect("slice length"));
    let version = u32::from_le_bytes(data[4..8].try_into().expect("slice length"));
    if magic != CACHE_MAGIC || version != CACHE_VERSION {
        return Err(Error::InvalidData("index cache magic mismatch"));
    }
    let cached_signature = u32::from_le_bytes(data[8..12].try_into().expect("slice length"));
    let count = u32::from_le_bytes(data[12..16].try_into().expect("slice length")) as usize;
    let cached_size = u64::from_le_bytes(data[16..24].try_into().expect("slice length"));
    let checksum = u32::from_le_bytes(data[24..28].try_into().expect("slice length"));
    if cached_signature != signature || cached_size != file_size {
        return Err(Error::InvalidData("index cache is stale"));
    }
    let body = &data[CACHE_HEADER_SIZE..];
    if body.len() != count * INDEX_ENTRY_SIZE || crc32(body) != checksum {
        warn!("index cache {} is corrupt, ignoring", path.display());
        return Err(Error::InvalidData("index cache checksum mismatch"));
    }
    let mut records = Vec::with_capacity(count);
    for entry in body.chunks_exact(INDEX_ENTRY_SIZE) {
        let bytes: &[u8; INDEX_ENTRY_SIZE] = entry.try_into().expect("slice length");
        records.push(RecordInfo::from_bytes(bytes)?);
    }
    Ok(FileIndex::from_records(records))
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(timestamp: f64, offset: u64, type_id: u16) -> RecordInfo {
        RecordInfo {
            timestamp,
            offset,
            length: 132,
            format_version: 1,
            stream_id: StreamId::new(type_id, 1),
            kind: RecordKind::Data,
        }
    }

    #[test]
    fn entries_sort_by_time_then_stream() {
        let index = FileIndex::from_records(vec![
            info(2.0, 300, 100),
            info(1.0, 100, 101),
            info(1.0, 200, 100),
        ]);
        let offsets: Vec<u64> = index.records().iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![200, 100, 300]);
    }

    #[test]
    fn entry_round_trip() {
        let entry = info(3.5, 12345, 102);
        let parsed = RecordInfo::from_bytes(&entry.to_bytes()).expect("parse");
        assert_eq!(parsed, entry);
    }

    #[test]
    fn cache_round_trip_and_staleness() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rec.trv.idx");
        let index = FileIndex::from_records(vec![info(1.0, 64, 100), info(2.0, 128, 100)]);
        save_index_cache(&path, 0xABCD, 500, &index).expect("save");

        let loaded = load_index_cache(&path, 0xABCD, 500).expect("load");
        assert_eq!(loaded.records(), index.records());

        // Signature or size mismatch must invalidate the cache.
        assert!(load_index_cache(&path, 0xABCE, 500).is_err());
        assert!(load_index_cache(&path, 0xABCD, 501).is_err());
    }
}
