use crate::compress::Compression;
use crate::record::RecordKind;
use crate::stream::StreamId;
use crate::{Error, Result};

pub const FILE_MAGIC: u32 = 0x4556_5254; // "TRVE"
pub const FILE_VERSION: u32 = 1;
pub const FILE_HEADER_SIZE: usize = 64;
pub const RECORD_HEADER_SIZE: usize = 32;

/// Fixed-size header at offset 0 of chunk 0.
///
/// `index_offset` is zero while the file is being written and patched in
/// place when the writer finalizes; a zero offset on read means the index
/// must be rebuilt by scanning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileHeader {
    pub version: u32,
    pub flags: u32,
    pub first_record_offset: u64,
    pub index_offset: u64,
    pub index_count: u32,
}

impl FileHeader {
    pub fn new() -> Self {
        Self {
            version: FILE_VERSION,
            flags: 0,
            first_record_offset: FILE_HEADER_SIZE as u64,
            index_offset: 0,
            index_count: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&FILE_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&(FILE_HEADER_SIZE as u32).to_le_bytes());
        buf[12..16].copy_from_slice(&self.flags.to_le_bytes());
        buf[16..24].copy_from_slice(&self.first_record_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&self.index_offset.to_le_bytes());
        buf[32..36].copy_from_slice(&self.index_count.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; FILE_HEADER_SIZE]) -> Result<Self> {
        let magic = u32::from_le_bytes(bytes[0..4].try_into().expect("slice length"));
        if magic != FILE_MAGIC {
            return Err(Error::InvalidData("file magic mismatch"));
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().expect("slice length"));
        if version != FILE_VERSION {
            return Err(Error::InvalidData("unsupported file version"));
        }
        let header_size = u32::from_le_bytes(bytes[8..12].try_into().expect("slice length"));
        if header_size as usize != FILE_HEADER_SIZE {
            return Err(Error::InvalidData("unexpected file header size"));
        }
        Ok(Self {
            version,
            flags: u32::from_le_bytes(bytes[12..16].try_into().expect("slice length")),
            first_record_offset: u64::from_le_bytes(
                bytes[16..24].try_into().expect("slice length"),
            ),
            index_offset: u64::from_le_bytes(bytes[24..32].try_into().expect("slice length")),
            index_count: u32::from_le_bytes(bytes[32..36].try_into().expect("slice length")),
        })
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-record on-disk header, preceding the (possibly compressed) payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordHeader {
    pub stored_len: u32,
    pub uncompressed_len: u32,
    pub timestamp: f64,
    pub format_version: u32,
    pub stream_id: StreamId,
    pub kind: RecordKind,
    pub compression: Compression,
    pub checksum: u32,
}

impl RecordHeader {
    pub fn to_bytes(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.stored_len.to_le_bytes());
        buf[4..8].copy_from_slice(&self.uncompressed_len.to_le_bytes());
        buf[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[16..20].copy_from_slice(&self.format_version.to_le_bytes());
        buf[20..22].copy_from_slice(&self.stream_id.type_id.to_le_bytes());
        buf[22..24].copy_from_slice(&self.stream_id.instance.to_le_bytes());
        buf[24] = self.kind as u8;
        buf[25] = self.compression as u8;
        buf[28..32].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; RECORD_HEADER_SIZE]) -> Result<Self> {
        Ok(Self {
            stored_len: u32::from_le_bytes(bytes[0..4].try_into().expect("slice length")),
            uncompressed_len: u32::from_le_bytes(bytes[4..8].try_into().expect("slice length")),
            timestamp: f64::from_le_bytes(bytes[8..16].try_into().expect("slice length")),
            format_version: u32::from_le_bytes(bytes[16..20].try_into().expect("slice length")),
            stream_id: StreamId::new(
                u16::from_le_bytes(bytes[20..22].try_into().expect("slice length")),
                u16::from_le_bytes(bytes[22..24].try_into().expect("slice length")),
            ),
            kind: RecordKind::from_u8(bytes[24])?,
            compression: Compression::from_u8(bytes[25])?,
            checksum: u32::from_le_bytes(bytes[28..32].try_into().expect("slice length")),
        })
    }

    pub fn crc32(payload: &[u8]) -> u32 {
        use crc32fast::Hasher;
        let mut hasher = Hasher::new();
        hasher.update(payload);
        hasher.finalize()
    }

    pub fn validate_crc(&self, payload: &[u8]) -> Result<()> {
        if Self::crc32(payload) == self.checksum {
            Ok(())
        } else {
            Err(Error::InvalidData("record checksum mismatch"))
        }
    }
}
