use crate::{Error, Result};

/// Compression marker stored in each record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None = 0,
    Zstd = 1,
}

impl Compression {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Zstd),
            _ => Err(Error::InvalidData("unknown compression marker")),
        }
    }
}

pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Payloads smaller than this are not worth a compression attempt.
pub const MIN_COMPRESSION_SIZE: usize = 64;

pub fn compress(payload: &[u8], level: i32) -> Result<Vec<u8>> {
    zstd::stream::encode_all(payload, level)
        .map_err(|err| Error::Compression(format!("zstd encode: {err}")))
}

/// Decompresses `payload`, checking the result against the size recorded at
/// write time. A mismatch is corruption, not a recoverable condition.
pub fn decompress(payload: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let decompressed = zstd::stream::decode_all(payload)
        .map_err(|err| Error::Compression(format!("zstd decode: {err}")))?;
    if decompressed.len() != expected_size {
        return Err(Error::Compression(format!(
            "decompressed size mismatch: expected {expected_size} got {}",
            decompressed.len()
        )));
    }
    Ok(decompressed)
}
