// Undo payload compressors

use crate::error::{AtError, Result};

pub const NONE: &str = "none";
pub const ZSTD: &str = "zstd";

const ZSTD_LEVEL: i32 = 3;

/// Compresses encoded undo payloads
pub trait UndoLogCompressor: Send + Sync {
    /// Name recorded in the undo row's context
    fn name(&self) -> &str;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through
#[derive(Debug, Default)]
pub struct NoneCompressor;

impl UndoLogCompressor for NoneCompressor {
    fn name(&self) -> &str {
        NONE
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

#[derive(Debug, Default)]
pub struct ZstdCompressor;

impl UndoLogCompressor for ZstdCompressor {
    fn name(&self) -> &str {
        ZSTD
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::stream::encode_all(data, ZSTD_LEVEL).map_err(|e| AtError::Codec(format!("zstd compress: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::stream::decode_all(data).map_err(|e| AtError::Codec(format!("zstd decompress: {}", e)))
    }
}
