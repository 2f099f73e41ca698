//! Payload compression for file-backed caches.
//!
//! A log file is either compressed or not for its whole lifetime (bit 0 of the header
//! flags). When it is, every encoded key and value is passed through LZ4 block
//! compression with the uncompressed size prepended.

use crate::error::{Error, Result};

/// Compression applied to record payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionAlgorithm {
    /// Payloads are stored as encoded
    #[default]
    None,
    /// LZ4 block compression
    Lz4,
}

impl CompressionAlgorithm {
    /// Algorithm selected by the header's compress flag
    pub fn from_flag(compress: bool) -> Self {
        if compress {
            CompressionAlgorithm::Lz4
        } else {
            CompressionAlgorithm::None
        }
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    pub fn compressor(&self) -> &'static dyn Compressor {
        match self {
            CompressionAlgorithm::None => &NoopCompressor,
            CompressionAlgorithm::Lz4 => &Lz4Compressor,
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    fn algorithm(&self) -> CompressionAlgorithm;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through compressor (no compression)
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// LZ4 block compressor
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(data, None, true).map_err(|e| Error::CompressionFailed {
            algorithm: self.algorithm().to_string(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: self.algorithm().to_string(),
            reason: e.to_string(),
        })
    }
}
