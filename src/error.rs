//! Error types for the tiered cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing a cache tier
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not start with the cache log magic bytes
    #[error("Not a cache log file: bad magic bytes {found:02x?}")]
    InvalidMagic { found: [u8; 4] },

    /// A record could not be parsed
    #[error("Corrupt record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: String },

    /// Key or value does not fit the 31-bit length field
    #[error("{field} is {len} bytes, exceeding the 31-bit record length limit")]
    OversizedField { field: &'static str, len: usize },

    /// A value encoded to zero bytes, which would read back as a tombstone
    #[error("Value encoded to zero bytes and cannot be distinguished from a tombstone")]
    EmptyValue,

    /// Serialization failure
    #[error("{format} codec failed: {reason}")]
    Codec { format: &'static str, reason: String },

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    /// Unsigned value uses the top bit, which the binary format reserves
    #[error("Value {0:#x} does not fit in 63 bits")]
    ValueOutOfRange(u64),

    /// Configuration error
    #[error("Configuration error: {0}")]
    InvalidConfig(String),
}
