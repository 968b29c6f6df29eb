use thiserror::Error;

/// Errors that can occur when parsing or decoding a ZIP archive.
#[derive(Debug, Error)]
pub enum Error {
    /// An archive structure did not match what the format requires.
    #[error("malformed archive: {0}")]
    Malformed(String),

    /// A valid archive feature that this crate does not decode.
    #[error("unsupported archive feature: {0}")]
    Unsupported(String),

    /// The decoded payload length differs from the declared size.
    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    /// The decoded payload failed its CRC-32 check.
    #[error("payload checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn malformed(what: impl Into<String>) -> Self {
        Error::Malformed(what.into())
    }
}

/// Result type for zipmount-format operations.
pub type Result<T> = std::result::Result<T, Error>;
