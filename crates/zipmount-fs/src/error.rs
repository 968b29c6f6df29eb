use thiserror::Error;

/// Errors from the archive tree and the local cache.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("is a directory: {0}")]
    IsDirectory(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// The entry exists but cannot be decoded (encrypted, or an
    /// unsupported compression method).
    #[error("cannot read {path}: {reason}")]
    Unsupported { path: String, reason: String },

    #[error("remote error: {0}")]
    Remote(#[from] zipmount_remote::Error),

    #[error("archive error: {0}")]
    Format(#[from] zipmount_format::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// True for a missing tree entry and for a missing remote object.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Remote(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Result type for zipmount-fs operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the mount server lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build archive index: {0}")]
    Build(#[source] Error),

    #[error("server failed: {0}")]
    Serve(String),

    #[error("callback to {addr} failed: {source}")]
    Callback {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove cache directory {path}: {source}")]
    Cleanup {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled before serving")]
    Cancelled,
}
