use thiserror::Error;

/// Errors that can occur when reading from a remote object.
#[derive(Debug, Error)]
pub enum Error {
    /// The container or the object does not exist.
    #[error("remote object not found: {locator}")]
    NotFound {
        /// The locator that could not be resolved, as given by the caller.
        locator: String,
    },

    /// The URI could not be parsed into a container and a path.
    #[error("invalid remote locator: {0}")]
    InvalidLocator(String),

    /// No backend is registered for the URI scheme.
    #[error("unsupported remote scheme: {0}")]
    UnsupportedScheme(String),

    /// A byte range with inverted bounds.
    #[error("invalid byte range: start {start} is past end {end}")]
    InvalidRange { start: u64, end: u64 },

    /// Error from the HTTP client.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error from the object store client.
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A backend failure that carries no richer error type.
    #[error("backend error: {0}")]
    Backend(String),
}

impl Error {
    pub(crate) fn not_found(locator: impl ToString) -> Self {
        Error::NotFound {
            locator: locator.to_string(),
        }
    }

    /// Whether this is the uniform not-found signal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, Error>;
