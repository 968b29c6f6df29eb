//! # zipmount-remote
//!
//! Byte-range access to remote objects.
//!
//! This crate provides:
//! - [`RemoteLocator`]: a parsed `scheme://container/path` reference
//! - [`ByteRange`]: the four range forms a backend can be asked for
//! - [`RangeStore`]: the backend contract (`download`, `size_of`)
//! - [`RouteCache`]: per-container route resolution, at most once per container
//! - Backends for `s3://`, `http(s)://`, `file://` and `mem://` locators
//!
//! Every backend reports a missing container or object as
//! [`Error::NotFound`]; other failures are passed through.
//!
//! ## Example
//!
//! ```ignore
//! use zipmount_remote::{open_store, read_range, ByteRange, RemoteLocator};
//!
//! let locator = RemoteLocator::parse("s3://bucket/archive.zip")?;
//! let store = open_store(&locator)?;
//! let size = store.size_of(&locator).await?;
//! let tail = read_range(store.as_ref(), &locator, ByteRange::Suffix(22)).await?;
//! ```

mod error;
mod file;
mod http;
mod locator;
mod memory;
mod range;
mod route;
mod s3;
mod store;

pub use error::{Error, Result};
pub use file::LocalFileStore;
pub use http::HttpRangeStore;
pub use locator::RemoteLocator;
pub use memory::MemoryRangeStore;
pub use range::ByteRange;
pub use route::RouteCache;
pub use s3::{S3Config, S3RangeStore, DEFAULT_REGION};
pub use store::{read_range, ByteStream, RangeStore};

use std::sync::Arc;

/// Build the backend for a locator's scheme.
///
/// `mem://` is not served here: an in-memory store only makes sense when the
/// caller holds on to it, so construct [`MemoryRangeStore`] directly.
pub fn open_store(locator: &RemoteLocator) -> Result<Arc<dyn RangeStore>> {
    match locator.scheme() {
        "s3" => Ok(Arc::new(S3RangeStore::new(S3Config::from_env())?)),
        "http" | "https" => Ok(Arc::new(HttpRangeStore::new()?)),
        "file" => Ok(Arc::new(LocalFileStore::new())),
        other => Err(Error::UnsupportedScheme(other.to_string())),
    }
}
