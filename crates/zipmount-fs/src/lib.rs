//! # zipmount-fs
//!
//! Read-only file system views of remote ZIP archives.
//!
//! This crate provides:
//! - [`Tree`]: the archive hierarchy, built from the central directory with
//!   a few range reads
//! - [`LocalCache`]: content-addressed local copies of decoded entries
//! - **WebDAV export** (with the `webdav` feature)
//! - **NFSv3 export** (with the `nfs` feature)
//! - A mount server tying both together (with the `server` feature)
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use zipmount_fs::{LocalCache, Tree};
//! use zipmount_remote::{open_store, RemoteLocator};
//!
//! let locator = RemoteLocator::parse("s3://bucket/photos.zip")?;
//! let store = open_store(&locator)?;
//! let cache = Arc::new(LocalCache::open("/var/cache/zipmount")?);
//! let tree = Tree::build(locator, store, cache).await?;
//!
//! for entry in tree.list_children("/")? {
//!     println!("{} ({} bytes)", entry.path, entry.size);
//! }
//! let reader = tree.open("/2024/beach.jpg").await?;
//! let head = reader.read_at(0, 4096)?;
//! ```
//!
//! ## Mounting
//!
//! ```ignore
//! use tokio_util::sync::CancellationToken;
//! use zipmount_fs::server::{run, MountServerConfig};
//!
//! let config = MountServerConfig {
//!     protocol: "webdav".to_string(),
//!     ..MountServerConfig::new("s3://bucket/photos.zip")
//! };
//! run(config, CancellationToken::new()).await?;
//! ```

mod cache;
mod error;
pub mod tree;

#[cfg(feature = "webdav")]
pub mod webdav;

#[cfg(feature = "nfs")]
pub mod nfs;

#[cfg(feature = "server")]
pub mod server;

pub use cache::{CacheKey, LocalCache};
pub use error::{Error, Result, ServerError};
pub use tree::{normalize_path, ArchiveEntry, EntryReader, Tree};

// Re-export the remote layer for convenience
pub use zipmount_remote::{RangeStore, RemoteLocator};
