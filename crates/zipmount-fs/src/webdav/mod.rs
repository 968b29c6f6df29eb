//! WebDAV adapter for mounted archives.
//!
//! Exposes a [`Tree`](crate::Tree) read-only over WebDAV (RFC 4918), so the
//! archive can be mounted from Finder, Windows Explorer, `davfs2`, or any
//! WebDAV client.
//!
//! # Example
//!
//! ```ignore
//! use zipmount_fs::webdav::{serve, ZipDavFs};
//! use tokio_util::sync::CancellationToken;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//! serve(listener, ZipDavFs::new(tree), CancellationToken::new()).await?;
//! ```

mod filesystem;
mod server;

pub use filesystem::ZipDavFs;
pub use server::{handler, serve};
