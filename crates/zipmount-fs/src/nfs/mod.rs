//! NFSv3 adapter for mounted archives.
//!
//! The wire protocol is handled by `nfsserve`; this module maps its
//! handle-based file system interface onto a [`Tree`](crate::Tree).
//!
//! ```bash
//! mount -t nfs -o nolocks,vers=3,tcp,port=PORT,mountport=PORT,soft 127.0.0.1:/ /mnt/archive
//! ```

mod handler;
mod handles;

pub use handler::{NfsOptions, ZipNfs};
pub use handles::{
    HandleCache, HandlePin, DEFAULT_HANDLE_CACHE_SIZE, MIN_HANDLE_CACHE_SIZE, ROOT_HANDLE,
};

use log::info;
use nfsserve::tcp::{NFSTcp, NFSTcpListener};
use std::io;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

/// Bind the NFS listener for `fs` on `addr`.
///
/// `nfsserve` binds its own socket, so `addr` must carry a concrete port;
/// the mount server reserves one before building the index.
pub async fn bind(addr: SocketAddr, fs: ZipNfs) -> io::Result<NFSTcpListener<ZipNfs>> {
    let listener = NFSTcpListener::bind(&addr.to_string(), fs).await?;
    info!(
        "NFS server listening on {}:{}",
        listener.get_listen_ip(),
        listener.get_listen_port()
    );
    Ok(listener)
}

/// Serve a bound listener until `shutdown` fires.
pub async fn serve(listener: NFSTcpListener<ZipNfs>, shutdown: CancellationToken) -> io::Result<()> {
    tokio::select! {
        result = listener.handle_forever() => result,
        _ = shutdown.cancelled() => {
            info!("NFS server shutting down");
            Ok(())
        }
    }
}
