//! WebDAV server implementation using hyper.
//!
//! The listener is bound by the caller so the mount server can report the
//! final address before any request is served.

use super::ZipDavFs;
use dav_server::{fakels::FakeLs, DavHandler};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, error, info};
use std::convert::Infallible;
use std::io;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Build the request handler for `fs`.
pub fn handler(fs: ZipDavFs) -> DavHandler {
    DavHandler::builder()
        .filesystem(Box::new(fs))
        .locksystem(FakeLs::new()) // Fake locks for macOS/Windows compatibility
        .build_handler()
}

/// Serve `fs` on an already-bound listener until `shutdown` fires.
///
/// Each connection runs on its own task. Connections still open when the
/// token fires are left to finish on their own.
pub async fn serve(listener: TcpListener, fs: ZipDavFs, shutdown: CancellationToken) -> io::Result<()> {
    let dav_server = handler(fs);
    let local_addr = listener.local_addr()?;
    info!("WebDAV server listening on http://{}", local_addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, remote_addr)) => {
                        debug!("Connection from {}", remote_addr);
                        let dav_server = dav_server.clone();
                        let io = TokioIo::new(stream);

                        tokio::spawn(async move {
                            if let Err(err) = http1::Builder::new()
                                .serve_connection(
                                    io,
                                    service_fn(move |req| {
                                        let dav_server = dav_server.clone();
                                        async move {
                                            Ok::<_, Infallible>(dav_server.handle(req).await)
                                        }
                                    }),
                                )
                                .await
                            {
                                error!("Connection error: {:?}", err);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {:?}", e);
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!("WebDAV server shutting down");
                break;
            }
        }
    }
    Ok(())
}
