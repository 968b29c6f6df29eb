//! Mount server: builds the archive tree and serves it over one protocol.
//!
//! A server walks `Initializing → BuildingIndex → Serving → Draining →
//! Stopped`, logging each transition. The startup outcome is reported once
//! through the optional [`Callback`].

mod callback;
mod config;

pub use callback::{Callback, CallbackStatus};
pub use config::{MountServerConfig, Protocol, CACHE_DIR_PREFIX, DEFAULT_LISTEN_ADDR};

use crate::cache::LocalCache;
use crate::error::ServerError;
use crate::nfs::{self, ZipNfs};
use crate::tree::Tree;
use crate::webdav::{self, ZipDavFs};
use config::CacheDir;
use log::{error, info, warn};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zipmount_remote::{open_store, RangeStore, RemoteLocator};

/// Lifecycle state of a mount server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Initializing,
    BuildingIndex,
    Serving,
    Draining,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Initializing => "initializing",
            ServerState::BuildingIndex => "building index",
            ServerState::Serving => "serving",
            ServerState::Draining => "draining",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

struct Lifecycle {
    state: ServerState,
}

impl Lifecycle {
    fn new() -> Self {
        info!("mount server {}", ServerState::Initializing);
        Self {
            state: ServerState::Initializing,
        }
    }

    fn enter(&mut self, next: ServerState) {
        info!("mount server {} -> {}", self.state, next);
        self.state = next;
    }
}

/// A started adapter.
struct Running {
    addr: SocketAddr,
    protocol: Protocol,
    task: JoinHandle<io::Result<()>>,
    stop: CancellationToken,
}

/// Run a mount server until `shutdown` fires or the adapter stops.
///
/// The archive store is chosen from the locator's scheme.
pub async fn run(config: MountServerConfig, shutdown: CancellationToken) -> Result<(), ServerError> {
    run_with_store(config, None, shutdown).await
}

/// Like [`run`], reading the archive through `store` when given.
pub async fn run_with_store(
    config: MountServerConfig,
    store: Option<Arc<dyn RangeStore>>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let mut lifecycle = Lifecycle::new();
    let mut callback = config.callback_addr.as_deref().map(Callback::new);
    let mut cache_dir = None;

    let running = match start(&config, store, &shutdown, &mut lifecycle, &mut cache_dir).await {
        Ok(running) => running,
        Err(err) => {
            lifecycle.enter(ServerState::Stopped);
            let mut message = err.to_string();
            if let Some(dir) = cache_dir.take() {
                if let Err(cleanup) = dir.cleanup() {
                    warn!("{cleanup}");
                    message = format!("{message}; {cleanup}");
                }
            }
            error!("mount server failed to start: {message}");
            if let Some(callback) = callback.take() {
                if let Err(e) = callback.send(CallbackStatus::Error, &message).await {
                    error!("{e}");
                }
            }
            return Err(err);
        }
    };

    info!(
        "serving {} over {} on {}",
        config.uri, running.protocol, running.addr
    );
    let mut result = Ok(());
    if let Some(callback) = callback.take() {
        if let Err(e) = callback
            .send(CallbackStatus::Success, &running.addr.to_string())
            .await
        {
            error!("{e}");
            // Nobody learned where the mount is; stop instead of serving blind.
            running.stop.cancel();
            result = Err(e);
        }
    }

    let mut task = running.task;
    let finished = tokio::select! {
        joined = &mut task => Some(joined),
        _ = running.stop.cancelled() => None,
    };

    lifecycle.enter(ServerState::Draining);
    running.stop.cancel();
    let joined = match finished {
        Some(joined) => joined,
        None => task.await,
    };
    let served = match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ServerError::Serve(e.to_string())),
        Err(e) => Err(ServerError::Serve(format!("adapter task failed: {e}"))),
    };

    lifecycle.enter(ServerState::Stopped);
    if let Some(dir) = cache_dir.take() {
        if let Err(e) = dir.cleanup() {
            warn!("{e}");
        }
    }
    result.and(served)
}

async fn start(
    config: &MountServerConfig,
    store: Option<Arc<dyn RangeStore>>,
    shutdown: &CancellationToken,
    lifecycle: &mut Lifecycle,
    cache_dir: &mut Option<CacheDir>,
) -> Result<Running, ServerError> {
    let protocol: Protocol = config.protocol.parse()?;
    let listen: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| ServerError::Config(format!("listen address {:?}: {e}", config.listen)))?;
    let locator =
        RemoteLocator::parse(&config.uri).map_err(|e| ServerError::Config(e.to_string()))?;
    let store = match store {
        Some(store) => store,
        None => open_store(&locator).map_err(|e| ServerError::Config(e.to_string()))?,
    };

    let dir = CacheDir::prepare(config.cache_dir.as_deref())?;
    info!("cache directory {}", dir.path().display());
    let cache = LocalCache::open(dir.path())
        .map_err(|e| ServerError::Config(format!("cache directory: {e}")))?;
    *cache_dir = Some(dir);

    lifecycle.enter(ServerState::BuildingIndex);
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|source| ServerError::Bind {
            addr: listen.to_string(),
            source,
        })?;
    let addr = listener.local_addr().map_err(|source| ServerError::Bind {
        addr: listen.to_string(),
        source,
    })?;

    let tree = tokio::select! {
        built = Tree::build(locator, store, Arc::new(cache)) => built.map_err(ServerError::Build)?,
        _ = shutdown.cancelled() => return Err(ServerError::Cancelled),
    };
    info!("indexed {} entries", tree.entry_count());
    let tree = Arc::new(tree);

    let stop = shutdown.child_token();
    let task = match protocol {
        Protocol::WebDav => tokio::spawn(webdav::serve(listener, ZipDavFs::new(tree), stop.clone())),
        Protocol::Nfs => {
            // nfsserve binds its own socket; hand the reserved port over.
            drop(listener);
            let nfs_listener = nfs::bind(addr, ZipNfs::new(tree, config.nfs.clone()))
                .await
                .map_err(|source| ServerError::Bind {
                    addr: addr.to_string(),
                    source,
                })?;
            tokio::spawn(nfs::serve(nfs_listener, stop.clone()))
        }
    };
    lifecycle.enter(ServerState::Serving);

    Ok(Running {
        addr,
        protocol,
        task,
        stop,
    })
}
