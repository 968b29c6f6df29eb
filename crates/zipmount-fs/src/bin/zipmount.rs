//! zipmount: mount remote ZIP archives read-only.
//!
//! # Usage
//!
//! ```bash
//! # Browse an archive without mounting it
//! zipmount ls s3://bucket/photos.zip /2024
//! zipmount cat s3://bucket/photos.zip /2024/beach.jpg > beach.jpg
//!
//! # Serve it over WebDAV (normally started by a controlling process)
//! zipmount mount-server s3://bucket/photos.zip --protocol webdav -l 127.0.0.1:4918
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use env_logger::{Env, Target};
use log::{error, info};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use zipmount_fs::nfs::{NfsOptions, DEFAULT_HANDLE_CACHE_SIZE};
use zipmount_fs::server::{self, Callback, CallbackStatus, MountServerConfig};
use zipmount_fs::{normalize_path, LocalCache, Tree};
use zipmount_remote::{open_store, RemoteLocator};

/// Mount remote ZIP archives read-only over NFS or WebDAV.
#[derive(Parser, Debug)]
#[command(name = "zipmount")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve an archive until interrupted
    #[command(hide = true)]
    MountServer(MountServerArgs),

    /// List a directory of an archive
    Ls {
        /// Archive locator, e.g. s3://bucket/archive.zip
        #[arg(value_name = "URI")]
        uri: String,

        #[arg(value_name = "PATH", default_value = "/")]
        path: String,
    },

    /// Write one archive entry to stdout
    Cat {
        #[arg(value_name = "URI")]
        uri: String,

        #[arg(value_name = "PATH")]
        path: String,
    },
}

#[derive(clap::Args, Debug)]
struct MountServerArgs {
    #[arg(value_name = "URI")]
    uri: String,

    /// Cache directory (a temporary one is used and removed when unset)
    #[arg(long, env = "ZIPMOUNT_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, default_value = server::DEFAULT_LISTEN_ADDR)]
    listen: String,

    /// nfs or webdav
    #[arg(long, default_value = "nfs")]
    protocol: String,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Report SUCCESS=<addr> or ERROR=<message> to this host:port
    #[arg(long, value_name = "ADDR")]
    callback_addr: Option<String>,

    /// NFS file handles kept before least recently used ones are dropped
    #[arg(long, default_value_t = DEFAULT_HANDLE_CACHE_SIZE)]
    handle_cache_size: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_file = match &args.command {
        Command::MountServer(mount) => mount.log.as_deref(),
        _ => None,
    };
    if let Err(e) = init_logging(args.verbose, log_file) {
        eprintln!("zipmount: {e:#}");
        if let Command::MountServer(MountServerArgs {
            callback_addr: Some(addr),
            ..
        }) = &args.command
        {
            let sent = Callback::new(addr.as_str())
                .send(CallbackStatus::Error, &format!("{e:#}"))
                .await;
            if let Err(e) = sent {
                eprintln!("zipmount: {e}");
            }
        }
        process::exit(1);
    }

    let result = match args.command {
        Command::MountServer(mount) => mount_server(mount).await,
        Command::Ls { uri, path } => list(&uri, &path).await,
        Command::Cat { uri, path } => cat(&uri, &path).await,
    };
    if let Err(e) = result {
        error!("{e:#}");
        process::exit(1);
    }
}

/// Level from `RUST_LOG` or `ZIPMOUNT_LOG`, falling back to info.
fn init_logging(verbose: bool, file: Option<&Path>) -> anyhow::Result<()> {
    let log_level = if verbose { "debug" } else { "info" };
    let env = if std::env::var_os("RUST_LOG").is_some() {
        Env::default()
    } else {
        Env::default().filter("ZIPMOUNT_LOG")
    };
    let mut builder = env_logger::Builder::from_env(env.default_filter_or(log_level));
    builder.format_timestamp_millis();
    if let Some(path) = file {
        let file = File::options()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open log file {}", path.display()))?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.try_init()?;
    Ok(())
}

async fn mount_server(args: MountServerArgs) -> anyhow::Result<()> {
    let config = MountServerConfig {
        uri: args.uri,
        protocol: args.protocol,
        listen: args.listen,
        cache_dir: args.cache_dir,
        callback_addr: args.callback_addr,
        nfs: NfsOptions {
            handle_cache_size: args.handle_cache_size,
        },
    };

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, shutting down");
            on_signal.cancel();
        }
    });

    server::run(config, shutdown).await?;
    Ok(())
}

/// Build a tree over a throwaway cache for one-shot commands.
async fn open_tree(uri: &str) -> anyhow::Result<(Tree, tempfile::TempDir)> {
    let locator = RemoteLocator::parse(uri)?;
    let store = open_store(&locator)?;
    let dir = tempfile::Builder::new()
        .prefix(server::CACHE_DIR_PREFIX)
        .tempdir()
        .context("cannot create cache directory")?;
    let cache = Arc::new(LocalCache::open(dir.path())?);
    let tree = Tree::build(locator, store, cache)
        .await
        .with_context(|| format!("cannot index {uri}"))?;
    Ok((tree, dir))
}

async fn list(uri: &str, path: &str) -> anyhow::Result<()> {
    let (tree, _cache) = open_tree(uri).await?;
    let path = normalize_path(path);
    let entry = tree.stat(&path)?;
    let entries = if entry.is_dir {
        tree.list_children(&path)?
    } else {
        vec![entry]
    };
    for entry in entries {
        let suffix = if entry.is_dir { "/" } else { "" };
        println!("{:>12}  {}{}", entry.size, entry.name(), suffix);
    }
    Ok(())
}

async fn cat(uri: &str, path: &str) -> anyhow::Result<()> {
    let (tree, _cache) = open_tree(uri).await?;
    let path = normalize_path(path);
    if tree.stat(&path)?.is_dir {
        bail!("{path} is a directory");
    }
    let mut reader = tree.open(&path).await?;
    let mut stdout = io::stdout().lock();
    io::copy(&mut reader, &mut stdout).context("cannot write to stdout")?;
    Ok(())
}
