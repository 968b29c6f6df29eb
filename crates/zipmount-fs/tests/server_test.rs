#![cfg(feature = "server")]

mod common;

use common::{fixture_archive, ARCHIVE_URI, HELLO};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use zipmount_fs::server::{run, run_with_store, MountServerConfig};
use zipmount_fs::{RangeStore, ServerError};
use zipmount_remote::MemoryRangeStore;

/// Accept one callback connection and return the line it carried.
async fn receive_callback(listener: &TcpListener) -> String {
    let (mut stream, _) = tokio::time::timeout(Duration::from_secs(10), listener.accept())
        .await
        .expect("no callback received")
        .unwrap();
    let mut line = String::new();
    stream.read_to_string(&mut line).await.unwrap();
    line
}

async fn no_more_callbacks(listener: &TcpListener) {
    let extra = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(extra.is_err(), "callback sent more than once");
}

fn memory_store() -> Arc<dyn RangeStore> {
    let store = MemoryRangeStore::new();
    store.insert(ARCHIVE_URI, fixture_archive());
    Arc::new(store)
}

#[tokio::test]
async fn webdav_mount_reports_success_and_serves() {
    let callback = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cache_dir = TempDir::new().unwrap();
    let config = MountServerConfig {
        protocol: "webdav".to_string(),
        cache_dir: Some(cache_dir.path().to_path_buf()),
        callback_addr: Some(callback.local_addr().unwrap().to_string()),
        ..MountServerConfig::new(ARCHIVE_URI)
    };
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(run_with_store(config, Some(memory_store()), shutdown.clone()));

    let line = receive_callback(&callback).await;
    let addr = line
        .strip_prefix("SUCCESS=")
        .and_then(|rest| rest.strip_suffix('\n'))
        .unwrap_or_else(|| panic!("unexpected callback {line:?}"))
        .to_string();

    let body = reqwest::get(format!("http://{addr}/a/b.txt"))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(&body[..], HELLO);

    shutdown.cancel();
    server.await.unwrap().unwrap();
    no_more_callbacks(&callback).await;

    // A cache directory given by the user is kept, records included.
    assert!(cache_dir.path().join("objects").is_dir());
}

#[tokio::test]
async fn nfs_mount_reports_success() {
    let callback = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = MountServerConfig {
        callback_addr: Some(callback.local_addr().unwrap().to_string()),
        ..MountServerConfig::new(ARCHIVE_URI)
    };
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(run_with_store(config, Some(memory_store()), shutdown.clone()));

    let line = receive_callback(&callback).await;
    let addr = line
        .trim_end()
        .strip_prefix("SUCCESS=")
        .unwrap_or_else(|| panic!("unexpected callback {line:?}"))
        .to_string();
    TcpStream::connect(&addr).await.unwrap();

    shutdown.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_protocol_reports_one_error() {
    let callback = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = MountServerConfig {
        protocol: "gopher".to_string(),
        callback_addr: Some(callback.local_addr().unwrap().to_string()),
        ..MountServerConfig::new(ARCHIVE_URI)
    };

    let err = run(config, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ServerError::Config(_)));

    let line = receive_callback(&callback).await;
    assert!(line.starts_with("ERROR="), "{line:?}");
    assert!(line.contains("gopher"));
    assert!(line.ends_with('\n'));
    assert_eq!(line.lines().count(), 1);
    no_more_callbacks(&callback).await;
}

#[tokio::test]
async fn missing_archive_reports_error() {
    let callback = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = MountServerConfig {
        protocol: "webdav".to_string(),
        callback_addr: Some(callback.local_addr().unwrap().to_string()),
        ..MountServerConfig::new("mem://bucket/other.zip")
    };

    let err = run_with_store(config, Some(memory_store()), CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        ServerError::Build(e) => assert!(e.is_not_found()),
        other => panic!("unexpected error {other}"),
    }

    let line = receive_callback(&callback).await;
    assert!(line.starts_with("ERROR="), "{line:?}");
    no_more_callbacks(&callback).await;
}

#[tokio::test]
async fn unsupported_scheme_is_a_config_error() {
    let config = MountServerConfig::new("ftp://host/archive.zip");
    let err = run(config, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ServerError::Config(_)));
}
