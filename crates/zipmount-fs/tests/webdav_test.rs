#![cfg(feature = "webdav")]

mod common;

use common::{fixture_tree, HELLO};
use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, OpenOptions, ReadDirMeta,
};
use futures::StreamExt;
use std::io::SeekFrom;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use zipmount_fs::webdav::{serve, ZipDavFs};


// `OpenOptions::read()`/`write()` are crate-private in dav-server 0.10;
// these build the same values from the public fields.
fn open_read() -> OpenOptions {
    OpenOptions {
        read: true,
        write: false,
        append: false,
        truncate: false,
        create: false,
        create_new: false,
        size: None,
        checksum: None,
    }
}

fn open_write() -> OpenOptions {
    OpenOptions {
        read: false,
        write: true,
        append: false,
        truncate: false,
        create: false,
        create_new: false,
        size: None,
        checksum: None,
    }
}

fn dav_path(path: &str) -> DavPath {
    DavPath::new(path).unwrap()
}

#[tokio::test]
async fn metadata_reports_entries() {
    let fixture = fixture_tree().await;
    let fs = ZipDavFs::new(fixture.tree.clone());

    let dir = fs.metadata(&dav_path("/a/")).await.unwrap();
    assert!(dir.is_dir());

    let file = fs.metadata(&dav_path("/a/b.txt")).await.unwrap();
    assert!(!file.is_dir());
    assert_eq!(file.len(), 12);
    assert_eq!(
        file.modified().unwrap(),
        fixture.tree.stat("/a/b.txt").unwrap().modified
    );

    assert!(matches!(
        fs.metadata(&dav_path("/nope")).await,
        Err(FsError::NotFound)
    ));
}

#[tokio::test]
async fn read_dir_lists_children_in_order() {
    let fixture = fixture_tree().await;
    let fs = ZipDavFs::new(fixture.tree.clone());

    let stream = match fs.read_dir(&dav_path("/"), ReadDirMeta::Data).await {
        Ok(stream) => stream,
        Err(e) => panic!("read_dir failed: {e:?}"),
    };
    let names: Vec<String> = stream
        .map(|entry| String::from_utf8(entry.unwrap().name()).unwrap())
        .collect()
        .await;
    assert_eq!(names, vec!["a", "docs", "z.bin"]);

    assert!(matches!(
        fs.read_dir(&dav_path("/a/b.txt"), ReadDirMeta::Data).await,
        Err(FsError::NotFound)
    ));
}

#[tokio::test]
async fn open_reads_and_seeks() {
    let fixture = fixture_tree().await;
    let fs = ZipDavFs::new(fixture.tree.clone());

    let mut file = fs
        .open(&dav_path("/a/b.txt"), open_read())
        .await
        .unwrap();
    assert_eq!(file.metadata().await.unwrap().len(), 12);
    assert_eq!(&file.read_bytes(5).await.unwrap()[..], &HELLO[..5]);
    assert_eq!(&file.read_bytes(100).await.unwrap()[..], &HELLO[5..]);
    assert!(file.read_bytes(100).await.unwrap().is_empty());

    assert_eq!(file.seek(SeekFrom::End(-6)).await.unwrap(), 6);
    assert_eq!(&file.read_bytes(6).await.unwrap()[..], b"world\n");
    assert!(matches!(
        file.seek(SeekFrom::Current(-100)).await,
        Err(FsError::GeneralFailure)
    ));
}

#[tokio::test]
async fn mutations_are_forbidden() {
    let fixture = fixture_tree().await;
    let fs = ZipDavFs::new(fixture.tree.clone());
    let file = dav_path("/a/b.txt");
    let target = dav_path("/a/copy.txt");

    assert!(matches!(
        fs.open(&file, open_write()).await,
        Err(FsError::Forbidden)
    ));
    assert!(matches!(
        fs.open(&dav_path("/new.txt"), open_write()).await,
        Err(FsError::Forbidden)
    ));
    assert!(matches!(
        fs.open(&dav_path("/a/"), open_read()).await,
        Err(FsError::Forbidden)
    ));
    assert!(matches!(fs.create_dir(&dav_path("/x/")).await, Err(FsError::Forbidden)));
    assert!(matches!(fs.remove_dir(&dav_path("/a/c/")).await, Err(FsError::Forbidden)));
    assert!(matches!(fs.remove_file(&file).await, Err(FsError::Forbidden)));
    assert!(matches!(fs.rename(&file, &target).await, Err(FsError::Forbidden)));
    assert!(matches!(fs.copy(&file, &target).await, Err(FsError::Forbidden)));

    let mut open = fs.open(&file, open_read()).await.unwrap();
    assert!(matches!(
        open.write_bytes(bytes::Bytes::from_static(b"x")).await,
        Err(FsError::Forbidden)
    ));

    // Nothing changed.
    assert!(fixture.tree.stat("/a/b.txt").is_ok());
    assert!(fixture.tree.stat("/a/c").is_ok());
    assert!(fixture.tree.stat("/a/copy.txt").is_err());
}

#[tokio::test]
async fn serves_files_over_http() {
    let fixture = fixture_tree().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(
        listener,
        ZipDavFs::new(fixture.tree.clone()),
        shutdown.clone(),
    ));

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/a/b.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(&response.bytes().await.unwrap()[..], HELLO);

    let listing = client
        .request(
            reqwest::Method::from_bytes(b"PROPFIND").unwrap(),
            format!("http://{addr}/a/"),
        )
        .header("Depth", "1")
        .send()
        .await
        .unwrap();
    assert_eq!(listing.status().as_u16(), 207);
    let body = listing.text().await.unwrap();
    assert!(body.contains("b.txt"));

    let missing = client
        .get(format!("http://{addr}/missing"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    shutdown.cancel();
    server.await.unwrap().unwrap();
}
