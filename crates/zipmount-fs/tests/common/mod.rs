#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::Arc;
use tempfile::TempDir;
use zip::{write::FileOptions, ZipWriter};
use zipmount_fs::{LocalCache, RangeStore, RemoteLocator, Tree};
use zipmount_remote::MemoryRangeStore;

pub const ARCHIVE_URI: &str = "mem://bucket/fixture.zip";

pub const HELLO: &[u8] = b"hello world\n";

pub fn guide_text() -> Vec<u8> {
    (0..3000)
        .map(|i| format!("section {i}: read the archive in place\n"))
        .collect::<String>()
        .into_bytes()
}

/// `a/b.txt` (12 bytes), empty `a/c/`, a deflated `docs/guide.md` whose
/// parent has no record of its own, and an empty `z.bin`.
pub fn fixture_archive() -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let modified = zip::DateTime::from_date_and_time(2024, 3, 15, 10, 30, 42).unwrap();

    let stored: FileOptions<()> = FileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .last_modified_time(modified)
        .unix_permissions(0o644);
    let deflated: FileOptions<()> = FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(modified);

    zip.add_directory("a/", stored).unwrap();
    zip.start_file("a/b.txt", stored).unwrap();
    zip.write_all(HELLO).unwrap();
    zip.add_directory("a/c/", stored).unwrap();
    zip.start_file("docs/guide.md", deflated).unwrap();
    zip.write_all(&guide_text()).unwrap();
    zip.start_file("z.bin", stored).unwrap();

    zip.finish().unwrap().into_inner()
}

pub struct Fixture {
    pub tree: Arc<Tree>,
    pub store: Arc<MemoryRangeStore>,
    pub cache_dir: TempDir,
}

/// Serve `archive` from memory and index it.
pub async fn build_tree(archive: Vec<u8>) -> Fixture {
    let store = Arc::new(MemoryRangeStore::new());
    store.insert(ARCHIVE_URI, archive);
    let cache_dir = TempDir::new().unwrap();
    let cache = Arc::new(LocalCache::open(cache_dir.path()).unwrap());

    let backend: Arc<dyn RangeStore> = store.clone();
    let tree = Tree::build(RemoteLocator::parse(ARCHIVE_URI).unwrap(), backend, cache)
        .await
        .unwrap();

    Fixture {
        tree: Arc::new(tree),
        store,
        cache_dir,
    }
}

pub async fn fixture_tree() -> Fixture {
    build_tree(fixture_archive()).await
}
