//! Content-addressed disk cache for decoded entries and fetched ranges.
//!
//! Records live at `<root>/objects/<2 hex>/<62 hex>`, named by the blake3
//! digest of their [`CacheKey`]. A record is written to a temp file under
//! `<root>/tmp` and atomically renamed into place, so a reader either sees
//! the complete record or nothing. Records are never modified afterwards.

use crate::error::Result;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;
use zipmount_remote::RemoteLocator;

const OBJECTS_DIR: &str = "objects";
const TMP_DIR: &str = "tmp";

/// Identity of a cache record.
///
/// Every field that determines the record's bytes is part of the key, so a
/// changed remote object never aliases an old record.
#[derive(Debug, Clone, Copy)]
pub enum CacheKey<'a> {
    /// The decoded payload of one archive entry.
    Entry {
        locator: &'a RemoteLocator,
        header_offset: u64,
        compressed_size: u64,
        size: u64,
        crc32: u32,
    },
    /// Raw bytes `start..end` of a remote object of `object_size` bytes.
    Range {
        locator: &'a RemoteLocator,
        object_size: u64,
        start: u64,
        end: u64,
    },
}

impl CacheKey<'_> {
    /// Hex digest naming the record.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        match *self {
            CacheKey::Entry {
                locator,
                header_offset,
                compressed_size,
                size,
                crc32,
            } => {
                hasher.update(b"entry\0");
                hasher.update(locator.to_string().as_bytes());
                hasher.update(b"\0");
                hasher.update(&header_offset.to_le_bytes());
                hasher.update(&compressed_size.to_le_bytes());
                hasher.update(&size.to_le_bytes());
                hasher.update(&crc32.to_le_bytes());
            }
            CacheKey::Range {
                locator,
                object_size,
                start,
                end,
            } => {
                hasher.update(b"range\0");
                hasher.update(locator.to_string().as_bytes());
                hasher.update(b"\0");
                hasher.update(&object_size.to_le_bytes());
                hasher.update(&start.to_le_bytes());
                hasher.update(&end.to_le_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Disk cache rooted at one directory, owned by one mount.
#[derive(Debug)]
pub struct LocalCache {
    root: PathBuf,
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalCache {
    /// Open a cache at `root`, creating its layout if missing. Existing
    /// records are reused.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        fs::create_dir_all(root.join(TMP_DIR))?;
        Ok(Self {
            root,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Where the record for `key` lives, whether or not it exists yet.
    pub fn path_for(&self, key: &CacheKey<'_>) -> PathBuf {
        self.object_path(&key.digest())
    }

    /// The record for `key`, if it has been filled.
    pub fn lookup(&self, key: &CacheKey<'_>) -> Option<PathBuf> {
        let path = self.path_for(key);
        path.is_file().then_some(path)
    }

    /// Return the record for `key`, running `fill` to produce it on a miss.
    ///
    /// `fill` receives an empty temp file and hands it back once written.
    /// Concurrent callers for one key wait for the first fill instead of
    /// fetching again. A failed fill leaves no record behind and the next
    /// caller tries again.
    pub async fn get_or_fill<F, Fut>(&self, key: &CacheKey<'_>, fill: F) -> Result<PathBuf>
    where
        F: FnOnce(NamedTempFile) -> Fut,
        Fut: Future<Output = Result<NamedTempFile>>,
    {
        let digest = key.digest();
        let path = self.object_path(&digest);
        if path.is_file() {
            debug!("cache hit {digest}");
            return Ok(path);
        }

        let gate = Inflight::enter(&self.inflight, &digest);
        let _guard = gate.lock.lock().await;
        if path.is_file() {
            debug!("cache hit {digest} after concurrent fill");
            return Ok(path);
        }

        debug!("cache miss {digest}");
        let tmp = NamedTempFile::new_in(self.root.join(TMP_DIR))?;
        let tmp = fill(tmp).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    }

    /// Like [`get_or_fill`](Self::get_or_fill), returning the record's bytes.
    pub async fn read_or_fill<F, Fut>(&self, key: &CacheKey<'_>, fill: F) -> Result<Vec<u8>>
    where
        F: FnOnce(NamedTempFile) -> Fut,
        Fut: Future<Output = Result<NamedTempFile>>,
    {
        let path = self.get_or_fill(key, fill).await?;
        Ok(fs::read(path)?)
    }

    fn object_path(&self, digest: &str) -> PathBuf {
        let (prefix, rest) = digest.split_at(2);
        self.root.join(OBJECTS_DIR).join(prefix).join(rest)
    }
}

/// Registration in the in-flight map, removed again on drop.
struct Inflight<'a> {
    map: &'a Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    digest: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> Inflight<'a> {
    fn enter(map: &'a Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>, digest: &str) -> Self {
        let lock = map
            .lock()
            .entry(digest.to_string())
            .or_default()
            .clone();
        Self {
            map,
            digest: digest.to_string(),
            lock,
        }
    }
}

impl Drop for Inflight<'_> {
    fn drop(&mut self) {
        let mut map = self.map.lock();
        // Waiters still hold clones; the last one out removes the entry.
        if Arc::strong_count(&self.lock) == 2 {
            if let Some(current) = map.get(&self.digest) {
                if Arc::ptr_eq(current, &self.lock) {
                    map.remove(&self.digest);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn locator() -> RemoteLocator {
        RemoteLocator::parse("mem://bucket/archive.zip").unwrap()
    }

    fn entry_key(loc: &RemoteLocator, crc32: u32) -> CacheKey<'_> {
        CacheKey::Entry {
            locator: loc,
            header_offset: 0,
            compressed_size: 5,
            size: 5,
            crc32,
        }
    }

    #[test]
    fn test_layout_and_digest() {
        let dir = TempDir::new().unwrap();
        let cache = LocalCache::open(dir.path()).unwrap();
        let loc = locator();
        let key = entry_key(&loc, 1);

        let digest = key.digest();
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, entry_key(&loc, 1).digest());
        assert_ne!(digest, entry_key(&loc, 2).digest());

        let path = cache.path_for(&key);
        assert!(path.starts_with(dir.path().join("objects").join(&digest[..2])));
        assert!(cache.lookup(&key).is_none());
    }

    #[tokio::test]
    async fn test_fill_then_hit() {
        let dir = TempDir::new().unwrap();
        let cache = LocalCache::open(dir.path()).unwrap();
        let loc = locator();
        let key = entry_key(&loc, 7);
        let fills = AtomicUsize::new(0);

        for _ in 0..3 {
            let bytes = cache
                .read_or_fill(&key, |mut tmp| {
                    fills.fetch_add(1, Ordering::SeqCst);
                    async move {
                        tmp.write_all(b"hello")?;
                        Ok::<_, crate::Error>(tmp)
                    }
                })
                .await
                .unwrap();
            assert_eq!(bytes, b"hello");
        }
        assert_eq!(fills.load(Ordering::SeqCst), 1);
        assert!(cache.lookup(&key).is_some());
        assert_eq!(fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_fill_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let cache = LocalCache::open(dir.path()).unwrap();
        let loc = locator();
        let key = entry_key(&loc, 9);

        let result = cache
            .get_or_fill(&key, |_tmp| async {
                Err(crate::Error::NotFound("gone".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.lookup(&key).is_none());
        assert!(cache.inflight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_fills_are_single_flight() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(LocalCache::open(dir.path()).unwrap());
        let fills = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let fills = fills.clone();
            tasks.push(tokio::spawn(async move {
                let loc = locator();
                let key = entry_key(&loc, 11);
                cache
                    .read_or_fill(&key, |mut tmp| async move {
                        fills.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        tmp.write_all(b"world")?;
                        Ok::<_, crate::Error>(tmp)
                    })
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), b"world");
        }
        assert_eq!(fills.load(Ordering::SeqCst), 1);
    }
}
