//! In-process backend for `mem://` locators.
//!
//! Objects live in a map keyed by their URI. The store counts the downloads
//! it serves and can be told to fail them, which makes it useful for
//! embedding and for tests that observe how a code path fetches.

use crate::error::{Error, Result};
use crate::locator::RemoteLocator;
use crate::range::ByteRange;
use crate::store::{ByteStream, RangeStore};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const CHUNK_SIZE: usize = 8 * 1024;

/// [`RangeStore`] serving objects held in memory.
#[derive(Debug, Default)]
pub struct MemoryRangeStore {
    objects: Mutex<HashMap<String, Bytes>>,
    downloads: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryRangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under `uri`, replacing any previous object.
    pub fn insert(&self, uri: &str, data: impl Into<Bytes>) {
        self.objects.lock().insert(uri.to_string(), data.into());
    }

    /// Make every subsequent download fail with a backend error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Downloads requested so far, failed ones included.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn object(&self, locator: &RemoteLocator) -> Result<Bytes> {
        self.objects
            .lock()
            .get(locator.url().as_str())
            .cloned()
            .ok_or_else(|| Error::not_found(locator))
    }
}

#[async_trait]
impl RangeStore for MemoryRangeStore {
    async fn download(&self, locator: &RemoteLocator, range: ByteRange) -> Result<ByteStream> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Backend(format!("{locator}: injected failure")));
        }
        let data = self.object(locator)?;
        let span = range.resolve(data.len() as u64);
        let body = data.slice(span.start as usize..span.end as usize);

        let chunks: Vec<Result<Bytes>> = (0..body.len())
            .step_by(CHUNK_SIZE)
            .map(|at| Ok(body.slice(at..(at + CHUNK_SIZE).min(body.len()))))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn size_of(&self, locator: &RemoteLocator) -> Result<u64> {
        Ok(self.object(locator)?.len() as u64)
    }
}
