//! Local file backend for `file://` locators.

use crate::error::{Error, Result};
use crate::locator::RemoteLocator;
use crate::range::ByteRange;
use crate::store::{ByteStream, RangeStore};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use log::debug;
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// [`RangeStore`] over the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalFileStore;

impl LocalFileStore {
    pub fn new() -> Self {
        Self
    }
}

fn file_path(locator: &RemoteLocator) -> Result<PathBuf> {
    locator
        .url()
        .to_file_path()
        .map_err(|_| Error::InvalidLocator(format!("{locator}: not a local file path")))
}

fn map_io(err: io::Error, locator: &RemoteLocator) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::not_found(locator),
        _ => Error::Io(err),
    }
}

#[async_trait]
impl RangeStore for LocalFileStore {
    async fn download(&self, locator: &RemoteLocator, range: ByteRange) -> Result<ByteStream> {
        debug!("file:read {} range={}", locator, range);
        let path = file_path(locator)?;
        let mut file = File::open(&path).await.map_err(|e| map_io(e, locator))?;
        let size = file.metadata().await?.len();
        let span = range.resolve(size);
        file.seek(SeekFrom::Start(span.start)).await?;
        let reader = file.take(span.end - span.start);
        Ok(ReaderStream::new(reader).map_err(Error::from).boxed())
    }

    async fn size_of(&self, locator: &RemoteLocator) -> Result<u64> {
        let path = file_path(locator)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| map_io(e, locator))?;
        Ok(meta.len())
    }
}
