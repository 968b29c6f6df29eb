use crate::error::Result;
use crate::locator::RemoteLocator;
use crate::range::ByteRange;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use std::fmt::Debug;

/// A stream of body chunks from a range fetch.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Backend-agnostic byte-range access to remote objects.
///
/// Implementations map their backend's "no such container" and "no such
/// object" conditions to [`crate::Error::NotFound`] and pass every other
/// failure through unchanged. Nothing is retried internally.
#[async_trait]
pub trait RangeStore: Send + Sync + Debug {
    /// Fetch `range` of the object. The body is streamed; dropping the
    /// stream aborts the transfer.
    async fn download(&self, locator: &RemoteLocator, range: ByteRange) -> Result<ByteStream>;

    /// Total size of the object, without transferring its body.
    async fn size_of(&self, locator: &RemoteLocator) -> Result<u64>;
}

/// Fetch a range and collect it into memory. Meant for small structural
/// reads such as archive trailers and directories.
pub async fn read_range(
    store: &dyn RangeStore,
    locator: &RemoteLocator,
    range: ByteRange,
) -> Result<Bytes> {
    let stream = store.download(locator, range).await?;
    let buf = stream
        .try_fold(BytesMut::new(), |mut buf, chunk| async move {
            buf.extend_from_slice(&chunk);
            Ok(buf)
        })
        .await?;
    Ok(buf.freeze())
}
