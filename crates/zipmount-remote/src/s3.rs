//! S3 backend.
//!
//! Each bucket gets its own region-pinned client. The owning region is looked
//! up once per bucket against the global endpoint and cached for the lifetime
//! of the store.

use crate::error::{Error, Result};
use crate::locator::RemoteLocator;
use crate::range::ByteRange;
use crate::route::RouteCache;
use crate::store::{ByteStream, RangeStore};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use log::debug;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{GetOptions, GetRange, ObjectStore};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::fmt;
use std::sync::Arc;

/// Region used to address a bucket before its own region is known.
pub const DEFAULT_REGION: &str = "us-east-1";

const BUCKET_REGION_HEADER: &str = "x-amz-bucket-region";

/// Configuration for the S3 backend.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Provisional region, and the region used with a custom endpoint.
    pub default_region: String,
    /// Custom endpoint for S3-compatible stores. Disables region lookup.
    pub endpoint: Option<String>,
    /// Allow plain HTTP to the custom endpoint.
    pub allow_http: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            default_region: DEFAULT_REGION.to_string(),
            endpoint: None,
            allow_http: false,
        }
    }
}

impl S3Config {
    /// Read `AWS_ENDPOINT_URL` (and `AWS_REGION` alongside it) from the
    /// environment. Credentials are picked up by the client builder itself.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(endpoint) = std::env::var("AWS_ENDPOINT_URL") {
            if !endpoint.is_empty() {
                config.allow_http = endpoint.starts_with("http://");
                config.endpoint = Some(endpoint);
                if let Ok(region) = std::env::var("AWS_REGION") {
                    config.default_region = region;
                }
            }
        }
        config
    }
}

/// [`RangeStore`] over S3 `GetObject` / `HeadObject`.
pub struct S3RangeStore {
    config: S3Config,
    http: reqwest::Client,
    routes: RouteCache<Arc<dyn ObjectStore>>,
}

impl S3RangeStore {
    pub fn new(config: S3Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            config,
            http,
            routes: RouteCache::new(),
        })
    }

    async fn route(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        self.routes
            .get_or_resolve(bucket, || async {
                let region = self.resolve_region(bucket).await?;
                debug!("s3: bucket {} is in region {}", bucket, region);
                self.build_client(bucket, &region)
            })
            .await
    }

    async fn resolve_region(&self, bucket: &str) -> Result<String> {
        if self.config.endpoint.is_some() {
            return Ok(self.config.default_region.clone());
        }
        let url = format!("https://s3.amazonaws.com/{bucket}");
        debug!("s3:HeadBucket {}", url);
        let response = self.http.head(&url).send().await?;
        region_from_response(
            bucket,
            response.status(),
            response.headers(),
            &self.config.default_region,
        )
    }

    fn build_client(&self, bucket: &str, region: &str) -> Result<Arc<dyn ObjectStore>> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(region);
        if let Some(endpoint) = &self.config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(self.config.allow_http);
        }
        Ok(Arc::new(builder.build()?))
    }
}

impl fmt::Debug for S3RangeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3RangeStore")
            .field("config", &self.config)
            .field("resolved_buckets", &self.routes.len())
            .finish()
    }
}

#[async_trait]
impl RangeStore for S3RangeStore {
    async fn download(&self, locator: &RemoteLocator, range: ByteRange) -> Result<ByteStream> {
        let route = self.route(locator.container()).await?;
        let path = object_path(locator)?;
        let options = GetOptions {
            range: get_range(range)?,
            ..Default::default()
        };

        debug!("s3:GetObject {} range={}", locator, range);
        let result = route
            .get_opts(&path, options)
            .await
            .map_err(|e| map_object_store_error(e, locator))?;

        let uri = locator.to_string();
        Ok(result
            .into_stream()
            .map_err(move |e| map_object_store_error(e, &uri))
            .boxed())
    }

    async fn size_of(&self, locator: &RemoteLocator) -> Result<u64> {
        debug!("s3:HeadObject {}", locator);
        let route = self.route(locator.container()).await?;
        let path = object_path(locator)?;
        let meta = route
            .head(&path)
            .await
            .map_err(|e| map_object_store_error(e, locator))?;
        Ok(meta.size as u64)
    }
}

fn object_path(locator: &RemoteLocator) -> Result<ObjectPath> {
    if locator.container().is_empty() || locator.key().is_empty() {
        return Err(Error::InvalidLocator(format!(
            "{locator}: expected s3://bucket/key"
        )));
    }
    ObjectPath::from_url_path(locator.key())
        .map_err(|e| Error::InvalidLocator(format!("{locator}: {e}")))
}

fn get_range(range: ByteRange) -> Result<Option<GetRange>> {
    Ok(match range {
        ByteRange::Whole => None,
        ByteRange::From(start) => Some(GetRange::Offset(to_usize(start)?)),
        ByteRange::Bounded { start, end } => {
            Some(GetRange::Bounded(to_usize(start)?..to_usize(end)? + 1))
        }
        ByteRange::Suffix(len) => Some(GetRange::Suffix(to_usize(len)?)),
    })
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::Backend(format!("offset {value} does not fit in usize")))
}

/// Missing bucket or key becomes the uniform not-found signal; everything
/// else is passed through.
fn map_object_store_error(err: object_store::Error, locator: impl ToString) -> Error {
    match err {
        object_store::Error::NotFound { .. } => Error::not_found(locator),
        other => Error::ObjectStore(other),
    }
}

fn region_from_response(
    bucket: &str,
    status: StatusCode,
    headers: &HeaderMap,
    default_region: &str,
) -> Result<String> {
    if status == StatusCode::NOT_FOUND {
        return Err(Error::not_found(format!("s3://{bucket}")));
    }
    if let Some(region) = headers
        .get(BUCKET_REGION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return Ok(region.to_string());
    }
    if status.is_success() {
        return Ok(default_region.to_string());
    }
    Err(Error::Backend(format!(
        "could not resolve region for bucket {bucket}: HTTP {status}"
    )))
}
