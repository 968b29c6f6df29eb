//! Plain HTTP(S) backend using `Range` requests.

use crate::error::{Error, Result};
use crate::locator::RemoteLocator;
use crate::range::ByteRange;
use crate::store::{ByteStream, RangeStore};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use log::debug;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Response, StatusCode};

/// [`RangeStore`] over HTTP `GET` with a `Range` header and `HEAD`.
#[derive(Debug, Clone)]
pub struct HttpRangeStore {
    client: reqwest::Client,
}

impl HttpRangeStore {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
        })
    }
}

#[async_trait]
impl RangeStore for HttpRangeStore {
    async fn download(&self, locator: &RemoteLocator, range: ByteRange) -> Result<ByteStream> {
        debug!("http:GET {} range={}", locator, range);
        let mut request = self.client.get(locator.url().clone());
        if let Some(value) = range.header_value() {
            request = request.header(RANGE, value);
        }
        let response = check_status(request.send().await?, locator)?;
        if range != ByteRange::Whole {
            check_partial(&response, range, locator)?;
        }
        Ok(response.bytes_stream().map_err(Error::from).boxed())
    }

    async fn size_of(&self, locator: &RemoteLocator) -> Result<u64> {
        debug!("http:HEAD {}", locator);
        let response = check_status(self.client.head(locator.url().clone()).send().await?, locator)?;
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| Error::Backend(format!("{locator}: response has no Content-Length")))
    }
}

fn check_status(response: Response, locator: &RemoteLocator) -> Result<Response> {
    match response.status() {
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(Error::not_found(locator)),
        _ => Ok(response.error_for_status()?),
    }
}

/// A ranged request must come back as exactly the requested span. Servers
/// that ignore `Range` answer `200` with the whole body, which is refused
/// unless a `Content-Range` says otherwise.
fn check_partial(response: &Response, range: ByteRange, locator: &RemoteLocator) -> Result<()> {
    let status = response.status();
    if status != StatusCode::PARTIAL_CONTENT && status != StatusCode::OK {
        return Err(Error::Backend(format!(
            "{locator}: unexpected status {status} for range {range}"
        )));
    }
    let content_range = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(ContentRange::parse);
    match content_range {
        Some(served) if served.answers(range) => Ok(()),
        Some(served) => Err(Error::Backend(format!(
            "{locator}: server returned bytes {}-{} for range {range}",
            served.first, served.last
        ))),
        None => Err(Error::Backend(format!(
            "{locator}: server ignored range {range} (status {status}, no Content-Range)"
        ))),
    }
}

/// A parsed `Content-Range: bytes first-last/total` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContentRange {
    first: u64,
    last: u64,
    total: Option<u64>,
}

impl ContentRange {
    fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes ")?;
        let (span, total) = rest.split_once('/')?;
        let (first, last) = span.split_once('-')?;
        let total = match total.trim() {
            "*" => None,
            n => Some(n.parse().ok()?),
        };
        let first: u64 = first.trim().parse().ok()?;
        let last: u64 = last.trim().parse().ok()?;
        (first <= last).then_some(Self { first, last, total })
    }

    fn answers(&self, range: ByteRange) -> bool {
        let served = self.first..self.last.saturating_add(1);
        match self.total {
            Some(total) => served == range.resolve(total),
            // Unknown total: servers may still clamp the end.
            None => match range {
                ByteRange::Whole => true,
                ByteRange::From(start) => served.start == start,
                ByteRange::Bounded { start, end } => {
                    served.start == start && served.end <= end.saturating_add(1)
                }
                ByteRange::Suffix(n) => served.end - served.start <= n,
            },
        }
    }
}
