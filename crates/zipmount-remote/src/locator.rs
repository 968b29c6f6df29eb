use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// A parsed reference to one remote object: `scheme://container/path`.
///
/// The container is the URI host component (a bucket for S3) and the path is
/// the URI path component exactly as the URI parser returns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteLocator {
    url: Url,
}

impl RemoteLocator {
    /// Parse a locator from a URI string.
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|e| Error::InvalidLocator(format!("{uri}: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(Error::InvalidLocator(format!(
                "{uri}: expected scheme://container/path"
            )));
        }
        Ok(Self { url })
    }

    /// The URI scheme (e.g. `s3`).
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// The container identifier, empty when the URI has no host.
    pub fn container(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }

    /// The object path, including its leading slash.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// The object key: the path without its leading slash.
    pub fn key(&self) -> &str {
        self.path().trim_start_matches('/')
    }

    /// The underlying URL.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl FromStr for RemoteLocator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RemoteLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}
