use crate::error::ServerError;
use crate::nfs::NfsOptions;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::TempDir;

/// Default listen address; port 0 picks a free port.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:0";

/// Prefix of auto-generated cache directories.
pub const CACHE_DIR_PREFIX: &str = "zipmount-cache-";

/// Protocol a mount is exported over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Nfs,
    WebDav,
}

impl FromStr for Protocol {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nfs" => Ok(Protocol::Nfs),
            "webdav" => Ok(Protocol::WebDav),
            other => Err(ServerError::Config(format!(
                "unknown protocol {other:?} (expected \"nfs\" or \"webdav\")"
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Nfs => f.write_str("nfs"),
            Protocol::WebDav => f.write_str("webdav"),
        }
    }
}

/// Mount server configuration.
///
/// `protocol` and `listen` are kept as given and validated when the server
/// starts, so a bad value is reported through the callback like any other
/// startup failure.
#[derive(Debug, Clone)]
pub struct MountServerConfig {
    /// Archive locator, e.g. `s3://bucket/archive.zip`.
    pub uri: String,
    /// `nfs` or `webdav`.
    pub protocol: String,
    pub listen: String,
    /// Cache directory to use and keep. A temporary one is created and
    /// removed on stop when unset.
    pub cache_dir: Option<PathBuf>,
    /// `host:port` to report the startup outcome to.
    pub callback_addr: Option<String>,
    pub nfs: NfsOptions,
}

impl MountServerConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }
}

impl Default for MountServerConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            protocol: Protocol::Nfs.to_string(),
            listen: DEFAULT_LISTEN_ADDR.to_string(),
            cache_dir: None,
            callback_addr: None,
            nfs: NfsOptions::default(),
        }
    }
}

/// The cache directory of a running mount.
#[derive(Debug)]
pub(crate) enum CacheDir {
    /// Supplied by the user; left in place.
    Explicit(PathBuf),
    /// Created for this mount; removed on stop.
    Temporary(TempDir),
}

impl CacheDir {
    pub(crate) fn prepare(explicit: Option<&Path>) -> Result<Self, ServerError> {
        match explicit {
            Some(path) => {
                fs::create_dir_all(path).map_err(|e| {
                    ServerError::Config(format!("cache directory {}: {e}", path.display()))
                })?;
                Ok(CacheDir::Explicit(path.to_path_buf()))
            }
            None => tempfile::Builder::new()
                .prefix(CACHE_DIR_PREFIX)
                .tempdir()
                .map(CacheDir::Temporary)
                .map_err(|e| ServerError::Config(format!("temporary cache directory: {e}"))),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        match self {
            CacheDir::Explicit(path) => path,
            CacheDir::Temporary(dir) => dir.path(),
        }
    }

    /// Remove the directory if it was created for this mount.
    pub(crate) fn cleanup(self) -> Result<(), ServerError> {
        match self {
            CacheDir::Explicit(_) => Ok(()),
            CacheDir::Temporary(dir) => {
                let path = dir.path().display().to_string();
                dir.close()
                    .map_err(|source| ServerError::Cleanup { path, source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parse() {
        assert_eq!("nfs".parse::<Protocol>().unwrap(), Protocol::Nfs);
        assert_eq!("WebDAV".parse::<Protocol>().unwrap(), Protocol::WebDav);
        assert!(matches!(
            "smb".parse::<Protocol>(),
            Err(ServerError::Config(msg)) if msg.contains("smb")
        ));
    }

    #[test]
    fn test_defaults() {
        let config = MountServerConfig::new("s3://bucket/a.zip");
        assert_eq!(config.protocol, "nfs");
        assert_eq!(config.listen, "127.0.0.1:0");
        assert_eq!(config.nfs.handle_cache_size, 100_000);
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn test_temporary_cache_dir_is_removed() {
        let dir = CacheDir::prepare(None).unwrap();
        let path = dir.path().to_path_buf();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(CACHE_DIR_PREFIX));
        assert!(path.is_dir());
        dir.cleanup().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_explicit_cache_dir_is_kept() {
        let parent = TempDir::new().unwrap();
        let path = parent.path().join("nested").join("cache");
        let dir = CacheDir::prepare(Some(&path)).unwrap();
        assert!(path.is_dir());
        dir.cleanup().unwrap();
        assert!(path.is_dir());
    }
}
