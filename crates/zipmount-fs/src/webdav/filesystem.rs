//! `dav_server::fs::DavFileSystem` over an archive [`Tree`].

use crate::error::Error;
use crate::tree::{normalize_path, ArchiveEntry, EntryReader, Tree};
use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsStream, OpenOptions,
    ReadDirMeta,
};
use futures::stream;
use log::{debug, trace, warn};
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;

/// Read-only WebDAV view of one archive.
///
/// Every mutating method answers [`FsError::Forbidden`] without touching
/// the tree or the cache.
#[derive(Clone)]
pub struct ZipDavFs {
    tree: Arc<Tree>,
}

impl ZipDavFs {
    pub fn new(tree: Arc<Tree>) -> Self {
        Self { tree }
    }
}

fn tree_path(path: &DavPath) -> String {
    normalize_path(&path.as_rel_ospath().to_string_lossy())
}

fn fs_error(err: Error) -> FsError {
    match err {
        e if e.is_not_found() => FsError::NotFound,
        Error::NotADirectory(_) => FsError::NotFound,
        Error::IsDirectory(_) => FsError::Forbidden,
        e => {
            warn!("webdav request failed: {e}");
            FsError::GeneralFailure
        }
    }
}

impl DavFileSystem for ZipDavFs {
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        trace!("open({:?}, {:?})", path, options);

        Box::pin(async move {
            if options.write
                || options.append
                || options.create
                || options.create_new
                || options.truncate
            {
                return Err(FsError::Forbidden);
            }

            let path = tree_path(path);
            let entry = self.tree.stat(&path).map_err(fs_error)?;
            if entry.is_dir {
                return Err(FsError::Forbidden);
            }
            let reader = self.tree.open(&path).await.map_err(fs_error)?;
            Ok(Box::new(ZipDavFile::new(entry.clone(), reader)) as Box<dyn DavFile>)
        })
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        trace!("read_dir({:?}, {:?})", path, meta);

        let result = (|| {
            let children = self.tree.list_children(&tree_path(path)).map_err(fs_error)?;
            let entries: Vec<Box<dyn DavDirEntry>> = children
                .into_iter()
                .map(|entry| Box::new(ZipDavDirEntry::new(entry.clone())) as Box<dyn DavDirEntry>)
                .collect();

            debug!("read_dir: returning {} entries", entries.len());

            let stream = stream::iter(entries.into_iter().map(Ok));
            Ok(Box::pin(stream) as FsStream<Box<dyn DavDirEntry>>)
        })();

        Box::pin(async move { result })
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        trace!("metadata({:?})", path);

        let result = self
            .tree
            .stat(&tree_path(path))
            .map(|entry| Box::new(ZipDavMetaData::from(entry)) as Box<dyn DavMetaData>)
            .map_err(fs_error);

        Box::pin(async move { result })
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("create_dir({:?})", path);
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("remove_dir({:?})", path);
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("remove_file({:?})", path);
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("rename({:?}, {:?})", from, to);
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("copy({:?}, {:?})", from, to);
        Box::pin(async { Err(FsError::Forbidden) })
    }
}

/// An open archive file, read from its decoded copy in the cache.
#[derive(Debug)]
struct ZipDavFile {
    entry: ArchiveEntry,
    reader: EntryReader,
    /// Current read position within the entry.
    position: u64,
}

impl ZipDavFile {
    fn new(entry: ArchiveEntry, reader: EntryReader) -> Self {
        Self {
            entry,
            reader,
            position: 0,
        }
    }
}

impl DavFile for ZipDavFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = ZipDavMetaData::from(&self.entry);
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, bytes::Bytes> {
        let result = self.reader.read_at(self.position, count);
        if let Ok(buf) = &result {
            self.position += buf.len() as u64;
        }

        Box::pin(async move {
            let buf = result.map_err(fs_error)?;
            Ok(bytes::Bytes::from(buf))
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        let new_pos = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => self.reader.len().checked_add_signed(n),
            SeekFrom::Current(n) => self.position.checked_add_signed(n),
        };

        let Some(new_pos) = new_pos else {
            return Box::pin(async { Err(FsError::GeneralFailure) });
        };
        self.position = new_pos;
        Box::pin(async move { Ok(new_pos) })
    }

    fn write_buf(&mut self, _buf: Box<dyn bytes::Buf + Send>) -> FsFuture<'_, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn write_bytes(&mut self, _buf: bytes::Bytes) -> FsFuture<'_, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

struct ZipDavDirEntry {
    entry: ArchiveEntry,
}

impl ZipDavDirEntry {
    fn new(entry: ArchiveEntry) -> Self {
        Self { entry }
    }
}

impl DavDirEntry for ZipDavDirEntry {
    fn name(&self) -> Vec<u8> {
        self.entry.name().as_bytes().to_vec()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = ZipDavMetaData::from(&self.entry);
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }
}

#[derive(Clone, Debug)]
struct ZipDavMetaData {
    is_dir: bool,
    len: u64,
    modified: SystemTime,
}

impl From<&ArchiveEntry> for ZipDavMetaData {
    fn from(entry: &ArchiveEntry) -> Self {
        Self {
            is_dir: entry.is_dir,
            len: entry.size,
            modified: entry.modified,
        }
    }
}

impl DavMetaData for ZipDavMetaData {
    fn len(&self) -> u64 {
        self.len
    }

    fn modified(&self) -> Result<SystemTime, FsError> {
        Ok(self.modified)
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn created(&self) -> Result<SystemTime, FsError> {
        Ok(self.modified)
    }
}
