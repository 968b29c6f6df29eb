use super::handles::{HandleCache, HandlePin, DEFAULT_HANDLE_CACHE_SIZE, ROOT_HANDLE};
use crate::error::Error;
use crate::tree::{normalize_path, ArchiveEntry, Tree};
use async_trait::async_trait;
use log::{trace, warn};
use nfsserve::nfs::{
    fattr3, fileid3, filename3, ftype3, nfspath3, nfsstat3, nfstime3, sattr3, specdata3,
};
use nfsserve::vfs::{DirEntry, NFSFileSystem, ReadDirResult, VFSCapabilities};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const DEFAULT_FILE_MODE: u32 = 0o444;
const DEFAULT_DIR_MODE: u32 = 0o555;
const WRITE_BITS: u32 = 0o222;

/// NFS adapter settings.
#[derive(Debug, Clone)]
pub struct NfsOptions {
    /// How many file handles to keep before evicting the least recently
    /// used ones. Values below
    /// [`MIN_HANDLE_CACHE_SIZE`](super::handles::MIN_HANDLE_CACHE_SIZE) are
    /// raised to it.
    pub handle_cache_size: usize,
}

impl Default for NfsOptions {
    fn default() -> Self {
        Self {
            handle_cache_size: DEFAULT_HANDLE_CACHE_SIZE,
        }
    }
}

/// Read-only NFSv3 export of an archive [`Tree`].
pub struct ZipNfs {
    tree: Arc<Tree>,
    handles: HandleCache,
    uid: u32,
    gid: u32,
}

impl ZipNfs {
    pub fn new(tree: Arc<Tree>, options: NfsOptions) -> Self {
        // SAFETY: getuid and getgid cannot fail and have no preconditions.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            tree,
            handles: HandleCache::new(options.handle_cache_size),
            uid,
            gid,
        }
    }

    pub fn handles(&self) -> &HandleCache {
        &self.handles
    }

    /// Resolve a handle to its path, pinned for the rest of the request.
    fn resolve(&self, id: fileid3) -> Result<(HandlePin<'_>, String), nfsstat3> {
        self.handles.pin(id).ok_or(nfsstat3::NFS3ERR_STALE)
    }

    fn attributes(&self, id: fileid3, entry: &ArchiveEntry) -> fattr3 {
        let default_mode = if entry.is_dir {
            DEFAULT_DIR_MODE
        } else {
            DEFAULT_FILE_MODE
        };
        let mode = entry.permissions().unwrap_or(default_mode) & !WRITE_BITS;
        let mtime = nfs_time(entry.modified);
        fattr3 {
            ftype: if entry.is_dir {
                ftype3::NF3DIR
            } else {
                ftype3::NF3REG
            },
            mode,
            nlink: if entry.is_dir { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            size: entry.size,
            used: entry.size,
            rdev: specdata3::default(),
            fsid: 0,
            fileid: id,
            atime: mtime,
            mtime,
            ctime: mtime,
        }
    }
}

fn nfs_time(time: SystemTime) -> nfstime3 {
    let since = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    nfstime3 {
        seconds: since.as_secs().min(u64::from(u32::MAX)) as u32,
        nseconds: since.subsec_nanos(),
    }
}

fn nfs_error(err: Error) -> nfsstat3 {
    match err {
        e if e.is_not_found() => nfsstat3::NFS3ERR_NOENT,
        Error::NotADirectory(_) => nfsstat3::NFS3ERR_NOTDIR,
        Error::IsDirectory(_) => nfsstat3::NFS3ERR_ISDIR,
        e => {
            warn!("nfs request failed: {e}");
            nfsstat3::NFS3ERR_IO
        }
    }
}

#[async_trait]
impl NFSFileSystem for ZipNfs {
    fn capabilities(&self) -> VFSCapabilities {
        VFSCapabilities::ReadOnly
    }

    fn root_dir(&self) -> fileid3 {
        ROOT_HANDLE
    }

    async fn lookup(&self, dirid: fileid3, filename: &filename3) -> Result<fileid3, nfsstat3> {
        let (_pin, dir) = self.resolve(dirid)?;
        let name = String::from_utf8_lossy(&filename[..]);
        trace!("lookup({dir:?}, {name:?})");

        if !self.tree.stat(&dir).map_err(nfs_error)?.is_dir {
            return Err(nfsstat3::NFS3ERR_NOTDIR);
        }
        if name.contains(['/', '\\']) {
            return Err(nfsstat3::NFS3ERR_NOENT);
        }
        // `.` and `..` are resolved lexically by normalization.
        let path = normalize_path(&format!("{dir}/{name}"));
        self.tree.stat(&path).map_err(nfs_error)?;
        Ok(self.handles.handle_for(&path))
    }

    async fn getattr(&self, id: fileid3) -> Result<fattr3, nfsstat3> {
        let (_pin, path) = self.resolve(id)?;
        trace!("getattr({path:?})");
        let entry = self.tree.stat(&path).map_err(nfs_error)?;
        Ok(self.attributes(id, entry))
    }

    async fn setattr(&self, _id: fileid3, _setattr: sattr3) -> Result<fattr3, nfsstat3> {
        Err(nfsstat3::NFS3ERR_PERM)
    }

    async fn read(
        &self,
        id: fileid3,
        offset: u64,
        count: u32,
    ) -> Result<(Vec<u8>, bool), nfsstat3> {
        let (_pin, path) = self.resolve(id)?;
        trace!("read({path:?}, {offset}, {count})");
        let reader = self.tree.open(&path).await.map_err(nfs_error)?;
        let data = reader.read_at(offset, count as usize).map_err(nfs_error)?;
        let eof = offset.saturating_add(data.len() as u64) >= reader.len();
        Ok((data, eof))
    }

    async fn write(&self, _id: fileid3, _offset: u64, _data: &[u8]) -> Result<fattr3, nfsstat3> {
        Err(nfsstat3::NFS3ERR_PERM)
    }

    async fn create(
        &self,
        _dirid: fileid3,
        _filename: &filename3,
        _attr: sattr3,
    ) -> Result<(fileid3, fattr3), nfsstat3> {
        Err(nfsstat3::NFS3ERR_PERM)
    }

    async fn create_exclusive(
        &self,
        _dirid: fileid3,
        _filename: &filename3,
    ) -> Result<fileid3, nfsstat3> {
        Err(nfsstat3::NFS3ERR_PERM)
    }

    async fn mkdir(
        &self,
        _dirid: fileid3,
        _dirname: &filename3,
    ) -> Result<(fileid3, fattr3), nfsstat3> {
        Err(nfsstat3::NFS3ERR_PERM)
    }

    async fn remove(&self, _dirid: fileid3, _filename: &filename3) -> Result<(), nfsstat3> {
        Err(nfsstat3::NFS3ERR_PERM)
    }

    async fn rename(
        &self,
        _from_dirid: fileid3,
        _from_filename: &filename3,
        _to_dirid: fileid3,
        _to_filename: &filename3,
    ) -> Result<(), nfsstat3> {
        Err(nfsstat3::NFS3ERR_PERM)
    }

    async fn readdir(
        &self,
        dirid: fileid3,
        start_after: fileid3,
        max_entries: usize,
    ) -> Result<ReadDirResult, nfsstat3> {
        let (_pin, dir) = self.resolve(dirid)?;
        trace!("readdir({dir:?}, {start_after}, {max_entries})");
        let children = self.tree.list_children(&dir).map_err(nfs_error)?;

        // The cookie is the handle of the last entry already returned.
        let start = if start_after == 0 {
            0
        } else {
            let after = self
                .handles
                .path_of(start_after)
                .ok_or(nfsstat3::NFS3ERR_BAD_COOKIE)?;
            children
                .iter()
                .position(|child| child.path == after)
                .map(|at| at + 1)
                .ok_or(nfsstat3::NFS3ERR_BAD_COOKIE)?
        };

        // Every handle in a reply stays valid until the reply is built.
        let mut pins = Vec::new();
        let entries: Vec<DirEntry> = children[start..]
            .iter()
            .take(max_entries)
            .map(|child| {
                let pin = self.handles.pinned_handle_for(&child.path);
                let fileid = pin.handle();
                pins.push(pin);
                DirEntry {
                    fileid,
                    name: child.name().as_bytes().to_vec().into(),
                    attr: self.attributes(fileid, child),
                }
            })
            .collect();
        // The directory and the next page's cookie are evicted last.
        self.handles.touch(dirid);
        if let Some(last) = entries.last() {
            self.handles.touch(last.fileid);
        }
        let end = start + entries.len() >= children.len();
        Ok(ReadDirResult { entries, end })
    }

    async fn symlink(
        &self,
        _dirid: fileid3,
        _linkname: &filename3,
        _symlink: &nfspath3,
        _attr: &sattr3,
    ) -> Result<(fileid3, fattr3), nfsstat3> {
        Err(nfsstat3::NFS3ERR_PERM)
    }

    async fn readlink(&self, _id: fileid3) -> Result<nfspath3, nfsstat3> {
        Err(nfsstat3::NFS3ERR_INVAL)
    }
}
