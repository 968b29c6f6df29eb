//! In-memory index of a remote archive.
//!
//! A [`Tree`] is built once per mount from a handful of range reads (the
//! trailer, the central directory) and is immutable afterwards. Entry
//! payloads are fetched and decoded on first [`Tree::open`] and served from
//! the [`LocalCache`] from then on.

use crate::cache::{CacheKey, LocalCache};
use crate::error::{Error, Result};
use futures::TryStreamExt;
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use zipmount_format::{
    parse_central_directory, resolve_zip64, scan_tail, Compression, EndOfCentralDirectory,
    LocalFileHeader, PayloadDecoder, TailScan, ZipEntry, INITIAL_TAIL_LEN, LOCAL_HEADER_LEN,
    ZIP64_EOCD_LEN,
};
use zipmount_remote::{read_range, ByteRange, RangeStore, RemoteLocator};

/// Smallest possible archive: an empty end-of-central-directory record.
const MIN_ARCHIVE_LEN: u64 = 22;

/// One file or directory of the mounted archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Rooted, normalized path. The root is `/`.
    pub path: String,
    pub is_dir: bool,
    /// Uncompressed size. Zero for directories.
    pub size: u64,
    pub compressed_size: u64,
    pub modified: SystemTime,
    /// Unix mode bits recorded in the archive, if any.
    pub mode: Option<u32>,
    /// Offset of the local file header in the remote object.
    pub header_offset: u64,
    pub compression: Compression,
    pub crc32: u32,
    pub encrypted: bool,
}

impl ArchiveEntry {
    /// A directory with no record of its own in the archive.
    fn synthetic_dir(path: String, modified: SystemTime) -> Self {
        Self {
            path,
            is_dir: true,
            size: 0,
            compressed_size: 0,
            modified,
            mode: None,
            header_offset: 0,
            compression: Compression::Stored,
            crc32: 0,
            encrypted: false,
        }
    }

    fn from_record(path: String, record: ZipEntry) -> Self {
        let is_dir = record.is_dir;
        Self {
            path,
            is_dir,
            size: if is_dir { 0 } else { record.size },
            compressed_size: record.compressed_size,
            modified: record.modified,
            mode: record.unix_mode,
            header_offset: record.header_offset,
            compression: record.compression,
            crc32: record.crc32,
            encrypted: record.encrypted,
        }
    }

    /// Last path component; empty for the root.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    /// Permission bits, without the file type.
    pub fn permissions(&self) -> Option<u32> {
        self.mode.map(|m| m & 0o7777)
    }
}

/// Normalize a client or archive path to the rooted form used as tree key.
///
/// Both `/` and `\` separate components; empty and `.` components are
/// dropped and `..` removes the previous component without escaping the
/// root.
pub fn normalize_path(raw: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in raw.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(at) => &path[..at],
    }
}

struct Node {
    entry: ArchiveEntry,
    /// Indices into `Tree::nodes`, ordered by name.
    children: Vec<usize>,
}

/// Immutable index of one remote archive.
pub struct Tree {
    locator: RemoteLocator,
    store: Arc<dyn RangeStore>,
    cache: Arc<LocalCache>,
    object_size: u64,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("locator", &self.locator)
            .field("object_size", &self.object_size)
            .field("entries", &self.entry_count())
            .finish()
    }
}

impl Tree {
    /// Index the archive at `locator`. Any failure fails the whole build.
    pub async fn build(
        locator: RemoteLocator,
        store: Arc<dyn RangeStore>,
        cache: Arc<LocalCache>,
    ) -> Result<Self> {
        let object_size = store.size_of(&locator).await?;
        info!("indexing {locator} ({object_size} bytes)");

        let eocd = locate_directory(&locator, store.as_ref(), object_size).await?;
        let directory = read_directory(&locator, store.as_ref(), &cache, object_size, &eocd).await?;
        let records = parse_central_directory(&directory, eocd.entries)?;
        debug!("{locator}: {} central directory records", records.len());
        check_entry_bounds(&records, object_size)?;

        let (nodes, index) = assemble(records);
        let tree = Self {
            locator,
            store,
            cache,
            object_size,
            nodes,
            index,
        };
        info!("indexed {} ({} entries)", tree.locator, tree.entry_count());
        Ok(tree)
    }

    /// Number of entries, not counting the root.
    pub fn entry_count(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn stat(&self, path: &str) -> Result<&ArchiveEntry> {
        self.node(path).map(|node| &node.entry)
    }

    /// Children of a directory, ordered by name. The order is stable for
    /// the lifetime of the tree.
    pub fn list_children(&self, path: &str) -> Result<Vec<&ArchiveEntry>> {
        let node = self.node(path)?;
        if !node.entry.is_dir {
            return Err(Error::NotADirectory(node.entry.path.clone()));
        }
        Ok(node
            .children
            .iter()
            .map(|&child| &self.nodes[child].entry)
            .collect())
    }

    /// Every entry below the root, depth first, children in name order.
    pub fn walk(&self) -> Vec<&ArchiveEntry> {
        let mut out = Vec::with_capacity(self.entry_count());
        let mut stack: Vec<usize> = self.nodes[0].children.iter().rev().copied().collect();
        while let Some(at) = stack.pop() {
            let node = &self.nodes[at];
            out.push(&node.entry);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Open a file for reading, fetching and decoding it on a cache miss.
    pub async fn open(&self, path: &str) -> Result<EntryReader> {
        let entry = self.stat(path)?;
        if entry.is_dir {
            return Err(Error::IsDirectory(entry.path.clone()));
        }
        if entry.encrypted {
            return Err(Error::Unsupported {
                path: entry.path.clone(),
                reason: "entry is encrypted".to_string(),
            });
        }
        if let Compression::Other(method) = entry.compression {
            return Err(Error::Unsupported {
                path: entry.path.clone(),
                reason: format!("compression method {method}"),
            });
        }

        let key = CacheKey::Entry {
            locator: &self.locator,
            header_offset: entry.header_offset,
            compressed_size: entry.compressed_size,
            size: entry.size,
            crc32: entry.crc32,
        };
        let file = self
            .cache
            .get_or_fill(&key, |tmp| self.fetch_entry(entry, tmp))
            .await?;
        EntryReader::open(&file, entry.size)
    }

    async fn fetch_entry(&self, entry: &ArchiveEntry, tmp: NamedTempFile) -> Result<NamedTempFile> {
        debug!("fetching {} from {}", entry.path, self.locator);
        let header = read_range(
            self.store.as_ref(),
            &self.locator,
            ByteRange::span(entry.header_offset, LOCAL_HEADER_LEN as u64),
        )
        .await?;
        let start = LocalFileHeader::parse(&header)?.data_offset(entry.header_offset);
        if start.saturating_add(entry.compressed_size) > self.object_size {
            return Err(zipmount_format::Error::Malformed(format!(
                "payload of {} runs past the end of the archive",
                entry.path
            ))
            .into());
        }

        let mut decoder = PayloadDecoder::new(entry.compression, entry.size, entry.crc32, tmp)?;
        if entry.compressed_size > 0 {
            let mut body = self
                .store
                .download(&self.locator, ByteRange::span(start, entry.compressed_size))
                .await?;
            while let Some(chunk) = body.try_next().await? {
                decoder.write_chunk(&chunk)?;
            }
        }
        Ok(decoder.finish()?)
    }

    fn node(&self, path: &str) -> Result<&Node> {
        let path = normalize_path(path);
        match self.index.get(&path) {
            Some(&at) => Ok(&self.nodes[at]),
            None => Err(Error::NotFound(path)),
        }
    }
}

/// Find the end-of-central-directory record, widening the trailer window
/// from 64 KiB by doubling until it spans the whole object.
async fn locate_directory(
    locator: &RemoteLocator,
    store: &dyn RangeStore,
    object_size: u64,
) -> Result<EndOfCentralDirectory> {
    if object_size < MIN_ARCHIVE_LEN {
        return Err(zipmount_format::Error::Malformed(format!(
            "{object_size} bytes is too small for a zip archive"
        ))
        .into());
    }

    let mut window = INITIAL_TAIL_LEN.min(object_size);
    loop {
        debug!("{locator}: scanning last {window} bytes for the directory record");
        let tail = read_range(store, locator, ByteRange::Suffix(window)).await?;
        let tail_offset = object_size - tail.len() as u64;

        match scan_tail(&tail, tail_offset)? {
            TailScan::Directory(eocd) => return Ok(eocd),
            TailScan::Zip64 {
                eocd,
                record_offset,
            } => {
                let record_end = record_offset.saturating_add(ZIP64_EOCD_LEN as u64);
                let record = if record_offset >= tail_offset && record_end <= object_size {
                    let at = (record_offset - tail_offset) as usize;
                    tail.slice(at..at + ZIP64_EOCD_LEN)
                } else {
                    read_range(
                        store,
                        locator,
                        ByteRange::span(record_offset, ZIP64_EOCD_LEN as u64),
                    )
                    .await?
                };
                return Ok(resolve_zip64(eocd, &record, record_offset)?);
            }
            TailScan::NotFound if window < object_size => {
                window = window.saturating_mul(2).min(object_size);
            }
            TailScan::NotFound => {
                return Err(zipmount_format::Error::Malformed(
                    "end of central directory record not found".to_string(),
                )
                .into())
            }
        }
    }
}

/// Fetch the central directory with one range read, through the cache.
async fn read_directory(
    locator: &RemoteLocator,
    store: &dyn RangeStore,
    cache: &LocalCache,
    object_size: u64,
    eocd: &EndOfCentralDirectory,
) -> Result<Vec<u8>> {
    if eocd.directory_size == 0 {
        return Ok(Vec::new());
    }
    let start = eocd.directory_offset;
    let end = start + eocd.directory_size;
    if end > object_size {
        return Err(zipmount_format::Error::Malformed(
            "central directory lies outside the archive".to_string(),
        )
        .into());
    }

    let key = CacheKey::Range {
        locator,
        object_size,
        start,
        end,
    };
    cache
        .read_or_fill(&key, |mut tmp| async move {
            let bytes = read_range(store, locator, ByteRange::span(start, end - start)).await?;
            io::Write::write_all(&mut tmp, &bytes)?;
            Ok::<_, Error>(tmp)
        })
        .await
}

/// Every file's local header and payload must lie inside the object.
fn check_entry_bounds(records: &[ZipEntry], object_size: u64) -> Result<()> {
    for record in records.iter().filter(|r| !r.is_dir) {
        let end = record
            .header_offset
            .checked_add(LOCAL_HEADER_LEN as u64)
            .and_then(|end| end.checked_add(record.compressed_size));
        if end.map_or(true, |end| end > object_size) {
            return Err(zipmount_format::Error::Malformed(format!(
                "entry {:?} at offset {} lies outside the archive ({object_size} bytes)",
                record.name, record.header_offset
            ))
            .into());
        }
    }
    Ok(())
}

/// Arrange directory records into the node arena.
///
/// Paths are sorted first so that every parent is inserted before its
/// children, and implicit directories are materialized in the same pass.
fn assemble(records: Vec<ZipEntry>) -> (Vec<Node>, HashMap<String, usize>) {
    let newest = records
        .iter()
        .map(|r| r.modified)
        .max()
        .unwrap_or(UNIX_EPOCH);

    let mut entries: BTreeMap<String, ArchiveEntry> = BTreeMap::new();
    for record in records {
        if record.name.split(['/', '\\']).any(|part| part == "..") {
            warn!("skipping entry with parent components: {:?}", record.name);
            continue;
        }
        let path = normalize_path(&record.name);
        if path == "/" {
            if !record.is_dir {
                warn!("skipping entry with an empty name: {:?}", record.name);
            }
            continue;
        }
        let entry = ArchiveEntry::from_record(path.clone(), record);
        if let Some(previous) = entries.insert(path, entry) {
            debug!("duplicate entry {}, keeping the later record", previous.path);
        }
    }

    let mut dirs: BTreeSet<String> = BTreeSet::new();
    for (path, entry) in &entries {
        if entry.is_dir {
            dirs.insert(path.clone());
        }
        let mut parent = parent_of(path);
        while parent != "/" {
            if !dirs.insert(parent.to_string()) {
                break;
            }
            parent = parent_of(parent);
        }
    }
    for dir in &dirs {
        match entries.get(dir) {
            Some(entry) if entry.is_dir => {}
            Some(_) => {
                warn!("dropping file {dir}: the path is also a directory");
                entries.insert(dir.clone(), ArchiveEntry::synthetic_dir(dir.clone(), newest));
            }
            None => {
                entries.insert(dir.clone(), ArchiveEntry::synthetic_dir(dir.clone(), newest));
            }
        }
    }

    let mut nodes = vec![Node {
        entry: ArchiveEntry::synthetic_dir("/".to_string(), newest),
        children: Vec::new(),
    }];
    let mut index = HashMap::with_capacity(entries.len() + 1);
    index.insert("/".to_string(), 0);

    // Siblings share their parent's prefix, so sorted paths put them in
    // name order.
    for (path, entry) in entries {
        let at = nodes.len();
        let parent = index.get(parent_of(&path)).copied().unwrap_or(0);
        nodes[parent].children.push(at);
        index.insert(path, at);
        nodes.push(Node {
            entry,
            children: Vec::new(),
        });
    }
    (nodes, index)
}

/// Read handle on a decoded entry in the local cache.
#[derive(Debug)]
pub struct EntryReader {
    file: File,
    len: u64,
}

impl EntryReader {
    fn open(path: &Path, len: u64) -> Result<Self> {
        let file = File::open(path)?;
        let actual = file.metadata()?.len();
        if actual != len {
            return Err(zipmount_format::Error::LengthMismatch {
                expected: len,
                actual,
            }
            .into());
        }
        Ok(Self { file, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Up to `len` bytes at `offset`. Shorter only at the end of the entry;
    /// empty at or past it.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let end = offset.saturating_add(len as u64).min(self.len);
        if offset >= end {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; (end - offset) as usize];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for EntryReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, size: u64) -> ZipEntry {
        ZipEntry {
            name: name.to_string(),
            is_dir: name.ends_with('/'),
            size,
            compressed_size: size,
            crc32: 0,
            compression: Compression::Stored,
            header_offset: 0,
            modified: UNIX_EPOCH,
            unix_mode: None,
            encrypted: false,
        }
    }

    fn paths(nodes: &[Node], at: usize) -> Vec<&str> {
        nodes[at]
            .children
            .iter()
            .map(|&c| nodes[c].entry.path.as_str())
            .collect()
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("a/b.txt"), "/a/b.txt");
        assert_eq!(normalize_path("/a//b/"), "/a/b");
        assert_eq!(normalize_path("a\\c\\"), "/a/c");
        assert_eq!(normalize_path("./a/./b"), "/a/b");
        assert_eq!(normalize_path("/a/x/../b"), "/a/b");
        assert_eq!(normalize_path("/../../a"), "/a");
    }

    #[test]
    fn test_parent_of() {
        assert_eq!(parent_of("/a"), "/");
        assert_eq!(parent_of("/a/b"), "/a");
        assert_eq!(parent_of("/"), "/");
    }

    #[test]
    fn test_implicit_directories_are_materialized() {
        let (nodes, index) = assemble(vec![record("x/y/z.txt", 3), record("b.txt", 1)]);
        assert_eq!(paths(&nodes, 0), vec!["/b.txt", "/x"]);
        let x = index["/x"];
        assert!(nodes[x].entry.is_dir);
        assert_eq!(nodes[x].entry.size, 0);
        assert_eq!(paths(&nodes, x), vec!["/x/y"]);
        assert_eq!(paths(&nodes, index["/x/y"]), vec!["/x/y/z.txt"]);
    }

    #[test]
    fn test_parent_components_are_skipped() {
        let (nodes, index) = assemble(vec![record("../evil", 1), record("a/../../b", 1), record("ok", 1)]);
        assert_eq!(paths(&nodes, 0), vec!["/ok"]);
        assert!(!index.contains_key("/evil"));
    }

    #[test]
    fn test_later_duplicate_wins() {
        let (nodes, index) = assemble(vec![record("f", 1), record("./f", 2)]);
        assert_eq!(nodes[index["/f"]].entry.size, 2);
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_directory_wins_over_file() {
        let (nodes, index) = assemble(vec![record("a", 5), record("a/b", 1)]);
        let a = &nodes[index["/a"]];
        assert!(a.entry.is_dir);
        assert_eq!(a.entry.size, 0);
        assert_eq!(paths(&nodes, index["/a"]), vec!["/a/b"]);
    }

    #[test]
    fn test_sibling_order_is_byte_order() {
        let (nodes, _) = assemble(vec![
            record("b", 1),
            record("a-c", 1),
            record("a/x", 1),
            record("B", 1),
        ]);
        assert_eq!(paths(&nodes, 0), vec!["/B", "/a", "/a-c", "/b"]);
    }

    #[test]
    fn test_entry_bounds() {
        let mut inside = record("a.txt", 10);
        inside.header_offset = 100;
        let end = 100 + LOCAL_HEADER_LEN as u64 + 10;
        assert!(check_entry_bounds(&[inside.clone()], end).is_ok());
        assert!(check_entry_bounds(&[inside], end - 1).is_err());

        let mut hostile = record("b.txt", 10);
        hostile.header_offset = u64::MAX - 8;
        let err = check_entry_bounds(&[hostile], 1 << 20).unwrap_err();
        assert!(matches!(err, Error::Format(zipmount_format::Error::Malformed(_))));

        // Directory records carry no payload.
        let mut dir = record("d/", 0);
        dir.header_offset = u64::MAX;
        assert!(check_entry_bounds(&[dir], 1 << 20).is_ok());
    }

    #[test]
    fn test_entry_name() {
        let entry = ArchiveEntry::synthetic_dir("/a/c".to_string(), UNIX_EPOCH);
        assert_eq!(entry.name(), "c");
        let root = ArchiveEntry::synthetic_dir("/".to_string(), UNIX_EPOCH);
        assert_eq!(root.name(), "");
    }
}
