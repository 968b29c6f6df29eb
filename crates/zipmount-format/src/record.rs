//! Fixed-layout ZIP records.
//!
//! Everything here works on byte slices the caller has already fetched; no
//! I/O happens in this module. Offsets are absolute positions in the
//! archive unless stated otherwise.

use crate::entry::{dos_datetime, unix_seconds, Compression, ZipEntry};
use crate::error::{Error, Result};

pub const EOCD_SIGNATURE: u32 = 0x0605_4b50;
pub const EOCD_LEN: usize = 22;
pub const MAX_COMMENT_LEN: usize = 0xffff;

pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
pub const ZIP64_LOCATOR_LEN: usize = 20;

pub const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
pub const ZIP64_EOCD_LEN: usize = 56;

pub const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
pub const CENTRAL_HEADER_LEN: usize = 46;

pub const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
pub const LOCAL_HEADER_LEN: usize = 30;

const ZIP64_EXTRA_ID: u16 = 0x0001;
const EXTENDED_TIMESTAMP_ID: u16 = 0x5455;

const FLAG_ENCRYPTED: u16 = 1 << 0;
const FLAG_UTF8: u16 = 1 << 11;

const HOST_UNIX: u8 = 3;
const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const DOS_DIRECTORY: u32 = 0x10;

/// Little-endian reader over a byte slice.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, pos: 0, what }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| Error::malformed(format!("{} truncated", self.what)))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

fn le_u32_at(buf: &[u8], at: usize) -> Option<u32> {
    let b = buf.get(at..at + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// The end-of-central-directory record, widened to 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u32,
    pub directory_disk: u32,
    pub entries: u64,
    pub directory_size: u64,
    pub directory_offset: u64,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    /// Search `tail` (the last bytes of an archive) for the record, scanning
    /// backwards. A candidate only counts if its comment length reaches
    /// exactly the end of `tail`, which rules out signatures that happen to
    /// appear inside a comment. Returns the record's position within `tail`.
    pub fn find(tail: &[u8]) -> Option<(usize, Self)> {
        if tail.len() < EOCD_LEN {
            return None;
        }
        let last = tail.len() - EOCD_LEN;
        let first = last.saturating_sub(MAX_COMMENT_LEN);
        (first..=last).rev().find_map(|at| {
            if le_u32_at(tail, at)? != EOCD_SIGNATURE {
                return None;
            }
            let record = Self::parse(&tail[at..at + EOCD_LEN]).ok()?;
            (at + EOCD_LEN + record.comment_len as usize == tail.len()).then_some((at, record))
        })
    }

    /// Parse the fixed 22-byte record.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut c = Cursor::new(buf, "end of central directory record");
        if c.u32()? != EOCD_SIGNATURE {
            return Err(Error::malformed("end of central directory record not found"));
        }
        let disk_number = c.u16()?;
        let directory_disk = c.u16()?;
        let _entries_on_disk = c.u16()?;
        let entries = c.u16()?;
        let directory_size = c.u32()?;
        let directory_offset = c.u32()?;
        let comment_len = c.u16()?;
        Ok(Self {
            disk_number: disk_number.into(),
            directory_disk: directory_disk.into(),
            entries: entries.into(),
            directory_size: directory_size.into(),
            directory_offset: directory_offset.into(),
            comment_len,
        })
    }

    /// True when any field is saturated and the real value lives in the
    /// ZIP64 record.
    pub fn needs_zip64(&self) -> bool {
        self.disk_number == 0xffff
            || self.directory_disk == 0xffff
            || self.entries == 0xffff
            || self.directory_size == 0xffff_ffff
            || self.directory_offset == 0xffff_ffff
    }

    /// Replace the 32-bit fields with those of a ZIP64 end record.
    pub fn apply_zip64(&mut self, record: &Zip64EndOfCentralDirectory) {
        self.disk_number = record.disk_number;
        self.directory_disk = record.directory_disk;
        self.entries = record.entries;
        self.directory_size = record.directory_size;
        self.directory_offset = record.directory_offset;
    }

    /// Reject layouts this crate does not read.
    pub fn check_supported(&self) -> Result<()> {
        if self.disk_number != 0 || self.directory_disk != 0 {
            return Err(Error::Unsupported("multi-disk archives".to_string()));
        }
        Ok(())
    }
}

/// The ZIP64 end-of-central-directory locator, which sits immediately
/// before the classic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64Locator {
    pub record_offset: u64,
}

impl Zip64Locator {
    /// Parse the locator, or `None` when the bytes carry no locator.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < ZIP64_LOCATOR_LEN || le_u32_at(buf, 0) != Some(ZIP64_LOCATOR_SIGNATURE) {
            return Ok(None);
        }
        let mut c = Cursor::new(buf, "zip64 end of central directory locator");
        c.u32()?;
        let _disk = c.u32()?;
        let record_offset = c.u64()?;
        Ok(Some(Self { record_offset }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectory {
    pub disk_number: u32,
    pub directory_disk: u32,
    pub entries: u64,
    pub directory_size: u64,
    pub directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut c = Cursor::new(buf, "zip64 end of central directory record");
        if c.u32()? != ZIP64_EOCD_SIGNATURE {
            return Err(Error::malformed(
                "zip64 end of central directory record has a bad signature",
            ));
        }
        let _record_size = c.u64()?;
        let _made_by = c.u16()?;
        let _needed = c.u16()?;
        let disk_number = c.u32()?;
        let directory_disk = c.u32()?;
        let _entries_on_disk = c.u64()?;
        let entries = c.u64()?;
        let directory_size = c.u64()?;
        let directory_offset = c.u64()?;
        Ok(Self {
            disk_number,
            directory_disk,
            entries,
            directory_size,
            directory_offset,
        })
    }
}

/// Parse a complete central directory holding `expected` records.
pub fn parse_central_directory(buf: &[u8], expected: u64) -> Result<Vec<ZipEntry>> {
    let mut c = Cursor::new(buf, "central directory");
    let mut entries = Vec::with_capacity(expected.min(1 << 16) as usize);
    while (entries.len() as u64) < expected {
        if c.remaining() < CENTRAL_HEADER_LEN {
            return Err(Error::malformed(format!(
                "central directory truncated after {} of {expected} records",
                entries.len()
            )));
        }
        entries.push(parse_central_record(&mut c, entries.len())?);
    }
    if c.remaining() >= 4 && le_u32_at(buf, c.pos) == Some(CENTRAL_HEADER_SIGNATURE) {
        return Err(Error::malformed(format!(
            "central directory holds more than the {expected} records its end record declares"
        )));
    }
    Ok(entries)
}

fn parse_central_record(c: &mut Cursor<'_>, index: usize) -> Result<ZipEntry> {
    let signature = c.u32()?;
    if signature != CENTRAL_HEADER_SIGNATURE {
        return Err(Error::malformed(format!(
            "central directory record {index} has bad signature {signature:#010x}"
        )));
    }
    let made_by = c.u16()?;
    let _needed = c.u16()?;
    let flags = c.u16()?;
    let method = c.u16()?;
    let dos_time = c.u16()?;
    let dos_date = c.u16()?;
    let crc32 = c.u32()?;
    let mut compressed_size = u64::from(c.u32()?);
    let mut size = u64::from(c.u32()?);
    let name_len = c.u16()? as usize;
    let extra_len = c.u16()? as usize;
    let comment_len = c.u16()? as usize;
    let _disk_start = c.u16()?;
    let _internal_attrs = c.u16()?;
    let external_attrs = c.u32()?;
    let mut header_offset = u64::from(c.u32()?);

    let raw_name = c.take(name_len)?;
    let extra = c.take(extra_len)?;
    c.take(comment_len)?;

    let name = if flags & FLAG_UTF8 != 0 {
        String::from_utf8(raw_name.to_vec()).map_err(|_| {
            Error::malformed(format!(
                "central directory record {index} has a name that is not UTF-8"
            ))
        })?
    } else {
        String::from_utf8_lossy(raw_name).into_owned()
    };

    let mut modified = dos_datetime(dos_date, dos_time);
    for (id, data) in ExtraFields::new(extra) {
        match id {
            ZIP64_EXTRA_ID => {
                let mut z = Cursor::new(data, "zip64 extra field");
                if size == 0xffff_ffff {
                    size = z.u64()?;
                }
                if compressed_size == 0xffff_ffff {
                    compressed_size = z.u64()?;
                }
                if header_offset == 0xffff_ffff {
                    header_offset = z.u64()?;
                }
            }
            EXTENDED_TIMESTAMP_ID => {
                // Flags byte, then mtime first when bit 0 is set.
                if data.len() >= 5 && data[0] & 1 != 0 {
                    let secs = i32::from_le_bytes([data[1], data[2], data[3], data[4]]);
                    modified = unix_seconds(secs.into());
                }
            }
            _ => {}
        }
    }

    let host = (made_by >> 8) as u8;
    let unix_mode = (host == HOST_UNIX)
        .then_some(external_attrs >> 16)
        .filter(|mode| *mode != 0);
    let is_dir = name.ends_with('/')
        || unix_mode.is_some_and(|m| m & S_IFMT == S_IFDIR)
        || external_attrs & DOS_DIRECTORY != 0;

    Ok(ZipEntry {
        name,
        is_dir,
        size,
        compressed_size,
        crc32,
        compression: Compression::from(method),
        header_offset,
        modified,
        unix_mode,
        encrypted: flags & FLAG_ENCRYPTED != 0,
    })
}

/// Iterator over `(id, data)` pairs of an extra field block. Stops at the
/// first truncated field.
struct ExtraFields<'a> {
    buf: &'a [u8],
}

impl<'a> ExtraFields<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for ExtraFields<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.len() < 4 {
            return None;
        }
        let id = u16::from_le_bytes([self.buf[0], self.buf[1]]);
        let len = u16::from_le_bytes([self.buf[2], self.buf[3]]) as usize;
        let data = self.buf.get(4..4 + len)?;
        self.buf = &self.buf[4 + len..];
        Some((id, data))
    }
}

/// The variable-length part of a local file header, needed to find where
/// the payload starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub name_len: u16,
    pub extra_len: u16,
}

impl LocalFileHeader {
    /// Parse the fixed 30-byte header.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut c = Cursor::new(buf, "local file header");
        let signature = c.u32()?;
        if signature != LOCAL_HEADER_SIGNATURE {
            return Err(Error::malformed(format!(
                "local file header has bad signature {signature:#010x}"
            )));
        }
        c.take(22)?;
        let name_len = c.u16()?;
        let extra_len = c.u16()?;
        Ok(Self {
            name_len,
            extra_len,
        })
    }

    /// Offset of the payload for a header located at `header_offset`.
    pub fn data_offset(&self, header_offset: u64) -> u64 {
        header_offset
            + LOCAL_HEADER_LEN as u64
            + u64::from(self.name_len)
            + u64::from(self.extra_len)
    }
}
