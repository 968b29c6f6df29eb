use chrono::{NaiveDate, TimeZone, Utc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Compression method of a stored payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    Stored,
    Deflated,
    /// Any other method id; listed but not decodable.
    Other(u16),
}

impl From<u16> for Compression {
    fn from(method: u16) -> Self {
        match method {
            0 => Compression::Stored,
            8 => Compression::Deflated,
            other => Compression::Other(other),
        }
    }
}

impl Compression {
    pub fn id(&self) -> u16 {
        match *self {
            Compression::Stored => 0,
            Compression::Deflated => 8,
            Compression::Other(id) => id,
        }
    }
}

/// One central directory record, with ZIP64 and extended-timestamp extra
/// fields already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    /// Name as stored in the archive, not normalized.
    pub name: String,
    pub is_dir: bool,
    /// Uncompressed size in bytes.
    pub size: u64,
    pub compressed_size: u64,
    pub crc32: u32,
    pub compression: Compression,
    /// Offset of the entry's local file header in the archive.
    pub header_offset: u64,
    pub modified: SystemTime,
    /// Unix permission and type bits, when the archive was written on Unix.
    pub unix_mode: Option<u32>,
    pub encrypted: bool,
}

impl ZipEntry {
    /// Permission bits only.
    pub fn permissions(&self) -> Option<u32> {
        self.unix_mode.map(|m| m & 0o7777)
    }
}

/// Convert an MS-DOS date/time pair (local time, two-second resolution) to
/// a timestamp, interpreting it as UTC. Invalid fields fall back to the
/// DOS epoch of 1980-01-01.
pub fn dos_datetime(date: u16, time: u16) -> SystemTime {
    let year = 1980 + i32::from(date >> 9);
    let month = u32::from((date >> 5) & 0x0f);
    let day = u32::from(date & 0x1f);
    let hour = u32::from(time >> 11);
    let minute = u32::from((time >> 5) & 0x3f);
    let second = u32::from(time & 0x1f) * 2;

    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .or_else(|| NaiveDate::from_ymd_opt(1980, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0)));

    match naive {
        Some(naive) => Utc.from_utc_datetime(&naive).into(),
        None => UNIX_EPOCH,
    }
}

/// Seconds since the Unix epoch as a timestamp. Negative values are
/// clamped to the epoch.
pub fn unix_seconds(secs: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dos_datetime() {
        // 2024-03-15 10:30:42
        let date = ((2024 - 1980) << 9) | (3 << 5) | 15;
        let time = (10 << 11) | (30 << 5) | 21;
        let expected: SystemTime = Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 42).unwrap().into();
        assert_eq!(dos_datetime(date, time), expected);
    }

    #[test]
    fn test_invalid_dos_datetime_falls_back() {
        let expected: SystemTime = Utc.with_ymd_and_hms(1980, 1, 1, 0, 0, 0).unwrap().into();
        assert_eq!(dos_datetime(0, 0), expected);
    }

    #[test]
    fn test_compression_ids() {
        assert_eq!(Compression::from(0), Compression::Stored);
        assert_eq!(Compression::from(8), Compression::Deflated);
        assert_eq!(Compression::from(12), Compression::Other(12));
        assert_eq!(Compression::Other(12).id(), 12);
    }
}
