use crate::error::{Error, Result};
use crate::record::{
    EndOfCentralDirectory, Zip64EndOfCentralDirectory, Zip64Locator, ZIP64_LOCATOR_LEN,
};

/// Size of the first trailer window fetched from the end of an archive.
pub const INITIAL_TAIL_LEN: u64 = 64 * 1024;

/// Outcome of scanning one trailer window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailScan {
    /// The central directory's location is known.
    Directory(EndOfCentralDirectory),
    /// A ZIP64 record must be fetched from `record_offset` and passed to
    /// [`resolve_zip64`].
    Zip64 {
        eocd: EndOfCentralDirectory,
        record_offset: u64,
    },
    /// The window holds no record; retry with a larger one if possible.
    NotFound,
}

/// Scan `tail`, the bytes `tail_offset..` of an archive that run to its end.
pub fn scan_tail(tail: &[u8], tail_offset: u64) -> Result<TailScan> {
    let Some((at, eocd)) = EndOfCentralDirectory::find(tail) else {
        return Ok(TailScan::NotFound);
    };
    let eocd_position = tail_offset + at as u64;

    let locator = match at.checked_sub(ZIP64_LOCATOR_LEN) {
        Some(start) => Zip64Locator::parse(&tail[start..at])?,
        None => None,
    };
    if let Some(locator) = locator {
        return Ok(TailScan::Zip64 {
            eocd,
            record_offset: locator.record_offset,
        });
    }
    if eocd.needs_zip64() {
        if at < ZIP64_LOCATOR_LEN && tail_offset > 0 {
            return Ok(TailScan::NotFound);
        }
        return Err(Error::malformed(
            "zip64 end of central directory locator missing",
        ));
    }

    eocd.check_supported()?;
    check_directory_bounds(&eocd, eocd_position)?;
    Ok(TailScan::Directory(eocd))
}

/// Apply a fetched ZIP64 end record located at `record_offset`.
pub fn resolve_zip64(
    mut eocd: EndOfCentralDirectory,
    record: &[u8],
    record_offset: u64,
) -> Result<EndOfCentralDirectory> {
    let record = Zip64EndOfCentralDirectory::parse(record)?;
    eocd.apply_zip64(&record);
    eocd.check_supported()?;
    check_directory_bounds(&eocd, record_offset)?;
    Ok(eocd)
}

fn check_directory_bounds(eocd: &EndOfCentralDirectory, limit: u64) -> Result<()> {
    let end = eocd
        .directory_offset
        .checked_add(eocd.directory_size)
        .ok_or_else(|| Error::malformed("central directory bounds overflow"))?;
    if end > limit {
        return Err(Error::malformed(format!(
            "central directory ({} bytes at {}) runs past its end record at {limit}",
            eocd.directory_size, eocd.directory_offset
        )));
    }
    Ok(())
}
