use crate::error::{Error, Result};
use std::fmt;
use std::ops::Range;

/// A byte range of a remote object.
///
/// Exactly one of four forms is ever sent to a backend, so bounds can never be
/// combined incorrectly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteRange {
    /// The whole object; no range expression is sent.
    Whole,
    /// From an offset to the end of the object.
    From(u64),
    /// Inclusive bounds `start..=end`.
    Bounded { start: u64, end: u64 },
    /// The last `n` bytes of the object.
    Suffix(u64),
}

impl ByteRange {
    /// Build a range from an offset pair where zero means "absent".
    ///
    /// Both set gives inclusive bounds, only `start` reads to the end, only
    /// `end` reads the last `end` bytes, and neither reads the whole object.
    pub fn from_offsets(start: u64, end: u64) -> Result<Self> {
        match (start, end) {
            (0, 0) => Ok(ByteRange::Whole),
            (s, 0) => Ok(ByteRange::From(s)),
            (0, e) => Ok(ByteRange::Suffix(e)),
            (s, e) => Self::bounded(s, e),
        }
    }

    /// Inclusive bounds, rejecting `start > end`.
    pub fn bounded(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidRange { start, end });
        }
        Ok(ByteRange::Bounded { start, end })
    }

    /// `len` bytes starting at `offset`. A zero length reads nothing and is
    /// the caller's business; it is mapped to `Bounded { offset, offset }`.
    /// The end saturates at `u64::MAX`.
    pub fn span(offset: u64, len: u64) -> Self {
        ByteRange::Bounded {
            start: offset,
            end: offset.saturating_add(len.max(1) - 1),
        }
    }

    /// The HTTP `Range` header value, `None` for the whole object.
    pub fn header_value(&self) -> Option<String> {
        match *self {
            ByteRange::Whole => None,
            ByteRange::From(start) => Some(format!("bytes={start}-")),
            ByteRange::Bounded { start, end } => Some(format!("bytes={start}-{end}")),
            ByteRange::Suffix(len) => Some(format!("bytes=-{len}")),
        }
    }

    /// Resolve against an object of `size` bytes into a half-open range,
    /// clamped the way HTTP servers clamp.
    pub fn resolve(&self, size: u64) -> Range<u64> {
        match *self {
            ByteRange::Whole => 0..size,
            ByteRange::From(start) => start.min(size)..size,
            ByteRange::Bounded { start, end } => {
                start.min(size)..end.saturating_add(1).min(size)
            }
            ByteRange::Suffix(len) => size.saturating_sub(len)..size,
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.header_value() {
            Some(v) => f.write_str(&v),
            None => f.write_str("bytes=*"),
        }
    }
}
