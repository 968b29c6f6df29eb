//! # zipmount-format
//!
//! ZIP archive structures for random access over byte ranges.
//!
//! This crate never performs I/O. Callers fetch the bytes it asks for:
//! 1. A trailer window, passed to [`scan_tail`]
//! 2. The ZIP64 end record when the scan asks for it ([`resolve_zip64`])
//! 3. The central directory, passed to [`parse_central_directory`]
//! 4. A local file header and payload per entry, decoded with
//!    [`PayloadDecoder`]

pub mod archive;
pub mod decode;
pub mod entry;
pub mod error;
pub mod record;

pub use archive::{resolve_zip64, scan_tail, TailScan, INITIAL_TAIL_LEN};
pub use decode::{decode_payload, PayloadDecoder};
pub use entry::{Compression, ZipEntry};
pub use error::{Error, Result};
pub use record::{
    parse_central_directory, EndOfCentralDirectory, LocalFileHeader, LOCAL_HEADER_LEN,
    ZIP64_EOCD_LEN,
};
