use crate::entry::Compression;
use crate::error::{Error, Result};
use flate2::write::DeflateDecoder;
use std::io::{self, Write};

/// Counts and checksums everything written through it, refusing to grow
/// past the declared size.
struct Checksummed<W> {
    inner: W,
    hasher: crc32fast::Hasher,
    len: u64,
    limit: u64,
}

impl<W: Write> Write for Checksummed<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.len + buf.len() as u64 > self.limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("payload longer than the declared {} bytes", self.limit),
            ));
        }
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.len += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

enum Sink<W: Write> {
    Stored(Checksummed<W>),
    Deflated(DeflateDecoder<Checksummed<W>>),
}

/// Push-style decoder for one entry's payload.
///
/// Compressed chunks go in through [`write_chunk`](Self::write_chunk) in
/// order; decoded bytes come out into `out`. [`finish`](Self::finish)
/// verifies the decoded length and CRC-32 against the directory record.
pub struct PayloadDecoder<W: Write> {
    sink: Sink<W>,
    expected_size: u64,
    expected_crc: u32,
}

impl<W: Write> PayloadDecoder<W> {
    pub fn new(compression: Compression, expected_size: u64, expected_crc: u32, out: W) -> Result<Self> {
        let checksummed = Checksummed {
            inner: out,
            hasher: crc32fast::Hasher::new(),
            len: 0,
            limit: expected_size,
        };
        let sink = match compression {
            Compression::Stored => Sink::Stored(checksummed),
            Compression::Deflated => Sink::Deflated(DeflateDecoder::new(checksummed)),
            Compression::Other(id) => {
                return Err(Error::Unsupported(format!("compression method {id}")))
            }
        };
        Ok(Self {
            sink,
            expected_size,
            expected_crc,
        })
    }

    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let written = match &mut self.sink {
            Sink::Stored(w) => w.write_all(chunk),
            Sink::Deflated(w) => w.write_all(chunk),
        };
        written.map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => {
                Error::malformed(format!("payload does not decode: {e}"))
            }
            _ => Error::IoError(e),
        })
    }

    /// Flush the decoder and check the result. Returns the output sink.
    pub fn finish(self) -> Result<W> {
        let checksummed = match self.sink {
            Sink::Stored(w) => w,
            Sink::Deflated(w) => w
                .finish()
                .map_err(|e| Error::malformed(format!("payload does not decode: {e}")))?,
        };
        if checksummed.len != self.expected_size {
            return Err(Error::LengthMismatch {
                expected: self.expected_size,
                actual: checksummed.len,
            });
        }
        let actual = checksummed.hasher.finalize();
        if actual != self.expected_crc {
            return Err(Error::ChecksumMismatch {
                expected: self.expected_crc,
                actual,
            });
        }
        Ok(checksummed.inner)
    }
}

/// Decode a complete payload held in memory.
pub fn decode_payload(
    compression: Compression,
    expected_size: u64,
    expected_crc: u32,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let capacity = expected_size.min(1 << 20) as usize;
    let mut decoder = PayloadDecoder::new(
        compression,
        expected_size,
        expected_crc,
        Vec::with_capacity(capacity),
    )?;
    decoder.write_chunk(payload)?;
    decoder.finish()
}
