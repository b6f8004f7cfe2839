//! `.8ij` container framing
//!
//! A container is a plain concatenation of frame records:
//!
//! ```text
//! magic        4 bytes   "8IJ1"
//! frame_size   u32 LE    payload length
//! frame_index  u32 LE    identifier used for output naming
//! payload      frame_size bytes of JPEG data
//! ```
//!
//! Trailing bytes shorter than a header mark a clean end of stream.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::ContainerError;

pub const FRAME_MAGIC: [u8; 4] = *b"8IJ1";
pub const FRAME_HEADER_LEN: usize = 12;
pub const CONTAINER_EXTENSION: &str = "8ij";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_size: u32,
    pub frame_index: u32,
}

impl FrameHeader {
    /// Parse a 12-byte header. Returns the found magic on mismatch.
    pub fn parse(bytes: &[u8; FRAME_HEADER_LEN]) -> Result<Self, [u8; 4]> {
        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != FRAME_MAGIC {
            return Err(magic);
        }
        Ok(Self {
            frame_size: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            frame_index: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }
}

/// One compressed frame as stored in the container
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// Byte offset of the record header within the stream
    pub offset: u64,
    pub frame_index: u32,
    pub payload: Vec<u8>,
}

/// Streams frame records from a byte source.
///
/// Yields `Ok` records until the stream ends or breaks. A bad magic or a
/// short payload is yielded once as `Err`, after which the reader is
/// exhausted. Only the current payload is held in memory.
pub struct FrameReader<R> {
    inner: R,
    offset: u64,
    done: bool,
}

impl FrameReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            done: false,
        }
    }

    /// Bytes consumed so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_record(&mut self) -> Result<Option<FrameRecord>, ContainerError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let got = read_full(&mut self.inner, &mut header)?;
        if got < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let record_offset = self.offset;
        self.offset += FRAME_HEADER_LEN as u64;

        let header = FrameHeader::parse(&header).map_err(|found| ContainerError::BadMagic {
            offset: record_offset,
            found,
        })?;

        let mut payload = Vec::new();
        let available = (&mut self.inner)
            .take(header.frame_size as u64)
            .read_to_end(&mut payload)? as u64;
        self.offset += available;

        if available < header.frame_size as u64 {
            return Err(ContainerError::Incomplete {
                frame_index: header.frame_index,
                offset: record_offset,
                declared: header.frame_size,
                available,
            });
        }

        Ok(Some(FrameRecord {
            offset: record_offset,
            frame_index: header.frame_index,
            payload,
        }))
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<FrameRecord, ContainerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: Read> std::iter::FusedIterator for FrameReader<R> {}

/// Serialize one frame record.
pub fn encode_frame(frame_index: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&FRAME_MAGIC);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&frame_index.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Read until `buf` is full or EOF. Returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
