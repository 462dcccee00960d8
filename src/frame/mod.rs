//! Framed record codec: length-prefixed records on a byte stream.
//!
//! # Wire format
//! ```text
//! | length: u32 LE | payload: length bytes |
//! | length: u32 LE | payload: length bytes |
//! ...
//! ```
//! Frames sit back to back with no padding, magic or checksum; integrity of
//! the bytes is the container's business (CRC-32 per zip entry).
//!
//! # End of stream
//! A stream that ends exactly on a frame boundary yields `Ok(None)`.  A stream
//! that ends inside a length prefix or inside a payload is a torn frame and
//! yields [`FrameError::TruncatedRecord`].
//!
//! # Short reads
//! Payload reads make one plain `read` call.  If that comes back short, a
//! second `read` is issued for the remainder.  Still short after that is
//! [`FrameError::TruncatedRecord`]; there are no further retries.  Readers
//! that hand out data in small pieces should be wrapped so each `read`
//! fills as much of the buffer as it can (archive entry streams already do).
//! `Interrupted` does not count as an attempt.

use std::io::{self, Read, Write};
use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use thiserror::Error;

use crate::serializer::{Bincode, SerializeError, Serializer};

/// Size of the little-endian length prefix.
pub const LEN_PREFIX_SIZE: usize = 4;
/// Default upper bound on a declared frame length: 1 GiB.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 1 << 30;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("failed to encode record: {0}")]
    Encoding(#[source] SerializeError),
    #[error("failed to decode record: {0}")]
    Decoding(#[source] SerializeError),
    #[error("encoded record is {0} bytes, too large for a u32 length prefix")]
    PayloadTooLarge(usize),
    #[error("failed to write frame: {0}")]
    Write(#[source] io::Error),
    #[error("failed to read frame: {0}")]
    Read(#[source] io::Error),
    #[error("truncated record: expected {expected} bytes, got {actual}")]
    TruncatedRecord { expected: usize, actual: usize },
    #[error("frame declares {len} bytes, above the {max} byte limit")]
    OversizedFrame { len: u32, max: u32 },
}

// ── Length prefix ────────────────────────────────────────────────────────────

/// Outcome of reading a length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Prefix {
    /// Zero bytes left: clean end of stream.
    End,
    /// 1..=3 bytes before EOF.
    Torn(usize),
    Len(u32),
}

pub(crate) fn read_prefix<R: Read>(reader: &mut R) -> io::Result<Prefix> {
    let mut buf = [0u8; LEN_PREFIX_SIZE];
    let n = fill(reader, &mut buf)?;
    Ok(match n {
        0                   => Prefix::End,
        LEN_PREFIX_SIZE     => Prefix::Len(LittleEndian::read_u32(&buf)),
        partial             => Prefix::Torn(partial),
    })
}

/// Read until `buf` is full or the reader reports EOF.  Returns bytes read.
pub(crate) fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0)  => break,
            Ok(n)  => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Discard up to `len` bytes.  Returns how many were actually available.
pub(crate) fn discard<R: Read>(reader: &mut R, len: u64) -> io::Result<u64> {
    io::copy(&mut reader.take(len), &mut io::sink())
}

fn read_once<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

fn read_payload<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>, FrameError> {
    let mut payload = vec![0u8; len];
    let first = read_once(reader, &mut payload).map_err(FrameError::Read)?;
    if first < len {
        let second = read_once(reader, &mut payload[first..]).map_err(FrameError::Read)?;
        if first + second < len {
            return Err(FrameError::TruncatedRecord { expected: len, actual: first + second });
        }
    }
    Ok(payload)
}

// ── Raw frames ───────────────────────────────────────────────────────────────

/// Write one frame around an already-serialized payload.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;
    writer.write_u32::<LittleEndian>(len).map_err(FrameError::Write)?;
    writer.write_all(payload).map_err(FrameError::Write)?;
    Ok(())
}

/// Read one frame's payload.  `Ok(None)` at a clean end of stream.
pub fn read_frame<R: Read>(reader: &mut R, max_frame_len: u32) -> Result<Option<Vec<u8>>, FrameError> {
    match read_prefix(reader).map_err(FrameError::Read)? {
        Prefix::End => Ok(None),
        Prefix::Torn(actual) => Err(FrameError::TruncatedRecord {
            expected: LEN_PREFIX_SIZE,
            actual,
        }),
        Prefix::Len(len) if len > max_frame_len => {
            Err(FrameError::OversizedFrame { len, max: max_frame_len })
        }
        Prefix::Len(len) => read_payload(reader, len as usize).map(Some),
    }
}

/// Serialize `record` and write it as one frame.
pub fn encode<W, T, S>(stream: &mut W, record: &T, serializer: &S) -> Result<(), FrameError>
where
    W: Write,
    S: Serializer<T>,
{
    let payload = serializer.encode(record).map_err(FrameError::Encoding)?;
    write_frame(stream, &payload)
}

/// Read one frame and deserialize it.  `Ok(None)` at a clean end of stream.
pub fn decode<R, T, S>(stream: &mut R, serializer: &S) -> Result<Option<T>, FrameError>
where
    R: Read,
    S: Serializer<T>,
{
    match read_frame(stream, DEFAULT_MAX_FRAME_LEN)? {
        Some(payload) => serializer.decode(&payload).map(Some).map_err(FrameError::Decoding),
        None          => Ok(None),
    }
}

// ── FrameWriter ──────────────────────────────────────────────────────────────

/// A serializer bound to a writable stream.
pub struct FrameWriter<W, S = Bincode> {
    writer:     W,
    serializer: S,
    frames:     u64,
    bytes:      u64,
}

impl<W: Write, S> FrameWriter<W, S> {
    pub fn new(writer: W, serializer: S) -> Self {
        Self { writer, serializer, frames: 0, bytes: 0 }
    }

    /// Encode one record.  A failed write leaves a torn frame behind; the
    /// stream should be abandoned.
    pub fn write<T>(&mut self, record: &T) -> Result<(), FrameError>
    where
        S: Serializer<T>,
    {
        let payload = self.serializer.encode(record).map_err(FrameError::Encoding)?;
        self.write_payload(&payload)
    }

    pub fn write_payload(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        write_frame(&mut self.writer, payload)?;
        self.frames += 1;
        self.bytes  += (LEN_PREFIX_SIZE + payload.len()) as u64;
        tracing::trace!(frame = self.frames - 1, len = payload.len(), "wrote frame");
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), FrameError> {
        self.writer.flush().map_err(FrameError::Write)
    }

    pub fn frames_written(&self) -> u64 { self.frames }
    /// Bytes written including length prefixes.
    pub fn bytes_written(&self) -> u64 { self.bytes }
    pub fn get_ref(&self) -> &W { &self.writer }
    pub fn get_mut(&mut self) -> &mut W { &mut self.writer }
    pub fn into_inner(self) -> W { self.writer }
}

// ── FrameReader ──────────────────────────────────────────────────────────────

/// A serializer bound to a readable stream.
pub struct FrameReader<R, S = Bincode> {
    reader:        R,
    serializer:    S,
    max_frame_len: u32,
    frames:        u64,
}

impl<R: Read, S> FrameReader<R, S> {
    pub fn new(reader: R, serializer: S) -> Self {
        Self { reader, serializer, max_frame_len: DEFAULT_MAX_FRAME_LEN, frames: 0 }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: u32) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Decode the next record.  `Ok(None)` at a clean end of stream.
    ///
    /// On [`FrameError::Decoding`] the stream has already moved past the
    /// offending frame, so the next call reads the frame after it.
    pub fn read<T>(&mut self) -> Result<Option<T>, FrameError>
    where
        S: Serializer<T>,
    {
        match self.read_payload()? {
            Some(payload) => self.serializer.decode(&payload).map(Some).map_err(FrameError::Decoding),
            None          => Ok(None),
        }
    }

    pub fn read_payload(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let payload = read_frame(&mut self.reader, self.max_frame_len)?;
        if let Some(ref p) = payload {
            tracing::trace!(frame = self.frames, len = p.len(), "read frame");
            self.frames += 1;
        }
        Ok(payload)
    }

    /// Step over the next frame without deserializing it.  Returns its
    /// payload length, or `None` at a clean end of stream.
    pub fn skip(&mut self) -> Result<Option<u32>, FrameError> {
        match read_prefix(&mut self.reader).map_err(FrameError::Read)? {
            Prefix::End => Ok(None),
            Prefix::Torn(actual) => Err(FrameError::TruncatedRecord {
                expected: LEN_PREFIX_SIZE,
                actual,
            }),
            Prefix::Len(len) => {
                let got = discard(&mut self.reader, len as u64).map_err(FrameError::Read)?;
                if got < len as u64 {
                    return Err(FrameError::TruncatedRecord {
                        expected: len as usize,
                        actual:   got as usize,
                    });
                }
                self.frames += 1;
                Ok(Some(len))
            }
        }
    }

    /// Iterate the remaining records.  Iteration stops after the first error.
    pub fn records<T>(&mut self) -> Records<'_, R, S, T>
    where
        S: Serializer<T>,
    {
        Records { inner: self, done: false, _marker: PhantomData }
    }

    pub fn frames_read(&self) -> u64 { self.frames }
    pub fn get_ref(&self) -> &R { &self.reader }
    pub fn into_inner(self) -> R { self.reader }
}

/// Iterator returned by [`FrameReader::records`].
pub struct Records<'a, R, S, T> {
    inner:   &'a mut FrameReader<R, S>,
    done:    bool,
    _marker: PhantomData<fn() -> T>,
}

impl<R: Read, S: Serializer<T>, T> Iterator for Records<'_, R, S, T> {
    type Item = Result<T, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.read() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None)         => { self.done = true; None }
            Err(e)           => { self.done = true; Some(Err(e)) }
        }
    }
}
