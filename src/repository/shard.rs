use std::fs::File;
use std::io::BufWriter;

use crate::container::{EntryInfo, EntryReader, EntryWriter};
use crate::error::Result;
use crate::frame::{FrameReader, FrameWriter, Records};
use crate::serializer::Serializer;

/// Record stream into one freshly allocated shard.
pub struct ShardWriter<'a, S> {
    inner: FrameWriter<EntryWriter<'a, BufWriter<File>>, &'a S>,
}

impl<'a, S> ShardWriter<'a, S> {
    pub(super) fn new(entry: EntryWriter<'a, BufWriter<File>>, serializer: &'a S) -> Self {
        Self { inner: FrameWriter::new(entry, serializer) }
    }

    pub fn index(&self) -> usize { self.inner.get_ref().index() }

    pub fn write<T>(&mut self, record: &T) -> Result<()>
    where
        S: Serializer<T>,
    {
        Ok(self.inner.write(record)?)
    }

    /// Write an already-serialized payload as one frame.
    pub fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        Ok(self.inner.write_payload(payload)?)
    }

    pub fn frames_written(&self) -> u64 { self.inner.frames_written() }

    /// Seal the shard and return its directory entry.
    pub fn finish(self) -> Result<EntryInfo> {
        let frames = self.inner.frames_written();
        let info   = self.inner.into_inner().finish()?;
        tracing::trace!(index = info.index, frames, size = info.size, "finished shard");
        Ok(info)
    }
}

/// Record stream out of one shard.
pub struct ShardReader<'a, S> {
    inner: FrameReader<EntryReader, &'a S>,
}

impl<'a, S> ShardReader<'a, S> {
    pub(super) fn new(entry: EntryReader, serializer: &'a S, max_frame_len: u32) -> Self {
        Self { inner: FrameReader::new(entry, serializer).with_max_frame_len(max_frame_len) }
    }

    pub fn index(&self) -> usize { self.inner.get_ref().index() }

    /// Next record, or `Ok(None)` once the shard ends on a frame boundary.
    pub fn read<T>(&mut self) -> Result<Option<T>>
    where
        S: Serializer<T>,
    {
        Ok(self.inner.read()?)
    }

    pub fn read_payload(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read_payload()?)
    }

    /// Iterate the remaining records.  Iteration stops after the first error.
    pub fn records<T>(&mut self) -> ShardRecords<'_, &'a S, T>
    where
        S: Serializer<T>,
    {
        ShardRecords::new(self.inner.records())
    }

    pub fn frames_read(&self) -> u64 { self.inner.frames_read() }

    /// Drain the rest of the shard and verify its checksum.
    pub fn finish(self) -> Result<()> {
        Ok(self.inner.into_inner().finish()?)
    }
}

/// Record iterator over one entry, yielding crate-level errors.
pub struct ShardRecords<'r, S, T> {
    inner: Records<'r, EntryReader, S, T>,
}

impl<'r, S, T> ShardRecords<'r, S, T> {
    pub(crate) fn new(inner: Records<'r, EntryReader, S, T>) -> Self {
        Self { inner }
    }
}

impl<S: Serializer<T>, T> Iterator for ShardRecords<'_, S, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|r| r.map_err(Into::into))
    }
}
