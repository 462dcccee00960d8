//! Single-stream record files: one archive entry holding any number of
//! framed records, read back until the stream ends on a frame boundary.
//!
//! The entry is named by [`RepoOptions::record_entry`] (`file` by default).
//! The file is an ordinary repository with exactly one shard, so
//! [`crate::Repository::open_shard`] can read it as well.
//!
//! ```no_run
//! use shardzip::records::{RecordReader, RecordWriter};
//!
//! let mut w = RecordWriter::create("events.zip")?;
//! for i in 0..3u32 {
//!     w.write(&i)?;
//! }
//! w.close()?;
//!
//! let mut r = RecordReader::open("events.zip")?;
//! let all: Vec<u32> = r.records().collect::<Result<_, _>>()?;
//! assert_eq!(all, vec![0, 1, 2]);
//! # Ok::<(), shardzip::Error>(())
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::container::{ArchiveReader, ArchiveWriter, EntryReader};
use crate::error::Result;
use crate::frame::{self, FrameReader};
use crate::options::{RepoOptions, DEFAULT_RECORD_ENTRY};
use crate::repository::{archive_comment, check_comment, ShardRecords};
use crate::serializer::{Bincode, Format, Serializer};

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct RecordWriter<W: Write = BufWriter<File>, S = Bincode> {
    archive:    ArchiveWriter<W>,
    index:      usize,
    serializer: S,
    records:    u64,
}

impl RecordWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with(path, &RepoOptions::default(), Bincode)
    }
}

impl<S: Format> RecordWriter<BufWriter<File>, S> {
    pub fn create_with<P: AsRef<Path>>(path: P, options: &RepoOptions, serializer: S) -> Result<Self> {
        Self::start(ArchiveWriter::create(path, options)?, serializer, &options.record_entry)
    }
}

impl<W: Write, S: Format> RecordWriter<W, S> {
    /// Write a record file into any writer, e.g. a `Vec<u8>`.
    pub fn new(writer: W, serializer: S) -> Result<Self> {
        Self::start(ArchiveWriter::new(writer), serializer, DEFAULT_RECORD_ENTRY)
    }

    fn start(archive: ArchiveWriter<W>, serializer: S, entry_name: &str) -> Result<Self> {
        archive.set_comment(archive_comment(&serializer))?;
        let index = archive.new_named_entry(entry_name)?.index();
        Ok(Self { archive, index, serializer, records: 0 })
    }

    pub fn write<T>(&mut self, record: &T) -> Result<()>
    where
        S: Serializer<T>,
    {
        let mut entry = self.archive.entry_writer(self.index);
        frame::encode(&mut entry, record, &self.serializer)?;
        self.records += 1;
        Ok(())
    }

    pub fn records_written(&self) -> u64 { self.records }

    /// Seal the entry and finalize the archive.
    pub fn close(self) -> Result<()> {
        self.archive.close()?;
        tracing::debug!("Closed record file ({} records)", self.records);
        Ok(())
    }

    /// Finalize the archive and hand back the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        Ok(self.archive.into_inner()?)
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct RecordReader<S = Bincode> {
    archive: ArchiveReader,
    inner:   FrameReader<EntryReader, S>,
}

impl RecordReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &RepoOptions::default(), Bincode)
    }
}

impl<S: Format> RecordReader<S> {
    /// Open the record stream in the archive's first entry.
    pub fn open_with<P: AsRef<Path>>(path: P, options: &RepoOptions, serializer: S) -> Result<Self> {
        let archive = ArchiveReader::open(path)?;
        check_comment(archive.path(), archive.comment(), &serializer);
        let entry = archive.open_entry(0)?;
        Ok(Self {
            inner: FrameReader::new(entry, serializer).with_max_frame_len(options.max_frame_len),
            archive,
        })
    }

    /// Next record, or `Ok(None)` at the end of the stream.
    pub fn read<T>(&mut self) -> Result<Option<T>>
    where
        S: Serializer<T>,
    {
        Ok(self.inner.read()?)
    }

    pub fn records<T>(&mut self) -> ShardRecords<'_, S, T>
    where
        S: Serializer<T>,
    {
        ShardRecords::new(self.inner.records())
    }

    pub fn frames_read(&self) -> u64 { self.inner.frames_read() }

    pub fn close(self) -> Result<()> {
        Ok(self.archive.close()?)
    }
}
