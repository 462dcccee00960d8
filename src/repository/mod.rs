//! Multi-shard repository: one zip archive, one serializer, one framed record
//! (or stream of records) per entry.
//!
//! A repository is opened in exactly one direction for its whole life:
//!
//! ```text
//! create / create_with ──► Write ──┐
//!                                  ├── close() ──► Closed
//! open   / open_with   ──► Read  ──┘
//! ```
//!
//! Calling an operation that belongs to the other direction returns
//! [`ArchiveError::UnsupportedMode`] and leaves the file untouched.
//!
//! ```no_run
//! use shardzip::Repository;
//!
//! let repo = Repository::create("names.zip")?;
//! repo.create_and_write(&vec!["Name 1".to_string(), "Name 2".to_string()])?;
//! repo.close()?;
//!
//! let repo = Repository::open("names.zip")?;
//! let names: Vec<String> = repo.read_shard(0)?;
//! assert_eq!(names.len(), 2);
//! # Ok::<(), shardzip::Error>(())
//! ```

mod shard;

use std::path::{Path, PathBuf};

use crate::container::{Archive, ArchiveError, EntryInfo, Mode};
use crate::error::{Error, Result};
use crate::frame;
use crate::options::RepoOptions;
use crate::scan::{scan_shard, ShardHealth, ShardReport, VerifyReport};
use crate::serializer::{canonical_name, Bincode, Format, Serializer};

pub use shard::{ShardReader, ShardRecords, ShardWriter};

/// Archive comment prefix; the serializer name follows it.
pub const COMMENT_PREFIX: &str = "shardzip/1 serializer=";

pub(crate) fn archive_comment<F: Format + ?Sized>(serializer: &F) -> String {
    format!("{COMMENT_PREFIX}{}", serializer.name())
}

/// Warn when `comment` names a different serializer than the one in use.
pub(crate) fn check_comment<F: Format + ?Sized>(path: &Path, comment: &[u8], serializer: &F) {
    let comment = String::from_utf8_lossy(comment);
    if let Some(recorded) = comment.strip_prefix(COMMENT_PREFIX) {
        let recorded = canonical_name(recorded).unwrap_or(recorded);
        if recorded != serializer.name() {
            tracing::warn!(
                "{} was written with serializer {recorded}, reading with {}",
                path.display(),
                serializer.name(),
            );
        }
    }
}

pub struct Repository<S = Bincode> {
    path:       PathBuf,
    archive:    Archive,
    serializer: S,
    options:    RepoOptions,
}

impl Repository<Bincode> {
    /// Create a new repository at `path` with default options and bincode
    /// payloads.  An existing file is replaced.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with(path, RepoOptions::default(), Bincode)
    }

    /// Open an existing repository for reading with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, RepoOptions::default(), Bincode)
    }
}

impl<S: Format> Repository<S> {
    pub fn create_with<P: AsRef<Path>>(path: P, options: RepoOptions, serializer: S) -> Result<Self> {
        let path    = path.as_ref().to_owned();
        let archive = Archive::create(&path, &options)?;
        archive.set_comment(archive_comment(&serializer))?;

        tracing::debug!("Created repository: {} (serializer {})", path.display(), serializer.name());
        Ok(Self { path, archive, serializer, options })
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: RepoOptions, serializer: S) -> Result<Self> {
        let path    = path.as_ref().to_owned();
        let archive = Archive::open(&path)?;
        check_comment(&path, archive.comment()?, &serializer);

        tracing::debug!("Opened repository: {} ({} shards)", path.display(), archive.entry_count()?);
        Ok(Self { path, archive, serializer, options })
    }
}

impl<S> Repository<S> {
    pub fn mode(&self) -> Mode { self.archive.mode() }
    pub fn path(&self) -> &Path { &self.path }
    pub fn options(&self) -> &RepoOptions { &self.options }
    pub fn serializer(&self) -> &S { &self.serializer }

    fn require(&self, mode: Mode, operation: &'static str) -> Result<()> {
        if self.archive.mode() == mode {
            Ok(())
        } else {
            Err(ArchiveError::UnsupportedMode { operation, mode: self.archive.mode() }.into())
        }
    }

    // ── Write ─────────────────────────────────────────────────────────────────

    /// Store `record` as a single framed record in a new shard and return the
    /// shard's index.
    ///
    /// The record is serialized before an index is allocated, so an encoding
    /// failure leaves no empty shard behind.  Safe to call from several
    /// threads; indices come out distinct and gapless.
    pub fn create_and_write<T>(&self, record: &T) -> Result<usize>
    where
        S: Serializer<T>,
    {
        self.require(Mode::Write, "create a shard")?;

        let mut buf = Vec::new();
        frame::encode(&mut buf, record, &self.serializer)?;
        let info = self.archive.append_entry(&buf)?;

        tracing::trace!(index = info.index, len = buf.len(), "wrote shard");
        Ok(info.index)
    }

    /// Start a new shard and stream any number of records into it.
    ///
    /// The shard is sealed by [`ShardWriter::finish`], by the next
    /// `create_shard`/`create_and_write`, or by [`Repository::close`].
    pub fn create_shard(&self) -> Result<ShardWriter<'_, S>> {
        self.require(Mode::Write, "create a shard")?;
        let entry = self.archive.new_entry()?;
        Ok(ShardWriter::new(entry, &self.serializer))
    }

    // ── Read ──────────────────────────────────────────────────────────────────

    pub fn shard_count(&self) -> Result<usize> {
        Ok(self.archive.entry_count()?)
    }

    /// Name, size and checksum of every shard.
    pub fn shards(&self) -> Result<Vec<EntryInfo>> {
        Ok(self.archive.entries()?)
    }

    /// Open shard `index` as a stream of records.
    pub fn open_shard(&self, index: usize) -> Result<ShardReader<'_, S>> {
        self.require(Mode::Read, "open a shard")?;
        let entry = self.archive.open_entry(index)?;
        Ok(ShardReader::new(entry, &self.serializer, self.options.max_frame_len))
    }

    /// Decode the single value stored in shard `index`.
    ///
    /// Fails with [`Error::EmptyShard`] when the shard holds no frame.  Bytes
    /// after the first frame are read only to verify the entry checksum.
    pub fn read_shard<T>(&self, index: usize) -> Result<T>
    where
        S: Serializer<T>,
    {
        let mut shard = self.open_shard(index)?;
        let value = shard.read()?.ok_or(Error::EmptyShard(index))?;
        shard.finish()?;
        Ok(value)
    }

    /// Decode every shard in index order.  With the `parallel` feature the
    /// shards are read concurrently; the first error wins either way.
    pub fn read_all_shards<T>(&self) -> Result<Vec<T>>
    where
        S: Serializer<T> + Sync,
        T: Send,
    {
        let count = self.shard_count()?;

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;

            (0..count).into_par_iter().map(|i| self.read_shard(i)).collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            (0..count).map(|i| self.read_shard(i)).collect()
        }
    }

    /// Walk every frame of every shard without deserializing anything.
    pub fn verify(&self) -> Result<VerifyReport> {
        self.require(Mode::Read, "verify")?;
        let mut reports = Vec::new();
        for info in self.shards()? {
            let report = match self.archive.open_entry(info.index) {
                Ok(mut entry) => scan_shard(info.index, &info.name, &mut entry, self.options.max_frame_len)?,
                Err(e @ (ArchiveError::UnsupportedEntry { .. } | ArchiveError::CorruptArchive(_))) => {
                    ShardReport {
                        index:         info.index,
                        name:          info.name,
                        frames:        0,
                        payload_bytes: 0,
                        largest_frame: 0,
                        health:        ShardHealth::Unreadable(e.to_string()),
                    }
                }
                Err(e) => return Err(e.into()),
            };
            reports.push(report);
        }

        let report = VerifyReport::from_shards(reports);
        tracing::debug!("Verified repository {}: {}", self.path.display(), report.summary());
        Ok(report)
    }

    // ── Both ──────────────────────────────────────────────────────────────────

    /// Finalize the archive (write mode) or release it (read mode).  Later
    /// calls fail with [`ArchiveError::Closed`].
    pub fn close(&self) -> Result<()> {
        self.archive.close()?;
        tracing::debug!("Closed repository: {}", self.path.display());
        Ok(())
    }
}

impl<S> std::fmt::Debug for Repository<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("path", &self.path)
            .field("mode", &self.archive.mode())
            .finish_non_exhaustive()
    }
}
