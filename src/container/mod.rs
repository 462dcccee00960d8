//! Zip-compatible archive container.
//!
//! ```no_run
//! use std::io::Write;
//! use shardzip::container::Archive;
//! use shardzip::RepoOptions;
//!
//! // Write
//! let ar = Archive::create("out.zip", &RepoOptions::default())?;
//! ar.new_entry()?.write_all(b"first")?;
//! ar.new_entry()?.write_all(b"second")?;
//! ar.close()?;
//!
//! // Read
//! let ar = Archive::open("out.zip")?;
//! assert_eq!(ar.entry_count()?, 2);
//! let mut body = String::new();
//! std::io::Read::read_to_string(&mut ar.open_entry(1)?, &mut body)?;
//! assert_eq!(body, "second");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod format;
mod reader;
mod writer;

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::options::RepoOptions;

pub use reader::{ArchiveReader, EntryReader};
pub use writer::{ArchiveWriter, EntryWriter};

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("cannot create archive {}: {source}", path.display())]
    Create { path: PathBuf, #[source] source: io::Error },
    #[error("archive not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),
    #[error("no entry at index {index} (archive has {count})")]
    IndexOutOfRange { index: usize, count: usize },
    #[error("archive is closed")]
    Closed,
    #[error("cannot {operation} on a {mode}-mode archive")]
    UnsupportedMode { operation: &'static str, mode: Mode },
    #[error("entry {index} was already closed by a later entry or by close()")]
    EntryClosed { index: usize },
    #[error("an entry named {0} already exists")]
    DuplicateEntry(String),
    #[error("entry {name} is not supported: {reason}")]
    UnsupportedEntry { name: String, reason: String },
    #[error("checksum mismatch in entry {name}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { name: String, expected: u32, actual: u32 },
    #[error("archive exceeds classic zip limits: {0}")]
    ArchiveTooLarge(String),
    #[error("archive lock was poisoned")]
    LockPoisoned,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Wrap an archive error so it can travel through `io::Read`/`io::Write`.
pub(crate) fn into_io(err: ArchiveError) -> io::Error {
    match err {
        ArchiveError::Io(e) => e,
        other               => io::Error::new(io::ErrorKind::Other, other),
    }
}

/// Undo [`into_io`]: recover a typed archive error from an I/O error.
pub(crate) fn from_io(err: io::Error) -> ArchiveError {
    if !err.get_ref().map_or(false, |inner| inner.is::<ArchiveError>()) {
        return ArchiveError::Io(err);
    }
    let kind = err.kind();
    match err.into_inner() {
        Some(inner) => match inner.downcast::<ArchiveError>() {
            Ok(archive_err) => *archive_err,
            Err(other)      => ArchiveError::Io(io::Error::new(kind, other)),
        },
        None => ArchiveError::Io(io::Error::from(kind)),
    }
}

// ── Mode ─────────────────────────────────────────────────────────────────────

/// Direction an archive or repository was opened in.  Fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Write,
    Read,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Write => "write",
            Mode::Read  => "read",
        })
    }
}

// ── EntryInfo ────────────────────────────────────────────────────────────────

/// Lightweight descriptor of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub index:    usize,
    pub name:     String,
    pub size:     u64,
    pub crc32:    u32,
    pub modified: Option<NaiveDateTime>,
}

// ── Archive ──────────────────────────────────────────────────────────────────

/// Either side of the container behind one type.  Operations belonging to
/// the other side fail with [`ArchiveError::UnsupportedMode`].
pub enum Archive<W: Write = BufWriter<File>> {
    Write(ArchiveWriter<W>),
    Read(ArchiveReader),
}

impl Archive {
    pub fn create<P: AsRef<Path>>(path: P, options: &RepoOptions) -> Result<Self, ArchiveError> {
        Ok(Archive::Write(ArchiveWriter::create(path, options)?))
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        Ok(Archive::Read(ArchiveReader::open(path)?))
    }
}

impl<W: Write> Archive<W> {
    pub fn mode(&self) -> Mode {
        match self {
            Archive::Write(_) => Mode::Write,
            Archive::Read(_)  => Mode::Read,
        }
    }

    // ── Write ─────────────────────────────────────────────────────────────────

    pub fn new_entry(&self) -> Result<EntryWriter<'_, W>, ArchiveError> {
        match self {
            Archive::Write(w) => w.new_entry(),
            Archive::Read(_)  => Err(self.unsupported("create an entry")),
        }
    }

    pub fn new_named_entry(&self, name: &str) -> Result<EntryWriter<'_, W>, ArchiveError> {
        match self {
            Archive::Write(w) => w.new_named_entry(name),
            Archive::Read(_)  => Err(self.unsupported("create an entry")),
        }
    }

    pub fn append_entry(&self, data: &[u8]) -> Result<EntryInfo, ArchiveError> {
        match self {
            Archive::Write(w) => w.append_entry(data),
            Archive::Read(_)  => Err(self.unsupported("create an entry")),
        }
    }

    /// Set the archive comment written by `close()`.
    pub fn set_comment(&self, comment: impl Into<Vec<u8>>) -> Result<(), ArchiveError> {
        match self {
            Archive::Write(w) => w.set_comment(comment),
            Archive::Read(_)  => Err(self.unsupported("set the comment")),
        }
    }

    // ── Read ──────────────────────────────────────────────────────────────────

    pub fn entry_count(&self) -> Result<usize, ArchiveError> {
        match self {
            Archive::Read(r)  => r.ensure_open().map(|_| r.entry_count()),
            Archive::Write(_) => Err(self.unsupported("count entries")),
        }
    }

    pub fn entries(&self) -> Result<Vec<EntryInfo>, ArchiveError> {
        match self {
            Archive::Read(r)  => r.ensure_open().map(|_| r.entries()),
            Archive::Write(_) => Err(self.unsupported("list entries")),
        }
    }

    pub fn open_entry(&self, index: usize) -> Result<EntryReader, ArchiveError> {
        match self {
            Archive::Read(r)  => r.open_entry(index),
            Archive::Write(_) => Err(self.unsupported("open an entry")),
        }
    }

    pub fn comment(&self) -> Result<&[u8], ArchiveError> {
        match self {
            Archive::Read(r)  => Ok(r.comment()),
            Archive::Write(_) => Err(self.unsupported("read the comment")),
        }
    }

    // ── Both ──────────────────────────────────────────────────────────────────

    /// Finalize (write mode) or release (read mode).  Must be called once.
    pub fn close(&self) -> Result<(), ArchiveError> {
        match self {
            Archive::Write(w) => w.close(),
            Archive::Read(r)  => r.close(),
        }
    }

    fn unsupported(&self, operation: &'static str) -> ArchiveError {
        ArchiveError::UnsupportedMode { operation, mode: self.mode() }
    }
}
