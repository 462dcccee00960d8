//! Write side of the container.
//!
//! Entries are streamed: each one gets a local header up front, its bytes as
//! they arrive, and a data descriptor once the next entry is allocated or the
//! archive is closed.  Only one entry is open at a time.  Allocation happens
//! under the state mutex, so concurrent callers always receive distinct,
//! gapless indices.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use crc32fast::Hasher;

use super::format::{
    CentralHeader, DataDescriptor, DosDateTime, EndRecord, LocalHeader,
    DATA_DESCRIPTOR_SIZE, MAX_COMMENT_LEN, MAX_ENTRIES, MAX_OFFSET,
};
use super::{into_io, ArchiveError, EntryInfo};
use crate::options::{RepoOptions, DEFAULT_ENTRY_PREFIX};

type CloseHook<W> = Box<dyn FnOnce(&mut W) -> io::Result<()> + Send>;

struct OpenEntry {
    index:         usize,
    name:          String,
    header_offset: u64,
    hasher:        Hasher,
    size:          u64,
}

struct WriterState<W> {
    /// `None` once handed back by `into_inner`.
    writer:     Option<W>,
    offset:     u64,
    next_index: usize,
    open:       Option<OpenEntry>,
    directory:  Vec<CentralHeader>,
    comment:    Vec<u8>,
    on_close:   Option<CloseHook<W>>,
    closed:     bool,
}

impl<W: Write> WriterState<W> {
    fn sink(&mut self) -> Result<&mut W, ArchiveError> {
        self.writer.as_mut().ok_or(ArchiveError::Closed)
    }

    /// Start the next entry.  The previous one must already be sealed.
    /// `name` overrides the default `{prefix}{index}` naming.
    fn begin_entry(&mut self, prefix: &str, name: Option<&str>, modified: DosDateTime) -> Result<usize, ArchiveError> {
        let index = self.next_index;
        if index >= MAX_ENTRIES {
            return Err(ArchiveError::ArchiveTooLarge(format!("more than {MAX_ENTRIES} entries")));
        }
        if self.offset > MAX_OFFSET {
            return Err(ArchiveError::ArchiveTooLarge(format!(
                "entry {index} would start at offset {}", self.offset
            )));
        }

        let name = match name {
            Some(name) if self.directory.iter().any(|h| h.name == name) => {
                return Err(ArchiveError::DuplicateEntry(name.to_owned()));
            }
            Some(name) => name.to_owned(),
            None       => format!("{prefix}{index}"),
        };
        let header = LocalHeader::streamed(name.clone(), modified);
        header.write(self.sink()?)?;

        self.open = Some(OpenEntry {
            index,
            name,
            header_offset: self.offset,
            hasher:        Hasher::new(),
            size:          0,
        });
        self.offset     += header.encoded_len();
        self.next_index += 1;
        tracing::trace!(index, "allocated archive entry");
        Ok(index)
    }

    fn write_open(&mut self, index: usize, buf: &[u8]) -> Result<(), ArchiveError> {
        if self.closed {
            return Err(ArchiveError::Closed);
        }
        let size = match self.open.as_ref() {
            Some(open) if open.index == index => open.size,
            _ => return Err(ArchiveError::EntryClosed { index }),
        };
        if size + buf.len() as u64 > MAX_OFFSET {
            return Err(ArchiveError::ArchiveTooLarge(format!(
                "entry {index} would exceed {MAX_OFFSET} bytes"
            )));
        }

        self.sink()?.write_all(buf)?;

        if let Some(open) = self.open.as_mut() {
            open.hasher.update(buf);
            open.size += buf.len() as u64;
        }
        self.offset += buf.len() as u64;
        Ok(())
    }

    /// Seal the open entry, if any: data descriptor + directory record.
    fn finish_open(&mut self, modified: DosDateTime) -> Result<Option<EntryInfo>, ArchiveError> {
        let open = match self.open.take() {
            Some(o) => o,
            None    => return Ok(None),
        };
        let crc32 = open.hasher.finalize();
        // Both bounded by MAX_OFFSET in begin_entry / write_open.
        let size          = open.size as u32;
        let header_offset = open.header_offset as u32;

        DataDescriptor { crc32, compressed_size: size, uncompressed_size: size }
            .write(self.sink()?)?;
        self.offset += DATA_DESCRIPTOR_SIZE as u64;

        self.directory.push(CentralHeader::stored(
            open.name.clone(), modified, crc32, size, header_offset,
        ));
        tracing::trace!(index = open.index, size, crc32, "sealed archive entry");

        Ok(Some(EntryInfo {
            index:    open.index,
            name:     open.name,
            size:     open.size,
            crc32,
            modified: modified.to_naive(),
        }))
    }
}

/// Streaming zip writer over any `Write`.
pub struct ArchiveWriter<W: Write> {
    state:        Mutex<WriterState<W>>,
    entry_prefix: String,
    modified:     DosDateTime,
    path:         Option<PathBuf>,
}

impl ArchiveWriter<BufWriter<File>> {
    /// Create the physical file at `path` and start an empty archive in it.
    pub fn create<P: AsRef<Path>>(path: P, options: &RepoOptions) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_owned();

        let mut open = OpenOptions::new();
        open.write(true);
        if options.overwrite {
            open.create(true).truncate(true);
        } else {
            open.create_new(true);
        }
        let file = open
            .open(&path)
            .map_err(|source| ArchiveError::Create { path: path.clone(), source })?;

        let mut writer = ArchiveWriter::new(BufWriter::with_capacity(options.buffer_capacity, file))
            .with_entry_prefix(&options.entry_prefix);
        if let Some(ts) = options.timestamp {
            writer = writer.with_timestamp(DosDateTime::from_utc(&ts));
        }
        if options.sync_on_close {
            writer = writer.on_close(|w: &mut BufWriter<File>| w.get_ref().sync_all());
        }
        writer.path = Some(path.clone());

        tracing::debug!("Created archive: {}", path.display());
        Ok(writer)
    }
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            state: Mutex::new(WriterState {
                writer:     Some(writer),
                offset:     0,
                next_index: 0,
                open:       None,
                directory:  Vec::new(),
                comment:    Vec::new(),
                on_close:   None,
                closed:     false,
            }),
            entry_prefix: DEFAULT_ENTRY_PREFIX.to_owned(),
            modified:     DosDateTime::from_utc(&Utc::now()),
            path:         None,
        }
    }

    pub fn with_entry_prefix(mut self, prefix: &str) -> Self {
        self.entry_prefix = prefix.to_owned();
        self
    }

    pub fn with_timestamp(mut self, modified: DosDateTime) -> Self {
        self.modified = modified;
        self
    }

    /// Run `hook` on the underlying writer after the end record is flushed.
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut W) -> io::Result<()> + Send + 'static,
    {
        if let Ok(state) = self.state.get_mut() {
            state.on_close = Some(Box::new(hook));
        }
        self
    }

    pub fn path(&self) -> Option<&Path> { self.path.as_deref() }

    fn lock(&self) -> Result<MutexGuard<'_, WriterState<W>>, ArchiveError> {
        self.state.lock().map_err(|_| ArchiveError::LockPoisoned)
    }

    /// Seal the currently open entry (if any) and start the next one.
    ///
    /// The returned writer stays valid until the next `new_entry`,
    /// `append_entry` or `close`; writes after that fail with
    /// [`ArchiveError::EntryClosed`].
    pub fn new_entry(&self) -> Result<EntryWriter<'_, W>, ArchiveError> {
        self.start_entry(None)
    }

    /// Like [`new_entry`](Self::new_entry), but with an explicit entry name
    /// instead of `{prefix}{index}`.  Names must be unique.
    pub fn new_named_entry(&self, name: &str) -> Result<EntryWriter<'_, W>, ArchiveError> {
        self.start_entry(Some(name))
    }

    fn start_entry(&self, name: Option<&str>) -> Result<EntryWriter<'_, W>, ArchiveError> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(ArchiveError::Closed);
        }
        state.finish_open(self.modified)?;
        let index = state.begin_entry(&self.entry_prefix, name, self.modified)?;
        Ok(EntryWriter { archive: self, index })
    }

    /// Write `data` as one complete entry in a single critical section.
    pub fn append_entry(&self, data: &[u8]) -> Result<EntryInfo, ArchiveError> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(ArchiveError::Closed);
        }
        state.finish_open(self.modified)?;
        let index = state.begin_entry(&self.entry_prefix, None, self.modified)?;
        state.write_open(index, data)?;
        state
            .finish_open(self.modified)?
            .ok_or(ArchiveError::EntryClosed { index })
    }

    /// Set the comment stored in the end record.
    pub fn set_comment(&self, comment: impl Into<Vec<u8>>) -> Result<(), ArchiveError> {
        let comment = comment.into();
        if comment.len() > MAX_COMMENT_LEN {
            return Err(ArchiveError::ArchiveTooLarge(format!(
                "comment of {} bytes", comment.len()
            )));
        }
        let mut state = self.lock()?;
        if state.closed {
            return Err(ArchiveError::Closed);
        }
        state.comment = comment;
        Ok(())
    }

    /// Re-borrow a stream for an entry allocated earlier.  Writes still fail
    /// with [`ArchiveError::EntryClosed`] once the entry has been sealed.
    pub(crate) fn entry_writer(&self, index: usize) -> EntryWriter<'_, W> {
        EntryWriter { archive: self, index }
    }

    fn write_entry(&self, index: usize, buf: &[u8]) -> Result<(), ArchiveError> {
        self.lock()?.write_open(index, buf)
    }

    fn flush_entry(&self, index: usize) -> Result<(), ArchiveError> {
        let mut state = self.lock()?;
        match state.open.as_ref() {
            Some(open) if open.index == index => Ok(state.sink()?.flush()?),
            _ => Err(ArchiveError::EntryClosed { index }),
        }
    }

    fn finish_entry(&self, index: usize) -> Result<EntryInfo, ArchiveError> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(ArchiveError::Closed);
        }
        if state.open.as_ref().map(|o| o.index) != Some(index) {
            return Err(ArchiveError::EntryClosed { index });
        }
        state
            .finish_open(self.modified)?
            .ok_or(ArchiveError::EntryClosed { index })
    }

    /// Seal the open entry, write the central directory and end record, and
    /// flush.  Must be called exactly once; later calls fail with
    /// [`ArchiveError::Closed`].
    pub fn close(&self) -> Result<(), ArchiveError> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(ArchiveError::Closed);
        }
        state.closed = true;

        state.finish_open(self.modified)?;

        let cd_offset = state.offset;
        let entries   = state.directory.len();
        let directory = std::mem::take(&mut state.directory);
        let mut cd_size = 0u64;
        for header in &directory {
            header.write(state.sink()?)?;
            cd_size += header.encoded_len();
        }
        if cd_offset > MAX_OFFSET || cd_size > MAX_OFFSET {
            return Err(ArchiveError::ArchiveTooLarge(format!(
                "central directory at {cd_offset} spanning {cd_size} bytes"
            )));
        }

        let end = EndRecord {
            disk_number:     0,
            cd_disk:         0,
            entries_on_disk: entries as u16,
            total_entries:   entries as u16,
            cd_size:         cd_size as u32,
            cd_offset:       cd_offset as u32,
            comment:         std::mem::take(&mut state.comment),
        };
        end.write(state.sink()?)?;
        state.offset = cd_offset + cd_size;
        state.directory = directory;

        let hook = state.on_close.take();
        let sink = state.sink()?;
        sink.flush()?;
        if let Some(hook) = hook {
            hook(sink)?;
        }

        match &self.path {
            Some(p) => tracing::debug!("Closed archive: {} ({entries} entries)", p.display()),
            None    => tracing::debug!("Closed archive ({entries} entries)"),
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|s| s.closed).unwrap_or(true)
    }

    /// Close (if still open) and hand back the underlying writer.
    pub fn into_inner(self) -> Result<W, ArchiveError> {
        if !self.is_closed() {
            self.close()?;
        }
        let writer = self.lock()?.writer.take();
        writer.ok_or(ArchiveError::Closed)
    }
}

impl<W: Write> Drop for ArchiveWriter<W> {
    fn drop(&mut self) {
        let pending = match self.state.get_mut() {
            Ok(state) => !state.closed && state.writer.is_some(),
            Err(_)    => false,
        };
        if pending {
            if let Err(e) = self.close() {
                tracing::warn!("Failed to finalize archive on drop: {}", e);
            }
        }
    }
}

// ── EntryWriter ──────────────────────────────────────────────────────────────

/// Writable stream bound to one archive entry.
pub struct EntryWriter<'a, W: Write> {
    archive: &'a ArchiveWriter<W>,
    index:   usize,
}

impl<W: Write> EntryWriter<'_, W> {
    /// Zero-based entry index; also the numeric suffix of the entry name.
    pub fn index(&self) -> usize { self.index }

    /// Seal the entry now instead of waiting for the next allocation.
    pub fn finish(self) -> Result<EntryInfo, ArchiveError> {
        self.archive.finish_entry(self.index)
    }
}

impl<W: Write> Write for EntryWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.archive.write_entry(self.index, buf).map_err(into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.archive.flush_entry(self.index).map_err(into_io)
    }
}
