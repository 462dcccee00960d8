//! Read side of the container.
//!
//! `open` parses the end record and the central directory once; the entry
//! list never changes afterwards.  Every `open_entry` call opens its own file
//! handle, so entry streams are independent of each other and of the
//! archive, and can be read concurrently.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Take};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crc32fast::Hasher;
use flate2::read::DeflateDecoder;

use super::format::{CentralHeader, EndRecord, LocalHeader, METHOD_DEFLATED, METHOD_STORED};
use super::{into_io, ArchiveError, EntryInfo};

/// General purpose bit 0: traditional PKWARE encryption.
const FLAG_ENCRYPTED: u16 = 0x0001;

fn open_file(path: &Path) -> Result<File, ArchiveError> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ArchiveError::NotFound { path: path.to_owned() },
        _                       => ArchiveError::Io(e),
    })
}

fn corrupt(msg: impl Into<String>) -> ArchiveError {
    ArchiveError::CorruptArchive(msg.into())
}

pub struct ArchiveReader {
    path:      PathBuf,
    directory: Vec<CentralHeader>,
    comment:   Vec<u8>,
    closed:    Arc<AtomicBool>,
}

impl ArchiveReader {
    /// Open an existing archive and load its central directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_owned();
        let mut reader = BufReader::new(open_file(&path)?);

        let (end_offset, end) = EndRecord::find(&mut reader).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => corrupt(e.to_string()),
            _ => ArchiveError::Io(e),
        })?;

        if end.needs_zip64() {
            return Err(corrupt("zip64 archives are not supported"));
        }
        if end.disk_number != 0 || end.cd_disk != 0 || end.entries_on_disk != end.total_entries {
            return Err(corrupt("multi-disk archives are not supported"));
        }
        let cd_end = end.cd_offset as u64 + end.cd_size as u64;
        if cd_end > end_offset {
            return Err(corrupt(format!(
                "central directory ({} bytes at {}) overlaps the end record at {end_offset}",
                end.cd_size, end.cd_offset
            )));
        }

        reader.seek(SeekFrom::Start(end.cd_offset as u64))?;
        let mut directory = Vec::with_capacity(end.total_entries as usize);
        for i in 0..end.total_entries as usize {
            let header = CentralHeader::read(&mut reader)
                .map_err(|e| corrupt(format!("central directory entry {i}: {e}")))?;
            directory.push(header);
        }

        tracing::debug!("Opened archive: {} ({} entries)", path.display(), directory.len());

        Ok(Self {
            path,
            directory,
            comment: end.comment,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn entry_count(&self) -> usize { self.directory.len() }

    pub fn entries(&self) -> Vec<EntryInfo> {
        self.directory.iter().enumerate().map(|(i, h)| entry_info(i, h)).collect()
    }

    pub fn entry(&self, index: usize) -> Option<EntryInfo> {
        self.directory.get(index).map(|h| entry_info(index, h))
    }

    pub fn comment(&self) -> &[u8] { &self.comment }

    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }

    pub(crate) fn ensure_open(&self) -> Result<(), ArchiveError> {
        if self.is_closed() { Err(ArchiveError::Closed) } else { Ok(()) }
    }

    /// Open an independent read-only stream over entry `index`.
    pub fn open_entry(&self, index: usize) -> Result<EntryReader, ArchiveError> {
        self.ensure_open()?;
        let header = self.directory.get(index).ok_or(ArchiveError::IndexOutOfRange {
            index,
            count: self.directory.len(),
        })?;

        if header.needs_zip64() {
            return Err(corrupt(format!("entry {} needs zip64", header.name)));
        }
        if header.flags & FLAG_ENCRYPTED != 0 {
            return Err(ArchiveError::UnsupportedEntry {
                name:   header.name.clone(),
                reason: "entry is encrypted".into(),
            });
        }
        if header.method != METHOD_STORED && header.method != METHOD_DEFLATED {
            return Err(ArchiveError::UnsupportedEntry {
                name:   header.name.clone(),
                reason: format!("compression method {} (only stored and deflated entries are read)", header.method),
            });
        }

        let mut reader = BufReader::new(open_file(&self.path)?);
        reader.seek(SeekFrom::Start(header.local_header_offset as u64))?;
        let local = LocalHeader::read(&mut reader)
            .map_err(|e| corrupt(format!("local header of {}: {e}", header.name)))?;
        if local.name != header.name {
            return Err(corrupt(format!(
                "local header names {:?} but the directory names {:?}", local.name, header.name
            )));
        }
        let data_offset = header.local_header_offset as u64 + local.encoded_len();
        reader.seek(SeekFrom::Start(data_offset))?;

        tracing::trace!(index, name = %header.name, method = header.method, size = header.uncompressed_size, "opened archive entry");

        let body = reader.take(header.compressed_size as u64);
        let inner = match header.method {
            METHOD_DEFLATED => EntrySource::Deflated(DeflateDecoder::new(body)),
            _               => EntrySource::Stored(body),
        };

        Ok(EntryReader {
            inner,
            hasher:   Hasher::new(),
            name:     header.name.clone(),
            index,
            size:     header.uncompressed_size as u64,
            read:     0,
            crc32:    header.crc32,
            verified: false,
            closed:   Arc::clone(&self.closed),
        })
    }

    /// Release the archive.  Later `open_entry` calls, and reads on entry
    /// streams opened earlier, fail with [`ArchiveError::Closed`].
    pub fn close(&self) -> Result<(), ArchiveError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ArchiveError::Closed);
        }
        tracing::debug!("Closed archive: {}", self.path.display());
        Ok(())
    }
}

fn entry_info(index: usize, header: &CentralHeader) -> EntryInfo {
    EntryInfo {
        index,
        name:     header.name.clone(),
        size:     header.uncompressed_size as u64,
        crc32:    header.crc32,
        modified: header.modified.to_naive(),
    }
}

// ── EntryReader ──────────────────────────────────────────────────────────────

enum EntrySource {
    Stored(Take<BufReader<File>>),
    Deflated(DeflateDecoder<Take<BufReader<File>>>),
}

impl Read for EntrySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EntrySource::Stored(r)   => r.read(buf),
            EntrySource::Deflated(r) => r.read(buf),
        }
    }
}

/// Read-only stream over one entry's (decompressed) bytes.
///
/// Every `read` fills the buffer as far as the entry allows, so a short read
/// only happens at the end of the entry.  The CRC-32 and size from the
/// central directory are checked once the stream reaches the end; a
/// mismatch surfaces as an `InvalidData` read error carrying
/// [`ArchiveError::ChecksumMismatch`].
pub struct EntryReader {
    inner:    EntrySource,
    hasher:   Hasher,
    name:     String,
    index:    usize,
    size:     u64,
    read:     u64,
    crc32:    u32,
    verified: bool,
    closed:   Arc<AtomicBool>,
}

impl EntryReader {
    pub fn index(&self) -> usize { self.index }
    pub fn name(&self) -> &str { &self.name }
    /// Declared entry size in bytes.
    pub fn size(&self) -> u64 { self.size }
    /// Bytes consumed so far.
    pub fn position(&self) -> u64 { self.read }

    /// Drain whatever is left of the entry and verify its checksum.
    pub fn finish(mut self) -> Result<(), ArchiveError> {
        io::copy(&mut self, &mut io::sink()).map_err(super::from_io)?;
        Ok(())
    }

    fn verify(&mut self) -> io::Result<()> {
        if self.read < self.size {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, format!(
                "entry {} ends after {} of {} bytes", self.name, self.read, self.size
            )));
        }
        if !self.verified {
            let actual = self.hasher.clone().finalize();
            if actual != self.crc32 {
                let err = ArchiveError::ChecksumMismatch {
                    name:     self.name.clone(),
                    expected: self.crc32,
                    actual,
                };
                return Err(io::Error::new(io::ErrorKind::InvalidData, err));
            }
            self.verified = true;
        }
        Ok(())
    }
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(into_io(ArchiveError::Closed));
        }
        let mut filled = 0;
        while filled < buf.len() {
            let n = match self.inner.read(&mut buf[filled..]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                self.verify()?;
                break;
            }
            self.hasher.update(&buf[filled..filled + n]);
            self.read += n as u64;
            filled    += n;
            if self.read > self.size {
                return Err(io::Error::new(io::ErrorKind::InvalidData, format!(
                    "entry {} inflates past its declared {} bytes", self.name, self.size
                )));
            }
        }
        Ok(filled)
    }
}
