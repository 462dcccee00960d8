//! Zip record layouts, read and written field by field.
//!
//! Only the subset the container needs is modelled.  Written entries are
//! stored (method 0) with general purpose bit 3 set (CRC-32 and sizes trail
//! the data in a data descriptor).  Read entries may also be deflated
//! (method 8).  No zip64, no encryption.  All fields are little-endian.
//!
//! ```text
//! [local header 0][data 0][data descriptor 0]
//! [local header 1][data 1][data descriptor 1]
//! ...
//! [central header 0][central header 1]...
//! [end of central directory record]
//! ```

use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};

pub const LOCAL_HEADER_SIG:    u32 = 0x0403_4b50;
pub const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
pub const CENTRAL_HEADER_SIG:  u32 = 0x0201_4b50;
pub const END_RECORD_SIG:      u32 = 0x0605_4b50;

pub const LOCAL_HEADER_SIZE:    usize = 30;
pub const DATA_DESCRIPTOR_SIZE: usize = 16;
pub const CENTRAL_HEADER_SIZE:  usize = 46;
pub const END_RECORD_SIZE:      usize = 22;
pub const MAX_COMMENT_LEN:      usize = 0xFFFF;

/// "Version needed to extract" for stored entries with a data descriptor.
pub const VERSION_NEEDED:  u16 = 20;
/// MS-DOS host, zip format version 2.0.
pub const VERSION_MADE_BY: u16 = 20;

pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
pub const FLAG_UTF8:            u16 = 0x0800;
pub const METHOD_STORED:        u16 = 0;
pub const METHOD_DEFLATED:      u16 = 8;

/// Largest entry count a classic end record can hold.
pub const MAX_ENTRIES: usize = 0xFFFF;
/// Largest size or offset a classic header can hold.  `0xFFFF_FFFF` itself
/// is the zip64 escape value.
pub const MAX_OFFSET:  u64   = 0xFFFF_FFFE;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn expect_sig<R: Read>(reader: &mut R, sig: u32, what: &str) -> io::Result<()> {
    let got = reader.read_u32::<LittleEndian>()?;
    if got != sig {
        return Err(invalid(format!("bad {what} signature 0x{got:08x}")));
    }
    Ok(())
}

fn read_bytes<R: Read>(reader: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn name_flags(name: &str) -> u16 {
    if name.is_ascii() { FLAG_DATA_DESCRIPTOR } else { FLAG_DATA_DESCRIPTOR | FLAG_UTF8 }
}

// ── DOS timestamps ───────────────────────────────────────────────────────────

/// MS-DOS packed date and time, two-second resolution, 1980..=2107.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant.
    pub const EPOCH: DosDateTime = DosDateTime { time: 0, date: (1 << 5) | 1 };

    pub fn from_naive(dt: &NaiveDateTime) -> Self {
        if dt.year() < 1980 {
            return Self::EPOCH;
        }
        let year = (dt.year() - 1980).min(127) as u16;
        Self {
            time: ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2),
            date: (year << 9) | ((dt.month() as u16) << 5) | dt.day() as u16,
        }
    }

    pub fn from_utc(dt: &DateTime<Utc>) -> Self {
        Self::from_naive(&dt.naive_utc())
    }

    /// `None` when the packed fields do not name a real calendar instant.
    pub fn to_naive(self) -> Option<NaiveDateTime> {
        let year  = 1980 + (self.date >> 9) as i32;
        let month = ((self.date >> 5) & 0x0F) as u32;
        let day   = (self.date & 0x1F) as u32;
        let hour  = (self.time >> 11) as u32;
        let min   = ((self.time >> 5) & 0x3F) as u32;
        let sec   = ((self.time & 0x1F) * 2) as u32;
        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, min, sec)
    }
}

// ── Local file header ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LocalHeader {
    pub flags:             u16,
    pub method:            u16,
    pub modified:          DosDateTime,
    pub crc32:             u32,
    pub compressed_size:   u32,
    pub uncompressed_size: u32,
    pub name:              String,
    pub extra:             Vec<u8>,
}

impl LocalHeader {
    /// Header for a streamed stored entry: CRC and sizes are zero here and
    /// follow the data in a [`DataDescriptor`].
    pub fn streamed(name: String, modified: DosDateTime) -> Self {
        Self {
            flags: name_flags(&name),
            method: METHOD_STORED,
            modified,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            name,
            extra: Vec::new(),
        }
    }

    pub fn encoded_len(&self) -> u64 {
        (LOCAL_HEADER_SIZE + self.name.len() + self.extra.len()) as u64
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(LOCAL_HEADER_SIG)?;
        writer.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_u16::<LittleEndian>(self.method)?;
        writer.write_u16::<LittleEndian>(self.modified.time)?;
        writer.write_u16::<LittleEndian>(self.modified.date)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.uncompressed_size)?;
        writer.write_u16::<LittleEndian>(self.name.len() as u16)?;
        writer.write_u16::<LittleEndian>(self.extra.len() as u16)?;
        writer.write_all(self.name.as_bytes())?;
        writer.write_all(&self.extra)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        expect_sig(&mut reader, LOCAL_HEADER_SIG, "local header")?;
        let _version_needed   = reader.read_u16::<LittleEndian>()?;
        let flags             = reader.read_u16::<LittleEndian>()?;
        let method            = reader.read_u16::<LittleEndian>()?;
        let time              = reader.read_u16::<LittleEndian>()?;
        let date              = reader.read_u16::<LittleEndian>()?;
        let crc32             = reader.read_u32::<LittleEndian>()?;
        let compressed_size   = reader.read_u32::<LittleEndian>()?;
        let uncompressed_size = reader.read_u32::<LittleEndian>()?;
        let name_len          = reader.read_u16::<LittleEndian>()? as usize;
        let extra_len         = reader.read_u16::<LittleEndian>()? as usize;
        let name  = String::from_utf8_lossy(&read_bytes(&mut reader, name_len)?).into_owned();
        let extra = read_bytes(&mut reader, extra_len)?;
        Ok(Self {
            flags,
            method,
            modified: DosDateTime { time, date },
            crc32,
            compressed_size,
            uncompressed_size,
            name,
            extra,
        })
    }
}

// ── Data descriptor ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32:             u32,
    pub compressed_size:   u32,
    pub uncompressed_size: u32,
}

impl DataDescriptor {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(DATA_DESCRIPTOR_SIG)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.uncompressed_size)?;
        Ok(())
    }
}

// ── Central directory header ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CentralHeader {
    pub version_made_by:     u16,
    pub version_needed:      u16,
    pub flags:               u16,
    pub method:              u16,
    pub modified:            DosDateTime,
    pub crc32:               u32,
    pub compressed_size:     u32,
    pub uncompressed_size:   u32,
    pub disk_start:          u16,
    pub internal_attrs:      u16,
    pub external_attrs:      u32,
    pub local_header_offset: u32,
    pub name:                String,
    pub extra:               Vec<u8>,
    pub comment:             Vec<u8>,
}

impl CentralHeader {
    /// Directory record for a finished stored entry.
    pub fn stored(name: String, modified: DosDateTime, crc32: u32, size: u32, local_header_offset: u32) -> Self {
        Self {
            version_made_by: VERSION_MADE_BY,
            version_needed:  VERSION_NEEDED,
            flags:           name_flags(&name),
            method:          METHOD_STORED,
            modified,
            crc32,
            compressed_size:   size,
            uncompressed_size: size,
            disk_start:        0,
            internal_attrs:    0,
            external_attrs:    0,
            local_header_offset,
            name,
            extra:   Vec::new(),
            comment: Vec::new(),
        }
    }

    pub fn encoded_len(&self) -> u64 {
        (CENTRAL_HEADER_SIZE + self.name.len() + self.extra.len() + self.comment.len()) as u64
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(CENTRAL_HEADER_SIG)?;
        writer.write_u16::<LittleEndian>(self.version_made_by)?;
        writer.write_u16::<LittleEndian>(self.version_needed)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_u16::<LittleEndian>(self.method)?;
        writer.write_u16::<LittleEndian>(self.modified.time)?;
        writer.write_u16::<LittleEndian>(self.modified.date)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.uncompressed_size)?;
        writer.write_u16::<LittleEndian>(self.name.len() as u16)?;
        writer.write_u16::<LittleEndian>(self.extra.len() as u16)?;
        writer.write_u16::<LittleEndian>(self.comment.len() as u16)?;
        writer.write_u16::<LittleEndian>(self.disk_start)?;
        writer.write_u16::<LittleEndian>(self.internal_attrs)?;
        writer.write_u32::<LittleEndian>(self.external_attrs)?;
        writer.write_u32::<LittleEndian>(self.local_header_offset)?;
        writer.write_all(self.name.as_bytes())?;
        writer.write_all(&self.extra)?;
        writer.write_all(&self.comment)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        expect_sig(&mut reader, CENTRAL_HEADER_SIG, "central directory")?;
        let version_made_by     = reader.read_u16::<LittleEndian>()?;
        let version_needed      = reader.read_u16::<LittleEndian>()?;
        let flags               = reader.read_u16::<LittleEndian>()?;
        let method              = reader.read_u16::<LittleEndian>()?;
        let time                = reader.read_u16::<LittleEndian>()?;
        let date                = reader.read_u16::<LittleEndian>()?;
        let crc32               = reader.read_u32::<LittleEndian>()?;
        let compressed_size     = reader.read_u32::<LittleEndian>()?;
        let uncompressed_size   = reader.read_u32::<LittleEndian>()?;
        let name_len            = reader.read_u16::<LittleEndian>()? as usize;
        let extra_len           = reader.read_u16::<LittleEndian>()? as usize;
        let comment_len         = reader.read_u16::<LittleEndian>()? as usize;
        let disk_start          = reader.read_u16::<LittleEndian>()?;
        let internal_attrs      = reader.read_u16::<LittleEndian>()?;
        let external_attrs      = reader.read_u32::<LittleEndian>()?;
        let local_header_offset = reader.read_u32::<LittleEndian>()?;
        let name    = String::from_utf8_lossy(&read_bytes(&mut reader, name_len)?).into_owned();
        let extra   = read_bytes(&mut reader, extra_len)?;
        let comment = read_bytes(&mut reader, comment_len)?;
        Ok(Self {
            version_made_by,
            version_needed,
            flags,
            method,
            modified: DosDateTime { time, date },
            crc32,
            compressed_size,
            uncompressed_size,
            disk_start,
            internal_attrs,
            external_attrs,
            local_header_offset,
            name,
            extra,
            comment,
        })
    }

    /// Any field carrying the zip64 escape value.
    pub fn needs_zip64(&self) -> bool {
        self.compressed_size == u32::MAX
            || self.uncompressed_size == u32::MAX
            || self.local_header_offset == u32::MAX
    }
}

// ── End of central directory record ─────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct EndRecord {
    pub disk_number:      u16,
    pub cd_disk:          u16,
    pub entries_on_disk:  u16,
    pub total_entries:    u16,
    pub cd_size:          u32,
    pub cd_offset:        u32,
    pub comment:          Vec<u8>,
}

impl EndRecord {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(END_RECORD_SIG)?;
        writer.write_u16::<LittleEndian>(self.disk_number)?;
        writer.write_u16::<LittleEndian>(self.cd_disk)?;
        writer.write_u16::<LittleEndian>(self.entries_on_disk)?;
        writer.write_u16::<LittleEndian>(self.total_entries)?;
        writer.write_u32::<LittleEndian>(self.cd_size)?;
        writer.write_u32::<LittleEndian>(self.cd_offset)?;
        writer.write_u16::<LittleEndian>(self.comment.len() as u16)?;
        writer.write_all(&self.comment)?;
        Ok(())
    }

    /// Parse from a buffer starting at the record signature.
    fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < END_RECORD_SIZE || LittleEndian::read_u32(buf) != END_RECORD_SIG {
            return None;
        }
        let comment_len = LittleEndian::read_u16(&buf[20..]) as usize;
        let comment = buf.get(END_RECORD_SIZE..END_RECORD_SIZE + comment_len)?.to_vec();
        Some(Self {
            disk_number:     LittleEndian::read_u16(&buf[4..]),
            cd_disk:         LittleEndian::read_u16(&buf[6..]),
            entries_on_disk: LittleEndian::read_u16(&buf[8..]),
            total_entries:   LittleEndian::read_u16(&buf[10..]),
            cd_size:         LittleEndian::read_u32(&buf[12..]),
            cd_offset:       LittleEndian::read_u32(&buf[16..]),
            comment,
        })
    }

    /// Locate the end record by scanning backwards over the trailing
    /// `END_RECORD_SIZE + MAX_COMMENT_LEN` bytes.  Returns the record and
    /// its absolute offset.
    pub fn find<R: Read + Seek>(reader: &mut R) -> io::Result<(u64, Self)> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        if file_len < END_RECORD_SIZE as u64 {
            return Err(invalid(format!("{file_len} bytes is too small for a zip archive")));
        }
        let window = file_len.min((END_RECORD_SIZE + MAX_COMMENT_LEN) as u64);
        let start  = file_len - window;
        reader.seek(SeekFrom::Start(start))?;
        let tail = read_bytes(reader, window as usize)?;

        for pos in (0..=tail.len() - END_RECORD_SIZE).rev() {
            if let Some(record) = Self::parse(&tail[pos..]) {
                return Ok((start + pos as u64, record));
            }
        }
        Err(invalid("end of central directory record not found"))
    }

    pub fn needs_zip64(&self) -> bool {
        self.total_entries == u16::MAX || self.cd_size == u32::MAX || self.cd_offset == u32::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn dos_time_round_trips_at_two_second_resolution() {
        let dt = NaiveDate::from_ymd_opt(2019, 1, 9).unwrap().and_hms_opt(13, 17, 23).unwrap();
        let dos = DosDateTime::from_naive(&dt);
        let back = dos.to_naive().unwrap();
        assert_eq!(back, NaiveDate::from_ymd_opt(2019, 1, 9).unwrap().and_hms_opt(13, 17, 22).unwrap());
    }

    #[test]
    fn dos_time_clamps_before_1980() {
        let dt = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(DosDateTime::from_naive(&dt), DosDateTime::EPOCH);
    }

    #[test]
    fn end_record_found_behind_comment() {
        let mut buf = vec![0xAAu8; 100];
        EndRecord { total_entries: 3, entries_on_disk: 3, cd_offset: 40, cd_size: 60, comment: b"hello".to_vec(), ..Default::default() }
            .write(&mut buf)
            .unwrap();
        let (offset, record) = EndRecord::find(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(offset, 100);
        assert_eq!(record.total_entries, 3);
        assert_eq!(record.comment, b"hello");
    }

    #[test]
    fn end_record_missing_is_invalid_data() {
        let err = EndRecord::find(&mut Cursor::new(vec![0u8; 64])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
