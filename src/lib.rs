//! Zip-backed shard repository for length-prefixed serialized records.
//!
//! A repository is a classic zip archive whose entries (`file0`, `file1`, ...)
//! are shards.  Each shard holds one or more frames:
//!
//! ```text
//! | length: u32 LE | payload | length: u32 LE | payload | ...
//! ```
//!
//! Payload bytes come from a pluggable [`Serializer`]; bincode is the
//! default.  Entries are stored uncompressed, so any zip tool can list and
//! extract them.

pub mod container;
pub mod convert;
pub mod error;
pub mod frame;
pub mod options;
pub mod records;
pub mod repository;
pub mod scan;
pub mod serializer;

pub use container::{ArchiveError, EntryInfo, Mode};
pub use convert::Timestamp;
pub use error::{Error, Result};
pub use frame::{FrameError, FrameReader, FrameWriter};
pub use options::RepoOptions;
pub use records::{RecordReader, RecordWriter};
pub use repository::{Repository, ShardReader, ShardWriter};
pub use scan::{ShardHealth, VerifyQuality, VerifyReport};
pub use serializer::{Bincode, Format, Json, Raw, SerializeError, Serializer};
