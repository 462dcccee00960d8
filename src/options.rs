use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::frame::DEFAULT_MAX_FRAME_LEN;

/// Default entry name prefix; entries are named `file0`, `file1`, ...
pub const DEFAULT_ENTRY_PREFIX: &str = "file";
/// Default entry name of a single-stream record file.
pub const DEFAULT_RECORD_ENTRY: &str = "file";
/// Default write buffer: 8 MiB.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8 * 1024 * 1024;

/// Configuration for creating and opening repositories.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// let opts: shardzip::RepoOptions =
///     serde_json::from_str(r#"{ "entry_prefix": "batch" }"#).unwrap();
/// assert_eq!(opts.entry_prefix, "batch");
/// assert!(opts.overwrite);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoOptions {
    pub entry_prefix:    String,
    /// Entry name used by [`crate::records::RecordWriter`].
    pub record_entry:    String,
    pub buffer_capacity: usize,
    /// Frames declaring more than this many bytes are rejected on read.
    pub max_frame_len:   u32,
    /// When false, creating over an existing path fails.
    pub overwrite:       bool,
    /// `fsync` the file when the archive is closed.
    pub sync_on_close:   bool,
    /// Modification time stamped on every entry.  `None` means the time the
    /// archive was created.
    pub timestamp:       Option<DateTime<Utc>>,
}

impl Default for RepoOptions {
    fn default() -> Self {
        Self {
            entry_prefix:    DEFAULT_ENTRY_PREFIX.to_owned(),
            record_entry:    DEFAULT_RECORD_ENTRY.to_owned(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_frame_len:   DEFAULT_MAX_FRAME_LEN,
            overwrite:       true,
            sync_on_close:   true,
            timestamp:       None,
        }
    }
}
