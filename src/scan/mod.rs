//! Frame-level shard scanner: walk every frame without deserializing it.
//!
//! # How it works
//!
//! The scanner reads a shard's length prefixes and skips over each payload.
//! It needs neither the serializer nor the record type, so it can diagnose a
//! repository written by any caller.
//!
//! ## Shard health
//!
//! | Health | Meaning |
//! |--------|---------|
//! | `Healthy` | ends exactly on a frame boundary, CRC-32 matches |
//! | `TornPrefix` | ends inside a length prefix |
//! | `TruncatedPayload` | ends inside a payload |
//! | `OversizedFrame` | a prefix declares more than `max_frame_len` |
//! | `ChecksumMismatch` | entry bytes do not match the directory CRC-32 |
//! | `Unreadable` | entry could not be opened (unsupported method, bad local header) |
//!
//! ## Quality
//!
//! | Quality | Condition |
//! |---------|-----------|
//! | `Full` | every shard healthy (or no shards) |
//! | `Partial` | at least half the shards healthy |
//! | `Catastrophic` | fewer than half healthy |

use std::io::{self, Read};

use crate::container::{from_io, ArchiveError};
use crate::frame::{discard, read_prefix, Prefix};

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardHealth {
    Healthy,
    TornPrefix { available: usize },
    TruncatedPayload { declared: u32, available: u64 },
    OversizedFrame { declared: u32, max: u32 },
    ChecksumMismatch { expected: u32, actual: u32 },
    Unreadable(String),
}

impl ShardHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ShardHealth::Healthy)
    }
}

/// Diagnostic record for one shard.
#[derive(Debug, Clone)]
pub struct ShardReport {
    pub index:         usize,
    pub name:          String,
    /// Complete frames seen before the first problem.
    pub frames:        u64,
    /// Sum of those frames' payload lengths.
    pub payload_bytes: u64,
    pub largest_frame: u32,
    pub health:        ShardHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyQuality {
    Full,
    Partial,
    Catastrophic,
}

/// Report produced by [`crate::Repository::verify`].
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub shards:  Vec<ShardReport>,
    pub healthy: usize,
    pub frames:  u64,
    pub quality: VerifyQuality,
}

impl VerifyReport {
    pub fn from_shards(shards: Vec<ShardReport>) -> Self {
        let healthy = shards.iter().filter(|s| s.health.is_healthy()).count();
        let frames  = shards.iter().map(|s| s.frames).sum();
        let quality = if healthy == shards.len() {
            VerifyQuality::Full
        } else if healthy * 2 >= shards.len() {
            VerifyQuality::Partial
        } else {
            VerifyQuality::Catastrophic
        };
        Self { shards, healthy, frames, quality }
    }

    /// Percentage of shards that are healthy (0.0–100.0).
    pub fn health_pct(&self) -> f64 {
        if self.shards.is_empty() { return 100.0; }
        self.healthy as f64 / self.shards.len() as f64 * 100.0
    }

    pub fn damaged(&self) -> impl Iterator<Item = &ShardReport> {
        self.shards.iter().filter(|s| !s.health.is_healthy())
    }

    /// Summary line for display.
    pub fn summary(&self) -> String {
        format!(
            "{:?}: {}/{} shards healthy ({:.1}%), {} frame(s)",
            self.quality,
            self.healthy,
            self.shards.len(),
            self.health_pct(),
            self.frames,
        )
    }
}

// ── Scanner ───────────────────────────────────────────────────────────────────

/// Walk every frame of one shard stream.
///
/// Damage is reported through [`ShardReport::health`]; only I/O failures
/// unrelated to the shard's content (e.g. the archive was closed) come back
/// as `Err`.
pub fn scan_shard<R: Read>(
    index:         usize,
    name:          &str,
    reader:        &mut R,
    max_frame_len: u32,
) -> Result<ShardReport, ArchiveError> {
    let mut report = ShardReport {
        index,
        name:          name.to_owned(),
        frames:        0,
        payload_bytes: 0,
        largest_frame: 0,
        health:        ShardHealth::Healthy,
    };

    match walk(reader, max_frame_len, &mut report) {
        Ok(health) => report.health = health,
        Err(e) => match from_io(e) {
            ArchiveError::ChecksumMismatch { expected, actual, .. } => {
                report.health = ShardHealth::ChecksumMismatch { expected, actual };
            }
            ArchiveError::Io(e) if is_content_error(&e) => {
                report.health = ShardHealth::Unreadable(e.to_string());
            }
            other => return Err(other),
        },
    }

    tracing::trace!(index, frames = report.frames, health = ?report.health, "scanned shard");
    Ok(report)
}

fn is_content_error(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData)
}

fn walk<R: Read>(reader: &mut R, max_frame_len: u32, report: &mut ShardReport) -> io::Result<ShardHealth> {
    loop {
        let len = match read_prefix(reader)? {
            Prefix::End             => return Ok(ShardHealth::Healthy),
            Prefix::Torn(available) => return Ok(ShardHealth::TornPrefix { available }),
            Prefix::Len(len)        => len,
        };
        if len > max_frame_len {
            return Ok(ShardHealth::OversizedFrame { declared: len, max: max_frame_len });
        }
        let available = discard(reader, len as u64)?;
        if available < len as u64 {
            return Ok(ShardHealth::TruncatedPayload { declared: len, available });
        }
        report.frames        += 1;
        report.payload_bytes += len as u64;
        report.largest_frame  = report.largest_frame.max(len);
    }
}
