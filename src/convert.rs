//! Seconds/nanos timestamps for record payloads.
//!
//! [`Timestamp`] is the `{seconds, nanos}` pair used by schema-defined
//! message formats, restricted to years 1 through 9999 UTC.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `0001-01-01T00:00:00Z`
pub const MIN_SECONDS: i64 = -62_135_596_800;
/// `9999-12-31T23:59:59Z`
pub const MAX_SECONDS: i64 = 253_402_300_799;

const NANOS_PER_SECOND: i32 = 1_000_000_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("timestamp {0}s is outside 0001-01-01 through 9999-12-31")]
    OutOfRange(i64),
    #[error("nanos {0} is outside 0..1_000_000_000")]
    InvalidNanos(i32),
}

/// Point in time as whole seconds since the Unix epoch plus a non-negative
/// nanosecond fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos:   i32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            seconds: now.timestamp(),
            // A leap second reports nanos >= 1e9.
            nanos:   (now.timestamp_subsec_nanos() as i32).min(NANOS_PER_SECOND - 1),
        }
    }

    pub fn from_datetime(dt: &DateTime<Utc>) -> Result<Self, ConvertError> {
        let ts = Self {
            seconds: dt.timestamp(),
            nanos:   dt.timestamp_subsec_nanos() as i32,
        };
        ts.validate()?;
        Ok(ts)
    }

    pub fn to_datetime(&self) -> Result<DateTime<Utc>, ConvertError> {
        self.validate()?;
        Utc.timestamp_opt(self.seconds, self.nanos as u32)
            .single()
            .ok_or(ConvertError::OutOfRange(self.seconds))
    }

    pub fn validate(&self) -> Result<(), ConvertError> {
        if !(MIN_SECONDS..=MAX_SECONDS).contains(&self.seconds) {
            return Err(ConvertError::OutOfRange(self.seconds));
        }
        if !(0..NANOS_PER_SECOND).contains(&self.nanos) {
            return Err(ConvertError::InvalidNanos(self.nanos));
        }
        Ok(())
    }
}

impl TryFrom<DateTime<Utc>> for Timestamp {
    type Error = ConvertError;

    fn try_from(dt: DateTime<Utc>) -> Result<Self, Self::Error> {
        Self::from_datetime(&dt)
    }
}

impl TryFrom<Timestamp> for DateTime<Utc> {
    type Error = ConvertError;

    fn try_from(ts: Timestamp) -> Result<Self, Self::Error> {
        ts.to_datetime()
    }
}
