//! Serializer capability: the value <-> bytes half of a framed record.
//!
//! The container and the frame codec never look inside a payload.  Whatever
//! turns a value into bytes is picked per record type at the call site by
//! choosing a [`Serializer`] implementation.
//!
//! | Serializer | Payload encoding |
//! |------------|------------------|
//! | [`Bincode`] | bincode 1.x, fixed-int little-endian (default) |
//! | [`Json`]    | UTF-8 JSON via `serde_json` |
//! | [`Raw`]     | payload bytes stored verbatim (`Vec<u8>` only) |
//!
//! Other formats (e.g. schema-defined protobuf messages) plug in by
//! implementing [`Serializer`] for the message type.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Custom(String),
}

// ── Serializer trait ─────────────────────────────────────────────────────────

/// Identity of a payload encoding, independent of the record type.
pub trait Format {
    /// Short identifier recorded in the archive comment (diagnostics only).
    fn name(&self) -> &'static str;
}

/// Turns a `T` into a deterministic byte encoding and back.
///
/// `decode` must fail on malformed input rather than return a default value.
pub trait Serializer<T>: Format {
    fn encode(&self, value: &T) -> Result<Vec<u8>, SerializeError>;
    fn decode(&self, bytes: &[u8]) -> Result<T, SerializeError>;
}

impl<F: Format + ?Sized> Format for &F {
    fn name(&self) -> &'static str { (**self).name() }
}

impl<T, S: Serializer<T> + ?Sized> Serializer<T> for &S {
    fn encode(&self, value: &T) -> Result<Vec<u8>, SerializeError> { (**self).encode(value) }
    fn decode(&self, bytes: &[u8]) -> Result<T, SerializeError> { (**self).decode(bytes) }
}

// ── Built-in serializers ────────────────────────────────────────────────────

/// bincode 1.x with its default (fixed-int, little-endian) configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bincode;

impl Format for Bincode {
    fn name(&self) -> &'static str { "bincode" }
}

impl<T: Serialize + DeserializeOwned> Serializer<T> for Bincode {
    fn encode(&self, value: &T) -> Result<Vec<u8>, SerializeError> {
        Ok(bincode::serialize(value)?)
    }
    fn decode(&self, bytes: &[u8]) -> Result<T, SerializeError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Compact JSON.  Larger than bincode but readable with `unzip -p`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Json;

impl Format for Json {
    fn name(&self) -> &'static str { "json" }
}

impl<T: Serialize + DeserializeOwned> Serializer<T> for Json {
    fn encode(&self, value: &T) -> Result<Vec<u8>, SerializeError> {
        Ok(serde_json::to_vec(value)?)
    }
    fn decode(&self, bytes: &[u8]) -> Result<T, SerializeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Identity: the record already is its payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Raw;

impl Format for Raw {
    fn name(&self) -> &'static str { "raw" }
}

impl Serializer<Vec<u8>> for Raw {
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>, SerializeError> { Ok(value.clone()) }
    fn decode(&self, bytes: &[u8])      -> Result<Vec<u8>, SerializeError> { Ok(bytes.to_vec()) }
}

/// Resolve a serializer name (as written by [`Format::name`]) to a
/// canonical spelling.  Returns `None` for names this build does not ship.
pub fn canonical_name(s: &str) -> Option<&'static str> {
    match s.to_lowercase().as_str() {
        "bincode" => Some("bincode"),
        "json"    => Some("json"),
        "raw"     => Some("raw"),
        _         => None,
    }
}
