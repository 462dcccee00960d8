//! Crate-level error returned by [`crate::Repository`].

use thiserror::Error;

use crate::container::{from_io, ArchiveError};
use crate::frame::FrameError;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Frame(FrameError),
    #[error("shard {0} holds no record")]
    EmptyShard(usize),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<FrameError> for Error {
    /// Archive errors that travelled through a frame stream as `io::Error`
    /// come back out as [`Error::Archive`]; everything else stays a frame
    /// error.
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Read(e) | FrameError::Write(e) if is_archive_error(&e) => {
                Error::Archive(from_io(e))
            }
            other => Error::Frame(other),
        }
    }
}

fn is_archive_error(err: &std::io::Error) -> bool {
    err.get_ref().map_or(false, |inner| inner.is::<ArchiveError>())
}

impl Error {
    /// The archive-level cause, if any.
    pub fn as_archive(&self) -> Option<&ArchiveError> {
        match self {
            Error::Archive(e) => Some(e),
            _                 => None,
        }
    }

    /// The frame-level cause, if any.
    pub fn as_frame(&self) -> Option<&FrameError> {
        match self {
            Error::Frame(e) => Some(e),
            _               => None,
        }
    }
}
