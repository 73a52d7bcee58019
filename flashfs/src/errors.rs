// SPDX-License-Identifier: MIT

use core::fmt;

pub use flashio::error::*;

/// Top-level error of the file system core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Underlying device error.
    IO(FlashIOError),
    /// Mount found an illegal sector-head marker.
    NotFormatted,
    /// Operation requires a successful mount first.
    NotMounted,
    /// Name lookup failed where the operation requires existence.
    FileNotFound,
    /// Destination exists where uniqueness is required.
    PathAlreadyExists,
    /// Destructive operation on a file with open handles.
    FileInUse,
    /// A cluster was needed and compaction could not free one.
    DiskFull,
    /// Position beyond the end of the file on write or truncate.
    WritePastEnd,
    /// Invalid argument (e.g. over-long file name).
    ArgumentOutOfRange(&'static str),
    /// On-device state diverged from the in-memory accounting.
    Corrupted(&'static str),
    Other(&'static str),
}

impl FsError {
    pub fn msg(&self) -> &'static str {
        match self {
            FsError::IO(_) => "IO error",
            FsError::NotFormatted => "Device is not formatted",
            FsError::NotMounted => "File system is not mounted",
            FsError::FileNotFound => "File not found",
            FsError::PathAlreadyExists => "Path already exists",
            FsError::FileInUse => "File is in use",
            FsError::DiskFull => "Disk full",
            FsError::WritePastEnd => "Position is past the end of the file",
            FsError::ArgumentOutOfRange(msg) => msg,
            FsError::Corrupted(msg) => msg,
            FsError::Other(msg) => msg,
        }
    }

    pub fn source(&self) -> Option<FlashIOError> {
        match self {
            FsError::IO(e) => Some(*e),
            _ => None,
        }
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        if let Some(src) = self.source() {
            write!(f, "\n  caused by: {}", src.msg())?;
        }
        Ok(())
    }
}

// === impl From ===

impl From<FlashIOError> for FsError {
    #[inline]
    fn from(e: FlashIOError) -> Self {
        FsError::IO(e)
    }
}

impl From<&'static str> for FsError {
    #[inline]
    fn from(msg: &'static str) -> Self {
        FsError::Other(msg)
    }
}

#[cfg(feature = "std")]
impl From<FsError> for std::io::Error {
    fn from(e: FsError) -> Self {
        use std::io::ErrorKind;
        let kind = match e {
            FsError::FileNotFound => ErrorKind::NotFound,
            FsError::PathAlreadyExists => ErrorKind::AlreadyExists,
            FsError::WritePastEnd | FsError::ArgumentOutOfRange(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, e.msg())
    }
}

// === type FsResult ===

pub type FsResult<T = ()> = Result<T, FsError>;
