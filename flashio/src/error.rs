// SPDX-License-Identifier: MIT

/// Result type for flash device operations.
pub type FlashIOResult<T = ()> = core::result::Result<T, FlashIOError>;

/// Error type for flash device operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashIOError {
    /// Underlying device fault.
    Device(&'static str),

    /// Attempted to read, program or erase out of bounds.
    OutOfBounds,

    /// Operation not supported by this backend.
    Unsupported,

    /// Anything else.
    Other(&'static str),
}

impl FlashIOError {
    pub fn msg(&self) -> &'static str {
        match self {
            FlashIOError::Device(msg) => msg,
            FlashIOError::OutOfBounds => "Out of bounds",
            FlashIOError::Unsupported => "Unsupported operation",
            FlashIOError::Other(msg) => msg,
        }
    }
}

impl core::fmt::Display for FlashIOError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.msg())
    }
}
