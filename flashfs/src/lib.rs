// SPDX-License-Identifier: MIT
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(all(not(feature = "std"), feature = "alloc"))]
extern crate alloc;

// === Core modules ===
pub mod checker;
pub mod constant;
pub mod errors;
pub mod log;
mod macros;
pub mod meta;
mod ops;
pub mod types;
pub mod utils;

// === Public surface (std) ===
#[cfg(feature = "std")]
mod filesystem;
#[cfg(feature = "std")]
mod stream;

// === Prelude re-exports (central entrypoint) ===
pub mod prelude {
    pub use super::checker::{CheckStats, LogChecker};
    pub use super::constant::*;
    pub use super::errors::*;
    pub use super::log::{FileRef, LogCore};
    pub use super::meta::LogMeta;
    pub use super::types::{ClusterBuffer, ClusterHeader, FileClusterHeader};

    #[cfg(feature = "std")]
    pub use super::{FileStream, FlashFs, FsStats, OpenMode};
}

// Error types
pub use errors::*;

// Reusable core types
pub use log::{FileRef, LogCore};
pub use meta::LogMeta;

// Standard-only surface
#[cfg(feature = "std")]
pub use filesystem::{FlashFs, FsStats, OpenMode};
#[cfg(feature = "std")]
pub use stream::FileStream;
