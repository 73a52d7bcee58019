// SPDX-License-Identifier: MIT
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(all(not(feature = "std"), feature = "alloc"))]
extern crate alloc;

// === Core modules ===
pub mod error;
mod macros;

// === Backend modules ===
#[cfg(feature = "mem")]
mod mem;

#[cfg(feature = "std")]
mod std;

// === Instrumentation modules ===
#[cfg(feature = "std")]
mod fault;

#[cfg(feature = "std")]
mod stats;

// === Prelude re-exports (central entrypoint) ===
pub mod prelude {
    pub use super::error::*;
    pub use super::FlashGeometry;
    pub use super::FlashIO;
    pub use super::FlashIOExt;
    pub use super::FlashIOStructExt;
    pub use super::ERASED_BYTE;

    #[cfg(feature = "mem")]
    pub use super::mem::MemFlashIO;

    #[cfg(feature = "std")]
    pub use super::std::StdFlashIO;

    #[cfg(feature = "std")]
    pub use super::fault::{FaultFlashIO, FaultPlan};

    #[cfg(feature = "std")]
    pub use super::stats::{CountingFlashIO, FlashStats, StatsHandle};
}

// === Internal use ===
use error::*;
#[allow(clippy::single_component_path_imports)]
use paste;

// === Constants ===
/// Fill value of erased flash: every bit set.
pub const ERASED_BYTE: u8 = 0xFF;

/// Size of internal scratch buffer used by chunked erase fills.
const ERASE_BUF_SIZE: usize = 4096;

// === Geometry ===

/// Fixed geometry of a flash device.
///
/// `sector_size` is the erase granule, `cluster_size` the program/allocation
/// granule. Both are byte counts; `cluster_size` must divide `sector_size`
/// and `sector_size` must divide `device_size` (see [`FlashGeometry::is_valid`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    pub device_size: u64,
    pub sector_size: u32,
    pub cluster_size: u32,
}

impl FlashGeometry {
    #[inline]
    pub fn new(device_size: u64, sector_size: u32, cluster_size: u32) -> Self {
        Self {
            device_size,
            sector_size,
            cluster_size,
        }
    }

    #[inline]
    pub fn total_sectors(&self) -> u32 {
        (self.device_size / self.sector_size as u64) as u32
    }

    #[inline]
    pub fn total_clusters(&self) -> u32 {
        (self.device_size / self.cluster_size as u64) as u32
    }

    #[inline]
    pub fn clusters_per_sector(&self) -> u32 {
        self.sector_size / self.cluster_size
    }

    #[inline]
    pub fn sector_offset(&self, sector_id: u32) -> u64 {
        sector_id as u64 * self.sector_size as u64
    }

    #[inline]
    pub fn cluster_offset(&self, cluster_id: u32) -> u64 {
        cluster_id as u64 * self.cluster_size as u64
    }

    pub fn is_valid(&self) -> bool {
        self.cluster_size != 0
            && self.sector_size != 0
            && self.device_size != 0
            && self.sector_size % self.cluster_size == 0
            && self.device_size % self.sector_size as u64 == 0
    }
}

// === Traits ===

/// Flash device abstraction trait.
///
/// Reads are random-access. Writes are *programs*: on real NOR hardware a
/// program can only clear bits (1 → 0); restoring bits requires erasing the
/// whole containing sector. Implementations may target RAM, image files or
/// actual chips.
pub trait FlashIO {
    /// Geometry of the device (fixed at construction).
    fn geometry(&self) -> FlashGeometry;

    /// Reads `buf.len()` bytes into `buf` from `offset` (absolute).
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> FlashIOResult;

    /// Programs `data` at `offset` (absolute). Bit-clearing only.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> FlashIOResult;

    /// Restores every byte of the sector to [`ERASED_BYTE`].
    fn erase_sector(&mut self, sector_id: u32) -> FlashIOResult;

    /// Erases the whole device.
    fn erase_chip(&mut self) -> FlashIOResult;

    /// Flushes any buffered data (may be a no-op).
    fn flush(&mut self) -> FlashIOResult;
}

/// Extension helpers for FlashIO.
///
/// Provides cluster-addressed reads/writes and primitive read/write helpers
/// (`read_u8_at`, `write_u16_at`, ...).
pub trait FlashIOExt: FlashIO {
    /// Reads from `offset` bytes into cluster `cluster_id`.
    #[inline(always)]
    fn read_cluster_at(&mut self, cluster_id: u32, offset: u32, buf: &mut [u8]) -> FlashIOResult {
        let base = self.geometry().cluster_offset(cluster_id);
        self.read_at(base + offset as u64, buf)
    }

    /// Programs at `offset` bytes into cluster `cluster_id`.
    #[inline(always)]
    fn write_cluster_at(&mut self, cluster_id: u32, offset: u32, data: &[u8]) -> FlashIOResult {
        let base = self.geometry().cluster_offset(cluster_id);
        self.write_at(base + offset as u64, data)
    }

    // Implements read/write helpers for primitive types (u8, u16, u32, u64)
    flashio_impl_primitive_rw!(u8, u16, u32, u64);
}

impl<T: FlashIO + ?Sized> FlashIOExt for T {}

/// Extension trait for reading and writing structs using zerocopy.
///
/// Requires the struct to implement zerocopy traits for safe conversion.
pub trait FlashIOStructExt: FlashIO {
    /// Reads a struct of type `T` from the given offset.
    fn read_struct<T: zerocopy::FromBytes + zerocopy::KnownLayout + zerocopy::Immutable>(
        &mut self,
        offset: u64,
    ) -> FlashIOResult<T> {
        let size = core::mem::size_of::<T>();
        let mut buf = [0u8; 64];
        if size > buf.len() {
            return Err(FlashIOError::Other("read_struct: type too large"));
        }
        self.read_at(offset, &mut buf[..size])?;
        T::read_from_bytes(&buf[..size]).map_err(|_| FlashIOError::Other("read_struct failed"))
    }

    /// Writes a struct of type `T` at the given offset.
    fn write_struct<T: zerocopy::IntoBytes + zerocopy::KnownLayout + zerocopy::Immutable>(
        &mut self,
        offset: u64,
        val: &T,
    ) -> FlashIOResult {
        let bytes = val.as_bytes();
        self.write_at(offset, bytes)
    }
}

impl<T: FlashIO + ?Sized> FlashIOStructExt for T {}
