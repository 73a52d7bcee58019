// SPDX-License-Identifier: MIT

use std::io::{Error, Read, Seek, SeekFrom, Write};

use crate::{FlashGeometry, FlashIO, FlashIOError, FlashIOResult, ERASED_BYTE, ERASE_BUF_SIZE};

/// Flash image stored behind any seekable stream (typically a file).
///
/// Erase operations write [`ERASED_BYTE`] fills; programs are plain writes,
/// so the NOR bit-clearing rule is not enforced by this backend. Use
/// `MemFlashIO` when the simulation must be strict.
#[derive(Debug)]
pub struct StdFlashIO<T: Read + Write + Seek> {
    io: T,
    geometry: FlashGeometry,
}

impl<T: Read + Write + Seek> StdFlashIO<T> {
    #[inline]
    pub fn new(io: T, geometry: FlashGeometry) -> Self {
        Self { io, geometry }
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.io
    }

    fn fill_erased(&mut self, offset: u64, len: usize) -> FlashIOResult {
        const ERASE_BUF: [u8; ERASE_BUF_SIZE] = [ERASED_BYTE; ERASE_BUF_SIZE];
        self.io.seek(SeekFrom::Start(offset))?;
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(ERASE_BUF.len());
            self.io.write_all(&ERASE_BUF[..chunk])?;
            remaining -= chunk;
        }
        Ok(())
    }
}

impl<T: Read + Write + Seek> FlashIO for StdFlashIO<T> {
    #[inline]
    fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> FlashIOResult {
        self.io.seek(SeekFrom::Start(offset))?;
        self.io.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> FlashIOResult {
        self.io.seek(SeekFrom::Start(offset))?;
        self.io.write_all(data)?;
        Ok(())
    }

    fn erase_sector(&mut self, sector_id: u32) -> FlashIOResult {
        if sector_id >= self.geometry.total_sectors() {
            return Err(FlashIOError::OutOfBounds);
        }
        let offset = self.geometry.sector_offset(sector_id);
        self.fill_erased(offset, self.geometry.sector_size as usize)
    }

    fn erase_chip(&mut self) -> FlashIOResult {
        self.fill_erased(0, self.geometry.device_size as usize)
    }

    fn flush(&mut self) -> FlashIOResult {
        self.io.flush()?;
        Ok(())
    }
}

impl From<Error> for FlashIOError {
    #[cold]
    #[inline(never)]
    fn from(e: Error) -> Self {
        // Leak the string to produce a 'static str. Acceptable for error mapping.
        let leaked_str: &'static str = Box::leak(e.to_string().into_boxed_str());
        FlashIOError::Other(leaked_str)
    }
}
