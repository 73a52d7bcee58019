// SPDX-License-Identifier: MIT

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flashio::FlashIO;

use crate::errors::*;
use crate::log::LogCore;

/// Byte-oriented, seekable handle on one file.
///
/// The stream holds only the object id and a position; every call locks the
/// shared core for its duration. Writes past the current end of file are
/// rejected (the log stores no holes); reads past it return 0. Dropping the
/// stream releases the file's open count.
pub struct FileStream<IO: FlashIO> {
    core: Arc<Mutex<LogCore<IO>>>,
    obj_id: u16,
    position: u64,
}

impl<IO: FlashIO> FileStream<IO> {
    pub(crate) fn new(core: Arc<Mutex<LogCore<IO>>>, obj_id: u16, position: u64) -> Self {
        Self {
            core,
            obj_id,
            position,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogCore<IO>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Position clamped into the 32-bit file-offset space; anything larger
    /// is past the end of any representable file.
    fn position_u32(&self) -> u32 {
        self.position.min(u32::MAX as u64) as u32
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Current file size.
    pub fn len(&self) -> FsResult<u64> {
        Ok(self.lock().file_ref(self.obj_id)?.size as u64)
    }

    pub fn is_empty(&self) -> FsResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Reads at the current position, advancing it. Returns 0 at EOF.
    pub fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let n = self
            .lock()
            .read_file_at(self.obj_id, self.position_u32(), buf)?;
        self.position += n as u64;
        Ok(n)
    }

    /// Writes at the current position, advancing it. Fails with
    /// [`FsError::WritePastEnd`] when the position is beyond the file size.
    pub fn write(&mut self, data: &[u8]) -> FsResult<usize> {
        self.lock()
            .write_file_at(self.obj_id, self.position_u32(), data)?;
        self.position += data.len() as u64;
        Ok(data.len())
    }

    /// Shrinks the file to `length` bytes; growing is rejected. The
    /// position is clamped to the new end.
    pub fn set_len(&mut self, length: u64) -> FsResult {
        let clamped = length.min(u32::MAX as u64) as u32;
        self.lock().truncate_file(self.obj_id, clamped)?;
        self.position = self.position.min(length);
        Ok(())
    }

    /// Absolute seek. Seeking past the end is allowed; the next write there
    /// will fail instead.
    pub fn seek_to(&mut self, position: u64) -> u64 {
        self.position = position;
        self.position
    }
}

impl<IO: FlashIO> core::fmt::Debug for FileStream<IO> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileStream")
            .field("obj_id", &self.obj_id)
            .field("position", &self.position)
            .finish()
    }
}

impl<IO: FlashIO> Drop for FileStream<IO> {
    fn drop(&mut self) {
        let mut core = self.lock();
        if let Ok(f) = core.file_mut(self.obj_id) {
            f.open_count = f.open_count.saturating_sub(1);
        }
    }
}

impl<IO: FlashIO> io::Read for FileStream<IO> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        FileStream::read(self, buf).map_err(io::Error::from)
    }
}

impl<IO: FlashIO> io::Write for FileStream<IO> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        FileStream::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flush().map_err(io::Error::from)
    }
}

impl<IO: FlashIO> io::Seek for FileStream<IO> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let base = match pos {
            io::SeekFrom::Start(offset) => {
                self.position = offset;
                return Ok(self.position);
            }
            io::SeekFrom::Current(delta) => (self.position, delta),
            io::SeekFrom::End(delta) => {
                let len = self.len().map_err(io::Error::from)?;
                (len, delta)
            }
        };
        let (origin, delta) = base;
        let target = origin
            .checked_add_signed(delta)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?;
        self.position = target;
        Ok(self.position)
    }
}
