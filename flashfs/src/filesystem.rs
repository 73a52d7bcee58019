// SPDX-License-Identifier: MIT

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flashio::FlashIO;
use time::OffsetDateTime;

use crate::checker::{CheckStats, LogChecker};
use crate::ensure;
use crate::errors::*;
use crate::log::LogCore;
use crate::stream::FileStream;
use crate::utils::time_utils::unix_to_datetime;

/// How [`FlashFs::open`] resolves the named file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the file; fail if it already exists.
    CreateNew,
    /// Create the file, truncating any existing one.
    Create,
    /// Open an existing file; fail if it is missing.
    Open,
    /// Open the file, creating it when missing.
    OpenOrCreate,
    /// Open an existing file and truncate it to zero bytes.
    Truncate,
    /// Open the file (creating it when missing) positioned at its end.
    Append,
}

/// Free and reclaimable space, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub free_bytes: u64,
    pub orphaned_bytes: u64,
}

/// The public file-system surface.
///
/// A cloneable handle over one coarse mutex: every operation, including the
/// stream reads and writes of handles it gave out, locks the core for its
/// full duration. The scratch buffers never leave the locked region.
pub struct FlashFs<IO: FlashIO> {
    core: Arc<Mutex<LogCore<IO>>>,
}

impl<IO: FlashIO> Clone for FlashFs<IO> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<IO: FlashIO> FlashFs<IO> {
    /// Wraps a device. Nothing is read until [`FlashFs::mount`] or
    /// [`FlashFs::format`].
    pub fn new(io: IO) -> FsResult<Self> {
        Ok(Self {
            core: Arc::new(Mutex::new(LogCore::new(io)?)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LogCore<IO>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Volume operations ===

    pub fn check_if_formatted(&self) -> FsResult<bool> {
        self.lock().check_if_formatted()
    }

    pub fn mount(&self) -> FsResult {
        self.lock().mount()
    }

    pub fn format(&self) -> FsResult {
        self.lock().format()
    }

    pub fn compact(&self) -> FsResult {
        self.lock().compact()
    }

    /// Recounts the whole device and verifies it against the in-memory
    /// accounting.
    pub fn check_consistency(&self) -> FsResult<CheckStats> {
        let mut core = self.lock();
        LogChecker::new(&mut core).check_all()
    }

    pub fn stats(&self) -> FsResult<FsStats> {
        let core = self.lock();
        core.ensure_mounted()?;
        let cluster_size = core.meta().cluster_size as u64;
        Ok(FsStats {
            free_bytes: core.free_clusters() as u64 * cluster_size,
            orphaned_bytes: core.orphaned_clusters() as u64 * cluster_size,
        })
    }

    // === File operations ===

    pub fn exists(&self, name: &str) -> FsResult<bool> {
        Ok(self.lock().find_file(name)?.is_some())
    }

    pub fn delete(&self, name: &str) -> FsResult {
        let mut core = self.lock();
        let Some(obj_id) = core.find_file(name)? else {
            return Err(FsError::FileNotFound);
        };
        core.delete_file(obj_id)
    }

    pub fn rename(&self, src: &str, dst: &str) -> FsResult {
        self.lock().rename_file(src, dst)
    }

    pub fn copy(&self, src: &str, dst: &str, overwrite: bool) -> FsResult {
        self.lock().copy_file(src, dst, overwrite)
    }

    /// Creates an empty file (replacing any same-named one) and returns an
    /// open handle on it.
    pub fn create(&self, name: &str) -> FsResult<FileStream<IO>> {
        let mut core = self.lock();
        let obj_id = core.create_file(name)?;
        core.file_mut(obj_id)?.open_count += 1;
        drop(core);
        Ok(FileStream::new(Arc::clone(&self.core), obj_id, 0))
    }

    pub fn open(&self, name: &str, mode: OpenMode) -> FsResult<FileStream<IO>> {
        let mut core = self.lock();
        let existing = core.find_file(name)?;

        let obj_id = match mode {
            OpenMode::CreateNew => {
                ensure!(existing.is_none(), FsError::PathAlreadyExists);
                core.create_file(name)?
            }
            OpenMode::Create => core.create_file(name)?,
            OpenMode::Open => existing.ok_or(FsError::FileNotFound)?,
            OpenMode::OpenOrCreate => match existing {
                Some(obj_id) => obj_id,
                None => core.create_file(name)?,
            },
            OpenMode::Truncate => {
                let obj_id = existing.ok_or(FsError::FileNotFound)?;
                core.truncate_file(obj_id, 0)?;
                obj_id
            }
            OpenMode::Append => match existing {
                Some(obj_id) => obj_id,
                None => core.create_file(name)?,
            },
        };

        let position = if mode == OpenMode::Append {
            core.file_ref(obj_id)?.size as u64
        } else {
            0
        };
        core.file_mut(obj_id)?.open_count += 1;
        drop(core);
        Ok(FileStream::new(Arc::clone(&self.core), obj_id, position))
    }

    /// Reads a whole file into memory.
    pub fn read_all_bytes(&self, name: &str) -> FsResult<Vec<u8>> {
        let mut core = self.lock();
        let Some(obj_id) = core.find_file(name)? else {
            return Err(FsError::FileNotFound);
        };
        let size = core.file_ref(obj_id)?.size as usize;
        let mut data = vec![0u8; size];
        let n = core.read_file_at(obj_id, 0, &mut data)?;
        data.truncate(n);
        Ok(data)
    }

    /// Replaces (or creates) a whole file in one call.
    pub fn write_all_bytes(&self, name: &str, data: &[u8]) -> FsResult {
        let mut core = self.lock();
        let obj_id = core.create_file(name)?;
        core.write_file_at(obj_id, 0, data)
    }

    /// Sorted list of all file names.
    pub fn files(&self) -> FsResult<Vec<String>> {
        self.lock().file_names()
    }

    pub fn file_size(&self, name: &str) -> FsResult<u64> {
        let mut core = self.lock();
        let Some(obj_id) = core.find_file(name)? else {
            return Err(FsError::FileNotFound);
        };
        Ok(core.file_ref(obj_id)?.size as u64)
    }

    pub fn file_creation_time(&self, name: &str) -> FsResult<OffsetDateTime> {
        let mut core = self.lock();
        let Some(obj_id) = core.find_file(name)? else {
            return Err(FsError::FileNotFound);
        };
        Ok(unix_to_datetime(core.creation_time(obj_id)?))
    }
}
