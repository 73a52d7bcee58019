// SPDX-License-Identifier: MIT

use std::sync::{Arc, Mutex, PoisonError};

use crate::{FlashGeometry, FlashIO, FlashIOResult};

/// Simple I/O counters, including per-sector erase counts.
#[derive(Clone, Default, Debug)]
pub struct FlashStats {
    pub reads: u64,
    pub read_bytes: u64,
    pub writes: u64,
    pub write_bytes: u64,
    pub chip_erases: u64,
    pub sector_erases: Vec<u64>,
}

impl FlashStats {
    pub fn reset(&mut self) {
        let sectors = self.sector_erases.len();
        *self = FlashStats {
            sector_erases: vec![0; sectors],
            ..FlashStats::default()
        };
    }

    /// Total number of sector erases (chip erases excluded).
    pub fn total_sector_erases(&self) -> u64 {
        self.sector_erases.iter().sum()
    }

    /// Highest erase count of any single sector.
    pub fn max_sector_erases(&self) -> u64 {
        self.sector_erases.iter().copied().max().unwrap_or(0)
    }
}

/// Cloneable view onto the counters of a [`CountingFlashIO`].
#[derive(Clone, Debug)]
pub struct StatsHandle {
    inner: Arc<Mutex<FlashStats>>,
}

impl StatsHandle {
    pub fn snapshot(&self) -> FlashStats {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }
}

/// Transparent instrumentation wrapper.
///
/// Counters are shared through [`StatsHandle`], so they stay observable
/// after the wrapper has been handed to a consumer that owns it.
pub struct CountingFlashIO<IO: FlashIO> {
    inner: IO,
    stats: Arc<Mutex<FlashStats>>,
}

impl<IO: FlashIO> CountingFlashIO<IO> {
    pub fn new(inner: IO) -> Self {
        let sectors = inner.geometry().total_sectors() as usize;
        Self {
            inner,
            stats: Arc::new(Mutex::new(FlashStats {
                sector_erases: vec![0; sectors],
                ..FlashStats::default()
            })),
        }
    }

    pub fn handle(&self) -> StatsHandle {
        StatsHandle {
            inner: Arc::clone(&self.stats),
        }
    }

    pub fn into_inner(self) -> IO {
        self.inner
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, FlashStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<IO: FlashIO> FlashIO for CountingFlashIO<IO> {
    #[inline]
    fn geometry(&self) -> FlashGeometry {
        self.inner.geometry()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> FlashIOResult {
        {
            let mut st = self.stats();
            st.reads += 1;
            st.read_bytes += buf.len() as u64;
        }
        self.inner.read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> FlashIOResult {
        {
            let mut st = self.stats();
            st.writes += 1;
            st.write_bytes += data.len() as u64;
        }
        self.inner.write_at(offset, data)
    }

    fn erase_sector(&mut self, sector_id: u32) -> FlashIOResult {
        {
            let mut st = self.stats();
            if let Some(n) = st.sector_erases.get_mut(sector_id as usize) {
                *n += 1;
            }
        }
        self.inner.erase_sector(sector_id)
    }

    fn erase_chip(&mut self) -> FlashIOResult {
        self.stats().chip_erases += 1;
        self.inner.erase_chip()
    }

    fn flush(&mut self) -> FlashIOResult {
        self.inner.flush()
    }
}
