// SPDX-License-Identifier: MIT

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crate::{FlashGeometry, FlashIO, FlashIOError, FlashIOResult};

/// Shared trigger for [`FaultFlashIO`].
///
/// Arming the plan makes the wrapped device lose power on the N-th
/// subsequent write: only the first half of that write's bytes are
/// programmed, the write fails, and every later operation fails until
/// [`FaultPlan::disarm`] simulates the device coming back up.
#[derive(Clone, Debug, Default)]
pub struct FaultPlan {
    inner: Arc<FaultPlanInner>,
}

#[derive(Debug, Default)]
struct FaultPlanInner {
    armed: AtomicBool,
    writes_until_cut: AtomicI64,
    dead: AtomicBool,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cuts power during the `nth` write from now (0 = the very next one).
    pub fn arm(&self, nth: u64) {
        self.inner.dead.store(false, Ordering::SeqCst);
        self.inner.writes_until_cut.store(nth as i64, Ordering::SeqCst);
        self.inner.armed.store(true, Ordering::SeqCst);
    }

    /// Brings the device back up (power restored).
    pub fn disarm(&self) {
        self.inner.armed.store(false, Ordering::SeqCst);
        self.inner.dead.store(false, Ordering::SeqCst);
    }

    /// True once the armed cut has fired.
    pub fn tripped(&self) -> bool {
        self.inner.dead.load(Ordering::SeqCst)
    }

    fn check_alive(&self) -> FlashIOResult {
        if self.inner.dead.load(Ordering::SeqCst) {
            return Err(FlashIOError::Device("power lost"));
        }
        Ok(())
    }

    /// Returns true when the current write is the one to interrupt.
    fn consume_write(&self) -> bool {
        if !self.inner.armed.load(Ordering::SeqCst) {
            return false;
        }
        let n = self.inner.writes_until_cut.fetch_sub(1, Ordering::SeqCst);
        if n <= 0 {
            self.inner.dead.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }
}

/// Power-loss injection wrapper.
pub struct FaultFlashIO<IO: FlashIO> {
    inner: IO,
    plan: FaultPlan,
}

impl<IO: FlashIO> FaultFlashIO<IO> {
    pub fn new(inner: IO, plan: FaultPlan) -> Self {
        Self { inner, plan }
    }

    pub fn into_inner(self) -> IO {
        self.inner
    }
}

impl<IO: FlashIO> FlashIO for FaultFlashIO<IO> {
    #[inline]
    fn geometry(&self) -> FlashGeometry {
        self.inner.geometry()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> FlashIOResult {
        self.plan.check_alive()?;
        self.inner.read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> FlashIOResult {
        self.plan.check_alive()?;
        if self.plan.consume_write() {
            // Power cut mid-program: only a prefix of the bytes reaches the
            // device before everything goes dark.
            let cut = data.len() / 2;
            if cut > 0 {
                self.inner.write_at(offset, &data[..cut])?;
            }
            return Err(FlashIOError::Device("power lost"));
        }
        self.inner.write_at(offset, data)
    }

    fn erase_sector(&mut self, sector_id: u32) -> FlashIOResult {
        self.plan.check_alive()?;
        self.inner.erase_sector(sector_id)
    }

    fn erase_chip(&mut self) -> FlashIOResult {
        self.plan.check_alive()?;
        self.inner.erase_chip()
    }

    fn flush(&mut self) -> FlashIOResult {
        self.plan.check_alive()?;
        self.inner.flush()
    }
}
