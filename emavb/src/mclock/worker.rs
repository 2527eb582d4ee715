use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;

use emavb_driver::sink::PllControl;

/// Shared handle between the timer context requesting PLL rate changes and
/// the worker applying them.
///
/// The recovery state machine runs in the scheduling timer context and must
/// not block on the PLL, whose adjustment can involve slow register or bus
/// access. It posts the requested offset here and the worker applies it
/// asynchronously. Only the latest request matters, so a lost intermediate
/// value is fine.
pub struct PllHandle<M: RawMutex> {
    request: Signal<M, i32>,
    applied_ppb: AtomicI32,
    rate: AtomicU32,
    errors: AtomicU32,
}

impl<M: RawMutex> PllHandle<M> {
    pub const fn new(nominal_rate: u32) -> Self {
        Self {
            request: Signal::new(),
            applied_ppb: AtomicI32::new(0),
            rate: AtomicU32::new(nominal_rate),
            errors: AtomicU32::new(0),
        }
    }

    /// Posts a new absolute frequency offset, replacing any pending one.
    pub(crate) fn request(&self, ppb: i32) {
        self.request.signal(ppb);
    }

    /// Takes a pending request without going through the worker. For
    /// drivers that poll instead of running [`PllWorker`].
    pub fn try_take_request(&self) -> Option<i32> {
        self.request.try_take()
    }

    /// Last offset actually applied to the PLL, in ppb.
    pub fn applied_ppb(&self) -> i32 {
        self.applied_ppb.load(Ordering::Relaxed)
    }

    /// Current PLL output rate in Hz, including the applied offset.
    pub fn rate(&self) -> u32 {
        self.rate.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u32 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Applies posted rate adjustments to the PLL driver.
pub struct PllWorker<'a, M: RawMutex, P: PllControl> {
    handle: &'a PllHandle<M>,
    pll: P,
}

impl<'a, M: RawMutex, P: PllControl> PllWorker<'a, M, P> {
    pub fn new(handle: &'a PllHandle<M>, pll: P) -> Self {
        let nominal = pll.rate();
        handle.rate.store(nominal, Ordering::Relaxed);
        Self { handle, pll }
    }

    pub async fn run(&mut self) -> ! {
        loop {
            let ppb = self.handle.request.wait().await;

            match self.pll.adjust(ppb) {
                Ok(exact) => {
                    let nominal = self.pll.rate() as i64;
                    let rate = nominal + nominal * exact as i64 / 1_000_000_000;
                    self.handle.applied_ppb.store(exact, Ordering::Relaxed);
                    self.handle.rate.store(rate as u32, Ordering::Relaxed);
                }
                Err(err) => {
                    warn!("pll adjust {} ppb failed: {:?}", ppb, err);
                    self.handle.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}
