//! Media clock recovery and generation
//!
//! A media clock domain either recovers a remote talker's clock by steering
//! a local audio PLL, or generates timestamps for a locally mastered clock.
//! Both run off the same 125 us scheduling timer as the transmit path and
//! track drift against it.

mod gen_ptp;
mod rec_pll;
mod registry;
mod worker;

pub use gen_ptp::{GenPtpStats, PtpGenerator};
pub use rec_pll::{ClockStatus, MediaClockRecovery, RecoveryConfig, RecoveryStats, TsRing};
pub use registry::{ClockClaim, ClockRegistry, ClockRole, DomainId};
pub use worker::{PllHandle, PllWorker};

use emavb_core::ptp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MclockError {
    /// The timestamp frequency does not divide the PLL frequency, or the
    /// resulting sampling period is out of range.
    InvalidFreq,
    /// No timestamp available to (re)start from.
    NoTimestamp,
    /// The clock domain is already claimed.
    DomainBusy,
}

/// Largest tolerated drift between the scheduling timer and the clock it
/// paces, in ppm. Bounds the drift adaptation period.
const DRIFT_PPM_MAX: u32 = 250;

/// Local time base of a clock domain, paced by the scheduling timer and
/// stepped to follow the domain clock.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct TimerClock {
    pub clk_timer: u32,
    pub timer_period: u32,
    pub drift_period: u32,
    next_drift: u32,
}

pub(crate) struct DriftOverflow;

impl TimerClock {
    pub(crate) fn new(timer_period: u32, drift_period: u32) -> Self {
        Self {
            clk_timer: 0,
            timer_period,
            drift_period,
            next_drift: drift_period,
        }
    }

    /// Drift period for a single timer period adjustment at a time.
    pub(crate) fn default_drift_period(timer_period: u32) -> u32 {
        (timer_period / DRIFT_PPM_MAX) * 1_000_000
    }

    pub(crate) fn advance(&mut self, ticks: u32) {
        self.clk_timer = self.clk_timer.wrapping_add(ticks * self.timer_period);
    }

    pub(crate) fn restart_drift(&mut self, from: u32) {
        self.next_drift = from.wrapping_add(self.drift_period);
    }

    /// Steps the timer clock towards `clk_media` by at most one timer
    /// period per drift period. A larger error means the clocks have
    /// diverged beyond what stepping can hide.
    pub(crate) fn drift_adapt(&mut self, clk_media: u32) -> Result<(), DriftOverflow> {
        if !ptp::after_eq(self.clk_timer, self.next_drift) {
            return Ok(());
        }

        let err = clk_media.wrapping_sub(self.clk_timer) as i32;
        let period = self.timer_period as i32;
        let mut rc = Ok(());

        if err >= period {
            // Media clock is faster.
            if err > 3 * period {
                rc = Err(DriftOverflow);
            }
            self.clk_timer = self.clk_timer.wrapping_add(self.timer_period);
        } else if err <= -period {
            if err < -3 * period {
                rc = Err(DriftOverflow);
            }
            self.clk_timer = self.clk_timer.wrapping_sub(self.timer_period);
        }

        self.next_drift = self.clk_timer.wrapping_add(self.drift_period);
        rc
    }
}
