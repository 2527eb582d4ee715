//! Media clock generation from gPTP time
//!
//! Generates a stream of media clock timestamps paced by gPTP time, for
//! domains where the local node is the clock master. Runs in the scheduling
//! timer context and emits at most one timestamp per tick, so the timestamp
//! frequency must stay below the tick rate.

use emavb_core::ptp;

use crate::config::SCHED_PERIOD_NS;
use crate::mclock::{MclockError, TimerClock};

#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GenPtpStats {
    pub ts: u32,
    pub reset: u32,
    pub err_jump: u32,
    pub err_drift: u32,
}

pub struct PtpGenerator {
    clock: TimerClock,
    /// gPTP time tracked across ticks, stepped by measured deltas.
    clk_ptp: u32,
    ptp_last: u32,
    freq: u32,
    ts_period: u32,
    /// Fractional nanoseconds per period, spread over `freq` timestamps.
    ts_period_rem: u32,
    ts_corr: u32,
    ts_next: u32,
    init: bool,
    stats: GenPtpStats,
}

impl PtpGenerator {
    /// Creates a generator emitting timestamps at `freq` Hz.
    pub fn new(freq: u32) -> Result<Self, MclockError> {
        if freq == 0 {
            return Err(MclockError::InvalidFreq);
        }
        let ts_period = 1_000_000_000 / freq;
        // One timestamp per tick at most.
        if ts_period < SCHED_PERIOD_NS {
            return Err(MclockError::InvalidFreq);
        }

        Ok(Self {
            clock: TimerClock::new(
                SCHED_PERIOD_NS,
                TimerClock::default_drift_period(SCHED_PERIOD_NS),
            ),
            clk_ptp: 0,
            ptp_last: 0,
            freq,
            ts_period,
            ts_period_rem: 1_000_000_000 % freq,
            ts_corr: 0,
            ts_next: 0,
            init: true,
            stats: GenPtpStats::default(),
        })
    }

    pub fn stats(&self) -> GenPtpStats {
        self.stats
    }

    /// Restarts the timestamp grid on the next tick. To be called when gPTP
    /// time is known to be discontinuous, for example after a grandmaster
    /// change.
    pub fn reset(&mut self) {
        self.init = true;
    }

    /// Runs the generator for one scheduling tick and returns the emitted
    /// timestamp, if the grid produced one.
    pub fn tick(&mut self, ptp_now: u32, ticks: u32) -> Option<u32> {
        self.clock.advance(ticks);

        if self.init {
            self.init = false;
            self.restart(ptp_now);
        } else {
            let delta = ptp_now.wrapping_sub(self.ptp_last) as i64;
            let expected = (ticks * self.clock.timer_period) as i64;
            if (delta - expected).abs() > 3 * self.clock.timer_period as i64 {
                // gPTP stepped under us.
                self.stats.err_jump += 1;
                self.restart(ptp_now);
            } else {
                self.clk_ptp = self.clk_ptp.wrapping_add(delta as u32);
            }
        }
        self.ptp_last = ptp_now;

        if self.clock.drift_adapt(self.clk_ptp).is_err() {
            self.stats.err_drift += 1;
            self.restart(ptp_now);
        }

        if ptp::after_eq(ptp_now, self.ts_next) {
            let ts = self.ts_next;
            self.ts_next = self.ts_next.wrapping_add(self.ts_period);
            self.ts_corr += self.ts_period_rem;
            if self.ts_corr >= self.freq {
                self.ts_next = self.ts_next.wrapping_add(1);
                self.ts_corr -= self.freq;
            }
            self.stats.ts += 1;
            return Some(ts);
        }
        None
    }

    fn restart(&mut self, ptp_now: u32) {
        self.clk_ptp = self.clock.clk_timer;
        self.clock.restart_drift(self.clock.clk_timer);
        self.ts_next = ptp_now;
        self.ts_corr = 0;
        self.stats.reset += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_fast_freq() {
        assert!(PtpGenerator::new(16_000).is_err());
        assert!(PtpGenerator::new(0).is_err());
    }

    #[test]
    fn test_fractional_grid_is_exact() {
        // 6 kHz does not divide a nanosecond second evenly.
        let mut gen = PtpGenerator::new(6000).unwrap();

        let mut first = None;
        let mut last = None;
        let mut count = 0u32;
        let mut n = 0u32;
        while count < 6001 {
            if let Some(ts) = gen.tick(n * SCHED_PERIOD_NS, 1) {
                if first.is_none() {
                    first = Some(ts);
                }
                if let Some(prev) = last {
                    let delta = ts - prev;
                    assert!(delta == 166_666 || delta == 166_667, "delta {}", delta);
                }
                last = Some(ts);
                count += 1;
            }
            n += 1;
        }

        // The remainder spreading makes 6000 periods span exactly one second.
        assert_eq!(last.unwrap() - first.unwrap(), 1_000_000_000);
        assert_eq!(gen.stats().reset, 1);
        assert_eq!(gen.stats().err_jump, 0);
    }

    #[test]
    fn test_ptp_jump_restarts_grid() {
        let mut gen = PtpGenerator::new(6000).unwrap();

        for n in 0..100 {
            gen.tick(n * SCHED_PERIOD_NS, 1);
        }
        // A 1 ms step forward.
        let jump = 1_000_000;
        for n in 100..200 {
            gen.tick(n * SCHED_PERIOD_NS + jump, 1);
        }

        let stats = gen.stats();
        assert_eq!(stats.err_jump, 1);
        assert_eq!(stats.reset, 2);
        assert!(stats.ts > 0);
    }
}
