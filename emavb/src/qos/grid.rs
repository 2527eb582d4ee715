//! gPTP synchronized scheduling grid
//!
//! The scheduler tick fires on a free-running hardware timer, but SR class
//! launch times must be expressed in gPTP time. The grid tracks gPTP time at
//! each tick with a PI controller, filtering out the tens of microseconds of
//! jitter in the raw samples down to tens of nanoseconds.

use crate::config::SCHED_PERIOD_NS;
use crate::pi::Pi;

/// Sub nanosecond precision of the tracked period.
const SCALING_FACTOR: i64 = 1024;
const DEFAULT_KI_SHIFT: u32 = 3;
const DEFAULT_KP_SHIFT: u32 = 1;

/// Largest plausible deviation of a raw tick-to-tick measurement, based on
/// expected sampling jitter.
const PTP_MAX_ERROR_NS: u32 = 50_000;
/// Largest plausible deviation of the tracked period, based on a clock
/// accuracy of 100ppm.
const PI_MAX_ERROR_NS: u32 = 1_000;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PtpGrid {
    /// Filtered gPTP time of the current tick.
    pub now: u32,
    last: u32,
    ptp_last: u32,
    /// Tracked tick period, integer nanoseconds.
    pub period: u32,
    period_frac: i32,
    period_frac_cur: i32,
    d: i32,
    count: u32,
    pi: Pi,
    /// Total updates since start.
    pub total: u32,
    /// Number of resynchronizations to raw gPTP time.
    pub reset: u32,
}

impl PtpGrid {
    pub fn new() -> Self {
        let mut pi = Pi::new(DEFAULT_KI_SHIFT, DEFAULT_KP_SHIFT);
        pi.reset(SCHED_PERIOD_NS as i64 * SCALING_FACTOR);

        Self {
            now: 0,
            last: 0,
            ptp_last: 0,
            period: SCHED_PERIOD_NS,
            period_frac: 0,
            period_frac_cur: 0,
            d: 0,
            count: 0,
            pi,
            total: 0,
            reset: 0,
        }
    }

    fn reset(&mut self) {
        self.count = 0;
        self.total = 0;
        self.period = SCHED_PERIOD_NS;
        self.period_frac = 0;
        self.period_frac_cur = 0;
        self.pi.reset(SCHED_PERIOD_NS as i64 * SCALING_FACTOR);
        self.reset += 1;
    }

    /// Advances the grid by one tick, `ptp_now` being the raw gPTP time
    /// sampled at the tick.
    pub fn update(&mut self, ptp_now: u32) {
        let measured = ptp_now.wrapping_sub(self.ptp_last);

        if !(SCHED_PERIOD_NS - PTP_MAX_ERROR_NS..=SCHED_PERIOD_NS + PTP_MAX_ERROR_NS)
            .contains(&measured)
        {
            // Error in measured ptp time.
            self.reset();
            self.now = ptp_now;
        } else if !(SCHED_PERIOD_NS - PI_MAX_ERROR_NS..=SCHED_PERIOD_NS + PI_MAX_ERROR_NS)
            .contains(&self.period)
        {
            // Error in PI controller.
            self.reset();
            self.now = ptp_now;
        } else {
            self.now = self.last.wrapping_add(self.period);

            // Spread the fractional period uniformly over the scaling
            // window, Bresenham style (dx = SCALING_FACTOR, dy = period_frac).
            if self.period_frac_cur != 0 {
                self.d += self.period_frac;
                if self.d > 0 {
                    self.now = self.now.wrapping_add(1);
                    self.d -= SCALING_FACTOR as i32;
                    self.period_frac_cur -= 1;
                }
            }

            self.count += 1;

            // Filter the sampling jitter over a full scaling window.
            if self.count >= SCALING_FACTOR as u32 {
                if self.period_frac_cur != 0 {
                    self.now = self.now.wrapping_add(self.period_frac_cur as u32);
                }

                let err = ptp_now.wrapping_sub(self.now) as i32;
                let period = self.pi.update(err as i64);

                self.count = 0;
                self.period = (period / SCALING_FACTOR) as u32;
                self.period_frac = (period - self.period as i64 * SCALING_FACTOR) as i32;
                self.d = self.period_frac - (SCALING_FACTOR / 2) as i32;
                self.period_frac_cur = self.period_frac;
            }
        }

        self.ptp_last = ptp_now;
        self.last = self.now;
        self.total += 1;
    }
}

impl Default for PtpGrid {
    fn default() -> Self {
        Self::new()
    }
}

/// Windowed statistics of the raw tick-to-tick gPTP deltas.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct JitterStats {
    count: u32,
    ptp_last: u32,
    mean_cur: u64,
    mean2_cur: u64,
    /// Mean tick delta over the last window, in nanoseconds.
    pub dt_mean: u32,
    /// Variance of the tick delta over the last window.
    pub dt_var: u64,
    pub dt_min: u32,
    pub dt_max: u32,
}

/// Window length as a shift, 256 ticks.
const WINDOW_SHIFT: u32 = 8;

impl JitterStats {
    pub fn new() -> Self {
        Self {
            count: 0,
            ptp_last: 0,
            mean_cur: 0,
            mean2_cur: 0,
            dt_mean: 0,
            dt_var: 0,
            dt_min: u32::MAX,
            dt_max: 0,
        }
    }

    pub fn update(&mut self, ptp_now: u32) {
        if self.count != 0 {
            let dt = ptp_now.wrapping_sub(self.ptp_last);

            self.mean_cur += dt as u64;
            self.mean2_cur += dt as u64 * dt as u64;

            if dt < self.dt_min {
                self.dt_min = dt;
            } else if dt > self.dt_max {
                self.dt_max = dt;
            }
        }

        self.ptp_last = ptp_now;
        self.count += 1;

        if self.count % (1 << WINDOW_SHIFT) == 0 {
            self.dt_mean = (self.mean_cur >> WINDOW_SHIFT) as u32;
            self.dt_var = (self.mean2_cur >> WINDOW_SHIFT)
                - ((self.mean_cur * self.mean_cur) >> (2 * WINDOW_SHIFT));

            self.mean_cur = 0;
            self.mean2_cur = 0;
        }
    }
}

impl Default for JitterStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_resets() {
        let mut g = PtpGrid::new();
        g.update(1_000_000);
        assert_eq!(g.reset, 1);
        assert_eq!(g.now, 1_000_000);
    }

    #[test]
    fn test_tracks_nominal_clock() {
        let mut g = PtpGrid::new();
        let mut ptp = 1_000_000u32;
        g.update(ptp);

        for _ in 0..4096 {
            ptp = ptp.wrapping_add(SCHED_PERIOD_NS);
            g.update(ptp);
        }

        assert_eq!(g.reset, 1);
        assert_eq!(g.period, SCHED_PERIOD_NS);
        assert_eq!(g.now, ptp);
    }

    #[test]
    fn test_large_jump_resets_once() {
        let mut g = PtpGrid::new();
        let mut ptp = 0u32;
        g.update(ptp);
        for _ in 0..100 {
            ptp = ptp.wrapping_add(SCHED_PERIOD_NS);
            g.update(ptp);
        }
        let resets = g.reset;

        // A single sample 200us off resynchronizes the grid once, and the
        // tick count starts over.
        ptp = ptp.wrapping_add(SCHED_PERIOD_NS + 200_000);
        g.update(ptp);
        assert_eq!(g.reset, resets + 1);
        assert_eq!(g.now, ptp);
        assert_eq!(g.total, 1);

        for _ in 0..100 {
            ptp = ptp.wrapping_add(SCHED_PERIOD_NS);
            g.update(ptp);
        }
        assert_eq!(g.reset, resets + 1);
        assert_eq!(g.total, 101);
    }

    #[test]
    fn test_jitter_window() {
        let mut s = JitterStats::new();
        let mut t = 0u32;
        // The first window is one sample short, look at the second one.
        for _ in 0..513 {
            s.update(t);
            t = t.wrapping_add(SCHED_PERIOD_NS);
        }

        assert_eq!(s.dt_mean, SCHED_PERIOD_NS);
        assert_eq!(s.dt_var, 0);
        assert_eq!(s.dt_min, SCHED_PERIOD_NS);
    }
}
