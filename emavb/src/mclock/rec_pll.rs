//! Media clock recovery
//!
//! Recovers a remote media clock by disciplining a local audio PLL against
//! receive timestamps. Stream timestamps are pushed into a [`TsRing`] by the
//! receive path and decimated down to one sampling point per ~10 ms. Every
//! sampling period the recovery compares how many PLL cycles actually elapsed
//! against how many should have, and feeds the resulting ppb error into a PI
//! filter whose output is posted to the PLL worker.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;

use emavb_core::ptp;

use crate::config::{MCLOCK_TS_RING_SIZE, SCHED_PERIOD_NS};
use crate::mclock::worker::PllHandle;
use crate::mclock::{MclockError, TimerClock};
use crate::pi::Pi;
use crate::rational::Rational;
use crate::utils::ring::Ring;

/// Target sampling period. Timestamps are decimated so that one measurement
/// covers at least this much time.
const SAMPLING_PERIOD_NS: u32 = 10_000_000;

/// Measurements averaged to seed the PI filter on startup, and how many
/// initial measurements to discard before that.
const NB_MEAS: u32 = 10;
const NB_MEAS_START_SKIP: u32 = 3;

/// Lock hysteresis, in ppb of measured error.
const IN_LOCKED_PPB_ERR: i64 = 1_000;
const OUT_LOCKED_PPB_ERR: i64 = 5_000;
const IN_LOCKED_NB_VALID: u32 = 10;

/// Once locked, adjustments are made on a 2^4 sample average.
const LOCKED_SHIFT: u32 = 4;

const PI_I_SHIFT: u32 = 3;
const PI_P_SHIFT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockStatus {
    Stopped,
    Running,
    RunningLocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Reset,
    Start,
    Adjust,
    AdjustLocked,
}

/// Receive timestamp ring between a stream receive path and the recovery.
///
/// Single producer, single consumer. The producer is the receive path of the
/// stream driving the clock domain, the consumer is the recovery running in
/// the timer context.
pub struct TsRing {
    ring: Ring<u32, MCLOCK_TS_RING_SIZE>,
    overrun: AtomicU32,
}

impl TsRing {
    pub const fn new() -> Self {
        Self {
            ring: Ring::new(),
            overrun: AtomicU32::new(0),
        }
    }

    /// Pushes a stream presentation timestamp. Dropped and counted if the
    /// consumer has fallen behind.
    pub fn push(&self, ts: u32) {
        if self.ring.push(ts).is_err() {
            self.overrun.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn overruns(&self) -> u32 {
        self.overrun.load(Ordering::Relaxed)
    }

    fn pop(&self) -> Option<u32> {
        self.ring.pop()
    }
}

impl Default for TsRing {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecoveryStats {
    pub start: u32,
    pub stop: u32,
    pub reset: u32,
    pub adjust: u32,
    pub locked: u32,
    pub err_meas: u32,
    pub err_wd: u32,
    pub err_ts: u32,
    pub err_drift: u32,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecoveryConfig {
    /// Nominal frequency of the recovered PLL output being measured, in Hz.
    pub pll_ref_freq: u32,
    /// Stream timestamp frequency, as the ratio `ts_freq_p / ts_freq_q` Hz.
    pub ts_freq_p: u32,
    pub ts_freq_q: u32,
    /// Largest single adjustment step requested from the PLL, in ppb.
    pub max_adjust_ppb: i32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            pll_ref_freq: 24_576_000,
            ts_freq_p: 300,
            ts_freq_q: 1,
            max_adjust_ppb: 100_000,
        }
    }
}

pub struct MediaClockRecovery<'a, M: RawMutex> {
    ts: &'a TsRing,
    pll: &'a PllHandle<M>,

    clock: TimerClock,
    status: ClockStatus,
    state: State,

    // Derived from the configured frequencies. All rationals share the
    // ts_freq_p denominator so they can be accumulated together.
    den: u32,
    div: u32,
    fec_period: Rational,
    pll_clk_period: Rational,
    ts_offset: u32,

    pi: Pi,
    max_adjust: i64,
    req_ppb: i32,

    next_ts: u32,
    ts_slot: u32,
    wd: u32,
    cnt_last: Option<u32>,
    meas_n: u32,
    pll_clk_target: Rational,
    target_last: u32,
    start_ppb_err: i64,
    locked_valid: u32,
    locked_meas: u32,
    locked_ppb_err: i64,
    clk_media: Rational,

    stats: RecoveryStats,
}

impl<'a, M: RawMutex> MediaClockRecovery<'a, M> {
    pub fn new(
        config: RecoveryConfig,
        ts: &'a TsRing,
        pll: &'a PllHandle<M>,
    ) -> Result<Self, MclockError> {
        let den = config.ts_freq_p;
        if den == 0 || config.ts_freq_q == 0 || config.max_adjust_ppb <= 0 {
            return Err(MclockError::InvalidFreq);
        }

        let ts_period = Rational::new(1_000_000_000u64 * config.ts_freq_q as u64, den);
        if ts_period.i == 0 || ts_period.i > SAMPLING_PERIOD_NS {
            return Err(MclockError::InvalidFreq);
        }
        // The ring must hold at least two sampling periods worth of
        // timestamps to survive a reset.
        if 2 * SAMPLING_PERIOD_NS / ts_period.i >= MCLOCK_TS_RING_SIZE as u32 {
            return Err(MclockError::InvalidFreq);
        }
        // The measurement only works if a timestamp period covers an
        // integer number of PLL cycles.
        if (config.pll_ref_freq as u64 * config.ts_freq_q as u64) % den as u64 != 0 {
            return Err(MclockError::InvalidFreq);
        }

        let mut fec_period = Rational::int_with_den(0, den);
        let mut div = 0;
        while fec_period.i < SAMPLING_PERIOD_NS {
            fec_period.add(&ts_period);
            div += 1;
        }

        let pll_clk_period = Rational::new(
            config.pll_ref_freq as u64 * config.ts_freq_q as u64 * div as u64,
            den,
        );

        Ok(Self {
            ts,
            pll,
            clock: TimerClock::new(SCHED_PERIOD_NS, fec_period.i),
            status: ClockStatus::Stopped,
            state: State::Reset,
            den,
            div,
            ts_offset: 2 * fec_period.i,
            fec_period,
            pll_clk_period,
            pi: Pi::new(PI_I_SHIFT, PI_P_SHIFT),
            max_adjust: config.max_adjust_ppb as i64,
            req_ppb: 0,
            next_ts: 0,
            ts_slot: 0,
            wd: 0,
            cnt_last: None,
            meas_n: 0,
            pll_clk_target: Rational::int_with_den(0, den),
            target_last: 0,
            start_ppb_err: 0,
            locked_valid: 0,
            locked_meas: 0,
            locked_ppb_err: 0,
            clk_media: Rational::int_with_den(0, den),
            stats: RecoveryStats::default(),
        })
    }

    pub fn status(&self) -> ClockStatus {
        self.status
    }

    pub fn stats(&self) -> RecoveryStats {
        self.stats
    }

    /// Sampling period in nanoseconds, after timestamp decimation.
    pub fn sampling_period(&self) -> u32 {
        self.fec_period.i
    }

    /// Starts recovery from stream timestamp `ts`, or from the newest
    /// timestamp already in the ring.
    pub fn start(&mut self, ts: Option<u32>) -> Result<(), MclockError> {
        let t = match ts {
            Some(t) => t,
            None => self.ts_reset().ok_or(MclockError::NoTimestamp)?,
        };
        self.next_ts = t.wrapping_add(self.ts_offset);
        // The start timestamp counts as the first of its decimation group.
        self.ts_slot = if self.div > 1 { 1 } else { 0 };
        self.begin();
        self.stats.start += 1;
        info!("media clock recovery started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.status == ClockStatus::Stopped {
            return;
        }
        self.status = ClockStatus::Stopped;
        self.state = State::Reset;
        self.stats.stop += 1;
    }

    /// Runs recovery for one scheduling tick.
    ///
    /// `audio_pll_cnt` is the free-running PLL cycle counter and `ptp_now`
    /// the gPTP time of this tick. Must be called every tick while running,
    /// with `ticks` the number of timer periods since the last call.
    pub fn tick(&mut self, audio_pll_cnt: u32, ptp_now: u32, ticks: u32) {
        self.clock.advance(ticks);

        if self.status == ClockStatus::Stopped {
            return;
        }

        if self.state == State::Reset {
            // Restart needs a fresh timestamp, retried every tick until the
            // stream delivers one.
            if self.restart().is_err() {
                return;
            }
        }

        if ptp::after_eq(ptp_now, self.next_ts) {
            self.wd = self.clock.clk_timer.wrapping_add(4 * self.fec_period.i);

            // The tick lands some time after the nominal sampling point.
            // Project the counter back to where it was at the sampling point
            // using the current PLL rate.
            let latency = ptp_now.wrapping_sub(self.next_ts);
            let cycles = (latency as u64 * self.pll.rate() as u64 / 1_000_000_000) as u32;
            let cnt = audio_pll_cnt.wrapping_sub(cycles);

            if let Some(last) = self.cnt_last {
                self.process_meas(cnt.wrapping_sub(last));
            }
            self.cnt_last = Some(cnt);

            match self.ts_get() {
                Some(ts) => self.next_ts = ts.wrapping_add(self.ts_offset),
                None => {
                    self.stats.err_ts += 1;
                    self.state = State::Reset;
                }
            }
        } else if ptp::after_eq(self.clock.clk_timer, self.wd) {
            self.stats.err_wd += 1;
            self.state = State::Reset;
        }

        if self.state == State::Reset {
            self.stats.reset += 1;
            warn!("media clock recovery reset");
            let _ = self.restart();
        }
    }

    fn begin(&mut self) {
        self.pi.reset(0);
        self.pll_clk_target = Rational::int_with_den(0, self.den);
        self.target_last = 0;
        self.cnt_last = None;
        self.meas_n = 0;
        self.start_ppb_err = 0;
        self.locked_valid = 0;
        self.locked_meas = 0;
        self.locked_ppb_err = 0;
        self.wd = self.clock.clk_timer.wrapping_add(4 * self.fec_period.i);
        self.status = ClockStatus::Running;
        self.state = State::Start;
    }

    fn restart(&mut self) -> Result<(), MclockError> {
        let ts = self.ts_reset().ok_or(MclockError::NoTimestamp)?;
        self.next_ts = ts.wrapping_add(self.ts_offset);
        self.begin();
        self.stats.start += 1;
        Ok(())
    }

    /// Pops timestamps until the next decimation slot comes up.
    fn ts_get(&mut self) -> Option<u32> {
        while let Some(ts) = self.ts.pop() {
            self.ts_slot += 1;
            if self.ts_slot == self.div {
                self.ts_slot = 0;
                return Some(ts);
            }
        }
        None
    }

    /// Drains the ring and returns the newest timestamp.
    fn ts_reset(&mut self) -> Option<u32> {
        self.ts_slot = 0;
        let mut last = None;
        while let Some(ts) = self.ts.pop() {
            last = Some(ts);
        }
        last
    }

    fn process_meas(&mut self, meas: u32) {
        let nominal = self.pll_clk_period.i;

        // A measurement off by more than 0.1% points at a bad timestamp or a
        // counter glitch, not at clock drift. The very first one is dropped
        // silently since the counter snapshot may predate the start.
        if (nominal as i64 - meas as i64).abs() > nominal as i64 / 1000 {
            if self.meas_n != 0 {
                self.state = State::Reset;
            }
            self.stats.err_meas += 1;
            self.meas_n += 1;
            return;
        }

        // Expected cycle count for this period, with the fractional part
        // carried across periods.
        self.pll_clk_target.add(&self.pll_clk_period);
        let dt_target = self.pll_clk_target.i.wrapping_sub(self.target_last) as i64;
        self.target_last = self.pll_clk_target.i;

        let err_ppb = (dt_target - meas as i64) * 1_000_000_000 / dt_target;

        match self.state {
            State::Start => {
                if self.meas_n > NB_MEAS_START_SKIP {
                    self.start_ppb_err += err_ppb;
                }
                let n = self.meas_n;
                self.meas_n += 1;
                if n >= NB_MEAS + NB_MEAS_START_SKIP {
                    self.start_ppb_err /= NB_MEAS as i64;
                    self.clk_media = Rational::int_with_den(self.clock.clk_timer, self.den);
                    self.clock.restart_drift(self.clock.clk_timer);
                    self.pi.reset(self.start_ppb_err + self.pll.applied_ppb() as i64);
                    self.state = State::Adjust;
                    debug!("media clock start error {} ppb", self.start_ppb_err);
                }
            }
            State::Adjust => {
                if err_ppb.abs() < IN_LOCKED_PPB_ERR {
                    self.locked_valid += 1;
                    if self.locked_valid >= IN_LOCKED_NB_VALID {
                        self.status = ClockStatus::RunningLocked;
                        self.state = State::AdjustLocked;
                        self.stats.locked += 1;
                        // The transitioning sample opens the locked window.
                        self.locked_meas = 1;
                        self.locked_ppb_err = err_ppb;
                        info!("media clock locked");
                    }
                } else {
                    self.locked_valid = 0;
                }
                self.pll_adjust(err_ppb);
            }
            State::AdjustLocked => {
                self.locked_ppb_err += err_ppb;
                self.locked_meas += 1;
                if self.locked_meas >= 1 << LOCKED_SHIFT {
                    let avg = self.locked_ppb_err >> LOCKED_SHIFT;
                    self.pll_adjust(avg);
                    if avg.abs() >= OUT_LOCKED_PPB_ERR {
                        self.status = ClockStatus::Running;
                        self.state = State::Adjust;
                        self.locked_valid = 0;
                        warn!("media clock lock lost, {} ppb", avg);
                    }
                    self.locked_meas = 0;
                    self.locked_ppb_err = 0;
                }
            }
            State::Reset => {}
        }

        if matches!(self.state, State::Adjust | State::AdjustLocked) {
            self.clk_media.add(&self.fec_period);
            if self.clock.drift_adapt(self.clk_media.i).is_err() {
                self.stats.err_drift += 1;
            }
        }
    }

    /// Feeds a measured error into the PI filter and posts the resulting
    /// offset to the PLL worker, rate limited to one max_adjust step per
    /// sample relative to the last applied value.
    fn pll_adjust(&mut self, err_ppb: i64) {
        self.pi.update(err_ppb);

        let applied = self.pll.applied_ppb() as i64;
        let step = (self.pi.u - applied).clamp(-self.max_adjust, self.max_adjust);
        let ppb = (applied + step) as i32;

        if ppb != self.req_ppb {
            self.req_ppb = ppb;
            self.pll.request(ppb);
        }
        self.stats.adjust += 1;
    }
}
