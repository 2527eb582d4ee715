//! Credit based shaper state
//!
//! One shaper per stream, one per SR class and one for the whole port. A
//! queue may transmit while its shaper credit is at or above `credit_min`;
//! `credit_min = -rate` allows one interval worth of deficit, which keeps
//! the link busy without exceeding the reserved bandwidth over two
//! consecutive intervals.

/// Credit ceiling. Combined with the `dt` cutoff in [`Shaper::incr`] this
/// keeps the accumulation arithmetic far from `i32` overflow.
const CREDIT_MAX: i32 = 0x4000_0000;

/// Idle gaps longer than this many intervals saturate the credit instead of
/// being integrated.
const DT_MAX: u32 = 0x10000;

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Shaper {
    pub credit: i32,
    pub credit_min: i32,
    /// Credit gained per interval, in bits.
    pub rate: u32,
    /// Interval count at the last credit update.
    pub tlast: u32,
}

impl Shaper {
    pub const fn new(rate: u32) -> Self {
        Self {
            credit: 0,
            credit_min: -(rate as i32),
            rate,
            tlast: 0,
        }
    }

    /// Replaces the rate, keeping the accumulated credit.
    pub fn set_rate(&mut self, rate: u32) {
        self.rate = rate;
        self.credit_min = -(rate as i32);
    }

    /// Adds to the rate of an aggregate shaper.
    pub fn add_rate(&mut self, rate: i32) {
        self.rate = (self.rate as i32 + rate) as u32;
        self.credit_min -= rate;
    }

    pub fn ready(&self) -> bool {
        self.credit >= self.credit_min
    }

    /// Accrues credit for the idle intervals since the last update. `tnow`
    /// is a free-running interval count.
    pub fn incr(&mut self, tnow: u32) {
        let dt = tnow.wrapping_sub(self.tlast);

        if dt > DT_MAX || self.credit >= CREDIT_MAX {
            self.credit = CREDIT_MAX;
        } else {
            let credit = self.credit as i64 + dt as i64 * self.rate as i64;
            self.credit = credit.min(CREDIT_MAX as i64) as i32;
        }

        self.tlast = tnow;
    }

    /// Spends `bits` of credit for one transmitted frame.
    pub fn dec(&mut self, bits: u32) {
        self.credit -= bits as i32;
    }

    /// Clamps positive credit. Idle queues may not save up credit.
    pub fn cap_credit(&mut self) {
        if self.credit > 0 {
            self.credit = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_threshold() {
        let mut s = Shaper::new(1000);
        assert!(s.ready());

        // One interval of deficit is allowed.
        s.dec(1000);
        assert!(s.ready());
        s.dec(1);
        assert!(!s.ready());

        s.incr(s.tlast + 1);
        assert!(s.ready());
        assert_eq!(s.credit, -1);
    }

    #[test]
    fn test_incr_saturates_after_long_idle() {
        let mut s = Shaper::new(1000);
        s.incr(DT_MAX + 1);
        assert_eq!(s.credit, CREDIT_MAX);

        // Saturated credit stays pinned.
        s.incr(DT_MAX + 2);
        assert_eq!(s.credit, CREDIT_MAX);
    }

    #[test]
    fn test_rate_aggregate() {
        let mut class = Shaper::new(0);
        class.add_rate(500);
        class.add_rate(300);
        assert_eq!(class.rate, 800);
        assert_eq!(class.credit_min, -800);

        class.add_rate(-500);
        assert_eq!(class.rate, 300);
        assert_eq!(class.credit_min, -300);
    }
}
