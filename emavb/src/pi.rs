//! Proportional-integral controller
//!
//! Shared by the gPTP scheduling grid and the media clock recovery loop.
//! Gains are negative powers of two applied as arithmetic right shifts, so
//! the controller is exact and cheap on cores without hardware divide.

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pi {
    ki_shift: u32,
    kp_shift: u32,
    integral: i64,
    pub err: i64,
    pub u: i64,
}

impl Pi {
    /// `ki_shift` and `kp_shift` select gains of `1 / 2^shift`.
    pub const fn new(ki_shift: u32, kp_shift: u32) -> Self {
        Self {
            ki_shift,
            kp_shift,
            integral: 0,
            err: 0,
            u: 0,
        }
    }

    /// Restarts the controller so that zero error holds the output at `u`.
    pub fn reset(&mut self, u: i64) {
        self.err = 0;
        self.integral = u << self.ki_shift;
        self.u = self.integral >> self.ki_shift;
    }

    /// Feeds one error sample and returns the new output.
    pub fn update(&mut self, err: i64) -> i64 {
        self.err = err;
        self.integral += err;
        self.u = (err >> self.kp_shift) + (self.integral >> self.ki_shift);
        self.u
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_holds_output() {
        let mut pi = Pi::new(3, 1);
        pi.reset(128_000);
        assert_eq!(pi.u, 128_000);
        // Zero error leaves the output unchanged.
        assert_eq!(pi.update(0), 128_000);
        assert_eq!(pi.update(0), 128_000);
    }

    #[test]
    fn test_integral_accumulates() {
        let mut pi = Pi::new(3, 1);
        pi.reset(0);
        // Constant error of 8: proportional term 4, integral grows by 1 per
        // step once 8 has accumulated ki times.
        assert_eq!(pi.update(8), 4 + 1);
        assert_eq!(pi.update(8), 4 + 2);
        assert_eq!(pi.update(8), 4 + 3);
    }

    #[test]
    fn test_negative_error() {
        let mut pi = Pi::new(3, 1);
        pi.reset(1000);
        let u = pi.update(-16);
        assert_eq!(u, -8 + ((8000 - 16) >> 3));
    }
}
