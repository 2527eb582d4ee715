//! Exact fractional time arithmetic
//!
//! SR class intervals are not all integer nanoseconds (class D is
//! 640000000/441 ns). Tracking class deadlines in rounded nanoseconds would
//! accumulate unbounded drift against the gPTP grid, so deadlines are kept as
//! `i + p/q` with the fractional part exact.

/// An unsigned fixed-denominator rational, `i + p/q` with `p < q`
///
/// The integer part is a free-running 32 bit nanosecond timestamp and wraps;
/// comparisons against it must go through [`Rational::elapsed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rational {
    pub i: u32,
    p: u32,
    q: u32,
}

impl Rational {
    pub const fn new(num: u64, den: u32) -> Self {
        Self {
            i: (num / den as u64) as u32,
            p: (num % den as u64) as u32,
            q: den,
        }
    }

    pub const fn int(value: u32) -> Self {
        Self { i: value, p: 0, q: 1 }
    }

    /// An integer value carrying the denominator of the terms it will be
    /// accumulated with.
    pub const fn int_with_den(value: u32, den: u32) -> Self {
        Self { i: value, p: 0, q: den }
    }

    /// Adds `other` in place. Both values must share a denominator.
    pub fn add(&mut self, other: &Rational) {
        debug_assert_eq!(self.q, other.q);

        self.i = self.i.wrapping_add(other.i);
        self.p += other.p;
        if self.p >= self.q {
            self.p -= self.q;
            self.i = self.i.wrapping_add(1);
        }
    }

    /// Multiplies by an integer, rounding the result down to nanoseconds.
    pub fn int_mul(&self, n: u32) -> u32 {
        let frac = (self.p as u64 * n as u64 / self.q as u64) as u32;
        self.i.wrapping_mul(n).wrapping_add(frac)
    }

    /// Divides by an integer, keeping the result exact. The denominator
    /// grows by a factor of `n`.
    pub const fn div_int(&self, n: u32) -> Rational {
        Self {
            i: self.i / n,
            p: (self.i % n) * self.q + self.p,
            q: n * self.q,
        }
    }

    /// Returns true if the free-running time `now` has reached this deadline.
    ///
    /// Wrap-aware; the fractional part never flips the comparison because
    /// `p/q < 1` and deadlines advance in whole-interval steps.
    pub fn elapsed(&self, now: u32) -> bool {
        now.wrapping_sub(self.i) as i32 >= 0
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::int(0)
    }
}
