//! Free-running 32 bit gPTP time arithmetic
//!
//! Scheduler timestamps are the low 32 bits of gPTP time in nanoseconds and
//! wrap every ~4.29 s. Comparisons must therefore be made on signed
//! differences, never on the raw values.

/// Returns true if `a` is at or after `b`, modulo wrap.
///
/// Valid as long as the two timestamps are less than 2^31 ns (~2.1 s) apart.
pub const fn after_eq(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) as i32 >= 0
}

/// Returns true if `a` is strictly before `b`, modulo wrap.
pub const fn before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Signed distance from `b` to `a`, modulo wrap.
pub const fn delta(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_compare() {
        assert!(after_eq(100, 100));
        assert!(after_eq(101, 100));
        assert!(before(99, 100));

        // Across the wrap point.
        assert!(after_eq(5, u32::MAX - 5));
        assert!(before(u32::MAX - 5, 5));
        assert_eq!(delta(5, u32::MAX - 5), 11);
        assert_eq!(delta(u32::MAX - 5, 5), -11);
    }
}
