//! AVB/TSN core data types
//!
//! This crate provides basic data type definitions used by other Emavb crates.
//! Emavb users should not depend on this crate directly. Use the `emavb::core` reexport instead.
#![no_std]

pub mod ptp;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// 802.1Q Priority Code Point
///
/// Maps a frame to a traffic class. The numeric encoding matches the VLAN tag
/// PCP field; note that, unlike the tag encoding might suggest, PCP 1
/// (background) is *below* PCP 0 (best effort) in the standard traffic type
/// table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Pcp {
    /// Best effort, the default for untagged traffic.
    BestEffort = 0,
    /// Background, lowest importance.
    Background = 1,
    /// Excellent effort. Carries SR class Low reserved traffic when stream
    /// reservation is active.
    ExcellentEffort = 2,
    /// Critical applications. Carries SR class High reserved traffic when
    /// stream reservation is active.
    CriticalApplications = 3,
    /// Video, < 100 ms latency and jitter.
    Video = 4,
    /// Voice, < 10 ms latency and jitter.
    Voice = 5,
    /// Internetwork control (gPTP, MRP, AVDECC).
    InternetworkControl = 6,
    /// Network control.
    NetworkControl = 7,
}

impl Pcp {
    pub const MIN: Pcp = Pcp::BestEffort;
    pub const MAX: Pcp = Pcp::NetworkControl;

    /// PCP carrying SR class High reserved traffic.
    pub const SR_HIGH: Pcp = Pcp::CriticalApplications;
    /// PCP carrying SR class Low reserved traffic.
    pub const SR_LOW: Pcp = Pcp::ExcellentEffort;

    pub const fn try_from_u8(code: u8) -> Option<Pcp> {
        if code <= Self::MAX.into_u8() {
            Some(Pcp::from_u8_truncating(code))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(code: u8) -> Pcp {
        match code & 0x7 {
            0 => Pcp::BestEffort,
            1 => Pcp::Background,
            2 => Pcp::ExcellentEffort,
            3 => Pcp::CriticalApplications,
            4 => Pcp::Video,
            5 => Pcp::Voice,
            6 => Pcp::InternetworkControl,
            7 => Pcp::NetworkControl,
            _ => unreachable!(),
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }
}

impl From<Pcp> for u8 {
    fn from(value: Pcp) -> Self {
        value.into_u8()
    }
}

impl From<Pcp> for usize {
    fn from(value: Pcp) -> Self {
        u8::from(value).into()
    }
}

impl TryFrom<u8> for Pcp {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::try_from_u8(value).ok_or(InvalidValue)
    }
}

/// A set of queue slot indexes within one traffic class
///
/// Backs the scheduled/pending masks of the transmit scheduler. Capacity is
/// fixed at 32 slots so that the set fits a single `u32` and all operations
/// stay branch-free bit manipulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueSet(u32);

impl QueueSet {
    pub const NONE: Self = Self(0);
    pub const CAPACITY: u8 = 32;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn into_bits(self) -> u32 {
        self.0
    }

    pub const fn new_eq(slot: u8) -> Self {
        Self(1u32 << (slot & 0x1f))
    }

    pub const fn contains(&self, slot: u8) -> bool {
        (self.0 >> (slot & 0x1f)) & 0x1 != 0
    }

    pub fn insert(&mut self, slot: u8) {
        self.0 |= Self::new_eq(slot).0;
    }

    pub fn remove(&mut self, slot: u8) {
        self.0 &= !Self::new_eq(slot).0;
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn len(&self) -> u32 {
        self.0.count_ones()
    }

    pub const fn first(&self) -> Option<u8> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as u8)
        }
    }

    /// Round-robin pick: the first slot strictly after `last`, wrapping to
    /// the lowest slot when no higher one is set.
    ///
    /// Ties are broken by ascending slot index, restarting from one past the
    /// last served slot. Over any window where the set does not change, K
    /// set slots are served exactly once per K picks.
    pub const fn next_after(&self, last: u8) -> Option<u8> {
        if self.0 == 0 {
            return None;
        }

        let above = if last >= 31 {
            0
        } else {
            self.0 & (u32::MAX << (last + 1))
        };
        if above != 0 {
            Some(above.trailing_zeros() as u8)
        } else {
            Some(self.0.trailing_zeros() as u8)
        }
    }
}

impl Default for QueueSet {
    fn default() -> Self {
        QueueSet::NONE
    }
}

impl core::ops::Not for QueueSet {
    type Output = Self;
    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

impl core::ops::BitAnd<QueueSet> for QueueSet {
    type Output = Self;
    fn bitand(self, rhs: QueueSet) -> Self::Output {
        QueueSet(self.0 & rhs.0)
    }
}

impl core::ops::BitOr<QueueSet> for QueueSet {
    type Output = Self;
    fn bitor(self, rhs: QueueSet) -> Self::Output {
        QueueSet(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign<QueueSet> for QueueSet {
    fn bitor_assign(&mut self, rhs: QueueSet) {
        self.0 |= rhs.0;
    }
}

impl core::ops::BitAndAssign<QueueSet> for QueueSet {
    fn bitand_assign(&mut self, rhs: QueueSet) {
        self.0 &= rhs.0;
    }
}

impl core::iter::IntoIterator for QueueSet {
    type Item = u8;
    type IntoIter = QueueSetIterator;
    fn into_iter(self) -> Self::IntoIter {
        QueueSetIterator { residual: self }
    }
}

pub struct QueueSetIterator {
    residual: QueueSet,
}

impl core::iter::Iterator for QueueSetIterator {
    type Item = u8;
    fn next(&mut self) -> Option<Self::Item> {
        let first = self.residual.first();
        if let Some(slot) = first {
            self.residual.remove(slot);
        }
        first
    }
}

/// IEEE 802.1Q Stream Reservation class
///
/// Each class has a fixed network-wide transmission interval. Classes C, D
/// and E have intervals that are not an integer number of nanoseconds; the
/// interval is therefore published as an exact `p/q` rational.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SrClass {
    A = 0,
    B = 1,
    C = 2,
    D = 3,
    E = 4,
}

impl SrClass {
    pub const COUNT: usize = 5;

    /// Class interval numerator, in nanoseconds.
    pub const fn interval_p(self) -> u32 {
        match self {
            SrClass::A => 125_000,
            SrClass::B => 250_000,
            SrClass::C => 4_000_000,
            SrClass::D => 640_000_000,
            SrClass::E => 1_000_000,
        }
    }

    /// Class interval denominator.
    pub const fn interval_q(self) -> u32 {
        match self {
            SrClass::A => 1,
            SrClass::B => 1,
            SrClass::C => 3,
            SrClass::D => 441,
            SrClass::E => 1,
        }
    }

    /// Number of scheduling subintervals per class interval when shaping in
    /// software. Long-interval classes are shaped on a finer grid to avoid
    /// large bursts.
    pub const fn scale(self) -> u32 {
        match self {
            SrClass::A => 1,
            SrClass::B => 2,
            SrClass::C => 8,
            SrClass::D => 8,
            SrClass::E => 8,
        }
    }

    pub const fn max_interval_frames(self) -> u32 {
        match self {
            SrClass::A => 2,
            SrClass::B => 4,
            SrClass::C => 8,
            SrClass::D => 8,
            SrClass::E => 8,
        }
    }

    pub const fn try_from_u8(code: u8) -> Option<SrClass> {
        match code {
            0 => Some(SrClass::A),
            1 => Some(SrClass::B),
            2 => Some(SrClass::C),
            3 => Some(SrClass::D),
            4 => Some(SrClass::E),
            _ => None,
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for SrClass {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::try_from_u8(value).ok_or(InvalidValue)
    }
}

/// The pair of SR classes enabled on a port
///
/// Exactly two of the five classes are active at a time. The class with the
/// shorter interval is the high class and is mapped to [`Pcp::SR_HIGH`]; the
/// other is mapped to [`Pcp::SR_LOW`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SrClassPair {
    high: SrClass,
    low: SrClass,
}

impl SrClassPair {
    pub const DEFAULT: Self = Self {
        high: SrClass::A,
        low: SrClass::B,
    };

    pub const fn new(a: SrClass, b: SrClass) -> Result<Self, InvalidValue> {
        if a.into_u8() == b.into_u8() {
            return Err(InvalidValue);
        }

        // Ordering by identifier, which for the supported pairs (A/B and
        // C/D) also puts the shorter interval on the high side.
        if a.into_u8() < b.into_u8() {
            Ok(Self { high: a, low: b })
        } else {
            Ok(Self { high: b, low: a })
        }
    }

    pub const fn high(&self) -> SrClass {
        self.high
    }

    pub const fn low(&self) -> SrClass {
        self.low
    }

    pub const fn pcp(&self, class: SrClass) -> Option<Pcp> {
        if class.into_u8() == self.high.into_u8() {
            Some(Pcp::SR_HIGH)
        } else if class.into_u8() == self.low.into_u8() {
            Some(Pcp::SR_LOW)
        } else {
            None
        }
    }

    pub const fn from_pcp(&self, pcp: Pcp) -> Option<SrClass> {
        match pcp {
            Pcp::SR_HIGH => Some(self.high),
            Pcp::SR_LOW => Some(self.low),
            _ => None,
        }
    }
}

impl Default for SrClassPair {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// MSRP stream identifier (talker MAC address + unique id)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamId([u8; 8]);

impl StreamId {
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl From<u64> for StreamId {
    fn from(value: u64) -> Self {
        Self(value.to_be_bytes())
    }
}
