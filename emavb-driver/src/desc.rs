//! Transmit descriptor object

/// Per-frame transmit options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxFlags(u8);

impl TxFlags {
    pub const NONE: Self = Self(0);
    /// Request a hardware egress timestamp for this frame.
    pub const HW_TS: Self = Self(1 << 0);
    /// Frame carries a valid launch time in `TxDesc::ts`.
    pub const TS: Self = Self(1 << 1);

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn into_bits(self) -> u8 {
        self.0
    }
}

impl core::ops::BitOr<TxFlags> for TxFlags {
    type Output = Self;
    fn bitor(self, rhs: TxFlags) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Descriptor for one frame queued for transmission
///
/// The stack schedules descriptors, not frame payloads. Payload buffers are
/// owned by the application and the driver; the descriptor identifies the
/// buffer through `buf`, which the stack never interprets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxDesc {
    /// Opaque buffer handle, passed through to the driver.
    pub buf: u32,
    /// Frame length in bytes, without the FCS.
    pub len: u16,
    pub flags: TxFlags,
    /// Low 32 bits of the gPTP launch time in nanoseconds. Only valid when
    /// `flags` contains [`TxFlags::TS`].
    pub ts: u32,
}

impl TxDesc {
    pub const fn new(buf: u32, len: u16) -> Self {
        Self {
            buf,
            len,
            flags: TxFlags::NONE,
            ts: 0,
        }
    }
}
