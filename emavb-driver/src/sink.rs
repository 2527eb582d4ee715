//! Hardware transmit and clock interfaces

use crate::desc::TxDesc;

/// The hardware transmit ring is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxFull;

/// Hardware transmit queue interface
///
/// The scheduler pushes descriptors for one scheduling tick and then calls
/// [`flush`](TxSink::flush) once to start the batch. A driver backed by a DMA
/// ring should only ring the transmit doorbell on flush, so that a tick worth
/// of frames goes out as one burst.
pub trait TxSink {
    /// Queues a descriptor on the hardware queue `queue`.
    ///
    /// On [`TxFull`] the descriptor was not consumed and the caller keeps
    /// ownership.
    fn push(&mut self, queue: u8, desc: &TxDesc) -> Result<(), TxFull>;

    /// Starts transmission of all descriptors pushed since the last flush.
    fn flush(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PllError {
    /// The requested offset is outside the hardware tuning range.
    OutOfRange,
    /// The PLL rejected the request, for example because a previous
    /// adjustment is still settling.
    Busy,
}

/// Tunable clock generator interface
///
/// Implemented by drivers for an adjustable audio PLL or a timer peripheral
/// clocked from one. The media clock recovery loop steers the generator
/// through this trait.
pub trait PllControl {
    /// Nominal output frequency in Hz.
    fn rate(&self) -> u32;

    /// Requests a frequency offset from nominal, in parts per billion, and
    /// returns the offset actually applied after hardware step rounding.
    ///
    /// The offset is absolute, not cumulative. Requesting the same value
    /// twice is allowed and must be a no-op.
    fn adjust(&mut self, ppb: i32) -> Result<i32, PllError>;
}
