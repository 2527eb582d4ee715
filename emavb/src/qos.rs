//! Credit based transmit scheduling

mod class;
mod grid;
mod port;
mod shaper;

pub use port::{Port, PortStats, QueueStats, TxQueue};

/// Configuration plane errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QosError {
    /// The SR class is not part of the port's active pair.
    ClassNotEnabled,
    /// The traffic class carries reserved traffic, attach through a stream.
    ClassReserved,
    /// No free stream or queue slot.
    NoFreeSlot,
    /// The stream already has a queue attached.
    AlreadyConnected,
    /// The reservation would exceed the admission budget.
    RateExceeded,
    /// The operation needs all streams removed first.
    Busy,
}

/// Producer side transmit errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxError {
    /// The descriptor ring is full.
    Full,
    /// The queue is disabled, the frame was dropped.
    Disabled,
}
