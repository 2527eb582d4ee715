//! Emavb driver interface
//!
//! The crate provides an interface between an Ethernet MAC driver and the
//! Emavb stack. Limited scope facilitates compatibility across versions.
//! Driver crates should depend on this crate. Emavb stack users should depend
//! on the `emavb` crate instead.
//!
//! A driver exposes two things to the stack:
//! * `TxSink` consumes transmit descriptors, batched per scheduling tick
//! * `PllControl` steers a tunable clock generator for media clock recovery
//!
//! Unlike other network stack implementations, Emavb does not own a transmit
//! task. The driver's timer interrupt (or a task woken by it) calls into the
//! port scheduler once per 125 us tick, passing a `TxSink` for that tick's
//! batch. This design works because credit based shaping is driven by time,
//! not by frame arrival: a scheduler that sleeps until woken by producers
//! could not replenish credit or honor class intervals. The inverse structure
//! also keeps all descriptor movement on the driver's own execution context,
//! eliminating intermediate channels between scheduler and DMA ring.
//!
//! A `TxSink` may refuse descriptors when the hardware ring is full. The
//! scheduler treats this as backpressure for the remainder of the tick; it
//! does not retry within the tick and does not drop the frame.

#![no_std]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod desc;
pub mod sink;

pub mod time {
    pub use embassy_time::{Duration, Instant};
}
