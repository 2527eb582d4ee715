//! # Emavb
//!
//! This library provides an AVB/TSN transmit scheduler with credit based shaping \[1\] and media
//! clock recovery for no_std environments. It uses statically allocated per-queue rings and
//! requires no dynamic memory allocation.
//!
//! The library is designed to run its scheduler from a periodic 125 us timer interrupt, keeping
//! all critical section durations bounded.
//!
//! The library primarily targets the Embassy async framework.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────┐   ┌──────────┐        ┌──────────┐
//!  │ TxQueue  │   │ TxQueue  │  ...   │ TxQueue  │
//!  └────┬─────┘   └────┬─────┘        └────┬─────┘
//!       ▼              ▼                   ▼
//!  ┌─────────────────────────────────────────────┐
//!  │                    Port                     │
//!  │  ┌─────────────┐ ┌─────────────┐ ┌───────┐  │
//!  │  │  SR class A │ │  SR class B │ │ other │  │
//!  │  │   shaper    │ │   shaper    │ │classes│  │
//!  │  └──────┬──────┘ └──────┬──────┘ └───┬───┘  │
//!  │         └────────┬──────┴────────────┘      │
//!  │                  ▼                          │
//!  │            port shaper                      │
//!  └──────────────────┬──────────────────────────┘
//!                     ▼
//!               ┌──────────┐      ┌─────────────┐
//!               │  TxSink  │      │ 125us timer │
//!               └──────────┘      └─────────────┘
//! ```
//! Components:
//! * _Port_ holds the per-port scheduling state: the traffic class and stream queues, the credit
//!   based shapers, the rate admission bookkeeping and the gPTP timing grid. Its scheduler runs
//!   once per 125 us tick from the timer driver and hands frames to the hardware.
//! * _TxQueue_ is an async producer handle bound to one traffic class queue. Pushing backpressures
//!   when the queue ring is full and wakes up once the scheduler has drained it.
//! * _TxSink_ is the hardware driver interface. Descriptors pushed during one tick are started as
//!   a single batch on flush.
//! * _MediaClockRecovery_ disciplines an audio PLL against received stream timestamps, posting
//!   rate adjustments to an async _PllWorker_.
//! * _PtpGenerator_ produces media clock timestamps from gPTP time for locally mastered domains.
//!
//! Stream reservations are made against the port link rate before a queue may carry SR traffic,
//! and per-stream shapers keep each stream to its reserved idle slope.
//!
//! ## Concurrency model
//!
//! The Port keeps its scheduling state behind a blocking mutex, generic over the embassy_sync
//! RawMutex implementations:
//! * _CriticalSectionRawMutex_ allows the scheduler to run directly in the timer interrupt while
//!   producers run in threads or other interrupt levels.
//! * _ThreadModeRawMutex_ has no system-wide effects but requires the scheduler and all producers
//!   to run in a thread mode executor.
//!
//! Frame descriptors do not pass through the mutex: each queue owns a single-producer
//! single-consumer ring, and a per-class pending bitmask tells the scheduler which rings need
//! service. The mutex is only held for the scheduler tick itself and for control plane calls.
//!
//! ## Limitations
//!
//! * Preemption and time aware shaping are not supported, only credit based shaping.
//! * The receive path is out of scope, only transmit scheduling is implemented.
//! * The no_std target supports single-CPU systems only (embassy_sync limitation).
//!
//! # References:
//!
//! * \[1\] IEEE 802.1Q-2018, Forwarding and Queuing Enhancements for Time-Sensitive Streams
#![no_std]

pub use emavb_core as core;
pub use emavb_driver::{desc, sink, time};

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod config;
pub mod mclock;
mod pi;
pub mod qos;
mod rational;
mod utils;

pub use qos::{Port, PortStats, QosError, QueueStats, TxError, TxQueue};
