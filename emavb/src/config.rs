//! Compile time stack configuration

/// Scheduling tick period. All credit accounting and the gPTP grid run on
/// this period.
pub const SCHED_PERIOD_NS: u32 = 125_000;

/// Hardware transmit queues per port.
pub const PORT_QUEUE_MAX: usize = 2;

/// Traffic classes per port: best effort, two unshaped priority classes,
/// and the two SR classes on top.
pub const TRAFFIC_CLASS_MAX: usize = 5;

/// SR classes enabled per port.
pub const SR_CLASS_MAX: usize = 2;

/// Queue slots per traffic class. Must not exceed `QueueSet::CAPACITY`.
pub const TRAFFIC_CLASS_QUEUE_MAX: usize = 16;

/// Reserved streams per SR class.
pub const SR_CLASS_STREAM_MAX: usize = 16;

/// Concurrent streams on the high SR class.
pub const SR_CLASS_HIGH_STREAM_MAX: usize = 8;

/// Concurrent streams on the low SR class.
pub const SR_CLASS_LOW_STREAM_MAX: usize = 8;

/// Per-queue software ring capacity, in descriptors. Must be a power of two.
pub const QUEUE_RING_SIZE: usize = 64;

/// VLAN PCP to traffic class mapping.
///
/// PCP 2 and 3 carry SR Low and SR High reserved traffic and map to the two
/// shaped classes at the top. PCP 0 and 1 land on best effort, the remaining
/// PCPs on the two unshaped priority classes in between.
pub const PCP_TO_TRAFFIC_CLASS: [u8; 8] = [0, 0, 3, 4, 1, 1, 2, 2];

/// Traffic class indexes of the shaped (SR) classes, low then high.
pub const SR_LOW_TRAFFIC_CLASS: usize = 3;
pub const SR_HIGH_TRAFFIC_CLASS: usize = 4;

/// Media clock timestamp ring capacity. Must be a power of two.
pub const MCLOCK_TS_RING_SIZE: usize = 256;

/// Clock domains supported by the media clock registry.
pub const MCLOCK_DOMAIN_MAX: usize = 4;
