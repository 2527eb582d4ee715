//! Per traffic class and per stream scheduler state

use emavb_core::{QueueSet, SrClass, StreamId};

use crate::config::{
    SCHED_PERIOD_NS, SR_CLASS_HIGH_STREAM_MAX, SR_CLASS_LOW_STREAM_MAX, SR_CLASS_STREAM_MAX,
    TRAFFIC_CLASS_QUEUE_MAX,
};
use crate::qos::shaper::Shaper;
use crate::rational::Rational;

const NSEC_PER_SEC: u64 = 1_000_000_000;

/// One queue slot of a traffic class.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QosQueue {
    pub connected: bool,
    /// Backing stream slot, for queues of a shaped class.
    pub stream: Option<u8>,
    pub tx: u32,
}

impl QosQueue {
    const fn new() -> Self {
        Self {
            connected: false,
            stream: None,
            tx: 0,
        }
    }
}

#[derive(Debug)]
pub(crate) struct TrafficClass {
    pub hw_queue: u8,
    /// SR class slot shaping this traffic class, if any.
    pub sr_class: Option<u8>,
    /// Queues with credit to spend and frames ready to launch.
    pub scheduled: QueueSet,
    /// Last queue served by the round robin.
    pub slast: u8,
    pub tx: u32,
    pub queues: [QosQueue; TRAFFIC_CLASS_QUEUE_MAX],
}

impl TrafficClass {
    pub(crate) fn new(hw_queue: u8) -> Self {
        Self {
            hw_queue,
            sr_class: None,
            scheduled: QueueSet::NONE,
            slast: 0,
            tx: 0,
            queues: [QosQueue::new(); TRAFFIC_CLASS_QUEUE_MAX],
        }
    }

    /// First-fit queue slot allocation.
    pub(crate) fn connect_queue(&mut self) -> Option<u8> {
        let slot = self.queues.iter().position(|q| !q.connected)?;

        self.queues[slot].connected = true;
        self.queues[slot].stream = None;
        self.queues[slot].tx = 0;
        Some(slot as u8)
    }
}

/// A reserved stream slot within an SR class.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamQueue {
    /// MSRP stream bound to this slot. `None` marks the slot free.
    pub id: Option<StreamId>,
    /// A bandwidth reservation is in place.
    pub configured: bool,
    /// A transmit queue is attached.
    pub connected: bool,
    /// Reserved bandwidth, bits per second.
    pub idle_slope: u32,
    pub vlan_id: u16,
    /// Queue slot in the owning traffic class, while connected.
    pub queue: Option<u8>,
    pub shaper: Shaper,
}

impl StreamQueue {
    const fn new() -> Self {
        Self {
            id: None,
            configured: false,
            connected: false,
            idle_slope: 0,
            vlan_id: 0,
            queue: None,
            shaper: Shaper::new(0),
        }
    }
}

#[derive(Debug)]
pub(crate) struct SrClassState {
    pub class: SrClass,
    /// Owning traffic class index.
    pub tc: u8,
    pub scale: u32,
    /// Scheduling subinterval, `class interval / scale`.
    pub interval: Rational,
    /// Subinterval expressed in scheduler ticks.
    pub interval_ratio: Rational,
    /// Deadline of the next subinterval, free-running nanoseconds.
    pub tnext: Rational,
    /// gPTP time of the next subinterval, for launch time gating.
    pub tnext_gptp: u32,
    pub sched_offset: u32,
    /// Subintervals elapsed since start, the shaper time base.
    pub interval_n: u32,
    /// Queues known to hold frames, scheduler-private copy.
    pub pending: QueueSet,
    /// Aggregate class shaper, rate is the sum of the stream rates.
    pub shaper: Shaper,
    /// Aggregate reservation, bits per second.
    pub idle_slope: u32,
    pub streams: u32,
    pub stream_max: usize,
    pub stream: [StreamQueue; SR_CLASS_STREAM_MAX],
}

impl SrClassState {
    pub(crate) fn new(class: SrClass, high: bool, tc: u8, tnow: u32) -> Self {
        let scale = class.scale();
        let interval = Rational::new(
            class.interval_p() as u64,
            class.interval_q() * scale,
        );
        let mut tnext = Rational::new(0, class.interval_q() * scale);
        tnext.i = tnow;

        let stream_max = if high {
            SR_CLASS_HIGH_STREAM_MAX
        } else {
            SR_CLASS_LOW_STREAM_MAX
        }
        .min(SR_CLASS_STREAM_MAX);

        Self {
            class,
            tc,
            scale,
            interval,
            interval_ratio: interval.div_int(SCHED_PERIOD_NS),
            tnext,
            tnext_gptp: 0,
            sched_offset: 0,
            interval_n: 0,
            pending: QueueSet::NONE,
            shaper: Shaper::new(0),
            idle_slope: 0,
            streams: 0,
            stream_max,
            stream: [StreamQueue::new(); SR_CLASS_STREAM_MAX],
        }
    }

    /// Converts a reservation in bits per second to shaper credit per class
    /// interval.
    pub(crate) fn scale_idle_slope(&self, idle_slope: u32) -> u32 {
        (idle_slope as u64 * self.class.interval_p() as u64
            / (NSEC_PER_SEC * self.class.interval_q() as u64)) as u32
    }

    /// First-fit stream slot lookup: an existing slot with a matching id, or
    /// a free one which gets bound to the id.
    pub(crate) fn stream_get(&mut self, id: StreamId) -> Option<u8> {
        let mut free = None;

        for (i, stream) in self.stream[..self.stream_max].iter().enumerate() {
            match stream.id {
                Some(sid) if sid == id => return Some(i as u8),
                None if free.is_none() => free = Some(i as u8),
                _ => {}
            }
        }

        if let Some(i) = free {
            self.stream[i as usize].id = Some(id);
        }
        free
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_idle_slope() {
        let class = SrClassState::new(SrClass::A, true, 4, 0);
        // 8kHz class interval: bits/s divides down by 8000.
        assert_eq!(class.scale_idle_slope(8_000_000), 1000);

        let class = SrClassState::new(SrClass::C, false, 3, 0);
        // 750Hz class interval.
        assert_eq!(class.scale_idle_slope(3_000_000), 4000);
    }

    #[test]
    fn test_stream_get_first_fit() {
        let mut class = SrClassState::new(SrClass::A, true, 4, 0);
        let a = StreamId::from(0x1111u64);
        let b = StreamId::from(0x2222u64);

        let sa = class.stream_get(a).unwrap();
        let sb = class.stream_get(b).unwrap();
        assert_ne!(sa, sb);

        // Same id resolves to the same slot.
        assert_eq!(class.stream_get(a), Some(sa));
    }

    #[test]
    fn test_stream_get_exhausts() {
        let mut class = SrClassState::new(SrClass::A, true, 4, 0);
        for i in 0..class.stream_max as u64 {
            assert!(class.stream_get(StreamId::from(i)).is_some());
        }
        assert_eq!(class.stream_get(StreamId::from(0x9999u64)), None);
    }

    #[test]
    fn test_interval_ratio() {
        let class = SrClassState::new(SrClass::B, false, 3, 0);
        // Class B, scale 2: one subinterval per 125us tick.
        assert_eq!(class.interval.i, 125_000);
        assert_eq!(class.interval_ratio.int_mul(SCHED_PERIOD_NS), 125_000);
    }
}
