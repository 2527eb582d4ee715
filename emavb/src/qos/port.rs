//! Transmit port scheduler
//!
//! [`Port`] arbitrates all transmit traffic of one Ethernet port across five
//! traffic classes, shaping the two SR classes with credit based shapers and
//! serving everything else in strict priority with round robin inside each
//! class.
//!
//! Producers enqueue descriptors on lock free rings and publish their state
//! through the per class pending mask. The driver timer calls [`Port::tick`]
//! every 125 us; everything the tick touches beyond the rings and masks is
//! protected by a single blocking mutex, so configuration calls may run
//! concurrently with producers but serialize against the tick.

use core::cell::RefCell;
use core::future::poll_fn;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use core::task::Poll;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::AtomicWaker;
use emavb_core::{ptp, Pcp, QueueSet, SrClass, SrClassPair, StreamId};
use emavb_driver::desc::{TxDesc, TxFlags};
use emavb_driver::sink::TxSink;

use crate::config::{
    PCP_TO_TRAFFIC_CLASS, QUEUE_RING_SIZE, SCHED_PERIOD_NS, SR_CLASS_MAX, TRAFFIC_CLASS_MAX,
    TRAFFIC_CLASS_QUEUE_MAX,
};
use crate::qos::class::{SrClassState, TrafficClass};
use crate::qos::grid::{JitterStats, PtpGrid};
use crate::qos::shaper::Shaper;
use crate::qos::{QosError, TxError};
use crate::utils::ring::Ring;

/// Preamble, inter frame gap and FCS, bytes on the wire per frame beyond the
/// payload length.
const PORT_OVERHEAD: u32 = 24;
/// Minimum frame size without FCS.
const MIN_FRAME_LEN: u32 = 60;

/// Producer facing state of one queue slot.
pub(crate) struct QueueShared {
    pub ring: Ring<TxDesc, QUEUE_RING_SIZE>,
    pub enabled: AtomicBool,
    /// Producer blocked on a full ring, waiting for a transmit event.
    pub waiting: AtomicBool,
    pub waker: AtomicWaker,
    pub dropped: AtomicU32,
    pub full: AtomicU32,
}

impl QueueShared {
    const fn new() -> Self {
        Self {
            ring: Ring::new(),
            enabled: AtomicBool::new(false),
            waiting: AtomicBool::new(false),
            waker: AtomicWaker::new(),
            dropped: AtomicU32::new(0),
            full: AtomicU32::new(0),
        }
    }

    /// Drops queued frames and unblocks a waiting producer.
    fn flush(&self) {
        self.ring.drain();
        if self.waiting.swap(false, Ordering::AcqRel) {
            self.waker.wake();
        }
    }
}

pub(crate) struct TrafficClassShared {
    /// Queues with frames enqueued, written by producers.
    pub pending: AtomicU32,
    pub queues: [QueueShared; TRAFFIC_CLASS_QUEUE_MAX],
}

impl TrafficClassShared {
    const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
            queues: [const { QueueShared::new() }; TRAFFIC_CLASS_QUEUE_MAX],
        }
    }
}

type Shared = [TrafficClassShared; TRAFFIC_CLASS_MAX];

/// Scheduler state, everything behind the port lock.
pub(crate) struct PortQos {
    /// Free-running schedule time, nanoseconds.
    tnow: u32,
    /// Free-running tick count, the port shaper time base.
    interval_n: u32,
    shaper: Shaper,
    /// Admission limit, bits per second.
    max_rate: u32,
    /// Total reserved bandwidth, bits per second.
    used_rate: u32,
    streams: u32,
    tx: u32,
    tx_full: u32,
    transmit_event: bool,
    tclass: [TrafficClass; TRAFFIC_CLASS_MAX],
    sr: [SrClassState; SR_CLASS_MAX],
    pair: SrClassPair,
    grid: PtpGrid,
    jitter: JitterStats,
}

fn sr_tclass(pcp: Pcp) -> usize {
    PCP_TO_TRAFFIC_CLASS[usize::from(pcp)] as usize
}

impl PortQos {
    fn new() -> Self {
        let pair = SrClassPair::DEFAULT;
        let high_tc = sr_tclass(Pcp::SR_HIGH);
        let low_tc = sr_tclass(Pcp::SR_LOW);

        let mut tclass: [TrafficClass; TRAFFIC_CLASS_MAX] =
            core::array::from_fn(|i| TrafficClass::new(if i == high_tc || i == low_tc { 1 } else { 0 }));
        tclass[high_tc].sr_class = Some(0);
        tclass[low_tc].sr_class = Some(1);

        Self {
            tnow: 0,
            interval_n: 0,
            shaper: Shaper::new(0),
            max_rate: 0,
            used_rate: 0,
            streams: 0,
            tx: 0,
            tx_full: 0,
            transmit_event: false,
            tclass,
            sr: [
                SrClassState::new(pair.high(), true, high_tc as u8, 0),
                SrClassState::new(pair.low(), false, low_tc as u8, 0),
            ],
            pair,
            grid: PtpGrid::new(),
            jitter: JitterStats::new(),
        }
    }

    fn sr_slot(&self, class: SrClass) -> Result<usize, QosError> {
        self.sr
            .iter()
            .position(|c| c.class == class)
            .ok_or(QosError::ClassNotEnabled)
    }

    // -- credit accounting ---------------------------------------------------

    /// The port shaper only recovers towards zero: the port may not save up
    /// idle bandwidth.
    fn port_incr_credit(&mut self, tnow: u32) {
        if self.shaper.credit < 0 {
            self.shaper.incr(tnow);
            self.shaper.cap_credit();
        } else {
            self.shaper.tlast = tnow;
        }
    }

    fn port_dec_credit(&mut self, len: u32) {
        let len = len.max(MIN_FRAME_LEN);
        self.shaper.dec((len + PORT_OVERHEAD) * 8);
        self.tx += 1;
    }

    fn queue_tx_ready(&self, shared: &Shared, ci: usize, tci: usize, qi: u8) -> bool {
        let Some(desc) = shared[tci].queues[qi as usize].ring.front() else {
            return false;
        };

        // Frames with a launch time only become ready once the time falls
        // within the next subinterval.
        if desc.flags.contains(TxFlags::TS) {
            ptp::before(desc.ts, self.sr[ci].tnext_gptp)
        } else {
            true
        }
    }

    /// Spends credit for one transmitted SR frame and refreshes the queue
    /// state. The shared pending bit is cleared first and re-checked, so a
    /// concurrent enqueue can never leave the bit clear with frames queued.
    fn sr_class_dec_credit(&mut self, shared: &Shared, tci: usize, qi: u8, len: u32) {
        let (Some(ci), Some(si)) = (
            self.tclass[tci].sr_class,
            self.tclass[tci].queues[qi as usize].stream,
        ) else {
            return;
        };
        let (ci, si) = (ci as usize, si as usize);

        let len = len.max(MIN_FRAME_LEN);
        let bits = (len + PORT_OVERHEAD) * self.sr[ci].scale * 8;

        self.sr[ci].stream[si].shaper.dec(bits);
        self.sr[ci].shaper.dec(bits);

        self.tclass[tci].queues[qi as usize].tx += 1;
        self.tclass[tci].tx += 1;

        let bit = QueueSet::new_eq(qi).into_bits();
        shared[tci].pending.fetch_and(!bit, Ordering::AcqRel);

        if self.queue_tx_ready(shared, ci, tci, qi) {
            shared[tci].pending.fetch_or(bit, Ordering::Release);

            if !self.sr[ci].stream[si].shaper.ready() {
                self.tclass[tci].scheduled.remove(qi);
            }
        } else {
            if !shared[tci].queues[qi as usize].ring.is_empty() {
                shared[tci].pending.fetch_or(bit, Ordering::Release);
            }

            self.sr[ci].pending.remove(qi);
            self.tclass[tci].scheduled.remove(qi);
        }
    }

    /// Brings stream and class credits up to date at the start of a class
    /// subinterval.
    ///
    /// Credit only accrues while a queue is pending, and an idle class (or
    /// stream) may not enter its interval with positive credit, so the
    /// idle-to-pending edges have to be caught here.
    fn sr_class_update(&mut self, shared: &Shared, tci: usize, ci: usize, tn: u32) {
        let was_idle = self.tclass[tci].scheduled.is_empty();
        let shared_pending = QueueSet::from_bits(shared[tci].pending.load(Ordering::Acquire));

        // Queues that became pending since the last subinterval.
        for qi in shared_pending & !self.sr[ci].pending {
            let Some(si) = self.tclass[tci].queues[qi as usize].stream else {
                continue;
            };

            if self.queue_tx_ready(shared, ci, tci, qi) {
                self.sr[ci].pending.insert(qi);

                let stream = &mut self.sr[ci].stream[si as usize];
                stream.shaper.incr(tn);
                stream.shaper.cap_credit();

                if stream.shaper.ready() {
                    self.tclass[tci].scheduled.insert(qi);
                }
            }
        }

        // Queues pending but still short on credit.
        for qi in self.sr[ci].pending & !self.tclass[tci].scheduled {
            let Some(si) = self.tclass[tci].queues[qi as usize].stream else {
                continue;
            };

            let stream = &mut self.sr[ci].stream[si as usize];
            stream.shaper.incr(tn);

            if stream.shaper.ready() {
                self.tclass[tci].scheduled.insert(qi);
            }
        }

        if !was_idle {
            self.sr[ci].shaper.incr(tn);
        } else if !self.tclass[tci].scheduled.is_empty() {
            // The class just left idle, it gets no stored credit.
            self.sr[ci].shaper.incr(tn);
            self.sr[ci].shaper.cap_credit();
        }
    }

    // -- schedulers ----------------------------------------------------------

    fn wake_producer(&mut self, shared: &Shared, tci: usize, qi: u8) {
        let queue = &shared[tci].queues[qi as usize];

        if queue.waiting.load(Ordering::Acquire) && queue.ring.free() >= QUEUE_RING_SIZE / 4 {
            queue.waiting.store(false, Ordering::Release);
            queue.waker.wake();
            self.transmit_event = true;
        }
    }

    fn sr_class_tx(
        &mut self,
        shared: &Shared,
        sink: &mut impl TxSink,
        tci: usize,
        qi: u8,
    ) -> Result<(), TxError> {
        let Some(desc) = shared[tci].queues[qi as usize].ring.front() else {
            // Spurious scheduled bit, drop it.
            self.tclass[tci].scheduled.remove(qi);
            return Ok(());
        };

        if sink.push(self.tclass[tci].hw_queue, &desc).is_err() {
            // Hardware ring full: leave the frame queued, stop serving the
            // class for this tick.
            self.tx_full += 1;
            return Err(TxError::Full);
        }

        shared[tci].queues[qi as usize].ring.pop();
        self.port_dec_credit(desc.len as u32);
        self.sr_class_dec_credit(shared, tci, qi, desc.len as u32);

        self.wake_producer(shared, tci, qi);

        Ok(())
    }

    fn sr_class_scheduler(&mut self, shared: &Shared, sink: &mut impl TxSink, tci: usize) {
        let Some(ci) = self.tclass[tci].sr_class else {
            return;
        };
        let ci = ci as usize;

        if !self.sr[ci].tnext.elapsed(self.tnow) {
            return;
        }

        self.sr[ci].sched_offset = self.tnow.wrapping_sub(self.sr[ci].tnext.i);
        self.sr[ci].tnext_gptp = self
            .grid
            .now
            .wrapping_sub(self.sr[ci].sched_offset)
            .wrapping_add(self.sr[ci].interval_ratio.int_mul(self.grid.period));

        // Credits are only incremented once per subinterval.
        let tn = self.sr[ci].interval_n;
        self.sr_class_update(shared, tci, ci, tn);

        while self.shaper.ready()
            && self.sr[ci].shaper.ready()
            && !self.tclass[tci].scheduled.is_empty()
        {
            let Some(qi) = self.tclass[tci].scheduled.next_after(self.tclass[tci].slast) else {
                break;
            };
            self.tclass[tci].slast = qi;

            // The stream credit was left stale when the queue entered the
            // scheduled mask, catch it up before spending.
            if let Some(si) = self.tclass[tci].queues[qi as usize].stream {
                self.sr[ci].stream[si as usize].shaper.incr(tn);
            }

            if self.sr_class_tx(shared, sink, tci, qi).is_err() {
                break;
            }
        }

        let interval = self.sr[ci].interval;
        self.sr[ci].tnext.add(&interval);
        self.sr[ci].interval_n += 1;
    }

    fn traffic_class_scheduler(&mut self, shared: &Shared, sink: &mut impl TxSink, tci: usize) {
        // Promote queues that became pending since the last tick.
        let shared_pending = QueueSet::from_bits(shared[tci].pending.load(Ordering::Acquire));
        for qi in shared_pending & !self.tclass[tci].scheduled {
            if !shared[tci].queues[qi as usize].ring.is_empty() {
                self.tclass[tci].scheduled.insert(qi);
            }
        }

        while self.shaper.ready() && !self.tclass[tci].scheduled.is_empty() {
            let Some(qi) = self.tclass[tci].scheduled.next_after(self.tclass[tci].slast) else {
                break;
            };
            self.tclass[tci].slast = qi;

            let Some(desc) = shared[tci].queues[qi as usize].ring.front() else {
                self.tclass[tci].scheduled.remove(qi);
                continue;
            };

            if sink.push(self.tclass[tci].hw_queue, &desc).is_err() {
                self.tx_full += 1;
                break;
            }

            shared[tci].queues[qi as usize].ring.pop();
            self.port_dec_credit(desc.len as u32);

            self.tclass[tci].queues[qi as usize].tx += 1;
            self.tclass[tci].tx += 1;

            // Same clear-then-recheck dance as the SR path.
            let bit = QueueSet::new_eq(qi).into_bits();
            shared[tci].pending.fetch_and(!bit, Ordering::AcqRel);
            if !shared[tci].queues[qi as usize].ring.is_empty() {
                shared[tci].pending.fetch_or(bit, Ordering::Release);
            } else {
                self.tclass[tci].scheduled.remove(qi);
            }

            self.wake_producer(shared, tci, qi);
        }
    }

    /// One scheduling tick. Returns true when a blocked producer was woken.
    fn tick(&mut self, shared: &Shared, sink: &mut impl TxSink, ptp_now: u32) -> bool {
        self.grid.update(ptp_now);
        self.jitter.update(ptp_now);

        self.port_incr_credit(self.interval_n);
        self.transmit_event = false;

        // Strict priority, highest class first.
        for tci in (0..TRAFFIC_CLASS_MAX).rev() {
            if self.tclass[tci].sr_class.is_some() {
                self.sr_class_scheduler(shared, sink, tci);
            } else {
                self.traffic_class_scheduler(shared, sink, tci);
            }
        }

        sink.flush();

        self.tnow = self.tnow.wrapping_add(SCHED_PERIOD_NS);
        self.interval_n = self.interval_n.wrapping_add(1);

        self.transmit_event
    }

    // -- configuration -------------------------------------------------------

    fn link_reset(&mut self, shared: &Shared, rate_bps: u32) {
        // Allow for a 200ppm drift between the scheduling timer and the
        // transmit clock.
        let rate = (rate_bps / 1_000_000) * SCHED_PERIOD_NS / 1000;
        self.shaper = Shaper::new(rate - (rate + 4999) / 5000);
        self.max_rate = (rate_bps / 100) * 75;
        self.streams = 0;
        self.used_rate = 0;
        self.interval_n = 0;

        for ci in 0..SR_CLASS_MAX {
            self.sr[ci].shaper = Shaper::new(0);
            self.sr[ci].interval_n = 0;
            self.sr[ci].streams = 0;
            self.sr[ci].idle_slope = 0;

            // Re-admit previously configured streams at the new link rate.
            for si in 0..self.sr[ci].stream_max {
                if !self.sr[ci].stream[si].configured {
                    continue;
                }

                let idle_slope = self.sr[ci].stream[si].idle_slope;
                self.sr[ci].stream[si].configured = false;
                self.sr[ci].stream[si].idle_slope = 0;

                if self.configure_stream_slot(shared, ci, si, idle_slope).is_err() {
                    warn!(
                        "stream dropped on link reset, idle slope {} over budget",
                        idle_slope
                    );
                }
            }
        }
    }

    /// Drops everything queued and resets all shaper credit. Streams stay
    /// configured and connected so a later link reset can resume them.
    fn link_down(&mut self, shared: &Shared) {
        for tci in 0..TRAFFIC_CLASS_MAX {
            for qi in 0..TRAFFIC_CLASS_QUEUE_MAX as u8 {
                self.queue_flush(shared, tci, qi);
            }
            self.tclass[tci].scheduled = QueueSet::NONE;
            self.tclass[tci].slast = 0;
        }

        for ci in 0..SR_CLASS_MAX {
            self.sr[ci].pending = QueueSet::NONE;
            self.sr[ci].shaper = Shaper::new(self.sr[ci].shaper.rate);
            for si in 0..self.sr[ci].stream_max {
                let rate = self.sr[ci].stream[si].shaper.rate;
                self.sr[ci].stream[si].shaper = Shaper::new(rate);
            }
        }

        self.shaper = Shaper::new(self.shaper.rate);
    }

    fn configure_sr_classes(&mut self, pair: SrClassPair) -> Result<(), QosError> {
        if self.streams != 0 {
            return Err(QosError::Busy);
        }

        let high_tc = sr_tclass(Pcp::SR_HIGH) as u8;
        let low_tc = sr_tclass(Pcp::SR_LOW) as u8;
        self.sr[0] = SrClassState::new(pair.high(), true, high_tc, self.tnow);
        self.sr[1] = SrClassState::new(pair.low(), false, low_tc, self.tnow);
        self.pair = pair;

        info!(
            "sr classes reconfigured, high {}, low {}",
            pair.high() as u8,
            pair.low() as u8
        );

        Ok(())
    }

    /// Removes any previous reservation for the stream slot and, for a non
    /// zero `idle_slope`, installs the new one.
    fn configure_stream_slot(
        &mut self,
        shared: &Shared,
        ci: usize,
        si: usize,
        idle_slope: u32,
    ) -> Result<(), QosError> {
        let tci = self.sr[ci].tc as usize;
        let old = self.sr[ci].stream[si].idle_slope;

        if (self.used_rate as u64 + idle_slope as u64).saturating_sub(old as u64)
            > self.max_rate as u64
        {
            return Err(QosError::RateExceeded);
        }

        if self.sr[ci].stream[si].configured {
            let rate = self.sr[ci].stream[si].shaper.rate;
            self.sr[ci].shaper.add_rate(-(rate as i32));
            self.sr[ci].idle_slope -= old;
            self.used_rate -= old;
            self.sr[ci].streams -= 1;
            self.streams -= 1;
        }

        if idle_slope != 0 {
            let rate = self.sr[ci].scale_idle_slope(idle_slope);

            self.sr[ci].stream[si].configured = true;
            self.sr[ci].stream[si].shaper.set_rate(rate);
            self.sr[ci].stream[si].idle_slope = idle_slope;
            self.sr[ci].shaper.add_rate(rate as i32);
            self.sr[ci].idle_slope += idle_slope;
            self.used_rate += idle_slope;
            self.sr[ci].streams += 1;
            self.streams += 1;

            if let Some(qi) = self.sr[ci].stream[si].queue {
                shared[tci].queues[qi as usize].enabled.store(true, Ordering::Release);
            }
        } else {
            self.stream_flush(shared, ci, si);

            self.sr[ci].stream[si].configured = false;
            self.sr[ci].stream[si].idle_slope = 0;
            self.sr[ci].stream[si].shaper.set_rate(0);

            if let Some(qi) = self.sr[ci].stream[si].queue {
                shared[tci].queues[qi as usize].enabled.store(false, Ordering::Release);
            }
        }

        Ok(())
    }

    fn queue_flush(&mut self, shared: &Shared, tci: usize, qi: u8) {
        if !self.tclass[tci].queues[qi as usize].connected {
            return;
        }

        let bit = QueueSet::new_eq(qi).into_bits();
        shared[tci].pending.fetch_and(!bit, Ordering::AcqRel);
        self.tclass[tci].scheduled.remove(qi);

        shared[tci].queues[qi as usize].flush();
    }

    fn stream_flush(&mut self, shared: &Shared, ci: usize, si: usize) {
        if !self.sr[ci].stream[si].connected {
            return;
        }

        if let Some(qi) = self.sr[ci].stream[si].queue {
            self.sr[ci].pending.remove(qi);
            let tci = self.sr[ci].tc as usize;
            self.queue_flush(shared, tci, qi);
        }
    }

    fn connect_queue(&mut self, shared: &Shared, pcp: Pcp) -> Result<(usize, u8), QosError> {
        let tci = sr_tclass(pcp);

        if self.tclass[tci].sr_class.is_some() {
            // Reserved traffic may only attach through a stream.
            return Err(QosError::ClassReserved);
        }

        let qi = self.tclass[tci].connect_queue().ok_or(QosError::NoFreeSlot)?;
        let queue = &shared[tci].queues[qi as usize];
        queue.dropped.store(0, Ordering::Relaxed);
        queue.full.store(0, Ordering::Relaxed);
        queue.enabled.store(true, Ordering::Release);

        Ok((tci, qi))
    }

    fn connect_stream(
        &mut self,
        shared: &Shared,
        class: SrClass,
        id: StreamId,
    ) -> Result<(usize, u8), QosError> {
        let ci = self.sr_slot(class)?;
        let tci = self.sr[ci].tc as usize;
        let si = self.sr[ci].stream_get(id).ok_or(QosError::NoFreeSlot)?;

        if self.sr[ci].stream[si as usize].connected {
            return Err(QosError::AlreadyConnected);
        }

        let qi = self.tclass[tci].connect_queue().ok_or(QosError::NoFreeSlot)?;
        self.tclass[tci].queues[qi as usize].stream = Some(si);

        let stream = &mut self.sr[ci].stream[si as usize];
        stream.connected = true;
        stream.queue = Some(qi);

        let configured = stream.configured;
        let queue = &shared[tci].queues[qi as usize];
        queue.dropped.store(0, Ordering::Relaxed);
        queue.full.store(0, Ordering::Relaxed);
        // An unconfigured stream drops its frames until a reservation is in
        // place.
        queue.enabled.store(configured, Ordering::Release);

        Ok((tci, qi))
    }

    fn disconnect_queue(&mut self, shared: &Shared, tci: usize, qi: u8) {
        if let Some(si) = self.tclass[tci].queues[qi as usize].stream {
            if let Some(ci) = self.tclass[tci].sr_class {
                let ci = ci as usize;
                self.sr[ci].pending.remove(qi);
                self.sr[ci].stream[si as usize].connected = false;
                self.sr[ci].stream[si as usize].queue = None;
            }
        }

        self.queue_flush(shared, tci, qi);

        shared[tci].queues[qi as usize].enabled.store(false, Ordering::Release);
        self.tclass[tci].queues[qi as usize].stream = None;
        self.tclass[tci].queues[qi as usize].connected = false;
    }
}

/// Port level counters, sampled by [`Port::stats`].
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortStats {
    /// Frames handed to the hardware.
    pub tx: u32,
    /// Frames deferred because the hardware ring was full.
    pub tx_full: u32,
    /// Configured streams across both SR classes.
    pub streams: u32,
    /// Reserved bandwidth, bits per second.
    pub used_rate: u32,
    /// gPTP grid resynchronizations.
    pub grid_reset: u32,
    /// Tick jitter over the last window, mean in nanoseconds.
    pub dt_mean: u32,
    pub dt_min: u32,
    pub dt_max: u32,
    /// Frames transmitted per traffic class.
    pub class_tx: [u32; TRAFFIC_CLASS_MAX],
}

/// Per-queue counters, sampled by [`TxQueue::stats`].
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueStats {
    /// Frames handed to the hardware.
    pub tx: u32,
    /// Frames dropped on a disabled queue.
    pub dropped: u32,
    /// Failed enqueues on a full ring.
    pub full: u32,
    /// Descriptors currently queued.
    pub queued: usize,
}

/// Transmit side of one Ethernet port.
pub struct Port<M: RawMutex> {
    inner: Mutex<M, RefCell<PortQos>>,
    shared: Shared,
}

impl<M: RawMutex> Port<M> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(PortQos::new())),
            shared: [const { TrafficClassShared::new() }; TRAFFIC_CLASS_MAX],
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut PortQos) -> R) -> R {
        self.inner.lock(|q| f(&mut q.borrow_mut()))
    }

    /// Resets the port shaper and admission budget for a new link rate and
    /// re-admits configured streams. Call on link up and on speed changes.
    pub fn set_link_rate(&self, rate_bps: u32) {
        info!("link rate {} bps", rate_bps);
        self.with(|q| q.link_reset(&self.shared, rate_bps));
    }

    /// Stops transmission on link loss: queued frames are dropped, blocked
    /// producers are woken and all shaper credit is reset. Serialized
    /// against a concurrent tick by the port lock.
    pub fn link_down(&self) {
        info!("link down");
        self.with(|q| q.link_down(&self.shared));
    }

    /// Selects the pair of SR classes served by this port.
    ///
    /// Fails with [`QosError::Busy`] while any stream is configured.
    pub fn configure_sr_classes(&self, pair: SrClassPair) -> Result<(), QosError> {
        self.with(|q| q.configure_sr_classes(pair))
    }

    /// Installs (non zero `idle_slope`) or removes (zero) the bandwidth
    /// reservation for a stream.
    ///
    /// The reservation is admission checked against 75% of the link rate.
    /// Removing the reservation flushes and disables an attached queue.
    pub fn configure_stream(
        &self,
        class: SrClass,
        id: StreamId,
        vlan_id: u16,
        idle_slope: u32,
    ) -> Result<(), QosError> {
        self.with(|q| {
            let ci = q.sr_slot(class)?;
            let si = q.sr[ci].stream_get(id).ok_or(QosError::NoFreeSlot)? as usize;

            if idle_slope != 0 {
                q.sr[ci].stream[si].vlan_id = vlan_id;
            }

            q.configure_stream_slot(&self.shared, ci, si, idle_slope)
        })
    }

    /// Attaches a transmit queue to a reserved stream. The queue stays
    /// disabled until the stream is configured.
    pub fn connect_stream(
        &self,
        class: SrClass,
        id: StreamId,
    ) -> Result<TxQueue<'_, M>, QosError> {
        let (tci, qi) = self.with(|q| q.connect_stream(&self.shared, class, id))?;
        Ok(TxQueue { port: self, tci: tci as u8, qi })
    }

    /// Attaches a transmit queue to an unshaped traffic class.
    pub fn connect(&self, pcp: Pcp) -> Result<TxQueue<'_, M>, QosError> {
        let (tci, qi) = self.with(|q| q.connect_queue(&self.shared, pcp))?;
        Ok(TxQueue { port: self, tci: tci as u8, qi })
    }

    /// Runs one scheduling tick, pushing this tick's frames into `sink`.
    ///
    /// `ptp_now` is the low 32 bits of gPTP time sampled at the tick.
    /// Returns true when a producer blocked on a full ring was woken.
    pub fn tick(&self, sink: &mut impl TxSink, ptp_now: u32) -> bool {
        self.with(|q| q.tick(&self.shared, sink, ptp_now))
    }

    pub fn stats(&self) -> PortStats {
        self.with(|q| PortStats {
            tx: q.tx,
            tx_full: q.tx_full,
            streams: q.streams,
            used_rate: q.used_rate,
            grid_reset: q.grid.reset,
            dt_mean: q.jitter.dt_mean,
            dt_min: q.jitter.dt_min,
            dt_max: q.jitter.dt_max,
            class_tx: core::array::from_fn(|i| q.tclass[i].tx),
        })
    }
}

impl<M: RawMutex> Default for Port<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer handle for one queue slot.
///
/// The handle is the single producer of its descriptor ring. Dropping it
/// disconnects the queue and discards anything still queued.
pub struct TxQueue<'a, M: RawMutex> {
    port: &'a Port<M>,
    tci: u8,
    qi: u8,
}

impl<M: RawMutex> TxQueue<'_, M> {
    fn shared(&self) -> &QueueShared {
        &self.port.shared[self.tci as usize].queues[self.qi as usize]
    }

    /// Enqueues a descriptor without blocking.
    ///
    /// Takes `&mut self` to keep the handle the single producer of its ring.
    pub fn try_push(&mut self, desc: TxDesc) -> Result<(), TxError> {
        let queue = self.shared();

        if !queue.enabled.load(Ordering::Acquire) {
            queue.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(TxError::Disabled);
        }

        if queue.ring.push(desc).is_err() {
            queue.full.fetch_add(1, Ordering::Relaxed);
            return Err(TxError::Full);
        }

        // Publish after the descriptor is visible in the ring.
        let bit = QueueSet::new_eq(self.qi).into_bits();
        self.port.shared[self.tci as usize]
            .pending
            .fetch_or(bit, Ordering::Release);

        Ok(())
    }

    /// Enqueues a descriptor, waiting for ring space if needed.
    ///
    /// Wakes once the scheduler has drained the ring to three quarters full.
    pub async fn push(&mut self, desc: TxDesc) -> Result<(), TxError> {
        poll_fn(|cx| {
            match self.try_push(desc) {
                Ok(()) => return Poll::Ready(Ok(())),
                Err(TxError::Disabled) => return Poll::Ready(Err(TxError::Disabled)),
                Err(TxError::Full) => {}
            }

            let queue = self.shared();
            queue.waker.register(cx.waker());
            queue.waiting.store(true, Ordering::Release);

            // Re-check, the scheduler may have drained the ring between the
            // failed push and the waker registration.
            match self.try_push(desc) {
                Ok(()) => Poll::Ready(Ok(())),
                Err(TxError::Disabled) => Poll::Ready(Err(TxError::Disabled)),
                Err(TxError::Full) => Poll::Pending,
            }
        })
        .await
    }

    /// Free descriptor slots in the ring.
    pub fn free(&self) -> usize {
        self.shared().ring.free()
    }

    pub fn stats(&self) -> QueueStats {
        let queue = self.shared();
        QueueStats {
            tx: self
                .port
                .with(|q| q.tclass[self.tci as usize].queues[self.qi as usize].tx),
            dropped: queue.dropped.load(Ordering::Relaxed),
            full: queue.full.load(Ordering::Relaxed),
            queued: queue.ring.len(),
        }
    }
}

impl<M: RawMutex> Drop for TxQueue<'_, M> {
    fn drop(&mut self) {
        let tci = self.tci as usize;
        let qi = self.qi;
        self.port.with(|q| q.disconnect_queue(&self.port.shared, tci, qi));
    }
}
