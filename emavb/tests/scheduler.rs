use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use emavb::config::QUEUE_RING_SIZE;
use emavb::core::{Pcp, SrClass, SrClassPair, StreamId};
use emavb::desc::{TxDesc, TxFlags};
use emavb::sink::{TxFull, TxSink};
use emavb::{Port, QosError, TxError, TxQueue};
use futures_executor::LocalPool;
use futures_task::LocalSpawn;
use std::boxed::Box;
use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};

const LINK_RATE: u32 = 100_000_000;
const TICK_NS: u32 = 125_000;

/// Records pushed descriptors, optionally limited to a number of pushes per
/// flush batch to emulate a small hardware ring.
struct RecordingSink {
    frames: Vec<(u8, u32, u16)>,
    batch_limit: usize,
    pushed: usize,
    flushes: u32,
}

impl RecordingSink {
    fn new() -> Self {
        Self::with_batch_limit(usize::MAX)
    }

    fn with_batch_limit(batch_limit: usize) -> Self {
        Self {
            frames: Vec::new(),
            batch_limit,
            pushed: 0,
            flushes: 0,
        }
    }

    fn wire_bits(&self) -> u64 {
        self.frames
            .iter()
            .map(|&(_, _, len)| (len as u64 + 24) * 8)
            .sum()
    }
}

impl TxSink for RecordingSink {
    fn push(&mut self, queue: u8, desc: &TxDesc) -> Result<(), TxFull> {
        if self.pushed >= self.batch_limit {
            return Err(TxFull);
        }
        self.pushed += 1;
        self.frames.push((queue, desc.buf, desc.len));
        Ok(())
    }

    fn flush(&mut self) {
        self.pushed = 0;
        self.flushes += 1;
    }
}

#[test]
fn test_stream_paced_to_idle_slope() {
    let port = Port::<CriticalSectionRawMutex>::new();
    port.set_link_rate(LINK_RATE);

    let id = StreamId::from(0x91e0f000fe001u64);
    port.configure_stream(SrClass::A, id, 2, 10_000_000).unwrap();
    let mut queue = port.connect_stream(SrClass::A, id).unwrap();

    // One second of 1500 byte frames queued continuously.
    let mut sink = RecordingSink::new();
    let ticks = 8000u32;
    for n in 0..ticks {
        while queue.try_push(TxDesc::new(0, 1500)).is_ok() {}
        port.tick(&mut sink, n * TICK_NS);
    }

    // 10 Mbit/s reserved means 10 Mbit on the wire, give or take a couple of
    // frames of shaper deficit.
    let budget = 10_000_000u64;
    let bits = sink.wire_bits();
    let frame_bits = (1500 + 24) * 8;
    assert!(bits <= budget + 2 * frame_bits, "sent {} of {}", bits, budget);
    assert!(bits >= budget - 2 * frame_bits, "sent {} of {}", bits, budget);

    let stats = port.stats();
    assert_eq!(stats.tx as usize, sink.frames.len());
    assert_eq!(stats.tx_full, 0);
    // Class A rides the high SR traffic class.
    assert_eq!(stats.class_tx[4] as usize, sink.frames.len());
}

#[test]
fn test_admission_control() {
    let port = Port::<CriticalSectionRawMutex>::new();
    port.set_link_rate(LINK_RATE);

    let first = StreamId::from(1u64);
    let second = StreamId::from(2u64);

    port.configure_stream(SrClass::A, first, 2, 50_000_000).unwrap();
    // 50 + 30 Mbit/s exceeds the 75% admission budget.
    assert!(port
        .configure_stream(SrClass::A, second, 2, 30_000_000)
        .is_err());

    port.configure_stream(SrClass::A, first, 2, 0).unwrap();
    port.configure_stream(SrClass::A, second, 2, 30_000_000).unwrap();

    assert_eq!(port.stats().used_rate, 30_000_000);
    assert_eq!(port.stats().streams, 1);
}

#[test]
fn test_strict_priority() {
    let port = Port::<CriticalSectionRawMutex>::new();
    // 10 Mbit/s: roughly 1.7 minimum size frames per tick, so the backlog
    // drains over many ticks.
    port.set_link_rate(10_000_000);

    let mut hi = port.connect(Pcp::NetworkControl).unwrap();
    let mut lo = port.connect(Pcp::BestEffort).unwrap();

    for _ in 0..20 {
        hi.try_push(TxDesc::new(0, 64)).unwrap();
        lo.try_push(TxDesc::new(0, 100)).unwrap();
    }

    let mut sink = RecordingSink::new();
    let mut n = 0u32;
    while sink.frames.len() < 40 {
        port.tick(&mut sink, n * TICK_NS);
        n += 1;
        assert!(n < 1000, "backlog never drained");
    }

    // Every network control frame goes out before the first best effort one.
    let lens: Vec<u16> = sink.frames.iter().map(|&(_, _, len)| len).collect();
    assert!(lens[..20].iter().all(|&len| len == 64));
    assert!(lens[20..].iter().all(|&len| len == 100));
}

#[test]
fn test_round_robin_between_streams() {
    let port = Port::<CriticalSectionRawMutex>::new();
    port.set_link_rate(LINK_RATE);

    let first = StreamId::from(1u64);
    let second = StreamId::from(2u64);
    port.configure_stream(SrClass::A, first, 2, 8_000_000).unwrap();
    port.configure_stream(SrClass::A, second, 2, 8_000_000).unwrap();

    let mut a = port.connect_stream(SrClass::A, first).unwrap();
    let mut b = port.connect_stream(SrClass::A, second).unwrap();

    let mut sink = RecordingSink::new();
    for n in 0..1000 {
        while a.try_push(TxDesc::new(1, 64)).is_ok() {}
        while b.try_push(TxDesc::new(2, 64)).is_ok() {}
        port.tick(&mut sink, n * TICK_NS);
    }

    let first_count = sink.frames.iter().filter(|&&(_, buf, _)| buf == 1).count();
    let second_count = sink.frames.iter().filter(|&&(_, buf, _)| buf == 2).count();
    assert!(
        first_count.abs_diff(second_count) <= 2,
        "{} vs {}",
        first_count,
        second_count
    );
}

#[test]
fn test_launch_time_gates_transmission() {
    let port = Port::<CriticalSectionRawMutex>::new();
    port.set_link_rate(LINK_RATE);

    let id = StreamId::from(9u64);
    port.configure_stream(SrClass::A, id, 2, 10_000_000).unwrap();
    let mut queue = port.connect_stream(SrClass::A, id).unwrap();

    let mut desc = TxDesc::new(0, 64);
    desc.flags = TxFlags::TS;
    desc.ts = 10 * TICK_NS;
    queue.try_push(desc).unwrap();

    // Held back until the launch time falls inside the next class
    // subinterval.
    let mut sink = RecordingSink::new();
    for n in 0..10 {
        port.tick(&mut sink, n * TICK_NS);
        assert!(sink.frames.is_empty(), "emitted at tick {}", n);
    }

    port.tick(&mut sink, 10 * TICK_NS);
    assert_eq!(sink.frames.len(), 1);
}

#[test]
fn test_sr_class_reconfiguration() {
    let port = Port::<CriticalSectionRawMutex>::new();
    port.set_link_rate(LINK_RATE);

    let id = StreamId::from(11u64);
    port.configure_stream(SrClass::A, id, 2, 5_000_000).unwrap();

    let pair = SrClassPair::new(SrClass::C, SrClass::D).unwrap();
    assert_eq!(port.configure_sr_classes(pair), Err(QosError::Busy));

    // Releasing the reservation frees the pair for reconfiguration.
    port.configure_stream(SrClass::A, id, 0, 0).unwrap();
    port.configure_sr_classes(pair).unwrap();

    assert_eq!(
        port.configure_stream(SrClass::A, id, 2, 5_000_000),
        Err(QosError::ClassNotEnabled)
    );

    port.configure_stream(SrClass::C, id, 2, 5_000_000).unwrap();
    let mut queue = port.connect_stream(SrClass::C, id).unwrap();
    queue.try_push(TxDesc::new(0, 64)).unwrap();

    let mut sink = RecordingSink::new();
    for n in 0..20 {
        port.tick(&mut sink, n * TICK_NS);
    }
    assert_eq!(sink.frames.len(), 1);
    // C has the shorter interval of the pair and rides the high traffic
    // class.
    assert_eq!(port.stats().class_tx[4], 1);
}

#[test]
fn test_queue_disabled_without_reservation() {
    let port = Port::<CriticalSectionRawMutex>::new();
    port.set_link_rate(LINK_RATE);

    let id = StreamId::from(7u64);
    let mut queue = port.connect_stream(SrClass::A, id).unwrap();

    assert_eq!(queue.try_push(TxDesc::new(0, 64)), Err(TxError::Disabled));
    assert_eq!(queue.stats().dropped, 1);

    port.configure_stream(SrClass::A, id, 2, 1_000_000).unwrap();
    assert_eq!(queue.try_push(TxDesc::new(0, 64)), Ok(()));
    assert_eq!(queue.stats().queued, 1);
}

#[test]
fn test_pending_reset_between_ticks() {
    let port = Port::<CriticalSectionRawMutex>::new();
    port.set_link_rate(LINK_RATE);

    let mut queue = port.connect(Pcp::BestEffort).unwrap();
    let mut sink = RecordingSink::new();

    // The pending bit is cleared when the ring empties and must come back
    // with the next enqueue.
    queue.try_push(TxDesc::new(0, 64)).unwrap();
    port.tick(&mut sink, 0);
    assert_eq!(sink.frames.len(), 1);

    queue.try_push(TxDesc::new(0, 64)).unwrap();
    port.tick(&mut sink, TICK_NS);
    assert_eq!(sink.frames.len(), 2);

    let stats = queue.stats();
    assert_eq!(stats.tx, 2);
    assert_eq!(stats.queued, 0);
}

#[test]
fn test_hardware_ring_full_keeps_frames() {
    let port = Port::<CriticalSectionRawMutex>::new();
    port.set_link_rate(LINK_RATE);

    let id = StreamId::from(3u64);
    port.configure_stream(SrClass::A, id, 2, 8_000_000).unwrap();
    let mut queue = port.connect_stream(SrClass::A, id).unwrap();

    for _ in 0..3 {
        queue.try_push(TxDesc::new(0, 64)).unwrap();
    }

    // One descriptor per tick fits in the hardware ring.
    let mut sink = RecordingSink::with_batch_limit(1);
    let mut n = 0u32;
    while sink.frames.len() < 3 {
        port.tick(&mut sink, n * TICK_NS);
        n += 1;
        assert!(n < 100, "backlog never drained");
    }

    assert!(port.stats().tx_full >= 1);
    assert_eq!(port.stats().tx, 3);
}

#[test]
fn test_link_down_flushes_queues() {
    let port = Port::<CriticalSectionRawMutex>::new();
    port.set_link_rate(LINK_RATE);

    let mut queue = port.connect(Pcp::NetworkControl).unwrap();
    for _ in 0..5 {
        queue.try_push(TxDesc::new(0, 64)).unwrap();
    }

    port.link_down();

    let mut sink = RecordingSink::new();
    port.tick(&mut sink, 0);
    assert!(sink.frames.is_empty());

    // The queue stays connected and resumes once the link is back.
    queue.try_push(TxDesc::new(0, 64)).unwrap();
    port.set_link_rate(LINK_RATE);
    port.tick(&mut sink, TICK_NS);
    assert_eq!(sink.frames.len(), 1);
}

#[test]
fn test_restart_reproduces_schedule() {
    fn run_trace(
        port: &Port<CriticalSectionRawMutex>,
        queue: &mut TxQueue<'_, CriticalSectionRawMutex>,
        tick_base: u32,
    ) -> Vec<(u8, u32, u16)> {
        let mut sink = RecordingSink::new();
        for n in 0..50u32 {
            if n == 0 {
                for _ in 0..10 {
                    queue.try_push(TxDesc::new(0, 200)).unwrap();
                }
            }
            if n == 7 {
                for _ in 0..5 {
                    queue.try_push(TxDesc::new(1, 64)).unwrap();
                }
            }
            port.tick(&mut sink, (tick_base + n) * TICK_NS);
        }
        sink.frames
    }

    let port = Port::<CriticalSectionRawMutex>::new();
    port.set_link_rate(LINK_RATE);
    let id = StreamId::from(5u64);
    port.configure_stream(SrClass::A, id, 2, 2_000_000).unwrap();
    let mut queue = port.connect_stream(SrClass::A, id).unwrap();

    let first = run_trace(&port, &mut queue, 0);

    // Link bounce: same configuration must reproduce the same schedule for
    // the same injected trace.
    port.link_down();
    port.set_link_rate(LINK_RATE);

    let second = run_trace(&port, &mut queue, 50);
    assert_eq!(first, second);
    assert!(!first.is_empty());
}

#[test]
fn test_full_ring_backpressure() {
    let mut executor = LocalPool::new();
    let spawner = executor.spawner();

    let port = Box::leak(Box::new(Port::<CriticalSectionRawMutex>::new()));
    port.set_link_rate(LINK_RATE);
    let queue = port.connect(Pcp::NetworkControl).unwrap();

    let complete = Box::leak(Box::new(AtomicBool::new(false)));
    let total = QUEUE_RING_SIZE + 8;

    spawner
        .spawn_local_obj(Box::new(test_backpressure_producer(queue, total, complete)).into())
        .unwrap();

    executor.run_until_stalled();
    assert!(!complete.load(Ordering::SeqCst));

    let mut sink = RecordingSink::new();
    let mut woke = false;
    let mut n = 0u32;
    while !complete.load(Ordering::SeqCst) {
        woke |= port.tick(&mut sink, n * TICK_NS);
        n += 1;
        executor.run_until_stalled();
        assert!(n < 1000, "producer never completed");
    }

    assert!(woke);

    // Drain what the producer pushed after its wake ups.
    while sink.frames.len() < total {
        port.tick(&mut sink, n * TICK_NS);
        n += 1;
        assert!(n < 1000, "backlog never drained");
    }
    assert_eq!(sink.frames.len(), total);
}

#[test]
fn test_concurrent_producers_lose_no_frames() {
    const PER_PRODUCER: usize = 4 * QUEUE_RING_SIZE;

    let port = Port::<CriticalSectionRawMutex>::new();
    port.set_link_rate(LINK_RATE);

    // Two queues in the same traffic class, racing on one pending mask.
    let queues = [
        port.connect(Pcp::BestEffort).unwrap(),
        port.connect(Pcp::Background).unwrap(),
    ];

    let mut sink = RecordingSink::new();
    std::thread::scope(|s| {
        for (tag, mut queue) in queues.into_iter().enumerate() {
            s.spawn(move || {
                for i in 0..PER_PRODUCER as u32 {
                    let buf = (tag as u32 + 1) * 1_000_000 + i;
                    while queue.try_push(TxDesc::new(buf, 64)) == Err(TxError::Full) {
                        std::thread::yield_now();
                    }
                }

                // Dropping the handle flushes the ring, wait for the
                // scheduler to drain it first.
                while queue.free() < QUEUE_RING_SIZE {
                    std::thread::yield_now();
                }
            });
        }

        let mut n = 0u32;
        while sink.frames.len() < 2 * PER_PRODUCER {
            port.tick(&mut sink, n.wrapping_mul(TICK_NS));
            n += 1;
            std::thread::yield_now();
            assert!(n < 1_000_000, "producers starved");
        }
    });

    // Every frame arrived, in order within each producer.
    for tag in 1..=2u32 {
        let bufs: Vec<u32> = sink
            .frames
            .iter()
            .map(|&(_, buf, _)| buf)
            .filter(|buf| buf / 1_000_000 == tag)
            .collect();
        assert_eq!(bufs.len(), PER_PRODUCER);
        assert!(bufs.windows(2).all(|w| w[0] < w[1]));
    }
}

async fn test_backpressure_producer(
    mut queue: TxQueue<'static, CriticalSectionRawMutex>,
    total: usize,
    complete: &'static AtomicBool,
) {
    for _ in 0..total {
        queue.push(TxDesc::new(0, 64)).await.unwrap();
    }

    complete.store(true, Ordering::SeqCst);

    // Keep the queue connected until the scheduler has drained it.
    pending().await
}
