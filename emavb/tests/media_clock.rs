use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use emavb::mclock::{
    ClockStatus, MediaClockRecovery, PllHandle, PllWorker, PtpGenerator, RecoveryConfig, TsRing,
};
use emavb::sink::{PllControl, PllError};
use futures_executor::LocalPool;
use futures_task::LocalSpawn;
use std::boxed::Box;

const PLL_FREQ: u32 = 24_576_000;
const TICK_NS: u32 = 125_000;
const SAMPLING_NS: u32 = 10_000_000;

struct TestPll;

impl PllControl for TestPll {
    fn rate(&self) -> u32 {
        PLL_FREQ
    }

    fn adjust(&mut self, ppb: i32) -> Result<i32, PllError> {
        Ok(ppb)
    }
}

/// Closes the loop: the recovery posts adjustments, the worker applies them
/// to the PLL, and the simulated PLL counter follows the applied offset on
/// top of its inherent 50 ppm error.
#[test]
fn test_recovery_locks_through_worker() {
    let mut executor = LocalPool::new();
    let spawner = executor.spawner();

    let handle = Box::leak(Box::new(PllHandle::<CriticalSectionRawMutex>::new(PLL_FREQ)));
    let ts = Box::leak(Box::new(TsRing::new()));

    let mut worker = PllWorker::new(handle, TestPll);
    spawner
        .spawn_local_obj(Box::new(async move { worker.run().await }).into())
        .unwrap();

    let config = RecoveryConfig {
        pll_ref_freq: PLL_FREQ,
        ts_freq_p: 100,
        ts_freq_q: 1,
        max_adjust_ppb: 100_000,
    };
    let mut rec = MediaClockRecovery::new(config, ts, handle).unwrap();
    rec.start(Some(0)).unwrap();

    // Cycle count scaled by 1e9 so ppb offsets accumulate exactly.
    let cycles_per_tick = (PLL_FREQ / 8000) as u64;
    let mut acc: u64 = 0;
    let mut fed = 0u32;

    for n in 0..24_000u32 {
        let ptp_now = n * TICK_NS;
        while fed * SAMPLING_NS < ptp_now + 2 * SAMPLING_NS {
            fed += 1;
            ts.push(fed * SAMPLING_NS);
        }

        acc += cycles_per_tick * (1_000_000_000 + 50_000 + handle.applied_ppb() as i64) as u64;
        rec.tick((acc / 1_000_000_000) as u32, ptp_now, 1);

        // Let the worker apply any posted adjustment.
        executor.run_until_stalled();
    }

    assert_eq!(rec.status(), ClockStatus::RunningLocked);
    let applied = handle.applied_ppb();
    assert!(
        (applied + 50_000).abs() <= 2_000,
        "applied {} ppb",
        applied
    );

    let stats = rec.stats();
    assert_eq!(stats.reset, 0);
    assert_eq!(stats.err_wd, 0);
    assert!(stats.locked >= 1);
    assert_eq!(handle.errors(), 0);
}

/// Generated timestamps can drive a second domain's recovery: the generator
/// grid is regular enough for the recovery to lock on it.
#[test]
fn test_generator_feeds_recovery() {
    let handle = Box::leak(Box::new(PllHandle::<CriticalSectionRawMutex>::new(PLL_FREQ)));
    let ts = Box::leak(Box::new(TsRing::new()));

    // 100 Hz generated media clock.
    let mut gen = PtpGenerator::new(100).unwrap();

    let config = RecoveryConfig {
        pll_ref_freq: PLL_FREQ,
        ts_freq_p: 100,
        ts_freq_q: 1,
        max_adjust_ppb: 100_000,
    };
    let mut rec = MediaClockRecovery::new(config, ts, handle).unwrap();

    let cycles_per_tick = (PLL_FREQ / 8000) as u32;
    let mut started = false;

    for n in 0..24_000u32 {
        let ptp_now = n * TICK_NS;
        if let Some(t) = gen.tick(ptp_now, 1) {
            ts.push(t);
            if !started {
                started = true;
                rec.start(None).unwrap();
            }
        }
        rec.tick(n * cycles_per_tick, ptp_now, 1);
    }

    assert_eq!(rec.status(), ClockStatus::RunningLocked);
    assert_eq!(rec.stats().err_meas, 0);
    assert_eq!(gen.stats().err_jump, 0);
}
