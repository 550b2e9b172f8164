// CLASSIFICATION: COMMUNITY
// Filename: timeout_enforcement.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-16

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use cohesix_threadstate::{
    DeviceId, EntryFlags, SetupFlags, SimPlatform, ThreadStateConfig, ThreadStateDb,
    ThreadStateError, TimeoutMode, TimeoutParams,
};

const DEVICE: DeviceId = DeviceId::new(0);

fn start(flags: SetupFlags) -> ThreadStateDb<SimPlatform> {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = ThreadStateConfig::default()
        .with_setup_flags(SetupFlags::ENABLED | SetupFlags::TIMEOUT_ENABLED | flags)
        .with_tls_mirror(false);
    ThreadStateDb::start(SimPlatform::new(4), config).expect("start")
}

/// Non-compute budget of `ms` on DEVICE, measured in `mode`.
fn configure(db: &ThreadStateDb<SimPlatform>, ms: u32, mode: TimeoutMode) {
    db.platform().set_timeout_params(
        DEVICE,
        TimeoutParams {
            timeout_us: ms * 1000,
            scale: 1,
            flags: 0,
        },
    );
    db.init_timeout(DEVICE, ms * 1000, mode).expect("policy");
}

#[test]
fn deadline_mode_expires_exactly_at_the_window_edge() {
    let db = start(SetupFlags::empty());
    configure(&db, 4_000, TimeoutMode::OsTimer);
    db.platform().advance_ns(7_777);

    let isr = db.enter_isr(DEVICE);
    db.platform().advance_ns(500_000_000 - 1);
    assert_eq!(db.check_timeout(Some(DEVICE)), Ok(499_999));
    db.platform().advance_ns(1);
    assert_eq!(
        db.check_timeout(Some(DEVICE)),
        Err(ThreadStateError::Timeout { elapsed_us: 500_000 })
    );
    drop(isr);
}

#[test]
fn decrement_mode_expires_on_the_ceiling_check() {
    let db = start(SetupFlags::empty());
    configure(&db, 2, TimeoutMode::OsDelay);
    let guard = db.enter(EntryFlags::empty());
    assert_eq!(guard.node().map(|node| node.non_compute_budget()), Some(2_000));

    // 2000 us budget, 100 us per check.
    for check in 1..20 {
        assert!(db.check_timeout(None).is_ok(), "check {check} expired early");
    }
    assert!(matches!(
        db.check_timeout(None),
        Err(ThreadStateError::Timeout { .. })
    ));
    assert_eq!(db.platform().delay_calls(), 20);
}

#[test]
fn decrement_mode_rounds_a_partial_slice_up() {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = ThreadStateConfig {
        delay_slice_us: 300,
        ..ThreadStateConfig::default()
    }
    .with_setup_flags(SetupFlags::ENABLED | SetupFlags::TIMEOUT_ENABLED)
    .with_tls_mirror(false);
    let db = ThreadStateDb::start(SimPlatform::new(4), config).expect("start");
    configure(&db, 1, TimeoutMode::OsDelay);
    let guard = db.enter(EntryFlags::empty());
    let budget = || guard.node().map(|node| node.non_compute_budget());

    // 1000 us budget, 300 us per check: 700, 400, 100, then clamped to 0.
    for (check, left) in [(1, 700), (2, 400), (3, 100)] {
        assert!(db.check_timeout(None).is_ok(), "check {check} expired early");
        assert_eq!(budget(), Some(left));
    }
    assert!(matches!(
        db.check_timeout(None),
        Err(ThreadStateError::Timeout { .. })
    ));
    assert_eq!(budget(), Some(0));
    assert!(db.check_timeout(None).is_err());
    assert_eq!(budget(), Some(0));
}

#[test]
fn init_timeout_splits_compute_and_non_compute_budgets() {
    let db = start(SetupFlags::empty());
    db.platform().set_timeout_params(
        DEVICE,
        TimeoutParams {
            timeout_us: 1_500_000,
            scale: 3,
            flags: 0,
        },
    );
    db.init_timeout(DEVICE, 2_000_000, TimeoutMode::OsTimer)
        .expect("graphics");
    let policy = db.policy().snapshot();
    assert_eq!(policy.non_compute_ms, 2_000);
    assert_eq!(policy.compute_ms, 4_500);
    assert_eq!(policy.compute_mask, 0);

    db.platform().set_compute(DEVICE, true);
    db.init_timeout(DEVICE, 9_000_000, TimeoutMode::OsDelay)
        .expect("compute");
    let policy = db.policy().snapshot();
    assert_eq!(policy.non_compute_ms, 2_000);
    assert_eq!(policy.compute_mask, 1);
    assert_eq!(policy.mode, TimeoutMode::OsDelay);

    assert!(db
        .init_timeout(DeviceId::new(64), 1_000, TimeoutMode::OsTimer)
        .is_err());
}

#[test]
fn compute_mode_is_read_at_check_time() {
    let db = start(SetupFlags::empty());
    db.platform().set_timeout_params(
        DEVICE,
        TimeoutParams {
            timeout_us: 100_000,
            scale: 1,
            flags: 0,
        },
    );
    db.init_timeout(DEVICE, 10_000, TimeoutMode::OsTimer)
        .expect("policy");
    let guard = db.enter(EntryFlags::empty());
    db.platform().advance_ms(50);
    assert!(db.check_timeout(Some(DEVICE)).is_err());

    db.platform().set_compute(DEVICE, true);
    db.init_timeout(DEVICE, 10_000, TimeoutMode::OsTimer)
        .expect("switch to compute");
    assert_eq!(db.check_timeout(Some(DEVICE)), Ok(50_000));
    drop(guard);
}

#[test]
fn checks_require_enforcement_and_an_armed_window() {
    let db = start(SetupFlags::empty());
    let early = db.enter(EntryFlags::empty());
    assert_eq!(
        db.check_timeout(None),
        Err(ThreadStateError::InvalidState("timeout mode not configured"))
    );
    configure(&db, 10, TimeoutMode::OsTimer);
    assert_eq!(
        db.check_timeout(None),
        Err(ThreadStateError::InvalidState("timeout window not armed"))
    );
    db.reset_timeout(None).expect("arm late");
    assert_eq!(db.check_timeout(None), Ok(0));
    drop(early);

    db.init_setup_flags(SetupFlags::ENABLED).expect("flags");
    assert_eq!(
        db.check_timeout(None),
        Err(ThreadStateError::InvalidState("timeout enforcement disabled"))
    );
    assert!(db.reset_timeout(None).is_err());
}

#[test]
fn reset_keeps_the_original_entry_time() {
    let db = start(SetupFlags::empty());
    configure(&db, 10, TimeoutMode::OsTimer);
    let guard = db.enter(EntryFlags::empty());
    db.platform().advance_ms(20);
    assert_eq!(
        db.check_timeout(None),
        Err(ThreadStateError::Timeout { elapsed_us: 20_000 })
    );
    db.reset_timeout(None).expect("reset");
    assert_eq!(db.check_timeout(None), Ok(20_000));
    assert_eq!(guard.node().map(|node| node.enter_time_ns()), Some(0));
}

#[test]
fn reset_on_timeout_rearms_the_window() {
    let db = start(SetupFlags::RESET_ON_TIMEOUT);
    configure(&db, 10, TimeoutMode::OsTimer);
    let _guard = db.enter(EntryFlags::empty());
    db.platform().advance_ms(15);
    assert!(db.check_timeout(None).is_err());
    assert_eq!(db.check_timeout(None), Ok(15_000));
}

#[test]
fn timeout_hook_sees_every_expiry() {
    let db = start(SetupFlags::empty());
    configure(&db, 10, TimeoutMode::OsTimer);
    let calls = Arc::new(AtomicUsize::new(0));
    let elapsed = Arc::new(AtomicU64::new(0));
    {
        let (calls, elapsed) = (Arc::clone(&calls), Arc::clone(&elapsed));
        db.set_timeout_hook(move |report| {
            assert_eq!(report.budget_ms, 10);
            assert_eq!(report.device, Some(DEVICE));
            calls.fetch_add(1, Ordering::SeqCst);
            elapsed.store(report.elapsed_us, Ordering::SeqCst);
        });
    }
    let _guard = db.enter(EntryFlags::empty());
    db.platform().advance_ms(12);
    assert!(db.check_timeout(Some(DEVICE)).is_err());
    assert!(db.check_timeout(Some(DEVICE)).is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(elapsed.load(Ordering::SeqCst), 12_000);

    db.clear_timeout_hook();
    assert!(db.check_timeout(Some(DEVICE)).is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn detached_device_fails_without_consequences() {
    let db = start(SetupFlags::empty());
    configure(&db, 10, TimeoutMode::OsTimer);
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        db.set_timeout_hook(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }
    let _guard = db.enter(EntryFlags::empty());
    db.platform().set_attached(DEVICE, false);
    assert_eq!(
        db.check_timeout(Some(DEVICE)),
        Err(ThreadStateError::Timeout { elapsed_us: 0 })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
#[should_panic(expected = "timed out")]
fn assert_on_timeout_panics() {
    let db = start(SetupFlags::ASSERT_ON_TIMEOUT);
    configure(&db, 10, TimeoutMode::OsTimer);
    let _guard = db.enter(EntryFlags::empty());
    db.platform().advance_ms(10);
    let _ = db.check_timeout(None);
}

#[test]
fn override_replaces_the_policy_budget() {
    let db = start(SetupFlags::empty());
    configure(&db, 10, TimeoutMode::OsTimer);
    let guard = db.enter(EntryFlags::empty());
    let node = guard.node().expect("node");
    db.set_timeout_override(node, 30);
    assert_eq!(node.timeout_override_ms(), Some(30));
    db.platform().advance_ms(25);
    assert_eq!(db.check_timeout(None), Ok(25_000));
    db.platform().advance_ms(5);
    assert!(db.check_timeout(None).is_err());
}

#[test]
fn exit_check_reports_overruns() {
    let db = start(SetupFlags::CHECK_TIMEOUT_AT_FREE);
    configure(&db, 10, TimeoutMode::OsTimer);
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        db.set_timeout_hook(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }
    let quick = db.enter(EntryFlags::empty());
    quick.exit().expect("exit in time");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let slow = db.enter(EntryFlags::empty());
    db.platform().advance_ms(11);
    slow.exit().expect("overrun is logged, not returned");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn yields_are_throttled_to_the_reschedule_interval() {
    let db = start(SetupFlags::empty());
    configure(&db, 10_000, TimeoutMode::OsTimer);
    let _guard = db.enter(EntryFlags::empty());
    assert!(!db.yield_if_necessary(None));
    db.platform().advance_ms(2_000);
    assert!(db.yield_if_necessary(None));
    assert!(!db.yield_if_necessary(None));
    assert_eq!(db.platform().schedule_calls(), 1);
    db.platform().set_reschedule(false);
    db.platform().advance_ms(2_000);
    assert!(db.yield_if_necessary(None));
    assert_eq!(db.platform().schedule_calls(), 2);
}
