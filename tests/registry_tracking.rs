// CLASSIFICATION: COMMUNITY
// Filename: registry_tracking.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-16

use std::sync::atomic::{AtomicUsize, Ordering};

use cohesix_threadstate::{
    ContextKind, ContextNode, DeviceId, EntryFlags, SetupFlags, SimPlatform, ThreadStateConfig,
    ThreadStateDb, ThreadStateError,
};

fn start(flags: SetupFlags) -> ThreadStateDb<SimPlatform> {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = ThreadStateConfig::default()
        .with_setup_flags(flags)
        .with_tls_mirror(true);
    ThreadStateDb::start(SimPlatform::new(4), config).expect("start")
}

#[test]
fn distinct_identities_land_in_the_active_registry() {
    let db = start(SetupFlags::ENABLED);
    db.platform().set_identity(10);
    let first = db.enter(EntryFlags::empty());
    db.platform().set_identity(20);
    let second = db.enter(EntryFlags::empty());

    let stats = db.registry_stats();
    assert_eq!((stats.active, stats.preempted), (2, 0));
    assert_eq!(db.current(None).expect("id 20").sequence(), 2);
    db.platform().set_identity(10);
    assert_eq!(db.current(None).expect("id 10").sequence(), 1);

    first.exit().expect("exit first");
    assert_eq!(db.current(None).err(), Some(ThreadStateError::NotFound));
    db.platform().set_identity(20);
    assert!(db.current(None).is_ok());
    second.exit().expect("exit second");
    assert_eq!(db.registry_stats().active, 0);
}

#[test]
fn reentry_on_the_same_identity_is_preempted() {
    let db = start(SetupFlags::ENABLED);
    let outer = db.enter(EntryFlags::empty());
    let inner = db.enter(EntryFlags::empty());
    assert!(inner.node().is_some_and(ContextNode::is_preempted));
    assert_eq!(db.current(None).expect("inner").sequence(), 2);

    outer.exit().expect("exit outer");
    let stats = db.registry_stats();
    assert_eq!((stats.active, stats.preempted), (0, 1));
    assert_eq!(db.current(None).expect("inner remains").sequence(), 2);
    inner.exit().expect("exit inner");
    assert_eq!(db.current(None).err(), Some(ThreadStateError::NotFound));
}

#[test]
fn third_entry_on_an_identity_is_untracked() {
    let db = start(SetupFlags::ENABLED);
    let _outer = db.enter(EntryFlags::empty());
    let _inner = db.enter(EntryFlags::empty());
    let third = db.enter(EntryFlags::empty());
    assert!(!third.is_tracked());
    assert!(third.node().is_some_and(|node| node.identity().is_none()));
    assert_eq!(db.registry_stats().traced, 2);
    assert_eq!(third.exit(), Ok(()));
}

static EXCLUSIVE_EXITS: AtomicUsize = AtomicUsize::new(0);

fn count_exclusive(_: &ContextNode) {
    EXCLUSIVE_EXITS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn untracked_exclusive_entry_still_runs_its_exit_callback() {
    let db = start(SetupFlags::ENABLED);
    let _outer = db.enter(EntryFlags::empty());
    let _inner = db.enter(EntryFlags::empty());
    let exclusive = db.enter(EntryFlags::EXCLUSIVE_RUNNING);
    exclusive
        .node()
        .expect("node")
        .set_exit_callback(count_exclusive)
        .expect("install");
    assert_eq!(exclusive.exit(), Err(ThreadStateError::NotFound));
    assert_eq!(EXCLUSIVE_EXITS.load(Ordering::SeqCst), 1);
}

static FIRST_EXITS: AtomicUsize = AtomicUsize::new(0);

fn first_callback(node: &ContextNode) {
    assert_eq!(node.kind(), ContextKind::Ordinary);
    FIRST_EXITS.fetch_add(1, Ordering::SeqCst);
}

fn second_callback(_: &ContextNode) {}

#[test]
fn exit_callbacks_are_single_slot() {
    let db = start(SetupFlags::ENABLED);
    let guard = db.enter(EntryFlags::empty());
    let node = guard.node().expect("node");
    node.set_exit_callback(first_callback).expect("install");
    node.set_exit_callback(first_callback).expect("same callback");
    assert_eq!(node.set_exit_callback(second_callback), Err(ThreadStateError::InUse));
    assert!(node.has_exit_callback());
    guard.exit().expect("exit");
    assert_eq!(FIRST_EXITS.load(Ordering::SeqCst), 1);
}

#[test]
fn disabled_database_ignores_every_entry_kind() {
    let db = start(SetupFlags::ENABLED);
    let live = db.enter(EntryFlags::empty());
    db.init_setup_flags(SetupFlags::empty()).expect("disable");
    assert!(!db.is_enabled());

    let device = DeviceId::new(0);
    let ordinary = db.enter(EntryFlags::empty());
    let isr = db.enter_isr(device);
    let deferred = db.enter_deferred(device);
    let lockless = db.enter_isr_lockless(device).expect("inert guard");
    for guard in [&ordinary, &isr, &deferred, &lockless] {
        assert!(guard.node().is_none());
    }
    assert_eq!(db.current(None).err(), Some(ThreadStateError::Disabled));
    assert_eq!(db.current_unchecked(Some(device)).err(), Some(ThreadStateError::Disabled));
    assert_eq!(db.occupied_slots(), 0);

    assert_eq!(lockless.exit(), Ok(()));
    assert_eq!(live.exit(), Ok(()));
}

#[test]
fn unresolvable_identity_leaves_entry_untracked() {
    let db = start(SetupFlags::ENABLED);
    db.platform().set_identity(0);
    let guard = db.enter(EntryFlags::empty());
    assert!(!guard.is_tracked());
    assert_eq!(
        db.current(None).err(),
        Some(ThreadStateError::InvalidState("execution identity unavailable"))
    );
    assert_eq!(guard.exit(), Ok(()));
}

#[test]
fn processor_outside_the_slot_table_is_rejected() {
    let db = start(SetupFlags::ENABLED);
    assert_eq!(db.processor_capacity(), 32);
    db.platform().set_processor(40);
    let guard = db.enter(EntryFlags::empty());
    assert!(!guard.is_tracked());
    assert!(matches!(db.current(None), Err(ThreadStateError::InvalidState(_))));
}

#[test]
#[should_panic(expected = "lookup failed")]
fn failed_lookup_panics_when_asserting() {
    let db = start(SetupFlags::ENABLED | SetupFlags::ASSERT_ON_FAILED_LOOKUP);
    let _ = db.current_unchecked(None);
}

#[test]
fn registry_override_replaces_setup_flags() {
    let db = start(SetupFlags::ENABLED);
    let device = DeviceId::new(3);
    assert_eq!(db.apply_setup_override(device), None);
    db.platform().set_setup_flags_override(device, Some(0x42));
    assert_eq!(
        db.apply_setup_override(device),
        Some(SetupFlags::TIMEOUT_ENABLED | SetupFlags::PRINT_INFO)
    );
    assert!(!db.is_enabled());
}

#[test]
fn trace_ring_keeps_the_latest_registrations() {
    let db = start(SetupFlags::ENABLED);
    for identity in 1..=10u64 {
        db.platform().set_identity(identity);
        db.enter(EntryFlags::empty()).exit().expect("exit");
    }
    let trace = db.trace_snapshot();
    assert_eq!(trace.len(), cohesix_threadstate::TRACE_MAX_ENTRIES);
    assert_eq!(trace.first().map(|record| record.sequence()), Some(3));
    assert_eq!(trace.last().map(|record| record.sequence()), Some(10));
    assert!(trace.iter().all(|record| record.kind() == "ordinary"));
    assert_eq!(db.registry_stats().traced, 10);
}

#[test]
fn reenabling_forgets_entries_that_exited_while_disabled() {
    let db = start(SetupFlags::ENABLED);
    let exited = db.enter(EntryFlags::empty());
    assert_eq!(db.registry_stats().active, 1);

    db.init_setup_flags(SetupFlags::empty()).expect("disable");
    assert_eq!(exited.exit(), Ok(()));
    db.init_setup_flags(SetupFlags::ENABLED).expect("re-enable");

    let stats = db.registry_stats();
    assert_eq!((stats.active, stats.preempted, stats.traced), (0, 0, 1));
    assert_eq!(db.current(None).err(), Some(ThreadStateError::NotFound));

    let fresh = db.enter(EntryFlags::empty());
    assert!(fresh.node().is_some_and(|node| !node.is_preempted()));
    assert_eq!(db.current(None).expect("fresh entry").sequence(), 2);
    fresh.exit().expect("exit fresh");
}

#[test]
fn guard_held_across_a_disable_cycle_exits_quietly() {
    let db = start(SetupFlags::ENABLED);
    let held = db.enter(EntryFlags::empty());
    db.init_setup_flags(SetupFlags::empty()).expect("disable");
    db.init_setup_flags(SetupFlags::ENABLED).expect("re-enable");

    assert!(!held.is_tracked());
    assert_eq!(held.exit(), Ok(()));
    assert_eq!(db.registry_stats().active, 0);
}
