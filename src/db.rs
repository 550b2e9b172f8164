// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Thread-state database tying registries, slots, policy and timeouts together.
// Author: Lukas Bower

//! The thread-state database.
//!
//! Every entry into the core goes through one of the `enter*` calls and
//! holds the returned [`EntryGuard`] until it leaves. Ordinary entries are
//! tracked in identity-keyed registries under a spinlock; interrupt entries
//! occupy pre-allocated slot cells and never lock. Lookups resolve the node
//! for the calling identity in a fixed order: lockless slot, deferred slot,
//! preempted registry, active registry.

use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;
use core::panic::Location;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use spin::Mutex;
use threadstate_trace::{TraceRecord, TRACE_MAX_ENTRIES};

use crate::config::{SetupFlags, ThreadStateConfig};
use crate::error::{ThreadStateError, ThreadStateResult};
use crate::mirror;
use crate::node::{ContextKind, ContextNode, EntryFlags};
use crate::platform::{DeviceId, ExecutionId, Platform};
use crate::policy::{TimeoutMode, TimeoutPolicy, COMPUTE_MASK_WIDTH};
use crate::registry::{Placement, Registry, RegistryStats};
use crate::slots::{SlotCell, SlotTable};
use crate::timeout::{Evaluator, TimeoutHook, TimeoutReport};

/// Lifecycle of the database.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Shut down; every call is inert.
    Uninitialized = 0,
    /// Started with tracking switched off.
    Disabled = 1,
    /// Tracking entries.
    Enabled = 2,
}

impl LifecycleState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Disabled,
            2 => Self::Enabled,
            _ => Self::Uninitialized,
        }
    }
}

/// Execution-context tracking and timeout-enforcement database.
pub struct ThreadStateDb<P: Platform> {
    platform: P,
    config: ThreadStateConfig,
    state: AtomicU8,
    setup_flags: AtomicU32,
    sequence: AtomicU32,
    policy: TimeoutPolicy,
    registry: Registry,
    slots: SlotTable,
    timeout_hook: Mutex<Option<Arc<TimeoutHook>>>,
}

impl<P: Platform> fmt::Debug for ThreadStateDb<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadStateDb")
            .field("state", &self.state())
            .field("setup_flags", &self.setup_flags())
            .field("policy", &self.policy.snapshot())
            .field("registry", &self.registry.stats())
            .finish_non_exhaustive()
    }
}

impl<P: Platform> ThreadStateDb<P> {
    /// Allocate the slot tables and start in the state named by
    /// `config.setup_flags`.
    pub fn start(platform: P, config: ThreadStateConfig) -> ThreadStateResult<Self> {
        let processors = config.min_processors.max(platform.max_processor_count());
        let slots = SlotTable::allocate(processors, config.max_devices)?;
        let db = Self {
            platform,
            config,
            state: AtomicU8::new(LifecycleState::Uninitialized as u8),
            setup_flags: AtomicU32::new(0),
            sequence: AtomicU32::new(0),
            policy: TimeoutPolicy::new(),
            registry: Registry::new(),
            slots,
            timeout_hook: Mutex::new(None),
        };
        db.store_flags(db.config.setup_flags, true);
        info!(
            "threadstate: started with {} processors x {} devices, flags {:#x}, mirror {}",
            db.slots.processors(),
            db.slots.devices(),
            db.setup_flags().bits(),
            db.config.tls_mirror
        );
        Ok(db)
    }

    /// Drop every registration and slot occupant and stop tracking.
    ///
    /// Guards still alive afterwards exit as no-ops.
    pub fn shutdown(&self) {
        let previous = self
            .state
            .swap(LifecycleState::Uninitialized as u8, Ordering::AcqRel);
        if LifecycleState::from_raw(previous) == LifecycleState::Uninitialized {
            return;
        }
        self.registry.clear();
        self.slots.release_all();
        self.policy.clear();
        info!("threadstate: shut down");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` while entries are being tracked.
    pub fn is_enabled(&self) -> bool {
        self.state() == LifecycleState::Enabled
    }

    /// Replace the setup flags and clear the timeout policy.
    pub fn init_setup_flags(&self, flags: SetupFlags) -> ThreadStateResult<()> {
        if self.state() == LifecycleState::Uninitialized {
            return Err(ThreadStateError::InvalidState("database shut down"));
        }
        self.policy.clear();
        self.store_flags(flags, false);
        Ok(())
    }

    /// Current setup flags.
    pub fn setup_flags(&self) -> SetupFlags {
        SetupFlags::from_bits_truncate(self.setup_flags.load(Ordering::Acquire))
    }

    /// Apply the platform's registry override for `device`, if it has one.
    pub fn apply_setup_override(&self, device: DeviceId) -> Option<SetupFlags> {
        let raw = self.platform.setup_flags_override(device)?;
        let flags = SetupFlags::from_bits_truncate(raw);
        error!(
            "threadstate: {device} overrides setup flags {:#x} -> {:#x}",
            self.setup_flags().bits(),
            flags.bits()
        );
        self.store_flags(flags, false);
        Some(flags)
    }

    fn store_flags(&self, flags: SetupFlags, starting: bool) {
        self.setup_flags.store(flags.bits(), Ordering::Release);
        let target = if flags.contains(SetupFlags::ENABLED) {
            LifecycleState::Enabled
        } else {
            LifecycleState::Disabled
        };
        let previous = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (starting || current != LifecycleState::Uninitialized as u8)
                    .then_some(target as u8)
            });
        if let Ok(previous) = previous {
            let previous = LifecycleState::from_raw(previous);
            if !starting && previous != target {
                self.release_live_entries(previous, target);
            }
        }
    }

    /// Exits are ignored while disabled, so anything registered on either
    /// side of an Enabled/Disabled switch is stale afterwards.
    fn release_live_entries(&self, from: LifecycleState, to: LifecycleState) {
        let registrations = self.registry.release_all();
        let slots = self.slots.release_all();
        if registrations + slots > 0 {
            warn!(
                "threadstate: {from:?} -> {to:?} released {registrations} registrations and {slots} interrupt slots"
            );
        }
    }

    /// Platform the database was started on.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Configuration the database was started with.
    pub fn config(&self) -> &ThreadStateConfig {
        &self.config
    }

    /// Process-wide timeout policy.
    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    /// Install the hook invoked on every detected timeout.
    pub fn set_timeout_hook<F>(&self, hook: F)
    where
        F: Fn(&TimeoutReport) + Send + Sync + 'static,
    {
        *self.timeout_hook.lock() = Some(Arc::new(hook));
    }

    /// Remove the timeout hook.
    pub fn clear_timeout_hook(&self) {
        *self.timeout_hook.lock() = None;
    }

    /// Most recent ordinary registrations, oldest first.
    pub fn trace_snapshot(&self) -> heapless::Vec<TraceRecord, TRACE_MAX_ENTRIES> {
        self.registry.trace_snapshot()
    }

    /// Registry occupancy.
    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Occupied interrupt slots across both slot tables.
    pub fn occupied_slots(&self) -> usize {
        self.slots.occupied()
    }

    /// Processor dimension of the lockless slot table.
    pub fn processor_capacity(&self) -> u32 {
        self.slots.processors()
    }

    fn evaluator(&self) -> Evaluator<'_, P> {
        Evaluator {
            platform: &self.platform,
            policy: &self.policy,
            config: &self.config,
        }
    }

    fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    fn arm_first(&self, node: &ContextNode) {
        if let Err(err) = self.evaluator().arm(node, true) {
            debug!("threadstate: seq {} entered without a timeout window: {err}", node.sequence());
        }
    }

    fn print_info(&self, node: &ContextNode, event: &str) {
        if !self.setup_flags().contains(SetupFlags::PRINT_INFO) {
            return;
        }
        info!(
            "threadstate: {event} seq {} kind {} id {} cpu {} flags {:#x}",
            node.sequence(),
            node.kind(),
            node.identity().map_or(0, |id| id.get()),
            node.processor(),
            node.flags().bits()
        );
        info!(
            "threadstate: enter {:#x} limits non-compute {:#x} compute {:#x}",
            node.enter_time_ns(),
            node.non_compute_budget(),
            node.compute_budget()
        );
    }

    /// Track an ordinary entry on the calling thread.
    ///
    /// The entry is registered under the caller's identity, or in the
    /// preempted registry if that identity is already active. When tracking
    /// is disabled or the identity cannot be resolved the guard is inert.
    #[track_caller]
    pub fn enter(&self, flags: EntryFlags) -> EntryGuard<'_, P> {
        let site = Location::caller();
        if !self.is_enabled() {
            return EntryGuard::inert(self, Route::Registry);
        }

        let processor = self.platform.current_processor();
        let node = Arc::new(ContextNode::fresh(
            self.next_sequence(),
            processor,
            ContextKind::Ordinary,
            flags,
        ));
        self.arm_first(&node);
        let guard = EntryGuard::new(self, Route::Registry, NodeRef::shared(Arc::clone(&node)));

        let Some(identity) = self.platform.current_execution_id() else {
            debug!("threadstate: no execution identity; seq {} untracked", node.sequence());
            return guard;
        };
        if processor >= self.slots.processors() {
            error!(
                "threadstate: processor {processor} outside {} tracked processors",
                self.slots.processors()
            );
            return guard;
        }

        node.set_identity(identity);
        if self.registry.insert(&node, identity, site) == Placement::Dropped {
            return guard;
        }
        self.print_info(&node, "enter");
        if self.config.tls_mirror {
            mirror::acquire(&node);
        }
        guard
    }

    /// Track a first-level interrupt handler for `device`.
    #[track_caller]
    pub fn enter_isr(&self, device: DeviceId) -> EntryGuard<'_, P> {
        self.enter_interrupt(device, ContextKind::Isr)
    }

    /// Track a deferred interrupt handler for `device`.
    #[track_caller]
    pub fn enter_deferred(&self, device: DeviceId) -> EntryGuard<'_, P> {
        self.enter_interrupt(device, ContextKind::DeferredHandler)
    }

    fn enter_interrupt(&self, device: DeviceId, kind: ContextKind) -> EntryGuard<'_, P> {
        let route = Route::Deferred { device };
        if !self.is_enabled() {
            return EntryGuard::inert(self, route);
        }
        let Some(cell) = self.slots.deferred(device) else {
            error!("threadstate: {device} outside {} tracked devices", self.slots.devices());
            return EntryGuard::inert(self, route);
        };
        let Some(identity) = self.platform.current_execution_id() else {
            debug!("threadstate: no execution identity for {kind} entry on {device}");
            return EntryGuard::inert(self, route);
        };

        // One such handler per device runs at a time; a stale occupant is replaced.
        if cell.claim_overwrite() {
            warn!(
                "threadstate: {device} slot still held by seq {}; replaced by {kind} entry",
                cell.node().sequence()
            );
        }
        self.publish(cell, kind, identity);
        EntryGuard::new(self, route, NodeRef::cell(cell.node()))
    }

    /// Track a lockless interrupt handler for `device` on the current processor.
    ///
    /// Fails with [`ThreadStateError::DoubleOccupancy`] if a lockless handler
    /// for the same processor and device is already live.
    #[track_caller]
    pub fn enter_isr_lockless(&self, device: DeviceId) -> ThreadStateResult<EntryGuard<'_, P>> {
        let processor = self.platform.current_processor();
        let route = Route::Lockless { processor, device };
        if !self.is_enabled() {
            return Ok(EntryGuard::inert(self, route));
        }
        let Some(identity) = self.platform.current_execution_id() else {
            debug!("threadstate: no execution identity for lockless entry on {device}");
            return Ok(EntryGuard::inert(self, route));
        };
        let Some(cell) = self.slots.lockless(processor, device) else {
            error!("threadstate: lockless slot cpu {processor} {device} outside the slot table");
            return Err(ThreadStateError::InvalidState("lockless slot out of range"));
        };
        if !cell.claim() {
            error!(
                "threadstate: lockless slot cpu {processor} {device} already held by seq {}",
                cell.node().sequence()
            );
            return Err(ThreadStateError::DoubleOccupancy {
                processor,
                device: device.instance(),
            });
        }
        self.publish(cell, ContextKind::LocklessIsr, identity);
        Ok(EntryGuard::new(self, route, NodeRef::cell(cell.node())))
    }

    /// Fill a claimed cell and make it visible to lookups.
    fn publish(&self, cell: &SlotCell, kind: ContextKind, identity: ExecutionId) {
        let node = cell.node();
        node.reinit(
            self.next_sequence(),
            self.platform.current_processor(),
            kind,
            EntryFlags::empty(),
        );
        self.arm_first(node);
        node.set_identity(identity);
        node.set_valid(true);
        self.print_info(node, "enter");
        if self.config.tls_mirror {
            mirror::acquire(node);
        }
    }

    fn exit(&self, node: &ContextNode, route: Route, sequence: u32) -> ThreadStateResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let result = match route {
            Route::Registry => {
                if !node.is_valid() && node.identity().is_none() && !node.is_exclusive_running() {
                    return Ok(());
                }
                node.run_exit_callback();
                self.check_at_exit(node);
                let removed = self.registry.remove(node);
                self.print_info(node, "exit");
                if let Err(err) = removed {
                    error!("threadstate: exit of seq {}: {err}", node.sequence());
                }
                removed
            }
            Route::Deferred { device } => {
                let cell = self.slots.deferred(device);
                match cell {
                    Some(cell) if cell.is_occupied() && cell.node().sequence() == sequence => {
                        node.run_exit_callback();
                        self.check_at_exit(node);
                        cell.release();
                        Ok(())
                    }
                    _ => {
                        warn!("threadstate: {device} slot no longer holds seq {sequence}");
                        Err(ThreadStateError::NotFound)
                    }
                }
            }
            Route::Lockless { processor, device } => {
                let current = self.platform.current_processor();
                if current != processor {
                    warn!(
                        "threadstate: lockless seq {sequence} entered on cpu {processor}, exiting on cpu {current}"
                    );
                }
                match self.slots.lockless(processor, device) {
                    Some(cell) if cell.is_occupied() && cell.node().sequence() == sequence => {
                        node.run_exit_callback();
                        self.check_at_exit(node);
                        cell.release();
                        Ok(())
                    }
                    Some(cell) if cell.is_occupied() => {
                        warn!(
                            "threadstate: lockless slot cpu {processor} {device} no longer holds seq {sequence}"
                        );
                        Err(ThreadStateError::NotFound)
                    }
                    _ => {
                        error!("threadstate: lockless slot cpu {processor} {device} is empty on exit");
                        Err(ThreadStateError::NotFound)
                    }
                }
            }
        };
        // A slot node that failed to release already belongs to a successor.
        if self.config.tls_mirror && (result.is_ok() || matches!(route, Route::Registry)) {
            mirror::release(node);
        }
        result
    }

    fn check_at_exit(&self, node: &ContextNode) {
        if !self.setup_flags().contains(SetupFlags::CHECK_TIMEOUT_AT_FREE) {
            return;
        }
        if let Err(err) = self.enforce(node, None) {
            error!("threadstate: seq {} failed its exit timeout check: {err}", node.sequence());
        }
    }

    /// Node for the calling identity, cross-checked against the thread-local
    /// mirror when mirroring is enabled.
    pub fn current(&self, device: Option<DeviceId>) -> ThreadStateResult<NodeRef<'_>> {
        let found = self.current_unchecked(device);
        if self.config.tls_mirror && self.is_enabled() {
            mirror::cross_check(found.as_deref().ok());
        }
        found
    }

    /// Node for the calling identity.
    ///
    /// # Panics
    ///
    /// Panics on a failed lookup when [`SetupFlags::ASSERT_ON_FAILED_LOOKUP`]
    /// is set.
    pub fn current_unchecked(&self, device: Option<DeviceId>) -> ThreadStateResult<NodeRef<'_>> {
        let found = self.lookup(device);
        if let Err(err) = &found {
            if *err != ThreadStateError::Disabled
                && self.setup_flags().contains(SetupFlags::ASSERT_ON_FAILED_LOOKUP)
            {
                error!("threadstate: lookup failed ({err}); an enter/exit pair may be missing");
                panic!("threadstate: current node lookup failed: {err}");
            }
        }
        found
    }

    fn lookup(&self, device: Option<DeviceId>) -> ThreadStateResult<NodeRef<'_>> {
        if !self.is_enabled() {
            return Err(ThreadStateError::Disabled);
        }
        let processor = self.platform.current_processor();
        if processor >= self.slots.processors() {
            error!(
                "threadstate: lookup on processor {processor} outside {} tracked processors",
                self.slots.processors()
            );
            return Err(ThreadStateError::InvalidState("processor outside slot table"));
        }
        let identity = self
            .platform
            .current_execution_id()
            .ok_or(ThreadStateError::InvalidState("execution identity unavailable"))?;

        if let Some(device) = device {
            let lockless = self
                .slots
                .lockless(processor, device)
                .and_then(|cell| cell.occupant_for(identity));
            if let Some(node) = lockless {
                return Ok(NodeRef::cell(node));
            }
            let deferred = self
                .slots
                .deferred(device)
                .and_then(|cell| cell.occupant_for(identity));
            if let Some(node) = deferred {
                return Ok(NodeRef::cell(node));
            }
        }

        self.registry
            .find(identity)
            .map(NodeRef::shared)
            .ok_or(ThreadStateError::NotFound)
    }

    /// Configure the timeout policy from `device`'s mode and parameters.
    ///
    /// A non-compute device sets the non-compute budget to `timeout_us`; the
    /// compute budget always comes from the device's scaled platform
    /// parameters.
    pub fn init_timeout(
        &self,
        device: DeviceId,
        timeout_us: u32,
        mode: TimeoutMode,
    ) -> ThreadStateResult<()> {
        if device.instance() >= COMPUTE_MASK_WIDTH {
            return Err(ThreadStateError::InvalidState("device index exceeds compute mask"));
        }
        let compute = self.platform.device_is_compute(device);
        if !compute {
            self.policy.set_non_compute_ms(u64::from(timeout_us / 1000));
        }
        self.policy.mark_compute(device, compute)?;
        let params = self.platform.device_timeout_params(device);
        self.policy.set_compute_ms(params.scaled_ms());
        self.policy.set_mode(mode);
        Ok(())
    }

    /// Check the calling context against its budget.
    ///
    /// Returns the microseconds elapsed since entry. A timeout runs the
    /// configured consequences before returning [`ThreadStateError::Timeout`].
    pub fn check_timeout(&self, device: Option<DeviceId>) -> ThreadStateResult<u64> {
        if !self.setup_flags().contains(SetupFlags::TIMEOUT_ENABLED) {
            return Err(ThreadStateError::InvalidState("timeout enforcement disabled"));
        }
        if self.policy.mode() == TimeoutMode::Unset {
            return Err(ThreadStateError::InvalidState("timeout mode not configured"));
        }
        let node = self.current(device)?;
        if !node.timeout_initialized() {
            return Err(ThreadStateError::InvalidState("timeout window not armed"));
        }
        self.enforce(&node, device)
    }

    /// Re-arm the calling context's window, keeping its original entry time.
    pub fn reset_timeout(&self, device: Option<DeviceId>) -> ThreadStateResult<()> {
        if !self.setup_flags().contains(SetupFlags::TIMEOUT_ENABLED) {
            return Err(ThreadStateError::InvalidState("timeout enforcement disabled"));
        }
        let node = self.current(device)?;
        self.rearm(&node)
    }

    /// Give `node` a fixed budget of `ms` milliseconds regardless of policy.
    pub fn set_timeout_override(&self, node: &ContextNode, ms: u64) {
        self.evaluator().apply_override(node, ms);
    }

    /// Offer the processor to the scheduler if the calling context has run
    /// past its next yield point. Returns `true` if the scheduler was called.
    pub fn yield_if_necessary(&self, device: Option<DeviceId>) -> bool {
        let Ok(node) = self.current(device) else {
            return false;
        };
        if self.platform.current_tick_ns() < node.next_yield_ns() {
            return false;
        }
        if self.platform.schedule() {
            warn!("threadstate: seq {} yielding the processor", node.sequence());
        }
        self.evaluator()
            .schedule_next_yield(&node, self.platform.current_tick_ns());
        true
    }

    fn rearm(&self, node: &ContextNode) -> ThreadStateResult<()> {
        self.evaluator().arm(node, false)?;
        self.print_info(node, "reset");
        Ok(())
    }

    fn enforce(&self, node: &ContextNode, device: Option<DeviceId>) -> ThreadStateResult<u64> {
        let measured = self.evaluator().measure(node, device)?;
        if !measured.expired {
            return Ok(measured.elapsed_us);
        }

        let flags = self.setup_flags();
        self.print_info(node, "timeout");
        error!(
            "threadstate: seq {} ({}) timed out after {} us; budget {} ms",
            node.sequence(),
            node.kind(),
            measured.elapsed_us,
            measured.budget_ms
        );

        let hook = self.timeout_hook.lock().clone();
        if let Some(hook) = hook {
            hook(&TimeoutReport {
                sequence: node.sequence(),
                identity: node.identity(),
                kind: node.kind(),
                device,
                elapsed_us: measured.elapsed_us,
                budget_ms: measured.budget_ms,
            });
        }

        if flags.contains(SetupFlags::ASSERT_ON_TIMEOUT) {
            panic!(
                "threadstate: seq {} timed out after {} us",
                node.sequence(),
                measured.elapsed_us
            );
        }
        if flags.contains(SetupFlags::RESET_ON_TIMEOUT | SetupFlags::TIMEOUT_ENABLED) {
            if let Err(err) = self.rearm(node) {
                debug!("threadstate: reset after timeout failed: {err}");
            }
        }

        Err(ThreadStateError::Timeout {
            elapsed_us: measured.elapsed_us,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Registry,
    Deferred { device: DeviceId },
    Lockless { processor: u32, device: DeviceId },
}

#[derive(Clone, Debug)]
enum Holder<'db> {
    Cell(&'db ContextNode),
    Shared(Arc<ContextNode>),
}

/// Borrowed view of a tracked node.
#[derive(Clone, Debug)]
pub struct NodeRef<'db>(Holder<'db>);

impl<'db> NodeRef<'db> {
    fn cell(node: &'db ContextNode) -> Self {
        Self(Holder::Cell(node))
    }

    fn shared(node: Arc<ContextNode>) -> Self {
        Self(Holder::Shared(node))
    }
}

impl Deref for NodeRef<'_> {
    type Target = ContextNode;

    fn deref(&self) -> &ContextNode {
        match &self.0 {
            Holder::Cell(node) => node,
            Holder::Shared(node) => node,
        }
    }
}

/// Live entry into the core. Dropping the guard exits the entry.
///
/// Guards stay on the thread that entered.
pub struct EntryGuard<'db, P: Platform> {
    db: &'db ThreadStateDb<P>,
    route: Route,
    node: Option<NodeRef<'db>>,
    sequence: u32,
    _not_send: PhantomData<*const ()>,
}

impl<'db, P: Platform> EntryGuard<'db, P> {
    fn new(db: &'db ThreadStateDb<P>, route: Route, node: NodeRef<'db>) -> Self {
        let sequence = node.sequence();
        Self {
            db,
            route,
            node: Some(node),
            sequence,
            _not_send: PhantomData,
        }
    }

    fn inert(db: &'db ThreadStateDb<P>, route: Route) -> Self {
        Self {
            db,
            route,
            node: None,
            sequence: 0,
            _not_send: PhantomData,
        }
    }

    /// Node created for this entry; `None` when tracking was disabled.
    pub fn node(&self) -> Option<&ContextNode> {
        self.node.as_deref()
    }

    /// Returns `true` if the entry is visible to lookups.
    pub fn is_tracked(&self) -> bool {
        self.node().is_some_and(ContextNode::is_valid)
    }

    /// Leave the core, reporting a failed unregistration.
    pub fn exit(mut self) -> ThreadStateResult<()> {
        self.release()
    }

    fn release(&mut self) -> ThreadStateResult<()> {
        match self.node.take() {
            Some(node) => self.db.exit(&node, self.route, self.sequence),
            None => Ok(()),
        }
    }
}

impl<P: Platform> Drop for EntryGuard<'_, P> {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

impl<P: Platform> fmt::Debug for EntryGuard<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryGuard")
            .field("route", &self.route)
            .field("sequence", &self.sequence)
            .field("tracked", &self.is_tracked())
            .finish()
    }
}
