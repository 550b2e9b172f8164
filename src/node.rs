// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Per-entry context record tracked by the thread-state database.
// Author: Lukas Bower

//! Context nodes.
//!
//! A [`ContextNode`] describes one live entry into the driver core. Nodes
//! for ordinary entries are shared between the entry guard and the
//! registry; nodes for interrupt entries live in pre-allocated slot cells.
//! Every field is atomic so lookups running on other processors can read
//! a node while its owner updates the timeout window.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use bitflags::bitflags;
use spin::Mutex;

use crate::error::{ThreadStateError, ThreadStateResult};
use crate::platform::ExecutionId;

/// How an entry reached the core.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// Ordinary call path tracked through the registry.
    Ordinary = 0,
    /// First-level interrupt handler holding the device lock.
    Isr = 1,
    /// Deferred (bottom-half) interrupt handler.
    DeferredHandler = 2,
    /// Per-processor interrupt handler that never takes a lock.
    LocklessIsr = 3,
}

impl ContextKind {
    /// Returns `true` for every interrupt-driven kind.
    #[must_use]
    pub const fn is_interrupt(self) -> bool {
        !matches!(self, Self::Ordinary)
    }

    /// Label used in logs and the trace ring.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ordinary => "ordinary",
            Self::Isr => "isr",
            Self::DeferredHandler => "deferred",
            Self::LocklessIsr => "isr-lockless",
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Isr,
            2 => Self::DeferredHandler,
            3 => Self::LocklessIsr,
            _ => Self::Ordinary,
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Caller-supplied entry flags.
    ///
    /// Bits other than the named ones are carried through to the trace ring.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EntryFlags: u32 {
        /// The entry runs with the core held exclusively and may never have
        /// completed registration; its exit still runs callbacks and checks.
        const EXCLUSIVE_RUNNING = 1 << 0;

        const _ = !0;
    }
}

/// Callback invoked when an entry exits.
pub type ExitCallback = fn(&ContextNode);

/// Timeout bookkeeping for a node.
///
/// The two budget cells hold absolute deadlines (ns) in deadline mode and
/// remaining microseconds in decrement mode.
#[derive(Debug, Default)]
pub(crate) struct TimeoutWindow {
    pub(crate) enter_ns: AtomicU64,
    pub(crate) non_compute: AtomicU64,
    pub(crate) compute: AtomicU64,
    pub(crate) override_ms: AtomicU64,
    pub(crate) next_yield_ns: AtomicU64,
}

impl TimeoutWindow {
    const fn new() -> Self {
        Self {
            enter_ns: AtomicU64::new(0),
            non_compute: AtomicU64::new(0),
            compute: AtomicU64::new(0),
            override_ms: AtomicU64::new(0),
            next_yield_ns: AtomicU64::new(0),
        }
    }

    fn clear(&self) {
        self.enter_ns.store(0, Ordering::Relaxed);
        self.non_compute.store(0, Ordering::Relaxed);
        self.compute.store(0, Ordering::Relaxed);
        self.override_ms.store(0, Ordering::Relaxed);
        self.next_yield_ns.store(0, Ordering::Relaxed);
    }

    pub(crate) fn budget_cell(&self, compute: bool) -> &AtomicU64 {
        if compute {
            &self.compute
        } else {
            &self.non_compute
        }
    }
}

/// Record of one live entry into the core.
#[derive(Debug)]
pub struct ContextNode {
    sequence: AtomicU32,
    identity: AtomicU64,
    processor: AtomicU32,
    kind: AtomicU8,
    flags: AtomicU32,
    valid: AtomicBool,
    preempted: AtomicBool,
    timeout_ready: AtomicBool,
    pub(crate) window: TimeoutWindow,
    callback: Mutex<Option<ExitCallback>>,
}

impl Default for ContextNode {
    fn default() -> Self {
        Self::vacant()
    }
}

impl ContextNode {
    pub(crate) const fn vacant() -> Self {
        Self {
            sequence: AtomicU32::new(0),
            identity: AtomicU64::new(0),
            processor: AtomicU32::new(0),
            kind: AtomicU8::new(ContextKind::Ordinary as u8),
            flags: AtomicU32::new(0),
            valid: AtomicBool::new(false),
            preempted: AtomicBool::new(false),
            timeout_ready: AtomicBool::new(false),
            window: TimeoutWindow::new(),
            callback: Mutex::new(None),
        }
    }

    pub(crate) fn fresh(sequence: u32, processor: u32, kind: ContextKind, flags: EntryFlags) -> Self {
        let node = Self::vacant();
        node.reinit(sequence, processor, kind, flags);
        node
    }

    /// Wipe every field and stamp the identity-independent header.
    pub(crate) fn reinit(&self, sequence: u32, processor: u32, kind: ContextKind, flags: EntryFlags) {
        self.valid.store(false, Ordering::Release);
        self.identity.store(0, Ordering::Relaxed);
        self.preempted.store(false, Ordering::Relaxed);
        self.timeout_ready.store(false, Ordering::Relaxed);
        self.window.clear();
        *self.callback.lock() = None;
        self.sequence.store(sequence, Ordering::Relaxed);
        self.processor.store(processor, Ordering::Relaxed);
        self.kind.store(kind as u8, Ordering::Relaxed);
        self.flags.store(flags.bits(), Ordering::Relaxed);
    }

    /// Sequence number assigned when the node was created.
    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Identity of the owning execution context, if registration resolved one.
    #[must_use]
    pub fn identity(&self) -> Option<ExecutionId> {
        ExecutionId::new(self.identity.load(Ordering::Acquire))
    }

    /// Processor the entry started on.
    #[must_use]
    pub fn processor(&self) -> u32 {
        self.processor.load(Ordering::Relaxed)
    }

    /// Entry kind.
    #[must_use]
    pub fn kind(&self) -> ContextKind {
        ContextKind::from_raw(self.kind.load(Ordering::Relaxed))
    }

    /// Flags supplied at entry.
    #[must_use]
    pub fn flags(&self) -> EntryFlags {
        EntryFlags::from_bits_retain(self.flags.load(Ordering::Relaxed))
    }

    /// Returns `true` while the node is registered and visible to lookups.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Returns `true` if the node landed in the preempted registry.
    #[must_use]
    pub fn is_preempted(&self) -> bool {
        self.preempted.load(Ordering::Relaxed)
    }

    /// Returns `true` if the entry was flagged exclusive-running.
    #[must_use]
    pub fn is_exclusive_running(&self) -> bool {
        self.flags().contains(EntryFlags::EXCLUSIVE_RUNNING)
    }

    /// Returns `true` once a timeout window has been armed successfully.
    #[must_use]
    pub fn timeout_initialized(&self) -> bool {
        self.timeout_ready.load(Ordering::Acquire)
    }

    /// Tick (ns) at which the entry first armed its window.
    #[must_use]
    pub fn enter_time_ns(&self) -> u64 {
        self.window.enter_ns.load(Ordering::Relaxed)
    }

    /// Current non-compute budget cell (deadline ns or remaining µs).
    #[must_use]
    pub fn non_compute_budget(&self) -> u64 {
        self.window.non_compute.load(Ordering::Relaxed)
    }

    /// Current compute budget cell (deadline ns or remaining µs).
    #[must_use]
    pub fn compute_budget(&self) -> u64 {
        self.window.compute.load(Ordering::Relaxed)
    }

    /// Per-node budget override in milliseconds.
    #[must_use]
    pub fn timeout_override_ms(&self) -> Option<u64> {
        match self.window.override_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Earliest tick (ns) at which a cooperative reschedule is allowed.
    #[must_use]
    pub fn next_yield_ns(&self) -> u64 {
        self.window.next_yield_ns.load(Ordering::Relaxed)
    }

    /// Install the exit callback.
    ///
    /// Installing the callback that is already present is a no-op; a
    /// different one fails with [`ThreadStateError::InUse`].
    pub fn set_exit_callback(&self, callback: ExitCallback) -> ThreadStateResult<()> {
        let mut slot = self.callback.lock();
        if let Some(existing) = *slot {
            if existing as usize != callback as usize {
                return Err(ThreadStateError::InUse);
            }
        }
        *slot = Some(callback);
        Ok(())
    }

    /// Remove the exit callback, if any.
    pub fn reset_exit_callback(&self) {
        *self.callback.lock() = None;
    }

    /// Returns `true` if an exit callback is installed.
    #[must_use]
    pub fn has_exit_callback(&self) -> bool {
        self.callback.lock().is_some()
    }

    pub(crate) fn run_exit_callback(&self) {
        let callback = *self.callback.lock();
        if let Some(callback) = callback {
            callback(self);
        }
    }

    pub(crate) fn set_identity(&self, identity: ExecutionId) {
        self.identity.store(identity.get(), Ordering::Release);
    }

    pub(crate) fn clear_identity(&self) {
        self.identity.store(0, Ordering::Release);
    }

    pub(crate) fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Release);
    }

    pub(crate) fn set_preempted(&self, preempted: bool) {
        self.preempted.store(preempted, Ordering::Relaxed);
    }

    pub(crate) fn set_timeout_initialized(&self) {
        self.timeout_ready.store(true, Ordering::Release);
    }

    pub(crate) fn address(&self) -> usize {
        self as *const Self as usize
    }
}
