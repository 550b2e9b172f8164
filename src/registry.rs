// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Spinlock-guarded active/preempted registries for ordinary entries.
// Author: Lukas Bower

use core::panic::Location;
use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use spin::Mutex;
use threadstate_trace::{TraceRecord, TraceRing, TRACE_MAX_ENTRIES};

use crate::error::{ThreadStateError, ThreadStateResult};
use crate::node::ContextNode;
use crate::platform::ExecutionId;

/// Where a registration ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Placement {
    Active,
    Preempted,
    Dropped,
}

/// Registry occupancy, for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Nodes in the active registry.
    pub active: usize,
    /// Nodes in the preempted registry.
    pub preempted: usize,
    /// Registrations recorded by the trace ring since start.
    pub traced: u64,
}

#[derive(Default)]
struct RegistryState {
    active: BTreeMap<ExecutionId, Arc<ContextNode>>,
    preempted: BTreeMap<ExecutionId, Arc<ContextNode>>,
    trace: TraceRing<TRACE_MAX_ENTRIES>,
}

/// Identity-keyed registries sharing one spinlock with the trace ring.
#[derive(Default)]
pub(crate) struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert `node` under `identity`, falling back to the preempted registry
    /// when the identity is already active.
    ///
    /// Node visibility and the trace record are published in the same lock
    /// acquisition. When both registries already hold the identity the node
    /// is left unregistered with its identity cleared.
    pub(crate) fn insert(
        &self,
        node: &Arc<ContextNode>,
        identity: ExecutionId,
        site: &'static Location<'static>,
    ) -> Placement {
        let mut state = self.state.lock();
        let placement = if !state.active.contains_key(&identity) {
            state.active.insert(identity, Arc::clone(node));
            Placement::Active
        } else if !state.preempted.contains_key(&identity) {
            state.preempted.insert(identity, Arc::clone(node));
            node.set_preempted(true);
            Placement::Preempted
        } else {
            node.clear_identity();
            debug!(
                "threadstate: identity {identity} already active and preempted; seq {} untracked",
                node.sequence()
            );
            return Placement::Dropped;
        };
        node.set_valid(true);
        state.trace.push(TraceRecord::new(
            node.sequence(),
            node.kind().as_str(),
            node.flags().bits(),
            site.file(),
            site.line(),
        ));
        placement
    }

    /// Remove `node` from the registry its preempted flag names.
    pub(crate) fn remove(&self, node: &ContextNode) -> ThreadStateResult<()> {
        let identity = node.identity().ok_or(ThreadStateError::NotFound)?;
        let mut state = self.state.lock();
        let map = if node.is_preempted() {
            &mut state.preempted
        } else {
            &mut state.active
        };
        let registered = map
            .get(&identity)
            .is_some_and(|found| core::ptr::eq(Arc::as_ptr(found), node));
        if !registered {
            return Err(ThreadStateError::NotFound);
        }
        map.remove(&identity);
        node.set_valid(false);
        Ok(())
    }

    /// Find the node registered for `identity`, preferring the preempted registry.
    pub(crate) fn find(&self, identity: ExecutionId) -> Option<Arc<ContextNode>> {
        let state = self.state.lock();
        state
            .preempted
            .get(&identity)
            .or_else(|| state.active.get(&identity))
            .cloned()
    }

    pub(crate) fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        RegistryStats {
            active: state.active.len(),
            preempted: state.preempted.len(),
            traced: state.trace.recorded(),
        }
    }

    pub(crate) fn trace_snapshot(&self) -> heapless::Vec<TraceRecord, TRACE_MAX_ENTRIES> {
        self.state.lock().trace.snapshot()
    }

    /// Drop every registration; nodes still held by guards become invalid.
    pub(crate) fn clear(&self) {
        self.release_all();
        self.state.lock().trace.clear();
    }

    /// Forget every registration, keeping the trace ring.
    ///
    /// Forgotten nodes lose their identity so their guards exit as no-ops.
    pub(crate) fn release_all(&self) -> usize {
        let mut state = self.state.lock();
        let mut released = 0;
        for node in state.active.values().chain(state.preempted.values()) {
            node.set_valid(false);
            node.clear_identity();
            released += 1;
        }
        state.active.clear();
        state.preempted.clear();
        released
    }
}
