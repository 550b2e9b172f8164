// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Pre-allocated lockless and deferred interrupt slot tables.
// Author: Lukas Bower

//! Interrupt slot tables.
//!
//! Interrupt entries cannot take the registry spinlock, so each one owns a
//! pre-allocated cell. Lockless handlers are indexed by processor and
//! device; locked handlers and deferred handlers share one cell per device.
//! Cells are allocated once at start and never grow.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::{ThreadStateError, ThreadStateResult};
use crate::node::ContextNode;
use crate::platform::{DeviceId, ExecutionId};

/// One interrupt slot: an occupancy bit and the node stored in place.
#[derive(Debug, Default)]
pub(crate) struct SlotCell {
    occupied: AtomicBool,
    node: ContextNode,
}

impl SlotCell {
    pub(crate) const fn new() -> Self {
        Self {
            occupied: AtomicBool::new(false),
            node: ContextNode::vacant(),
        }
    }

    /// Claim an empty cell. Returns `false` if it was already occupied.
    pub(crate) fn claim(&self) -> bool {
        self.occupied
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the cell unconditionally. Returns `true` if a previous
    /// occupant was displaced.
    pub(crate) fn claim_overwrite(&self) -> bool {
        self.occupied.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_occupied(&self) -> bool {
        self.occupied.load(Ordering::Acquire)
    }

    /// Hide the node from lookups, then free the cell.
    pub(crate) fn release(&self) {
        self.node.set_valid(false);
        self.node.clear_identity();
        self.occupied.store(false, Ordering::Release);
    }

    pub(crate) fn node(&self) -> &ContextNode {
        &self.node
    }

    /// The published node, if it belongs to `identity`.
    pub(crate) fn occupant_for(&self, identity: ExecutionId) -> Option<&ContextNode> {
        if !self.is_occupied() || !self.node.is_valid() {
            return None;
        }
        (self.node.identity() == Some(identity)).then_some(&self.node)
    }
}

/// Lockless per-processor table plus the per-device deferred table.
#[derive(Debug)]
pub(crate) struct SlotTable {
    processors: u32,
    devices: usize,
    lockless: Box<[SlotCell]>,
    deferred: Box<[SlotCell]>,
}

impl SlotTable {
    /// Allocate `processors × devices` lockless cells and `devices` deferred
    /// cells, failing instead of aborting when memory is short.
    pub(crate) fn allocate(processors: u32, devices: usize) -> ThreadStateResult<Self> {
        let lockless_len = (processors as usize)
            .checked_mul(devices)
            .ok_or(ThreadStateError::ResourceExhausted("lockless slot table"))?;
        Ok(Self {
            processors,
            devices,
            lockless: cells(lockless_len, "lockless slot table")?,
            deferred: cells(devices, "deferred slot table")?,
        })
    }

    pub(crate) fn processors(&self) -> u32 {
        self.processors
    }

    pub(crate) fn devices(&self) -> usize {
        self.devices
    }

    pub(crate) fn lockless(&self, processor: u32, device: DeviceId) -> Option<&SlotCell> {
        if processor >= self.processors || device.index() >= self.devices {
            return None;
        }
        self.lockless
            .get(processor as usize * self.devices + device.index())
    }

    pub(crate) fn deferred(&self, device: DeviceId) -> Option<&SlotCell> {
        self.deferred.get(device.index())
    }

    /// Number of occupied cells across both tables.
    pub(crate) fn occupied(&self) -> usize {
        self.lockless
            .iter()
            .chain(self.deferred.iter())
            .filter(|cell| cell.is_occupied())
            .count()
    }

    /// Free every cell. Returns how many were occupied.
    pub(crate) fn release_all(&self) -> usize {
        let mut released = 0;
        for cell in self.lockless.iter().chain(self.deferred.iter()) {
            if cell.is_occupied() {
                released += 1;
            }
            cell.release();
        }
        released
    }
}

fn cells(len: usize, what: &'static str) -> ThreadStateResult<Box<[SlotCell]>> {
    let mut cells = Vec::new();
    cells
        .try_reserve_exact(len)
        .map_err(|_| ThreadStateError::ResourceExhausted(what))?;
    cells.extend((0..len).map(|_| SlotCell::new()));
    Ok(cells.into_boxed_slice())
}
