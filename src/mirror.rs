// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Thread-local mirror of the active node used to cross-check lookups.
// Author: Lukas Bower

//! Thread-local mirror.
//!
//! Each thread remembers the last node it entered with. The mirror is never
//! consulted to answer a lookup; disagreement with the registries is logged
//! and otherwise ignored.

use core::cell::Cell;

use log::warn;

use crate::node::ContextNode;

#[derive(Clone, Copy, Default)]
struct MirrorSlot {
    node: usize,
    depth: u32,
}

std::thread_local! {
    static MIRROR: Cell<MirrorSlot> = const { Cell::new(MirrorSlot { node: 0, depth: 0 }) };
}

/// Point the mirror at `node`, counting nested acquisitions.
pub(crate) fn acquire(node: &ContextNode) {
    MIRROR.with(|cell| {
        let mut slot = cell.get();
        if slot.node != 0 {
            warn!(
                "threadstate: nested entry on this thread; mirror held {:#x}, now seq {}",
                slot.node,
                node.sequence()
            );
        }
        slot.node = node.address();
        slot.depth = slot.depth.saturating_add(1);
        cell.set(slot);
    });
}

/// Drop one acquisition; the slot clears when the outermost entry exits.
pub(crate) fn release(node: &ContextNode) {
    MIRROR.with(|cell| {
        let mut slot = cell.get();
        if slot.depth == 0 {
            warn!("threadstate: mirror released without an entry (seq {})", node.sequence());
            return;
        }
        if slot.node != node.address() {
            warn!(
                "threadstate: mirror mismatch on exit; mirror {:#x}, exiting seq {}",
                slot.node,
                node.sequence()
            );
        }
        slot.depth -= 1;
        if slot.depth == 0 {
            slot.node = 0;
        } else {
            warn!(
                "threadstate: mirror still held {} deep after exit; nested entries on this thread",
                slot.depth
            );
        }
        cell.set(slot);
    });
}

/// Address of the mirrored node on this thread.
pub(crate) fn current() -> Option<usize> {
    match MIRROR.with(Cell::get).node {
        0 => None,
        addr => Some(addr),
    }
}

/// Compare a lookup result with the mirror, warning on disagreement.
pub(crate) fn cross_check(found: Option<&ContextNode>) {
    match (found, current()) {
        (Some(node), Some(addr)) if node.address() != addr => warn!(
            "threadstate: mirror mismatch; mirror {addr:#x}, lookup found seq {}",
            node.sequence()
        ),
        (Some(node), None) => warn!(
            "threadstate: lookup found seq {} but the mirror is empty",
            node.sequence()
        ),
        (None, Some(addr)) => warn!("threadstate: lookup failed but the mirror holds {addr:#x}"),
        _ => {}
    }
}
