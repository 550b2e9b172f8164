// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Error taxonomy shared by every thread-state operation.
// Author: Lukas Bower

use thiserror::Error;

/// Errors surfaced by the thread-state database.
///
/// Diagnostic mismatches (mirror, trace) are never reported through this
/// type; they are downgraded to log records at the point of detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ThreadStateError {
    /// The subsystem is not enabled; the call was a no-op.
    #[error("thread state tracking is disabled")]
    Disabled,
    /// No node is registered for the calling context.
    #[error("thread state node not found")]
    NotFound,
    /// Misconfigured policy or a node that was never prepared for the request.
    #[error("invalid thread state: {0}")]
    InvalidState(&'static str),
    /// The node exceeded its time budget.
    #[error("thread state timeout after {elapsed_us} us")]
    Timeout {
        /// Microseconds elapsed since the node entered the core.
        elapsed_us: u64,
    },
    /// A different exit callback is already installed on the node.
    #[error("exit callback already in use")]
    InUse,
    /// A lockless interrupt entry found its slot already occupied.
    #[error("lockless slot for processor {processor} device {device} already occupied")]
    DoubleOccupancy {
        /// Processor number of the slot.
        processor: u32,
        /// Device index of the slot.
        device: u32,
    },
    /// Allocation failed while starting the subsystem.
    #[error("out of memory allocating {0}")]
    ResourceExhausted(&'static str),
}

/// Result alias used across the crate.
pub type ThreadStateResult<T> = Result<T, ThreadStateError>;
