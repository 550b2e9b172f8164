// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Process-wide timeout thresholds and measurement mode.
// Author: Lukas Bower

//! Timeout policy.
//!
//! Values are written by configuration calls and read without locking on
//! every arm and check. Momentary staleness between the fields is tolerated:
//! enforcement is advisory.

use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::error::{ThreadStateError, ThreadStateResult};
use crate::platform::DeviceId;

/// Devices beyond this index cannot be flagged compute.
pub const COMPUTE_MASK_WIDTH: u32 = u64::BITS;

/// How elapsed time is measured.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeoutMode {
    /// No mode configured; arming and checking fail.
    Unset = 0,
    /// Absolute deadlines compared against the platform tick.
    OsTimer = 1,
    /// Budgets in microseconds decremented by a busy-delay per check.
    OsDelay = 2,
}

impl TimeoutMode {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::OsTimer,
            2 => Self::OsDelay,
            _ => Self::Unset,
        }
    }
}

/// Point-in-time copy of the policy, for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PolicySnapshot {
    /// Non-compute budget in milliseconds.
    pub non_compute_ms: u64,
    /// Compute budget in milliseconds.
    pub compute_ms: u64,
    /// One bit per device currently running in compute mode.
    pub compute_mask: u64,
    /// Measurement mode.
    pub mode: TimeoutMode,
}

/// Process-wide timeout policy.
#[derive(Debug)]
pub struct TimeoutPolicy {
    non_compute_ms: AtomicU64,
    compute_ms: AtomicU64,
    compute_mask: AtomicU64,
    mode: AtomicU8,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeoutPolicy {
    /// Policy with zero budgets and no measurement mode.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            non_compute_ms: AtomicU64::new(0),
            compute_ms: AtomicU64::new(0),
            compute_mask: AtomicU64::new(0),
            mode: AtomicU8::new(TimeoutMode::Unset as u8),
        }
    }

    /// Zero both budgets and the compute mask. The measurement mode is kept.
    pub fn clear(&self) {
        self.non_compute_ms.store(0, Ordering::Relaxed);
        self.compute_ms.store(0, Ordering::Relaxed);
        self.compute_mask.store(0, Ordering::Relaxed);
    }

    /// Non-compute budget in milliseconds.
    #[must_use]
    pub fn non_compute_ms(&self) -> u64 {
        self.non_compute_ms.load(Ordering::Relaxed)
    }

    /// Compute budget in milliseconds.
    #[must_use]
    pub fn compute_ms(&self) -> u64 {
        self.compute_ms.load(Ordering::Relaxed)
    }

    /// Larger of the two budgets; zero means the policy was never configured.
    #[must_use]
    pub fn reference_budget_ms(&self) -> u64 {
        self.compute_ms().max(self.non_compute_ms())
    }

    /// Measurement mode.
    #[must_use]
    pub fn mode(&self) -> TimeoutMode {
        TimeoutMode::from_raw(self.mode.load(Ordering::Relaxed))
    }

    /// Whether `device` is currently flagged compute.
    #[must_use]
    pub fn is_compute(&self, device: DeviceId) -> bool {
        match compute_bit(device) {
            Some(bit) => self.compute_mask.load(Ordering::Relaxed) & bit != 0,
            None => false,
        }
    }

    pub(crate) fn set_non_compute_ms(&self, ms: u64) {
        self.non_compute_ms.store(ms, Ordering::Relaxed);
    }

    pub(crate) fn set_compute_ms(&self, ms: u64) {
        self.compute_ms.store(ms, Ordering::Relaxed);
    }

    pub(crate) fn set_mode(&self, mode: TimeoutMode) {
        self.mode.store(mode as u8, Ordering::Relaxed);
    }

    pub(crate) fn mark_compute(&self, device: DeviceId, compute: bool) -> ThreadStateResult<()> {
        let bit = compute_bit(device)
            .ok_or(ThreadStateError::InvalidState("device index exceeds compute mask"))?;
        if compute {
            self.compute_mask.fetch_or(bit, Ordering::Relaxed);
        } else {
            self.compute_mask.fetch_and(!bit, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Copy every field.
    #[must_use]
    pub fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            non_compute_ms: self.non_compute_ms(),
            compute_ms: self.compute_ms(),
            compute_mask: self.compute_mask.load(Ordering::Relaxed),
            mode: self.mode(),
        }
    }
}

fn compute_bit(device: DeviceId) -> Option<u64> {
    1u64.checked_shl(device.instance())
}
