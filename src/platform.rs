// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Narrow collaborator contract consumed by the thread-state core.
// Author: Lukas Bower

//! Platform services consumed by the thread-state database.
//!
//! The core never talks to timers, schedulers or device registries
//! directly. Everything it needs from the surrounding system funnels
//! through [`Platform`], which keeps the surface small enough to be backed
//! by the host ([`crate::host::HostPlatform`]), a deterministic simulator
//! ([`crate::sim::SimPlatform`]) or a kernel binding.

use core::fmt;
use core::num::NonZeroU64;

/// Identity of an execution context (OS thread handle or CPU-local handle).
///
/// Zero is reserved as the "no identity" sentinel, so the handle is
/// non-zero by construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExecutionId(NonZeroU64);

impl ExecutionId {
    /// Wrap a raw handle, returning `None` for the reserved zero value.
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Raw handle value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}

/// Device instance index used to address per-device slots and policy bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(u32);

impl DeviceId {
    /// Wrap a device instance index.
    #[must_use]
    pub const fn new(instance: u32) -> Self {
        Self(instance)
    }

    /// Instance index as reported by the device layer.
    #[must_use]
    pub const fn instance(self) -> u32 {
        self.0
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Per-device timeout parameters reported by the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutParams {
    /// Base timeout in microseconds.
    pub timeout_us: u32,
    /// Multiplier applied to the base timeout (0 behaves like 1).
    pub scale: u32,
    /// Platform-specific flags, carried for diagnostics only.
    pub flags: u32,
}

impl TimeoutParams {
    /// Parameters used when a platform has nothing better to offer.
    pub const DEFAULT: Self = Self {
        timeout_us: 4_000_000,
        scale: 1,
        flags: 0,
    };

    /// Scaled budget in whole milliseconds.
    #[must_use]
    pub const fn scaled_ms(&self) -> u64 {
        let scale = if self.scale == 0 { 1 } else { self.scale as u64 };
        (self.timeout_us as u64 / 1000) * scale
    }
}

impl Default for TimeoutParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Services the thread-state core consumes from its environment.
pub trait Platform: Send + Sync {
    /// Monotonic time in nanoseconds.
    fn current_tick_ns(&self) -> u64;

    /// Number of the processor executing the caller.
    fn current_processor(&self) -> u32;

    /// Identity of the calling execution context, if one can be resolved.
    fn current_execution_id(&self) -> Option<ExecutionId>;

    /// Busy-delay for `micros` microseconds.
    fn delay_us(&self, micros: u64);

    /// Highest processor count the platform may ever report.
    fn max_processor_count(&self) -> u32;

    /// Timeout parameters configured for `device`.
    fn device_timeout_params(&self, device: DeviceId) -> TimeoutParams;

    /// Whether `device` currently runs in compute mode.
    fn device_is_compute(&self, device: DeviceId) -> bool;

    /// Whether `device` is still attached; a detached device fails timeout checks.
    fn device_attached(&self, _device: DeviceId) -> bool {
        true
    }

    /// Offer the processor to the OS scheduler. Returns `true` if a reschedule happened.
    fn schedule(&self) -> bool {
        false
    }

    /// Registry override for the setup flags of `device`, if one is configured.
    fn setup_flags_override(&self, _device: DeviceId) -> Option<u32> {
        None
    }
}
