// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: std-backed platform for host builds and the simulator binary.
// Author: Lukas Bower

//! Host platform.
//!
//! Threads receive a process-unique identity the first time they ask for
//! one and are spread round-robin over a fixed number of virtual
//! processors. Ticks come from a monotonic [`Instant`] epoch.
//!
//! With more threads than processors two threads share a processor, and
//! their lockless interrupt entries on one device report
//! [`crate::ThreadStateError::DoubleOccupancy`]. A real processor cannot
//! run two such handlers at once, so callers size `processors` to the
//! thread count.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::platform::{DeviceId, ExecutionId, Platform, TimeoutParams};

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

std::thread_local! {
    static THREAD_IDENTITY: u64 = NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug)]
struct HostDevice {
    params: TimeoutParams,
    compute: AtomicBool,
    attached: AtomicBool,
}

/// Platform backed by the host OS.
#[derive(Debug)]
pub struct HostPlatform {
    epoch: Instant,
    processors: u32,
    devices: Vec<HostDevice>,
}

impl HostPlatform {
    /// `processors` virtual processors (at least one) and `devices` attached
    /// non-compute devices with default timeout parameters.
    #[must_use]
    pub fn new(processors: u32, devices: u32) -> Self {
        Self {
            epoch: Instant::now(),
            processors: processors.max(1),
            devices: (0..devices)
                .map(|_| HostDevice {
                    params: TimeoutParams::DEFAULT,
                    compute: AtomicBool::new(false),
                    attached: AtomicBool::new(true),
                })
                .collect(),
        }
    }

    /// Replace the timeout parameters of `device`.
    #[must_use]
    pub fn with_device_params(mut self, device: DeviceId, params: TimeoutParams) -> Self {
        if let Some(entry) = self.devices.get_mut(device.index()) {
            entry.params = params;
        }
        self
    }

    /// Switch `device` between compute and non-compute mode.
    pub fn set_compute(&self, device: DeviceId, compute: bool) {
        if let Some(entry) = self.devices.get(device.index()) {
            entry.compute.store(compute, Ordering::Relaxed);
        }
    }

    /// Attach or detach `device`.
    pub fn set_attached(&self, device: DeviceId, attached: bool) {
        if let Some(entry) = self.devices.get(device.index()) {
            entry.attached.store(attached, Ordering::Relaxed);
        }
    }

    fn processor_for(&self, identity: u64) -> u32 {
        (identity.saturating_sub(1) % u64::from(self.processors)) as u32
    }

    /// Number of devices known to the platform.
    #[must_use]
    pub fn device_count(&self) -> u32 {
        self.devices.len() as u32
    }
}

impl Platform for HostPlatform {
    fn current_tick_ns(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn current_processor(&self) -> u32 {
        self.processor_for(THREAD_IDENTITY.with(|id| *id))
    }

    fn current_execution_id(&self) -> Option<ExecutionId> {
        ExecutionId::new(THREAD_IDENTITY.with(|id| *id))
    }

    fn delay_us(&self, micros: u64) {
        let until = Instant::now() + Duration::from_micros(micros);
        while Instant::now() < until {
            core::hint::spin_loop();
        }
    }

    fn max_processor_count(&self) -> u32 {
        self.processors
    }

    fn device_timeout_params(&self, device: DeviceId) -> TimeoutParams {
        self.devices
            .get(device.index())
            .map(|entry| entry.params)
            .unwrap_or_default()
    }

    fn device_is_compute(&self, device: DeviceId) -> bool {
        self.devices
            .get(device.index())
            .is_some_and(|entry| entry.compute.load(Ordering::Relaxed))
    }

    fn device_attached(&self, device: DeviceId) -> bool {
        self.devices
            .get(device.index())
            .is_some_and(|entry| entry.attached.load(Ordering::Relaxed))
    }

    fn schedule(&self) -> bool {
        thread::yield_now();
        true
    }
}
