// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Deterministic platform used by tests, benches and the simulator binary.
// Author: Lukas Bower

//! Deterministic simulation platform.
//!
//! Time only moves when a caller advances it or when the core busy-delays,
//! so timeout behaviour can be asserted exactly. Processor and identity are
//! global by default and can be pinned per thread with
//! [`SimPlatform::bind_thread`].

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::collections::{BTreeMap, HashMap};
use std::thread::{self, ThreadId};

use spin::Mutex;

use crate::platform::{DeviceId, ExecutionId, Platform, TimeoutParams};

#[derive(Clone, Copy, Debug)]
struct Binding {
    identity: u64,
    processor: u32,
}

#[derive(Debug, Default)]
struct DeviceTable {
    params: BTreeMap<DeviceId, TimeoutParams>,
    flag_overrides: BTreeMap<DeviceId, u32>,
}

/// Platform whose clock, processor and identity are driven by the caller.
#[derive(Debug)]
pub struct SimPlatform {
    processors: u32,
    clock_ns: AtomicU64,
    processor: AtomicU32,
    identity: AtomicU64,
    compute_mask: AtomicU64,
    detached_mask: AtomicU64,
    reschedule: AtomicBool,
    schedule_calls: AtomicUsize,
    delay_calls: AtomicUsize,
    devices: Mutex<DeviceTable>,
    bindings: Mutex<HashMap<ThreadId, Binding>>,
}

impl SimPlatform {
    /// Simulated machine with `processors` processors, running identity 1 on
    /// processor 0 at tick zero.
    #[must_use]
    pub fn new(processors: u32) -> Self {
        Self {
            processors,
            clock_ns: AtomicU64::new(0),
            processor: AtomicU32::new(0),
            identity: AtomicU64::new(1),
            compute_mask: AtomicU64::new(0),
            detached_mask: AtomicU64::new(0),
            reschedule: AtomicBool::new(true),
            schedule_calls: AtomicUsize::new(0),
            delay_calls: AtomicUsize::new(0),
            devices: Mutex::new(DeviceTable::default()),
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// Current simulated tick.
    pub fn now_ns(&self) -> u64 {
        self.clock_ns.load(Ordering::SeqCst)
    }

    /// Move the clock forward by `ns`.
    pub fn advance_ns(&self, ns: u64) {
        self.clock_ns.fetch_add(ns, Ordering::SeqCst);
    }

    /// Move the clock forward by `ms`.
    pub fn advance_ms(&self, ms: u64) {
        self.advance_ns(ms.saturating_mul(1_000_000));
    }

    /// Processor reported to threads without a binding.
    pub fn set_processor(&self, processor: u32) {
        self.processor.store(processor, Ordering::SeqCst);
    }

    /// Identity reported to threads without a binding; zero means unavailable.
    pub fn set_identity(&self, identity: u64) {
        self.identity.store(identity, Ordering::SeqCst);
    }

    /// Pin the calling thread to `identity` on `processor`.
    pub fn bind_thread(&self, identity: u64, processor: u32) {
        self.bindings
            .lock()
            .insert(thread::current().id(), Binding { identity, processor });
    }

    /// Forget the calling thread's binding.
    pub fn unbind_thread(&self) {
        self.bindings.lock().remove(&thread::current().id());
    }

    /// Switch `device` between compute and non-compute mode.
    pub fn set_compute(&self, device: DeviceId, compute: bool) {
        update_mask(&self.compute_mask, device, compute);
    }

    /// Attach or detach `device`.
    pub fn set_attached(&self, device: DeviceId, attached: bool) {
        update_mask(&self.detached_mask, device, !attached);
    }

    /// Timeout parameters reported for `device`.
    pub fn set_timeout_params(&self, device: DeviceId, params: TimeoutParams) {
        self.devices.lock().params.insert(device, params);
    }

    /// Registry override reported for `device`; `None` removes it.
    pub fn set_setup_flags_override(&self, device: DeviceId, flags: Option<u32>) {
        let mut devices = self.devices.lock();
        match flags {
            Some(flags) => devices.flag_overrides.insert(device, flags),
            None => devices.flag_overrides.remove(&device),
        };
    }

    /// Whether [`Platform::schedule`] reports that a reschedule happened.
    pub fn set_reschedule(&self, reschedules: bool) {
        self.reschedule.store(reschedules, Ordering::SeqCst);
    }

    /// Number of [`Platform::schedule`] calls so far.
    pub fn schedule_calls(&self) -> usize {
        self.schedule_calls.load(Ordering::SeqCst)
    }

    /// Number of [`Platform::delay_us`] calls so far.
    pub fn delay_calls(&self) -> usize {
        self.delay_calls.load(Ordering::SeqCst)
    }

    fn binding(&self) -> Option<Binding> {
        self.bindings.lock().get(&thread::current().id()).copied()
    }
}

fn update_mask(mask: &AtomicU64, device: DeviceId, set: bool) {
    let Some(bit) = 1u64.checked_shl(device.instance()) else {
        return;
    };
    if set {
        mask.fetch_or(bit, Ordering::SeqCst);
    } else {
        mask.fetch_and(!bit, Ordering::SeqCst);
    }
}

fn mask_has(mask: &AtomicU64, device: DeviceId) -> bool {
    1u64.checked_shl(device.instance())
        .is_some_and(|bit| mask.load(Ordering::SeqCst) & bit != 0)
}

impl Platform for SimPlatform {
    fn current_tick_ns(&self) -> u64 {
        self.now_ns()
    }

    fn current_processor(&self) -> u32 {
        match self.binding() {
            Some(binding) => binding.processor,
            None => self.processor.load(Ordering::SeqCst),
        }
    }

    fn current_execution_id(&self) -> Option<ExecutionId> {
        let raw = match self.binding() {
            Some(binding) => binding.identity,
            None => self.identity.load(Ordering::SeqCst),
        };
        ExecutionId::new(raw)
    }

    fn delay_us(&self, micros: u64) {
        self.delay_calls.fetch_add(1, Ordering::SeqCst);
        self.advance_ns(micros.saturating_mul(1_000));
    }

    fn max_processor_count(&self) -> u32 {
        self.processors
    }

    fn device_timeout_params(&self, device: DeviceId) -> TimeoutParams {
        self.devices
            .lock()
            .params
            .get(&device)
            .copied()
            .unwrap_or_default()
    }

    fn device_is_compute(&self, device: DeviceId) -> bool {
        mask_has(&self.compute_mask, device)
    }

    fn device_attached(&self, device: DeviceId) -> bool {
        !mask_has(&self.detached_mask, device)
    }

    fn schedule(&self) -> bool {
        self.schedule_calls.fetch_add(1, Ordering::SeqCst);
        self.reschedule.load(Ordering::SeqCst)
    }

    fn setup_flags_override(&self, device: DeviceId) -> Option<u32> {
        self.devices.lock().flag_overrides.get(&device).copied()
    }
}
