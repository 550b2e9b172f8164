// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Timeout window arming and expiry evaluation for context nodes.
// Author: Lukas Bower

//! Timeout evaluation.
//!
//! Arming computes both budgets for a node up front; checking elects the
//! compute or non-compute budget from the policy's *current* compute mask,
//! so a device switching modes mid-entry is judged by its present mode.

use core::sync::atomic::Ordering;

use log::error;

use crate::config::ThreadStateConfig;
use crate::error::{ThreadStateError, ThreadStateResult};
use crate::node::{ContextKind, ContextNode};
use crate::platform::{DeviceId, ExecutionId, Platform};
use crate::policy::{TimeoutMode, TimeoutPolicy};

const NS_PER_MS: u64 = 1_000_000;
const US_PER_MS: u64 = 1_000;

/// Details handed to the recovery hook when a node times out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutReport {
    /// Sequence number of the expired node.
    pub sequence: u32,
    /// Identity of the expired node.
    pub identity: Option<ExecutionId>,
    /// Kind of the expired node.
    pub kind: ContextKind,
    /// Device the check ran against, if any.
    pub device: Option<DeviceId>,
    /// Microseconds elapsed since the node entered.
    pub elapsed_us: u64,
    /// Policy reference budget in milliseconds.
    pub budget_ms: u64,
}

/// Recovery hook invoked on every detected timeout.
pub type TimeoutHook = dyn Fn(&TimeoutReport) + Send + Sync;

/// Outcome of one budget measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Measurement {
    pub(crate) elapsed_us: u64,
    pub(crate) budget_ms: u64,
    pub(crate) expired: bool,
}

pub(crate) struct Evaluator<'a, P: Platform> {
    pub(crate) platform: &'a P,
    pub(crate) policy: &'a TimeoutPolicy,
    pub(crate) config: &'a ThreadStateConfig,
}

impl<'a, P: Platform> Evaluator<'a, P> {
    /// Arm (or re-arm) the node's window from the current policy.
    ///
    /// The entry timestamp is only recorded when `first` is set, so resets
    /// keep reporting elapsed time from the original entry.
    pub(crate) fn arm(&self, node: &ContextNode, first: bool) -> ThreadStateResult<()> {
        let now = self.platform.current_tick_ns();
        let (mut compute_ms, mut non_compute_ms) =
            (self.policy.compute_ms(), self.policy.non_compute_ms());

        // Interrupt paths must give the processor back before an OS watchdog fires.
        if node.kind().is_interrupt() {
            compute_ms = self.config.interrupt_budget_ms;
            non_compute_ms = self.config.interrupt_budget_ms;
        }

        if first {
            node.window.enter_ns.store(now, Ordering::Relaxed);
        }

        if let Some(ms) = node.timeout_override_ms() {
            compute_ms = ms;
            non_compute_ms = ms;
        }

        self.schedule_next_yield(node, now);
        self.store_budgets(node, now, non_compute_ms, compute_ms)?;
        node.set_timeout_initialized();
        Ok(())
    }

    /// Replace the node's budgets with `ms`, overriding policy on later re-arms.
    pub(crate) fn apply_override(&self, node: &ContextNode, ms: u64) {
        node.window.override_ms.store(ms, Ordering::Relaxed);
        let now = self.platform.current_tick_ns();
        self.schedule_next_yield(node, now);
        // An unset mode leaves the budgets alone; the override applies on the next arm.
        let _ = self.store_budgets(node, now, ms, ms);
    }

    pub(crate) fn schedule_next_yield(&self, node: &ContextNode, now: u64) {
        node.window.next_yield_ns.store(
            now.saturating_add(self.config.reschedule_interval_ns),
            Ordering::Relaxed,
        );
    }

    fn store_budgets(
        &self,
        node: &ContextNode,
        now: u64,
        non_compute_ms: u64,
        compute_ms: u64,
    ) -> ThreadStateResult<()> {
        let (non_compute, compute) = match self.policy.mode() {
            TimeoutMode::OsTimer => (
                now.saturating_add(non_compute_ms.saturating_mul(NS_PER_MS)),
                now.saturating_add(compute_ms.saturating_mul(NS_PER_MS)),
            ),
            TimeoutMode::OsDelay => (
                non_compute_ms.saturating_mul(US_PER_MS),
                compute_ms.saturating_mul(US_PER_MS),
            ),
            TimeoutMode::Unset => {
                return Err(ThreadStateError::InvalidState("timeout mode not configured"));
            }
        };
        node.window.non_compute.store(non_compute, Ordering::Relaxed);
        node.window.compute.store(compute, Ordering::Relaxed);
        Ok(())
    }

    /// Measure the node against its elected budget.
    ///
    /// A detached device fails outright with a zero-length timeout. An
    /// expiry is reported in the measurement and its consequences are left
    /// to the caller.
    pub(crate) fn measure(
        &self,
        node: &ContextNode,
        device: Option<DeviceId>,
    ) -> ThreadStateResult<Measurement> {
        if let Some(device) = device {
            if !self.platform.device_attached(device) {
                error!("threadstate: {device} detached during timeout check");
                return Err(ThreadStateError::Timeout { elapsed_us: 0 });
            }
        }

        let budget_ms = self.policy.reference_budget_ms();
        if budget_ms == 0 {
            error!("threadstate: timeout policy has no budget configured");
            return Err(ThreadStateError::InvalidState("timeout budget not configured"));
        }

        let compute = device.is_some_and(|device| self.policy.is_compute(device));
        let cell = node.window.budget_cell(compute);

        let now = self.platform.current_tick_ns();
        let elapsed_us = now.saturating_sub(node.enter_time_ns()) / 1000;

        let expired = match self.policy.mode() {
            TimeoutMode::OsTimer => {
                let deadline = cell.load(Ordering::Relaxed);
                if now >= deadline {
                    error!("threadstate: current time {now:#x} >= deadline {deadline:#x}");
                    true
                } else {
                    false
                }
            }
            TimeoutMode::OsDelay => {
                let slice = self.config.delay_slice_us;
                self.platform.delay_us(slice);
                let remaining = cell
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| {
                        Some(left - left.min(slice))
                    })
                    .map(|left| left - left.min(slice))
                    .unwrap_or(0);
                remaining == 0
            }
            TimeoutMode::Unset => {
                return Err(ThreadStateError::InvalidState("timeout mode not configured"));
            }
        };

        Ok(Measurement {
            elapsed_us,
            budget_ms,
            expired,
        })
    }
}
