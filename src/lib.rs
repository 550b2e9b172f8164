// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Crate root for the execution-context tracking and timeout database.
// Author: Lukas Bower

//! Execution-context tracking and timeout enforcement for a shared driver core.
//!
//! [`ThreadStateDb`] records every concurrent entry into the core (ordinary
//! calls, first-level interrupt handlers, deferred handlers and lockless
//! per-processor handlers) and measures each one against a bounded time
//! budget. Everything the database needs from its environment comes through
//! the [`Platform`] trait.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Setup flags and start-up configuration.
pub mod config;
/// The database object, entry guards and lookups.
pub mod db;
/// Error taxonomy.
pub mod error;
/// std-backed platform.
pub mod host;
/// Per-entry context records.
pub mod node;
/// Platform contract and identifier types.
pub mod platform;
/// Process-wide timeout policy.
pub mod policy;
/// Deterministic simulation platform.
pub mod sim;
/// Timeout reports and hooks.
pub mod timeout;

mod mirror;
mod registry;
mod slots;

pub use config::{ConfigError, SetupFlags, ThreadStateConfig};
pub use db::{EntryGuard, LifecycleState, NodeRef, ThreadStateDb};
pub use error::{ThreadStateError, ThreadStateResult};
pub use host::HostPlatform;
pub use node::{ContextKind, ContextNode, EntryFlags, ExitCallback};
pub use platform::{DeviceId, ExecutionId, Platform, TimeoutParams};
pub use policy::{PolicySnapshot, TimeoutMode, TimeoutPolicy, COMPUTE_MASK_WIDTH};
pub use registry::RegistryStats;
pub use sim::SimPlatform;
pub use threadstate_trace::{TraceRecord, TRACE_MAX_ENTRIES};
pub use timeout::{TimeoutHook, TimeoutReport};
