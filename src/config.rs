// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Setup flags and start-up configuration for the thread-state database.
// Author: Lukas Bower

use bitflags::bitflags;
use thiserror::Error;

/// Environment variable overriding [`ThreadStateConfig::setup_flags`].
pub const FLAGS_ENV: &str = "COHESIX_THREADSTATE_FLAGS";
/// Environment variable overriding [`ThreadStateConfig::tls_mirror`].
pub const TLS_MIRROR_ENV: &str = "COHESIX_THREADSTATE_TLS_MIRROR";

bitflags! {
    /// Runtime switches controlling tracking and timeout enforcement.
    ///
    /// Bit values match the registry DWORD read by
    /// [`crate::ThreadStateDb::apply_setup_override`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SetupFlags: u32 {
        /// Track entries at all.
        const ENABLED = 1 << 0;
        /// Allow timeout checks and resets.
        const TIMEOUT_ENABLED = 1 << 1;
        /// Panic when a timeout is detected.
        const ASSERT_ON_TIMEOUT = 1 << 2;
        /// Panic when a current-node lookup fails.
        const ASSERT_ON_FAILED_LOOKUP = 1 << 3;
        /// Re-arm the timeout window instead of leaving the node expired.
        const RESET_ON_TIMEOUT = 1 << 4;
        /// Verify timeout compliance when an entry exits.
        const CHECK_TIMEOUT_AT_FREE = 1 << 5;
        /// Log node details on entry, exit and timeout.
        const PRINT_INFO = 1 << 6;
    }
}

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Variable that carried the value.
        key: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Start-up configuration for [`crate::ThreadStateDb`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadStateConfig {
    /// Initial setup flags.
    pub setup_flags: SetupFlags,
    /// Mirror the active node into thread-local storage and cross-check lookups.
    pub tls_mirror: bool,
    /// Lower bound for the processor dimension of the lockless slot table.
    pub min_processors: u32,
    /// Number of device slots per processor.
    pub max_devices: usize,
    /// Budget forced onto interrupt and deferred-handler entries, in milliseconds.
    pub interrupt_budget_ms: u64,
    /// Busy-delay slice consumed by each decrement-mode check, in microseconds.
    pub delay_slice_us: u64,
    /// Minimum spacing between cooperative reschedules, in nanoseconds.
    pub reschedule_interval_ns: u64,
}

impl Default for ThreadStateConfig {
    fn default() -> Self {
        Self {
            setup_flags: SetupFlags::ENABLED | SetupFlags::TIMEOUT_ENABLED,
            tls_mirror: cfg!(debug_assertions),
            min_processors: 32,
            max_devices: 32,
            interrupt_budget_ms: 500,
            delay_slice_us: 100,
            reschedule_interval_ns: 2 * 1_000_000_000,
        }
    }
}

impl ThreadStateConfig {
    /// Defaults overlaid with `COHESIX_THREADSTATE_*` environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(FLAGS_ENV) {
            let bits = parse_u32(raw.trim()).ok_or_else(|| ConfigError::InvalidValue {
                key: FLAGS_ENV,
                value: raw.clone(),
            })?;
            config.setup_flags = SetupFlags::from_bits_truncate(bits);
        }
        if let Ok(raw) = std::env::var(TLS_MIRROR_ENV) {
            config.tls_mirror = parse_bool(raw.trim()).ok_or_else(|| ConfigError::InvalidValue {
                key: TLS_MIRROR_ENV,
                value: raw.clone(),
            })?;
        }
        Ok(config)
    }

    /// Replace the initial setup flags.
    #[must_use]
    pub fn with_setup_flags(mut self, flags: SetupFlags) -> Self {
        self.setup_flags = flags;
        self
    }

    /// Enable or disable the thread-local mirror.
    #[must_use]
    pub fn with_tls_mirror(mut self, enabled: bool) -> Self {
        self.tls_mirror = enabled;
        self
    }
}

fn parse_u32(value: &str) -> Option<u32> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_values_accept_hex_and_decimal() {
        assert_eq!(parse_u32("0x23"), Some(0x23));
        assert_eq!(parse_u32("35"), Some(35));
        assert_eq!(parse_u32("0xzz"), None);
    }

    #[test]
    fn unknown_flag_bits_are_dropped() {
        let flags = SetupFlags::from_bits_truncate(0xffff_ff41);
        assert_eq!(flags, SetupFlags::ENABLED | SetupFlags::PRINT_INFO);
    }
}
