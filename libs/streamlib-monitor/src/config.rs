// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Monitor configuration via `monitor.toml`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};
use crate::logs::LogLevel;

/// Fraction of each severity kept when the log history is evicted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionRatios {
    pub error: f64,
    pub warning: f64,
    pub info: f64,
    pub debug: f64,
}

impl Default for RetentionRatios {
    fn default() -> Self {
        Self {
            error: 1.0,
            warning: 0.8,
            info: 0.2,
            debug: 0.05,
        }
    }
}

impl RetentionRatios {
    pub fn for_level(&self, level: LogLevel) -> f64 {
        match level {
            LogLevel::Error => self.error,
            LogLevel::Warning => self.warning,
            LogLevel::Info => self.info,
            LogLevel::Debug => self.debug,
        }
    }
}

/// Timing and retention knobs for the monitor.
///
/// Every field has a default, so a partial TOML file only overrides what it
/// names. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Quiet period after the last topology event before stabilizing.
    pub debounce_window_ms: u64,
    /// Upper bound between the first event of a burst and stabilization.
    pub max_wait_ms: u64,
    /// Re-check period while a burst is still settling.
    pub debounce_poll_ms: u64,

    /// Longest delay between two scheduler wakes.
    pub tick_ceiling_ms: u64,
    /// Subscription intervals below this are clamped up.
    pub min_interval_ms: u64,
    /// Interval used when a subscribe request names none.
    pub default_interval_ms: u64,

    /// Re-send cadence of the full node list to topology subscribers.
    pub topology_interval_ms: u64,
    /// Freshness window for the shared node list payload.
    pub topology_cache_max_age_ms: u64,

    pub log_drain_interval_ms: u64,
    pub log_history_capacity: usize,
    pub log_message_max_len: usize,
    pub log_retention: RetentionRatios,
    /// Batch size that triggers an immediate flush when debug/info entries were drained.
    pub log_verbose_batch_threshold: usize,
    /// Batch size that triggers an immediate flush otherwise.
    pub log_quiet_batch_threshold: usize,
    pub log_verbose_flush_delay_ms: u64,
    pub log_quiet_flush_delay_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: 500,
            max_wait_ms: 3000,
            debounce_poll_ms: 100,
            tick_ceiling_ms: 1000,
            min_interval_ms: 50,
            default_interval_ms: 1000,
            topology_interval_ms: 1000,
            topology_cache_max_age_ms: 500,
            log_drain_interval_ms: 100,
            log_history_capacity: 500,
            log_message_max_len: 1024,
            log_retention: RetentionRatios::default(),
            log_verbose_batch_threshold: 20,
            log_quiet_batch_threshold: 50,
            log_verbose_flush_delay_ms: 100,
            log_quiet_flush_delay_ms: 250,
        }
    }
}

impl MonitorConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "monitor.toml";

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            MonitorError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;

        tracing::info!("Loaded monitor config from {}", path.display());
        Ok(config)
    }

    /// Load a configuration file, falling back to defaults when it is missing
    /// or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!("No {} found, using defaults", path.display());
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("debounce_window_ms", self.debounce_window_ms),
            ("max_wait_ms", self.max_wait_ms),
            ("debounce_poll_ms", self.debounce_poll_ms),
            ("tick_ceiling_ms", self.tick_ceiling_ms),
            ("min_interval_ms", self.min_interval_ms),
            ("log_drain_interval_ms", self.log_drain_interval_ms),
            ("log_history_capacity", self.log_history_capacity as u64),
            ("log_message_max_len", self.log_message_max_len as u64),
            ("log_verbose_batch_threshold", self.log_verbose_batch_threshold as u64),
            ("log_quiet_batch_threshold", self.log_quiet_batch_threshold as u64),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(MonitorError::Configuration(format!("{} must be non-zero", name)));
        }

        if self.max_wait_ms < self.debounce_window_ms {
            return Err(MonitorError::Configuration(format!(
                "max_wait_ms ({}) must not be shorter than debounce_window_ms ({})",
                self.max_wait_ms, self.debounce_window_ms
            )));
        }

        for level in LogLevel::ALL {
            let ratio = self.log_retention.for_level(level);
            if !(0.0..=1.0).contains(&ratio) {
                return Err(MonitorError::Configuration(format!(
                    "retention ratio for {} must be within [0, 1], got {}",
                    level, ratio
                )));
            }
        }

        Ok(())
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn debounce_poll(&self) -> Duration {
        Duration::from_millis(self.debounce_poll_ms)
    }

    pub fn tick_ceiling(&self) -> Duration {
        Duration::from_millis(self.tick_ceiling_ms)
    }

    pub fn topology_interval(&self) -> Duration {
        Duration::from_millis(self.topology_interval_ms)
    }

    pub fn topology_cache_max_age(&self) -> Duration {
        Duration::from_millis(self.topology_cache_max_age_ms)
    }

    pub fn log_drain_interval(&self) -> Duration {
        Duration::from_millis(self.log_drain_interval_ms)
    }

    /// Clamp a client-requested interval to the configured floor.
    pub fn clamp_interval(&self, interval_ms: u64) -> Duration {
        Duration::from_millis(interval_ms.max(self.min_interval_ms))
    }

    /// Interval for a subscribe request, defaulted and clamped.
    pub fn subscription_interval(&self, requested_ms: Option<u64>) -> Duration {
        self.clamp_interval(requested_ms.unwrap_or(self.default_interval_ms))
    }
}
