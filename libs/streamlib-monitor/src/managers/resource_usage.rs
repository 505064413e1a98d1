// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::time::Duration;

use serde_json::{Map, Value as JsonValue};
use tokio::time::Instant;

use crate::fields::{FieldKey, FieldSelector, ResourceField};
use crate::introspect::ResourceUsage;
use crate::protocol::ServerMessage;

use super::{Cadence, SubscriptionManager, TickContext};

/// `own / total`, or 0 when the total is not positive.
pub fn derive_ratio(own: f64, total: f64) -> f64 {
    if total > 0.0 && total.is_finite() {
        own / total
    } else {
        0.0
    }
}

/// Process CPU and memory usage, sent as `cpu_stats`.
#[derive(Debug)]
pub struct ResourceUsageManager {
    cadence: Cadence,
    fields: FieldSelector<ResourceField>,
}

impl Default for ResourceUsageManager {
    fn default() -> Self {
        Self {
            cadence: Cadence::default(),
            fields: FieldSelector::all(),
        }
    }
}

impl ResourceUsageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, interval: Duration, fields: FieldSelector<ResourceField>) {
        self.fields = fields;
        self.cadence.start(interval);
    }

    pub fn unsubscribe(&mut self) {
        self.cadence.stop();
    }
}

pub(crate) fn project_usage(
    usage: &ResourceUsage,
    fields: &FieldSelector<ResourceField>,
) -> Map<String, JsonValue> {
    fields
        .iter()
        .map(|field| {
            let value = match field {
                ResourceField::ProcessCpuUsage => JsonValue::from(usage.process_cpu_usage),
                ResourceField::TotalCpuUsage => JsonValue::from(usage.total_cpu_usage),
                ResourceField::CpuRatio => {
                    JsonValue::from(derive_ratio(usage.process_cpu_usage, usage.total_cpu_usage))
                }
                ResourceField::ProcessMemory => JsonValue::from(usage.process_memory),
                ResourceField::TotalMemory => JsonValue::from(usage.total_memory),
                ResourceField::MemoryRatio => JsonValue::from(derive_ratio(
                    usage.process_memory as f64,
                    usage.total_memory as f64,
                )),
                ResourceField::ThreadCount => JsonValue::from(usage.thread_count),
            };
            (field.as_str().to_string(), value)
        })
        .collect()
}

impl SubscriptionManager for ResourceUsageManager {
    fn topic(&self) -> &'static str {
        "cpu_stats"
    }

    fn is_active(&self) -> bool {
        self.cadence.is_active()
    }

    fn interval(&self) -> Option<Duration> {
        self.cadence.interval()
    }

    fn tick(&mut self, now: Instant, ctx: &TickContext<'_>) {
        if !self.cadence.is_due(now) {
            return;
        }
        let usage = ctx.monitor.introspector().lock_for_read().resource_usage();
        let stats = project_usage(&usage, &self.fields);
        match ctx.deliver(&ServerMessage::CpuStats { stats }) {
            Ok(()) => self.cadence.mark_sent(now),
            Err(e) => tracing::warn!("[ResourceUsageManager] Tick failed: {}", e),
        }
    }

    fn on_session_end(&mut self, _ctx: &TickContext<'_>) {
        self.cadence.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_guards_zero_total() {
        assert_eq!(derive_ratio(5.0, 0.0), 0.0);
        assert_eq!(derive_ratio(5.0, -1.0), 0.0);
        assert_eq!(derive_ratio(5.0, f64::NAN), 0.0);
        assert_eq!(derive_ratio(25.0, 100.0), 0.25);
    }

    #[test]
    fn test_projection_only_selected_fields() {
        let usage = ResourceUsage {
            process_cpu_usage: 50.0,
            total_cpu_usage: 200.0,
            process_memory: 256,
            total_memory: 0,
            thread_count: 12,
        };
        let fields = FieldSelector::select(&["cpu_ratio", "memory_ratio"]).unwrap();
        let stats = project_usage(&usage, &fields);

        assert_eq!(stats.len(), 2);
        assert_eq!(stats["cpu_ratio"], 0.25);
        assert_eq!(stats["memory_ratio"], 0.0);
        assert!(!stats.contains_key("thread_count"));
    }
}
