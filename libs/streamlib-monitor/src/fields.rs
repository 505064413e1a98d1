// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Closed sets of selectable fields and the validated selector over them.

use std::fmt;

use crate::error::{MonitorError, Result};

/// A closed set of field keys a client may select by name.
pub trait FieldKey: Copy + Eq + fmt::Debug + 'static {
    const ALL: &'static [Self];

    fn as_str(self) -> &'static str;

    fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|field| field.as_str() == name)
    }
}

/// Session-wide statistics exposed through `subscribe_session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionField {
    UptimeMs,
    NodeCount,
    PinCount,
    BytesProcessed,
    PacketsProcessed,
    GraphVersion,
}

impl FieldKey for SessionField {
    const ALL: &'static [Self] = &[
        SessionField::UptimeMs,
        SessionField::NodeCount,
        SessionField::PinCount,
        SessionField::BytesProcessed,
        SessionField::PacketsProcessed,
        SessionField::GraphVersion,
    ];

    fn as_str(self) -> &'static str {
        match self {
            SessionField::UptimeMs => "uptime_ms",
            SessionField::NodeCount => "node_count",
            SessionField::PinCount => "pin_count",
            SessionField::BytesProcessed => "bytes_processed",
            SessionField::PacketsProcessed => "packets_processed",
            SessionField::GraphVersion => "graph_version",
        }
    }
}

/// Process resource usage exposed through `subscribe_cpu_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceField {
    ProcessCpuUsage,
    TotalCpuUsage,
    CpuRatio,
    ProcessMemory,
    TotalMemory,
    MemoryRatio,
    ThreadCount,
}

impl FieldKey for ResourceField {
    const ALL: &'static [Self] = &[
        ResourceField::ProcessCpuUsage,
        ResourceField::TotalCpuUsage,
        ResourceField::CpuRatio,
        ResourceField::ProcessMemory,
        ResourceField::TotalMemory,
        ResourceField::MemoryRatio,
        ResourceField::ThreadCount,
    ];

    fn as_str(self) -> &'static str {
        match self {
            ResourceField::ProcessCpuUsage => "process_cpu_usage",
            ResourceField::TotalCpuUsage => "total_cpu_usage",
            ResourceField::CpuRatio => "cpu_ratio",
            ResourceField::ProcessMemory => "process_memory",
            ResourceField::TotalMemory => "total_memory",
            ResourceField::MemoryRatio => "memory_ratio",
            ResourceField::ThreadCount => "thread_count",
        }
    }
}

/// Validated, de-duplicated projection over a [`FieldKey`] set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelector<F: FieldKey> {
    fields: Vec<F>,
}

impl<F: FieldKey> FieldSelector<F> {
    pub fn all() -> Self {
        Self {
            fields: F::ALL.to_vec(),
        }
    }

    /// Build a selector from client-supplied names.
    ///
    /// An empty request selects everything. Any unknown name rejects the
    /// whole request.
    pub fn select<S: AsRef<str>>(requested: &[S]) -> Result<Self> {
        if requested.is_empty() {
            return Ok(Self::all());
        }

        let mut fields = Vec::with_capacity(requested.len());
        for name in requested {
            let name = name.as_ref();
            let field = F::parse(name)
                .ok_or_else(|| MonitorError::InvalidSelector(format!("unknown field '{}'", name)))?;
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        Ok(Self { fields })
    }

    pub fn iter(&self) -> impl Iterator<Item = F> + '_ {
        self.fields.iter().copied()
    }

    pub fn contains(&self, field: F) -> bool {
        self.fields.contains(&field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_request_selects_all() {
        let selector = FieldSelector::<ResourceField>::select::<&str>(&[]).unwrap();
        assert_eq!(selector.len(), ResourceField::ALL.len());
    }

    #[test]
    fn test_select_dedupes_and_keeps_order() {
        let selector =
            FieldSelector::<SessionField>::select(&["node_count", "uptime_ms", "node_count"])
                .unwrap();
        let fields: Vec<_> = selector.iter().collect();
        assert_eq!(fields, vec![SessionField::NodeCount, SessionField::UptimeMs]);
        assert!(!selector.contains(SessionField::PinCount));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result = FieldSelector::<ResourceField>::select(&["cpu_ratio", "gpu_usage"]);
        assert!(matches!(result, Err(MonitorError::InvalidSelector(_))));
    }
}
