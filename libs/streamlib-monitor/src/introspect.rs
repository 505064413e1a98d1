// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Read-side contract between the monitor and the live processing graph.
//!
//! The host owns the graph. The monitor only ever reads it through a
//! [`GraphView`], which holds the host's read lock for as long as it lives.
//! Views must be dropped before anything is serialized or sent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::fields::SessionField;

/// Stable node identifier. Assigned monotonically, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinDirection {
    Input,
    Output,
}

/// Topology mutation reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyEvent {
    NodeAdded(NodeId),
    NodeRemoved(NodeId),
}

/// Per-node attributes readable through [`GraphView::attribute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeAttribute {
    Status,
    BytesProcessed,
    PacketsProcessed,
    ProcessingTimeUs,
    ErrorCount,
    Arguments,
}

impl NodeAttribute {
    /// Attributes carried by every `filter_stats` message.
    pub const STATS: &'static [NodeAttribute] = &[
        NodeAttribute::Status,
        NodeAttribute::BytesProcessed,
        NodeAttribute::PacketsProcessed,
        NodeAttribute::ProcessingTimeUs,
        NodeAttribute::ErrorCount,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeAttribute::Status => "status",
            NodeAttribute::BytesProcessed => "bytes_processed",
            NodeAttribute::PacketsProcessed => "packets_processed",
            NodeAttribute::ProcessingTimeUs => "processing_time_us",
            NodeAttribute::ErrorCount => "error_count",
            NodeAttribute::Arguments => "arguments",
        }
    }
}

/// Identity and shape of one node, as listed in `filters` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub idx: NodeId,
    pub name: String,
    pub category: String,
    pub input_count: usize,
    pub output_count: usize,
}

/// Buffer and throughput statistics of one pin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PinStats {
    pub buffer_us: u64,
    pub max_buffer_us: u64,
    pub queued_packets: u64,
    pub packets: u64,
    pub bytes: u64,
    pub throughput_bps: f64,
}

/// One `(name, type, value)` pin property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: JsonValue,
}

impl PinProperty {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, value: JsonValue) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            value,
        }
    }
}

/// Finite set of pin properties.
///
/// Iteration can be restarted any number of times by calling [`iter`](Self::iter) again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinProperties(Vec<PinProperty>);

impl PinProperties {
    pub fn new(properties: Vec<PinProperty>) -> Self {
        Self(properties)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PinProperty> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a PinProperties {
    type Item = &'a PinProperty;
    type IntoIter = std::slice::Iter<'a, PinProperty>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Raw process and host resource counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU usage of this process, in percent of one core.
    pub process_cpu_usage: f64,
    /// CPU usage of the whole host, in percent of one core.
    pub total_cpu_usage: f64,
    pub process_memory: u64,
    pub total_memory: u64,
    pub thread_count: u32,
}

/// Consistent read-only view of the graph.
///
/// Holds the host's read lock; dropping the view releases it.
pub trait GraphView {
    fn node_ids(&self) -> Vec<NodeId>;

    fn describe(&self, id: NodeId) -> Option<NodeDescriptor>;

    fn attribute(&self, id: NodeId, attribute: NodeAttribute) -> Option<JsonValue>;

    fn pin_stats(&self, id: NodeId, direction: PinDirection, index: usize) -> Option<PinStats>;

    fn pin_properties(
        &self,
        id: NodeId,
        direction: PinDirection,
        index: usize,
    ) -> Option<PinProperties>;

    /// Session-wide value for one field, or `None` if the host does not track it.
    fn session_value(&self, field: SessionField) -> Option<JsonValue>;

    fn resource_usage(&self) -> ResourceUsage;
}

pub type TopologyCallback = Arc<dyn Fn(TopologyEvent) + Send + Sync>;

/// Host-side graph access used by the monitor.
pub trait GraphIntrospector: Send + Sync {
    /// Take the graph read lock for the lifetime of the returned view.
    fn lock_for_read(&self) -> Box<dyn GraphView + '_>;

    /// Register a callback invoked on every node add/remove.
    fn on_topology_change(&self, callback: TopologyCallback);

    /// Change a node argument.
    fn update_argument(&self, id: NodeId, name: &str, value: &JsonValue) -> anyhow::Result<()>;
}

/// Enumerate every node under one view.
pub fn snapshot_topology(view: &dyn GraphView) -> Vec<NodeDescriptor> {
    let mut ids = view.node_ids();
    ids.sort_unstable();
    ids.into_iter().filter_map(|id| view.describe(id)).collect()
}
