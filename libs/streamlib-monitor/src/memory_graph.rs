// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! In-memory graph implementing [`GraphIntrospector`].
//!
//! Useful for hosts without a graph of their own and for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde_json::Value as JsonValue;
use tokio::time::Instant;

use crate::fields::SessionField;
use crate::introspect::{
    GraphIntrospector, GraphView, NodeAttribute, NodeDescriptor, NodeId, PinDirection,
    PinProperties, PinProperty, PinStats, ResourceUsage, TopologyCallback, TopologyEvent,
};

/// One pin of a [`MemoryGraph`] node.
#[derive(Debug, Clone, Default)]
pub struct MemoryPin {
    pub stats: PinStats,
    pub properties: Vec<PinProperty>,
}

impl MemoryPin {
    pub fn new(properties: Vec<PinProperty>) -> Self {
        Self {
            stats: PinStats::default(),
            properties,
        }
    }
}

struct MemoryNode {
    name: String,
    category: String,
    attributes: HashMap<NodeAttribute, JsonValue>,
    arguments: serde_json::Map<String, JsonValue>,
    inputs: Vec<MemoryPin>,
    outputs: Vec<MemoryPin>,
}

impl MemoryNode {
    fn pins(&self, direction: PinDirection) -> &[MemoryPin] {
        match direction {
            PinDirection::Input => &self.inputs,
            PinDirection::Output => &self.outputs,
        }
    }

    fn pins_mut(&mut self, direction: PinDirection) -> &mut Vec<MemoryPin> {
        match direction {
            PinDirection::Input => &mut self.inputs,
            PinDirection::Output => &mut self.outputs,
        }
    }
}

/// Reference graph host.
pub struct MemoryGraph {
    nodes: RwLock<BTreeMap<NodeId, MemoryNode>>,
    next_id: AtomicU64,
    callbacks: RwLock<Vec<TopologyCallback>>,
    usage: Mutex<ResourceUsage>,
    started_at: Instant,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            callbacks: RwLock::new(Vec::new()),
            usage: Mutex::new(ResourceUsage::default()),
            started_at: Instant::now(),
        }
    }

    /// Add a node and notify topology listeners.
    pub fn add_node(
        &self,
        name: impl Into<String>,
        category: impl Into<String>,
        inputs: Vec<MemoryPin>,
        outputs: Vec<MemoryPin>,
    ) -> NodeId {
        let id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let node = MemoryNode {
            name: name.into(),
            category: category.into(),
            attributes: HashMap::new(),
            arguments: serde_json::Map::new(),
            inputs,
            outputs,
        };
        self.nodes.write().insert(id, node);
        self.notify(TopologyEvent::NodeAdded(id));
        id
    }

    /// Remove a node and notify topology listeners. Returns whether it existed.
    pub fn remove_node(&self, id: NodeId) -> bool {
        let removed = self.nodes.write().remove(&id).is_some();
        if removed {
            self.notify(TopologyEvent::NodeRemoved(id));
        }
        removed
    }

    pub fn set_attribute(&self, id: NodeId, attribute: NodeAttribute, value: JsonValue) {
        if let Some(node) = self.nodes.write().get_mut(&id) {
            node.attributes.insert(attribute, value);
        }
    }

    pub fn set_pin_stats(
        &self,
        id: NodeId,
        direction: PinDirection,
        index: usize,
        stats: PinStats,
    ) {
        if let Some(pin) = self
            .nodes
            .write()
            .get_mut(&id)
            .and_then(|node| node.pins_mut(direction).get_mut(index))
        {
            pin.stats = stats;
        }
    }

    pub fn set_resource_usage(&self, usage: ResourceUsage) {
        *self.usage.lock() = usage;
    }

    pub fn argument(&self, id: NodeId, name: &str) -> Option<JsonValue> {
        self.nodes.read().get(&id)?.arguments.get(name).cloned()
    }

    fn notify(&self, event: TopologyEvent) {
        // Snapshot so callbacks may register further callbacks.
        let callbacks: Vec<TopologyCallback> = self.callbacks.read().clone();
        for callback in callbacks {
            callback(event);
        }
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphIntrospector for MemoryGraph {
    fn lock_for_read(&self) -> Box<dyn GraphView + '_> {
        Box::new(MemoryGraphView {
            nodes: self.nodes.read(),
            usage: *self.usage.lock(),
            started_at: self.started_at,
        })
    }

    fn on_topology_change(&self, callback: TopologyCallback) {
        self.callbacks.write().push(callback);
    }

    fn update_argument(&self, id: NodeId, name: &str, value: &JsonValue) -> anyhow::Result<()> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("node {} not found", id))?;
        node.arguments.insert(name.to_string(), value.clone());
        Ok(())
    }
}

struct MemoryGraphView<'a> {
    nodes: RwLockReadGuard<'a, BTreeMap<NodeId, MemoryNode>>,
    usage: ResourceUsage,
    started_at: Instant,
}

impl MemoryGraphView<'_> {
    fn pin(&self, id: NodeId, direction: PinDirection, index: usize) -> Option<&MemoryPin> {
        self.nodes.get(&id)?.pins(direction).get(index)
    }

    fn sum_attribute(&self, attribute: NodeAttribute) -> u64 {
        self.nodes
            .values()
            .filter_map(|node| node.attributes.get(&attribute))
            .filter_map(JsonValue::as_u64)
            .sum()
    }
}

impl GraphView for MemoryGraphView<'_> {
    fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    fn describe(&self, id: NodeId) -> Option<NodeDescriptor> {
        let node = self.nodes.get(&id)?;
        Some(NodeDescriptor {
            idx: id,
            name: node.name.clone(),
            category: node.category.clone(),
            input_count: node.inputs.len(),
            output_count: node.outputs.len(),
        })
    }

    fn attribute(&self, id: NodeId, attribute: NodeAttribute) -> Option<JsonValue> {
        let node = self.nodes.get(&id)?;
        if attribute == NodeAttribute::Arguments {
            return Some(JsonValue::Object(node.arguments.clone()));
        }
        node.attributes.get(&attribute).cloned()
    }

    fn pin_stats(&self, id: NodeId, direction: PinDirection, index: usize) -> Option<PinStats> {
        self.pin(id, direction, index).map(|pin| pin.stats.clone())
    }

    fn pin_properties(
        &self,
        id: NodeId,
        direction: PinDirection,
        index: usize,
    ) -> Option<PinProperties> {
        self.pin(id, direction, index)
            .map(|pin| PinProperties::new(pin.properties.clone()))
    }

    fn session_value(&self, field: SessionField) -> Option<JsonValue> {
        let value = match field {
            SessionField::UptimeMs => {
                JsonValue::from(self.started_at.elapsed().as_millis() as u64)
            }
            SessionField::NodeCount => JsonValue::from(self.nodes.len()),
            SessionField::PinCount => JsonValue::from(
                self.nodes
                    .values()
                    .map(|node| node.inputs.len() + node.outputs.len())
                    .sum::<usize>(),
            ),
            SessionField::BytesProcessed => {
                JsonValue::from(self.sum_attribute(NodeAttribute::BytesProcessed))
            }
            SessionField::PacketsProcessed => {
                JsonValue::from(self.sum_attribute(NodeAttribute::PacketsProcessed))
            }
            SessionField::GraphVersion => return None,
        };
        Some(value)
    }

    fn resource_usage(&self) -> ResourceUsage {
        self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pin(name: &str) -> MemoryPin {
        MemoryPin::new(vec![PinProperty::new(
            "codec",
            "string",
            JsonValue::from(name),
        )])
    }

    #[test]
    fn test_ids_are_monotonic_and_never_reused() {
        let graph = MemoryGraph::new();
        let a = graph.add_node("src", "source", vec![], vec![pin("raw")]);
        let b = graph.add_node("sink", "sink", vec![pin("raw")], vec![]);
        assert!(graph.remove_node(b));
        let c = graph.add_node("sink", "sink", vec![pin("raw")], vec![]);

        assert!(a < b && b < c);
        assert!(!graph.remove_node(b));
    }

    #[test]
    fn test_topology_callbacks_fire() {
        let graph = MemoryGraph::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        graph.on_topology_change(Arc::new(move |event| sink.lock().push(event)));

        let id = graph.add_node("enc", "encoder", vec![], vec![]);
        graph.remove_node(id);

        assert_eq!(
            *seen.lock(),
            vec![TopologyEvent::NodeAdded(id), TopologyEvent::NodeRemoved(id)]
        );
    }

    #[test]
    fn test_view_reads_pins_and_session_values() {
        let graph = MemoryGraph::new();
        let id = graph.add_node("dec", "decoder", vec![pin("h264")], vec![pin("yuv"), pin("yuv")]);
        graph.set_attribute(id, NodeAttribute::BytesProcessed, JsonValue::from(4096u64));
        graph.set_pin_stats(
            id,
            PinDirection::Output,
            1,
            PinStats {
                packets: 7,
                ..Default::default()
            },
        );

        let view = graph.lock_for_read();
        let descriptor = view.describe(id).unwrap();
        assert_eq!(descriptor.input_count, 1);
        assert_eq!(descriptor.output_count, 2);
        assert_eq!(view.pin_stats(id, PinDirection::Output, 1).unwrap().packets, 7);
        assert!(view.pin_stats(id, PinDirection::Input, 3).is_none());

        let props = view.pin_properties(id, PinDirection::Input, 0).unwrap();
        assert_eq!(props.iter().count(), 1);
        assert_eq!(props.iter().count(), 1);

        assert_eq!(view.session_value(SessionField::PinCount), Some(JsonValue::from(3)));
        assert_eq!(
            view.session_value(SessionField::BytesProcessed),
            Some(JsonValue::from(4096u64))
        );
        assert_eq!(view.session_value(SessionField::GraphVersion), None);
    }

    #[test]
    fn test_update_argument() {
        let graph = MemoryGraph::new();
        let id = graph.add_node("enc", "encoder", vec![], vec![]);

        graph
            .update_argument(id, "bitrate", &JsonValue::from(2_000_000))
            .unwrap();
        assert_eq!(graph.argument(id, "bitrate"), Some(JsonValue::from(2_000_000)));
        assert!(graph
            .update_argument(NodeId(999), "bitrate", &JsonValue::Null)
            .is_err());
    }
}
