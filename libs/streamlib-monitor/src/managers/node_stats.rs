// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Map;
use tokio::time::Instant;

use crate::introspect::{GraphView, NodeAttribute, NodeId, PinDirection};
use crate::protocol::{NodeStatsPayload, PinScope, PinStatsEntry, ServerMessage};

use super::{Cadence, SubscriptionManager, TickContext};

#[derive(Debug, Clone, Copy)]
struct NodeSubscription {
    cadence: Cadence,
    scope: PinScope,
}

/// Per-node statistics, one subscription per target node.
#[derive(Debug, Default)]
pub struct NodeStatsManager {
    subscriptions: BTreeMap<NodeId, NodeSubscription>,
}

impl NodeStatsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `id`, replacing any existing subscription for it.
    pub fn subscribe(&mut self, id: NodeId, interval: Duration, scope: PinScope) {
        let mut cadence = Cadence::default();
        cadence.start(interval);
        self.subscriptions.insert(id, NodeSubscription { cadence, scope });
    }

    pub fn unsubscribe(&mut self, id: NodeId) {
        self.subscriptions.remove(&id);
    }

    pub fn is_subscribed(&self, id: NodeId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    pub fn last_sent(&self, id: NodeId) -> Option<Instant> {
        self.subscriptions.get(&id)?.cadence.last_sent()
    }
}

impl SubscriptionManager for NodeStatsManager {
    fn topic(&self) -> &'static str {
        "filter_stats"
    }

    fn is_active(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    fn interval(&self) -> Option<Duration> {
        self.subscriptions
            .values()
            .filter_map(|sub| sub.cadence.interval())
            .min()
    }

    fn tick(&mut self, now: Instant, ctx: &TickContext<'_>) {
        let due: Vec<(NodeId, PinScope)> = self
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.cadence.is_due(now))
            .map(|(id, sub)| (*id, sub.scope))
            .collect();
        if due.is_empty() {
            return;
        }

        // Read window: only the due nodes, only their requested pins.
        let payloads: Vec<(NodeId, Option<NodeStatsPayload>)> = {
            let view = ctx.monitor.introspector().lock_for_read();
            due.iter()
                .map(|(id, scope)| (*id, collect_node_stats(view.as_ref(), *id, *scope)))
                .collect()
        };

        for (id, payload) in payloads {
            let Some(payload) = payload else {
                tracing::trace!("[NodeStatsManager] Node {} gone, skipping tick", id);
                continue;
            };
            match ctx.deliver(&ServerMessage::FilterStats(payload)) {
                Ok(()) => {
                    if let Some(sub) = self.subscriptions.get_mut(&id) {
                        sub.cadence.mark_sent(now);
                    }
                }
                Err(e) => {
                    tracing::warn!("[NodeStatsManager] Stats for node {} not sent: {}", id, e);
                }
            }
        }
    }

    fn on_session_end(&mut self, _ctx: &TickContext<'_>) {
        self.subscriptions.clear();
    }
}

/// Build the stats of one node, restricted to `scope`. `None` if the node is gone.
pub(crate) fn collect_node_stats(
    view: &dyn GraphView,
    id: NodeId,
    scope: PinScope,
) -> Option<NodeStatsPayload> {
    let descriptor = view.describe(id)?;

    let mut stats = Map::new();
    for attribute in NodeAttribute::STATS {
        if let Some(value) = view.attribute(id, *attribute) {
            stats.insert(attribute.as_str().to_string(), value);
        }
    }

    let pins = |direction: PinDirection, count: usize| -> Option<Vec<PinStatsEntry>> {
        scope.includes(direction).then(|| {
            (0..count)
                .filter_map(|index| {
                    view.pin_stats(id, direction, index)
                        .map(|stats| PinStatsEntry { index, stats })
                })
                .collect()
        })
    };

    Some(NodeStatsPayload {
        idx: id,
        name: descriptor.name,
        stats,
        ipids: pins(PinDirection::Input, descriptor.input_count),
        opids: pins(PinDirection::Output, descriptor.output_count),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{GraphIntrospector, PinStats};
    use crate::memory_graph::{MemoryGraph, MemoryPin};

    #[test]
    fn test_collect_respects_scope() {
        let graph = MemoryGraph::new();
        let id = graph.add_node(
            "dec",
            "decoder",
            vec![MemoryPin::default()],
            vec![MemoryPin::default(), MemoryPin::default()],
        );
        graph.set_pin_stats(
            id,
            PinDirection::Input,
            0,
            PinStats {
                bytes: 10,
                ..Default::default()
            },
        );

        let view = graph.lock_for_read();
        let inputs = collect_node_stats(view.as_ref(), id, PinScope::Inputs).unwrap();
        assert_eq!(inputs.ipids.as_ref().map(Vec::len), Some(1));
        assert!(inputs.opids.is_none());

        let outputs = collect_node_stats(view.as_ref(), id, PinScope::Outputs).unwrap();
        assert!(outputs.ipids.is_none());
        assert_eq!(outputs.opids.as_ref().map(Vec::len), Some(2));

        assert!(collect_node_stats(view.as_ref(), NodeId(42), PinScope::Both).is_none());
    }

    #[test]
    fn test_interval_is_fastest_subscription() {
        let mut manager = NodeStatsManager::new();
        assert_eq!(manager.interval(), None);

        manager.subscribe(NodeId(1), Duration::from_millis(1000), PinScope::Both);
        manager.subscribe(NodeId(2), Duration::from_millis(250), PinScope::Inputs);
        assert_eq!(manager.interval(), Some(Duration::from_millis(250)));

        manager.unsubscribe(NodeId(2));
        assert_eq!(manager.interval(), Some(Duration::from_millis(1000)));
        assert!(!manager.is_subscribed(NodeId(2)));
    }
}
