// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::time::Duration;

use tokio::time::Instant;

use super::{Cadence, SubscriptionManager, TickContext};

/// Fans the full node list out to one client.
///
/// The payload comes from the shared cache, so many clients on overlapping
/// ticks cost one enumeration and one serialization.
#[derive(Debug, Default)]
pub struct TopologyManager {
    cadence: Cadence,
}

impl TopologyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the subscription and answer with an immediate
    /// snapshot, independent of the interval.
    pub fn subscribe(&mut self, interval: Duration, now: Instant, ctx: &TickContext<'_>) {
        self.cadence.start(interval);
        self.send_snapshot(now, ctx);
    }

    pub fn unsubscribe(&mut self) {
        self.cadence.stop();
    }

    fn send_snapshot(&mut self, now: Instant, ctx: &TickContext<'_>) {
        match ctx.monitor.topology_payload() {
            Ok(payload) => {
                ctx.deliver_raw(payload);
                self.cadence.mark_sent(now);
            }
            Err(e) => {
                tracing::warn!(
                    "[TopologyManager] Snapshot for client {} failed: {}",
                    ctx.client,
                    e
                );
            }
        }
    }
}

impl SubscriptionManager for TopologyManager {
    fn topic(&self) -> &'static str {
        "filters"
    }

    fn is_active(&self) -> bool {
        self.cadence.is_active()
    }

    fn interval(&self) -> Option<Duration> {
        self.cadence.interval()
    }

    fn tick(&mut self, now: Instant, ctx: &TickContext<'_>) {
        if self.cadence.is_due(now) {
            self.send_snapshot(now, ctx);
        }
    }

    fn on_session_end(&mut self, _ctx: &TickContext<'_>) {
        self.cadence.stop();
    }
}
