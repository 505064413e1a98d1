// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-topic subscription managers.
//!
//! Every manager owns its cadence and payload construction. The scheduler
//! ticks all of them on each wake; a manager decides for itself whether
//! anything is due.

mod log_stream;
mod node_stats;
mod resource_usage;
mod session_stats;
mod topology;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::client::{ClientId, ClientSink};
use crate::error::Result;
use crate::monitor::MonitorContext;
use crate::protocol::ServerMessage;

pub use log_stream::LogStreamManager;
pub use node_stats::NodeStatsManager;
pub use resource_usage::{derive_ratio, ResourceUsageManager};
pub use session_stats::SessionStatsManager;
pub use topology::TopologyManager;

/// Everything a manager needs during one tick.
pub struct TickContext<'a> {
    pub monitor: &'a MonitorContext,
    pub sink: &'a dyn ClientSink,
    pub client: ClientId,
}

impl TickContext<'_> {
    /// Serialize and send. A serialization failure is returned so the caller
    /// can leave its cadence untouched; a send failure is only logged.
    pub fn deliver(&self, message: &ServerMessage) -> Result<()> {
        let payload = message.to_json()?;
        self.deliver_raw(Arc::from(payload));
        Ok(())
    }

    /// Send an already serialized payload, fire-and-forget.
    pub fn deliver_raw(&self, payload: Arc<str>) {
        if let Err(e) = self.sink.send(payload) {
            tracing::warn!("[Client {}] Send failed: {}", self.client, e);
        }
    }
}

/// Common contract of the topic managers.
pub trait SubscriptionManager: Send {
    fn topic(&self) -> &'static str;

    fn is_active(&self) -> bool;

    /// Shortest cadence this manager needs, `None` when inactive.
    fn interval(&self) -> Option<Duration>;

    /// Called on every scheduler wake; no-op unless something is due.
    fn tick(&mut self, now: Instant, ctx: &TickContext<'_>);

    /// Teardown on session end or disconnect. Must be idempotent.
    fn on_session_end(&mut self, ctx: &TickContext<'_>);
}

/// Interval gate shared by the managers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cadence {
    active: bool,
    interval: Duration,
    last_sent: Option<Instant>,
}

impl Cadence {
    /// (Re)start with a new interval. The next tick is due immediately.
    pub fn start(&mut self, interval: Duration) {
        self.active = true;
        self.interval = interval;
        self.last_sent = None;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn interval(&self) -> Option<Duration> {
        self.active.then_some(self.interval)
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.active
            && self
                .last_sent
                .map_or(true, |sent| now.saturating_duration_since(sent) >= self.interval)
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }
}
