// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::time::Duration;

use serde_json::{Map, Value as JsonValue};
use tokio::time::Instant;

use crate::fields::{FieldKey, FieldSelector, SessionField};
use crate::protocol::ServerMessage;

use super::{Cadence, SubscriptionManager, TickContext};

/// Session-wide counters projected onto the client's field selection.
#[derive(Debug)]
pub struct SessionStatsManager {
    cadence: Cadence,
    fields: FieldSelector<SessionField>,
}

impl Default for SessionStatsManager {
    fn default() -> Self {
        Self {
            cadence: Cadence::default(),
            fields: FieldSelector::all(),
        }
    }
}

impl SessionStatsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, interval: Duration, fields: FieldSelector<SessionField>) {
        self.fields = fields;
        self.cadence.start(interval);
    }

    pub fn unsubscribe(&mut self) {
        self.cadence.stop();
    }

    fn build(&self, ctx: &TickContext<'_>) -> Map<String, JsonValue> {
        let mut stats = Map::new();
        let view = ctx.monitor.introspector().lock_for_read();
        for field in self.fields.iter() {
            let value = match field {
                SessionField::GraphVersion => Some(JsonValue::from(ctx.monitor.graph_version())),
                other => view.session_value(other),
            };
            if let Some(value) = value {
                stats.insert(field.as_str().to_string(), value);
            }
        }
        stats
    }
}

impl SubscriptionManager for SessionStatsManager {
    fn topic(&self) -> &'static str {
        "session_stats"
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
        let stats = self.build(ctx);
        match ctx.deliver(&ServerMessage::SessionStats { stats }) {
            Ok(()) => self.cadence.mark_sent(now),
            Err(e) => tracing::warn!("[SessionStatsManager] Tick failed: {}", e),
        }
    }

    fn on_session_end(&mut self, _ctx: &TickContext<'_>) {
        self.cadence.stop();
    }
}
