// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Debounced topology change detection.
//!
//! Add/remove events from the host arrive in bursts. The detector waits for
//! the burst to settle (or for the max wait to run out) and then pushes one
//! fresh node list plus a `graph_changed` notification to every client.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::client::ClientCommand;
use crate::monitor::MonitorContext;

/// Outcome of one debounce re-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recheck {
    /// The burst is over: stabilize now.
    Stabilize,
    /// Still settling: check again after this delay.
    Wait(Duration),
    /// Nothing pending.
    Idle,
}

/// Burst bookkeeping. Only one re-check task exists per burst.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DebounceState {
    dirty: bool,
    armed: bool,
    last_event: Option<Instant>,
    first_event: Option<Instant>,
}

impl DebounceState {
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Record an event. Returns `true` when the caller must start the re-check task.
    pub fn on_event(&mut self, now: Instant) -> bool {
        self.dirty = true;
        self.last_event = Some(now);
        if self.first_event.is_none() {
            self.first_event = Some(now);
        }
        if self.armed {
            return false;
        }
        self.armed = true;
        true
    }

    pub fn poll(
        &mut self,
        now: Instant,
        window: Duration,
        max_wait: Duration,
        quantum: Duration,
    ) -> Recheck {
        let (true, Some(last), Some(first)) = (self.dirty, self.last_event, self.first_event)
        else {
            *self = Self::default();
            return Recheck::Idle;
        };

        let quiet = now.saturating_duration_since(last) >= window;
        let overdue = now.saturating_duration_since(first) >= max_wait;
        if quiet || overdue {
            *self = Self::default();
            Recheck::Stabilize
        } else {
            Recheck::Wait(quantum)
        }
    }
}

/// Turns raw topology events into debounced stabilizations.
pub struct ChangeDetector {
    state: Arc<Mutex<DebounceState>>,
    context: Arc<MonitorContext>,
    handle: Handle,
}

impl ChangeDetector {
    pub fn new(context: Arc<MonitorContext>, handle: Handle) -> Self {
        Self {
            state: Arc::new(Mutex::new(DebounceState::default())),
            context,
            handle,
        }
    }

    pub fn state(&self) -> DebounceState {
        *self.state.lock()
    }

    /// Called for every node add/remove. Safe from any thread.
    pub fn notify_topology_event(&self) {
        let arm = self.state.lock().on_event(Instant::now());
        if !arm {
            return;
        }

        tracing::trace!("[ChangeDetector] Burst started, arming re-check");
        let state = Arc::clone(&self.state);
        let context = Arc::clone(&self.context);
        self.handle.spawn(async move {
            run_recheck(state, context).await;
        });
    }
}

async fn run_recheck(state: Arc<Mutex<DebounceState>>, context: Arc<MonitorContext>) {
    let config = context.config();
    let (window, max_wait, quantum) = (
        config.debounce_window(),
        config.max_wait(),
        config.debounce_poll(),
    );

    let mut delay = window;
    loop {
        tokio::time::sleep(delay).await;
        let decision = state.lock().poll(Instant::now(), window, max_wait, quantum);
        match decision {
            Recheck::Stabilize => {
                stabilize(&context);
                return;
            }
            Recheck::Wait(next) => delay = next,
            Recheck::Idle => return,
        }
    }
}

/// Rebuild the node list, bump the graph version and push both to every client.
///
/// Skipped entirely when nobody is connected. The version advances only after
/// the payload is built.
pub(crate) fn stabilize(context: &MonitorContext) {
    if context.client_count() == 0 {
        tracing::debug!("[ChangeDetector] No clients connected, skipping stabilization");
        return;
    }

    context.cache().clear(Some(context.topology_key()));

    let payload = match context.topology_payload() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(
                "[ChangeDetector] Failed to build node list, graph version stays at {}: {}",
                context.graph_version(),
                e
            );
            return;
        }
    };

    let version = context.bump_graph_version();
    let delivered = context.broadcast(ClientCommand::TopologyChanged { version, payload });
    tracing::debug!(
        "[ChangeDetector] Graph version {} pushed to {} client(s)",
        version,
        delivered
    );
}
