// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-client session actor.
//!
//! Each connected observer gets one task owning its scheduler and managers.
//! The transport feeds it raw messages through a [`ClientConnection`]; the
//! monitor reaches it through [`ClientCommand`]s. Nothing in here awaits a
//! client: outbound payloads go through a non-blocking [`ClientSink`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{MonitorError, Result};
use crate::fields::FieldSelector;
use crate::introspect::PinDirection;
use crate::managers::{
    LogStreamManager, NodeStatsManager, ResourceUsageManager, SessionStatsManager,
    SubscriptionManager, TickContext, TopologyManager,
};
use crate::monitor::MonitorContext;
use crate::protocol::{ClientRequest, NotificationKind, ServerMessage};
use crate::scheduler::TickScheduler;
use crate::timer::sleep_until_armed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound half of a client transport.
///
/// `send` must not block; a slow client may only slow itself.
pub trait ClientSink: Send + Sync {
    fn send(&self, payload: Arc<str>) -> Result<()>;
}

impl ClientSink for mpsc::UnboundedSender<Arc<str>> {
    fn send(&self, payload: Arc<str>) -> Result<()> {
        mpsc::UnboundedSender::send(self, payload)
            .map_err(|_| MonitorError::Transport("client channel closed".into()))
    }
}

/// Commands delivered to a client session.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    /// Raw inbound envelope from the transport.
    Message(String),
    /// The host ended the session.
    SessionEnd,
    /// A topology burst stabilized.
    TopologyChanged { version: u64, payload: Arc<str> },
    Disconnect,
}

/// Transport-facing handle of one connected client.
///
/// Dropping the handle disconnects the client.
pub struct ClientConnection {
    id: ClientId,
    commands: mpsc::UnboundedSender<ClientCommand>,
    disconnected: AtomicBool,
}

impl ClientConnection {
    pub(crate) fn new(id: ClientId, commands: mpsc::UnboundedSender<ClientCommand>) -> Self {
        Self {
            id,
            commands,
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::Acquire) && !self.commands.is_closed()
    }

    /// Hand one raw inbound message to the session.
    pub fn on_client_message(&self, raw: impl Into<String>) {
        if self.disconnected.load(Ordering::Acquire) {
            return;
        }
        if self.commands.send(ClientCommand::Message(raw.into())).is_err() {
            tracing::debug!("[Client {}] Message after session closed, dropping", self.id);
        }
    }

    /// Tear the session down. Safe to call more than once.
    pub fn on_client_disconnect(&self) {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.commands.send(ClientCommand::Disconnect);
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.on_client_disconnect();
    }
}

struct Managers {
    topology: TopologyManager,
    nodes: NodeStatsManager,
    session: SessionStatsManager,
    resources: ResourceUsageManager,
    logs: LogStreamManager,
}

impl Managers {
    fn all(&mut self) -> [&mut dyn SubscriptionManager; 5] {
        [
            &mut self.topology,
            &mut self.nodes,
            &mut self.session,
            &mut self.resources,
            &mut self.logs,
        ]
    }

    fn intervals(&self) -> [Option<Duration>; 5] {
        [
            self.topology.interval(),
            self.nodes.interval(),
            self.session.interval(),
            self.resources.interval(),
            self.logs.interval(),
        ]
    }
}

/// The actor owning one client's scheduler and managers.
pub(crate) struct ClientSession {
    id: ClientId,
    context: Arc<MonitorContext>,
    sink: Box<dyn ClientSink>,
    inbox: mpsc::UnboundedReceiver<ClientCommand>,
    scheduler: TickScheduler,
    managers: Managers,
}

impl ClientSession {
    pub(crate) fn new(
        id: ClientId,
        context: Arc<MonitorContext>,
        sink: Box<dyn ClientSink>,
        inbox: mpsc::UnboundedReceiver<ClientCommand>,
    ) -> Self {
        let config = context.config();
        let managers = Managers {
            topology: TopologyManager::new(),
            nodes: NodeStatsManager::new(),
            session: SessionStatsManager::new(),
            resources: ResourceUsageManager::new(),
            logs: LogStreamManager::new(context.logs().register(), config),
        };
        Self {
            id,
            scheduler: TickScheduler::new(config.tick_ceiling()),
            context,
            sink,
            inbox,
            managers,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!("[Client {}] Session started", self.id);
        loop {
            let wake = self.scheduler.wake_timer();
            let flush = self.managers.logs.flush_timer();
            tokio::select! {
                command = self.inbox.recv() => match command {
                    Some(ClientCommand::Message(raw)) => self.handle_message(&raw),
                    Some(ClientCommand::SessionEnd) => self.end_session(),
                    Some(ClientCommand::TopologyChanged { version, payload }) => {
                        self.push_topology(version, payload)
                    }
                    Some(ClientCommand::Disconnect) | None => break,
                },
                _ = sleep_until_armed(wake) => self.on_wake(),
                _ = sleep_until_armed(flush) => self.on_flush_timer(),
            }
        }
        self.disconnect();
        tracing::debug!("[Client {}] Session closed", self.id);
    }

    fn handle_message(&mut self, raw: &str) {
        let request = match ClientRequest::parse(raw) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("[Client {}] Dropping malformed envelope: {}", self.id, e);
                return;
            }
        };
        self.dispatch(request);
    }

    fn dispatch(&mut self, request: ClientRequest) {
        let now = Instant::now();
        let config = self.context.config();
        let ctx = TickContext {
            monitor: &self.context,
            sink: self.sink.as_ref(),
            client: self.id,
        };
        let managers = &mut self.managers;

        let started = match request {
            ClientRequest::GetAllFilters => {
                let interval = config.topology_interval();
                managers.topology.subscribe(interval, now, &ctx);
                Some(interval)
            }
            ClientRequest::SubscribeFilter {
                idx,
                interval,
                pid_scope,
            } => {
                let interval = config.subscription_interval(interval);
                managers.nodes.subscribe(idx, interval, pid_scope);
                Some(interval)
            }
            ClientRequest::UnsubscribeFilter { idx } => {
                managers.nodes.unsubscribe(idx);
                None
            }
            ClientRequest::SubscribeSession { interval, fields } => {
                match FieldSelector::select(&fields) {
                    Ok(fields) => {
                        let interval = config.subscription_interval(interval);
                        managers.session.subscribe(interval, fields);
                        Some(interval)
                    }
                    Err(e) => {
                        tracing::debug!(
                            "[Client {}] Session subscription rejected: {}",
                            self.id,
                            e
                        );
                        None
                    }
                }
            }
            ClientRequest::UnsubscribeSession => {
                managers.session.unsubscribe();
                None
            }
            ClientRequest::SubscribeCpuStats { interval, fields } => {
                match FieldSelector::select(&fields) {
                    Ok(fields) => {
                        let interval = config.subscription_interval(interval);
                        managers.resources.subscribe(interval, fields);
                        Some(interval)
                    }
                    Err(e) => {
                        tracing::debug!("[Client {}] CPU subscription rejected: {}", self.id, e);
                        None
                    }
                }
            }
            ClientRequest::UnsubscribeCpuStats => {
                managers.resources.unsubscribe();
                None
            }
            ClientRequest::SubscribeLogs { log_level } => {
                managers.logs.subscribe(log_level, &ctx);
                Some(config.log_drain_interval())
            }
            ClientRequest::UnsubscribeLogs => {
                managers.logs.unsubscribe();
                None
            }
            ClientRequest::UpdateLogLevel { log_level } => {
                managers.logs.update_level(log_level, &ctx);
                None
            }
            ClientRequest::GetLogStatus => {
                reply(&ctx, &ServerMessage::LogStatus(managers.logs.status()));
                None
            }
            ClientRequest::GetIpidProps {
                filter_idx,
                ipid_idx,
            } => {
                let properties = self
                    .context
                    .introspector()
                    .lock_for_read()
                    .pin_properties(filter_idx, PinDirection::Input, ipid_idx);
                match properties {
                    Some(properties) => reply(
                        &ctx,
                        &ServerMessage::IpidProps {
                            filter_idx,
                            ipid_idx,
                            properties,
                        },
                    ),
                    None => tracing::debug!(
                        "[Client {}] No input pin {} on node {}",
                        self.id,
                        ipid_idx,
                        filter_idx
                    ),
                }
                None
            }
            ClientRequest::UpdateArg {
                idx,
                name,
                arg_name,
                new_value,
            } => {
                if let Err(e) = self.context.update_argument(idx, &arg_name, &new_value) {
                    tracing::warn!(
                        "[Client {}] Failed to set {}.{} on node {}: {}",
                        self.id,
                        name,
                        arg_name,
                        idx,
                        e
                    );
                }
                None
            }
            ClientRequest::GetCacheStats => {
                reply(&ctx, &ServerMessage::CacheStats(self.context.cache().stats()));
                None
            }
        };

        if let Some(interval) = started {
            self.scheduler.start(now);
            self.scheduler.pull_in(now, interval);
        }
    }

    fn on_wake(&mut self) {
        let now = Instant::now();
        if !self.scheduler.fire_if_due(now) {
            return;
        }

        let ctx = TickContext {
            monitor: &self.context,
            sink: self.sink.as_ref(),
            client: self.id,
        };
        for manager in self.managers.all() {
            manager.tick(now, &ctx);
        }
        self.scheduler.reschedule(now, self.managers.intervals());
    }

    fn on_flush_timer(&mut self) {
        let ctx = TickContext {
            monitor: &self.context,
            sink: self.sink.as_ref(),
            client: self.id,
        };
        self.managers.logs.on_flush_timer(Instant::now(), &ctx);
    }

    fn push_topology(&self, version: u64, payload: Arc<str>) {
        let ctx = TickContext {
            monitor: &self.context,
            sink: self.sink.as_ref(),
            client: self.id,
        };
        ctx.deliver_raw(payload);
        reply(
            &ctx,
            &ServerMessage::Notification {
                kind: NotificationKind::GraphChanged,
                graph_version: version,
            },
        );
    }

    /// Final tick, pending logs, `session_end`, then teardown of every manager.
    fn end_session(&mut self) {
        let now = Instant::now();
        let ctx = TickContext {
            monitor: &self.context,
            sink: self.sink.as_ref(),
            client: self.id,
        };

        for manager in self.managers.all() {
            manager.tick(now, &ctx);
        }
        self.managers.logs.flush_pending(&ctx);
        reply(&ctx, &ServerMessage::SessionEnd);
        for manager in self.managers.all() {
            manager.on_session_end(&ctx);
        }
        self.scheduler.stop();
        tracing::info!("[Client {}] Session ended", self.id);
    }

    fn disconnect(&mut self) {
        let ctx = TickContext {
            monitor: &self.context,
            sink: self.sink.as_ref(),
            client: self.id,
        };
        for manager in self.managers.all() {
            manager.on_session_end(&ctx);
        }
        self.scheduler.stop();
        self.context.unregister_client(self.id);
    }
}

fn reply(ctx: &TickContext<'_>, message: &ServerMessage) {
    if let Err(e) = ctx.deliver(message) {
        tracing::warn!("[Client {}] Reply not sent: {}", ctx.client, e);
    }
}
