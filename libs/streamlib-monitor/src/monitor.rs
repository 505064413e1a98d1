// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Monitor facade and the context shared by every client session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::cache::{topology_key, CacheStats, SerializationCache};
use crate::client::{ClientCommand, ClientConnection, ClientId, ClientSession, ClientSink};
use crate::config::MonitorConfig;
use crate::detector::ChangeDetector;
use crate::error::{MonitorError, Result};
use crate::introspect::{snapshot_topology, GraphIntrospector, NodeId};
use crate::logs::{LogCaptureLayer, LogHub, LogLevel};
use crate::protocol::ServerMessage;

static NEXT_MONITOR_ID: AtomicU64 = AtomicU64::new(1);

/// State shared by the detector and every client session.
///
/// Passed explicitly instead of living in statics; only the serialization
/// cache defaults to the process-wide instance.
pub struct MonitorContext {
    id: u64,
    topology_key: String,
    introspector: Arc<dyn GraphIntrospector>,
    cache: Arc<SerializationCache>,
    config: MonitorConfig,
    logs: Arc<LogHub>,
    clients: RwLock<HashMap<ClientId, mpsc::UnboundedSender<ClientCommand>>>,
    graph_version: AtomicU64,
    next_client_id: AtomicU64,
}

impl MonitorContext {
    pub fn new(introspector: Arc<dyn GraphIntrospector>, config: MonitorConfig) -> Self {
        let logs = Arc::new(LogHub::new(config.log_message_max_len));
        let id = NEXT_MONITOR_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            topology_key: topology_key(id),
            introspector,
            cache: SerializationCache::global(),
            config,
            logs,
            clients: RwLock::new(HashMap::new()),
            graph_version: AtomicU64::new(0),
            next_client_id: AtomicU64::new(1),
        }
    }

    /// Use a private cache instead of the process-wide one.
    pub fn with_cache(mut self, cache: Arc<SerializationCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Process-unique id, used to namespace this monitor's cache keys.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topology_key(&self) -> &str {
        &self.topology_key
    }

    pub fn introspector(&self) -> &dyn GraphIntrospector {
        self.introspector.as_ref()
    }

    pub fn cache(&self) -> &SerializationCache {
        &self.cache
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn logs(&self) -> &Arc<LogHub> {
        &self.logs
    }

    pub fn graph_version(&self) -> u64 {
        self.graph_version.load(Ordering::Acquire)
    }

    pub(crate) fn bump_graph_version(&self) -> u64 {
        self.graph_version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Serialized `filters` message, shared through the cache.
    ///
    /// The graph lock is held for the enumeration only.
    pub fn topology_payload(&self) -> Result<Arc<str>> {
        self.cache
            .get_or_compute(&self.topology_key, self.config.topology_cache_max_age(), || {
                let filters = {
                    let view = self.introspector.lock_for_read();
                    snapshot_topology(view.as_ref())
                };
                ServerMessage::Filters { filters }.to_json()
            })
    }

    pub fn update_argument(&self, id: NodeId, name: &str, value: &JsonValue) -> Result<()> {
        self.introspector
            .update_argument(id, name, value)
            .map_err(MonitorError::from)
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    pub(crate) fn register_client(
        &self,
        commands: mpsc::UnboundedSender<ClientCommand>,
    ) -> ClientId {
        let id = ClientId(self.next_client_id.fetch_add(1, Ordering::Relaxed));
        self.clients.write().insert(id, commands);
        id
    }

    pub(crate) fn unregister_client(&self, id: ClientId) {
        if self.clients.write().remove(&id).is_some() {
            tracing::debug!("[Monitor] Client {} unregistered", id);
        }
    }

    /// Send a command to every client. Returns how many accepted it.
    pub(crate) fn broadcast(&self, command: ClientCommand) -> usize {
        self.clients
            .read()
            .values()
            .filter(|commands| commands.send(command.clone()).is_ok())
            .count()
    }
}

/// Builder for [`Monitor`].
pub struct MonitorBuilder {
    introspector: Arc<dyn GraphIntrospector>,
    config: MonitorConfig,
    cache: Option<Arc<SerializationCache>>,
    handle: Option<Handle>,
}

impl MonitorBuilder {
    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache(mut self, cache: Arc<SerializationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Runtime for the client sessions and debounce tasks. Defaults to the current one.
    pub fn handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn build(self) -> Result<Monitor> {
        self.config.validate()?;
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| {
                MonitorError::Configuration(format!("Monitor requires a tokio runtime: {}", e))
            })?,
        };

        let mut context = MonitorContext::new(self.introspector, self.config);
        if let Some(cache) = self.cache {
            context = context.with_cache(cache);
        }
        let context = Arc::new(context);
        let detector = Arc::new(ChangeDetector::new(Arc::clone(&context), handle.clone()));

        Ok(Monitor {
            context,
            detector,
            handle,
        })
    }

    /// Build and register the change detector on the introspector's topology callback.
    pub fn attach(self) -> Result<Monitor> {
        let monitor = self.build()?;
        let detector = Arc::downgrade(&monitor.detector);
        monitor
            .context
            .introspector()
            .on_topology_change(Arc::new(move |event| {
                tracing::trace!("[Monitor] Topology event {:?}", event);
                if let Some(detector) = detector.upgrade() {
                    detector.notify_topology_event();
                }
            }));
        tracing::info!("[Monitor] Attached to graph introspector");
        Ok(monitor)
    }
}

/// Live session monitor for one processing graph.
pub struct Monitor {
    context: Arc<MonitorContext>,
    detector: Arc<ChangeDetector>,
    handle: Handle,
}

impl Monitor {
    pub fn builder(introspector: Arc<dyn GraphIntrospector>) -> MonitorBuilder {
        MonitorBuilder {
            introspector,
            config: MonitorConfig::default(),
            cache: None,
            handle: None,
        }
    }

    /// Build a monitor wired to the introspector's topology events.
    pub fn attach(introspector: Arc<dyn GraphIntrospector>, config: MonitorConfig) -> Result<Self> {
        Self::builder(introspector).config(config).attach()
    }

    pub fn context(&self) -> &Arc<MonitorContext> {
        &self.context
    }

    pub fn config(&self) -> &MonitorConfig {
        self.context.config()
    }

    /// Start a session for a newly connected client.
    pub fn connect(&self, sink: impl ClientSink + 'static) -> ClientConnection {
        let (commands, inbox) = mpsc::unbounded_channel();
        let id = self.context.register_client(commands.clone());
        let session = ClientSession::new(id, Arc::clone(&self.context), Box::new(sink), inbox);
        self.handle.spawn(session.run());
        tracing::info!("[Monitor] Client {} connected", id);
        ClientConnection::new(id, commands)
    }

    /// Feed one node add/remove event to the change detector.
    pub fn notify_topology_event(&self) {
        self.detector.notify_topology_event();
    }

    /// Tell every client the host session is over.
    pub fn end_session(&self) {
        let notified = self.context.broadcast(ClientCommand::SessionEnd);
        tracing::info!("[Monitor] Session end sent to {} client(s)", notified);
    }

    /// Record one log line for subscribed clients. Never blocks.
    pub fn emit(
        &self,
        tool: &str,
        level: LogLevel,
        message: impl Into<String>,
        origin: Option<&str>,
    ) {
        self.context.logs().emit(tool, level, message, origin);
    }

    /// `tracing` layer feeding host log events into [`Monitor::emit`].
    pub fn capture_layer(&self) -> LogCaptureLayer {
        LogCaptureLayer::new(Arc::clone(self.context.logs()))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.context.cache().stats()
    }

    pub fn client_count(&self) -> usize {
        self.context.client_count()
    }

    pub fn graph_version(&self) -> u64 {
        self.context.graph_version()
    }
}
