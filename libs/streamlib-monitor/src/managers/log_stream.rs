// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{MonitorConfig, RetentionRatios};
use crate::logs::{evict, LogEntry, LogLevel, LogQueue};
use crate::protocol::{LogStatus, ServerMessage};
use crate::timer::OneShotTimer;

use super::{Cadence, SubscriptionManager, TickContext};

#[derive(Debug, Clone, Copy)]
struct FlushPolicy {
    verbose_threshold: usize,
    quiet_threshold: usize,
    verbose_delay: Duration,
    quiet_delay: Duration,
}

impl FlushPolicy {
    fn from_config(config: &MonitorConfig) -> Self {
        Self {
            verbose_threshold: config.log_verbose_batch_threshold,
            quiet_threshold: config.log_quiet_batch_threshold,
            verbose_delay: Duration::from_millis(config.log_verbose_flush_delay_ms),
            quiet_delay: Duration::from_millis(config.log_quiet_flush_delay_ms),
        }
    }

    fn threshold(&self, verbose: bool) -> usize {
        if verbose {
            self.verbose_threshold
        } else {
            self.quiet_threshold
        }
    }

    fn delay(&self, verbose: bool) -> Duration {
        if verbose {
            self.verbose_delay
        } else {
            self.quiet_delay
        }
    }
}

/// Streams captured log lines to one client in adaptive batches.
///
/// Each drain moves the client's incoming queue into the bounded history and
/// the outbound batch. Chatty (debug/info) drains flush sooner and in smaller
/// batches than quiet ones. The delayed flush is a [`OneShotTimer`] owned
/// here and driven by the client loop through [`LogStreamManager::on_flush_timer`].
pub struct LogStreamManager {
    queue: Arc<LogQueue>,
    drain: Cadence,
    drain_interval: Duration,
    level: LogLevel,
    subscribed_before: bool,
    history: Vec<LogEntry>,
    capacity: usize,
    retention: RetentionRatios,
    batch: Vec<LogEntry>,
    flush_timer: OneShotTimer,
    policy: FlushPolicy,
}

impl LogStreamManager {
    pub fn new(queue: Arc<LogQueue>, config: &MonitorConfig) -> Self {
        Self {
            queue,
            drain: Cadence::default(),
            drain_interval: config.log_drain_interval(),
            level: LogLevel::default(),
            subscribed_before: false,
            history: Vec::with_capacity(config.log_history_capacity),
            capacity: config.log_history_capacity,
            retention: config.log_retention,
            batch: Vec::new(),
            flush_timer: OneShotTimer::Idle,
            policy: FlushPolicy::from_config(config),
        }
    }

    /// Start capturing at `level`.
    ///
    /// A client that subscribed before first gets its own retained history
    /// at the new level as one batch.
    pub fn subscribe(&mut self, level: LogLevel, ctx: &TickContext<'_>) {
        self.level = level;
        self.queue.set_level(level);
        self.queue.set_capturing(true);
        self.drain.start(self.drain_interval);

        if self.subscribed_before {
            self.batch = self
                .history
                .iter()
                .filter(|entry| level.allows(entry.level))
                .cloned()
                .collect();
            self.flush(ctx);
        }
        self.subscribed_before = true;
    }

    /// Stop capturing. Anything not yet flushed is dropped.
    pub fn unsubscribe(&mut self) {
        self.queue.set_capturing(false);
        self.queue.drain();
        self.drain.stop();
        self.batch.clear();
        self.flush_timer.disarm();
    }

    /// Change the capture level and confirm it to the client.
    pub fn update_level(&mut self, level: LogLevel, ctx: &TickContext<'_>) {
        self.level = level;
        self.queue.set_level(level);
        if let Err(e) = ctx.deliver(&ServerMessage::LogConfigChanged { log_level: level }) {
            tracing::warn!("[LogStreamManager] Level change not confirmed: {}", e);
        }
    }

    pub fn status(&self) -> LogStatus {
        LogStatus {
            log_level: self.level,
            subscribed: self.drain.is_active(),
            history_len: self.history.len(),
            capacity: self.capacity,
            pending: self.queue.pending() + self.batch.len(),
        }
    }

    pub fn history(&self) -> &[LogEntry] {
        &self.history
    }

    pub fn flush_timer(&self) -> OneShotTimer {
        self.flush_timer
    }

    /// Flush if the delayed flush is due. Called when the flush timer wakes the client.
    pub fn on_flush_timer(&mut self, now: Instant, ctx: &TickContext<'_>) {
        if self.flush_timer.fire_if_due(now) {
            self.flush(ctx);
        }
    }

    /// Send the pending batch now. A batch that fails to serialize is kept for the next flush.
    pub fn flush(&mut self, ctx: &TickContext<'_>) {
        self.flush_timer.disarm();
        if self.batch.is_empty() {
            return;
        }

        let message = ServerMessage::LogBatch {
            logs: std::mem::take(&mut self.batch),
        };
        if let Err(e) = ctx.deliver(&message) {
            tracing::warn!("[LogStreamManager] Batch flush failed: {}", e);
            if let ServerMessage::LogBatch { logs } = message {
                self.batch = logs;
            }
        }
    }

    /// Drain whatever is queued, regardless of cadence, and flush it.
    pub fn flush_pending(&mut self, ctx: &TickContext<'_>) {
        if !self.drain.is_active() {
            return;
        }
        let drained = self.queue.drain();
        if !drained.is_empty() {
            self.ingest(drained);
        }
        self.flush(ctx);
    }

    fn ingest(&mut self, mut drained: Vec<LogEntry>) -> bool {
        drained.sort_by_key(LogEntry::sort_key);
        let verbose = drained.iter().any(|entry| entry.level.is_verbose());
        for entry in drained {
            if self.history.len() >= self.capacity {
                evict(&mut self.history, self.capacity, &self.retention);
            }
            self.history.push(entry.clone());
            self.batch.push(entry);
        }
        verbose
    }
}

impl SubscriptionManager for LogStreamManager {
    fn topic(&self) -> &'static str {
        "logs"
    }

    fn is_active(&self) -> bool {
        self.drain.is_active()
    }

    fn interval(&self) -> Option<Duration> {
        self.drain.interval()
    }

    fn tick(&mut self, now: Instant, ctx: &TickContext<'_>) {
        if !self.drain.is_due(now) {
            return;
        }
        self.drain.mark_sent(now);

        let drained = self.queue.drain();
        if drained.is_empty() {
            return;
        }

        let verbose = self.ingest(drained);
        if self.batch.len() >= self.policy.threshold(verbose) {
            self.flush(ctx);
        } else {
            self.flush_timer.arm_if_idle(now, self.policy.delay(verbose));
        }
    }

    fn on_session_end(&mut self, _ctx: &TickContext<'_>) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SerializationCache;
    use crate::client::ClientId;
    use crate::logs::LogHub;
    use crate::memory_graph::MemoryGraph;
    use crate::monitor::MonitorContext;
    use serde_json::Value as JsonValue;
    use tokio::sync::mpsc;

    struct Fixture {
        context: MonitorContext,
        sink: mpsc::UnboundedSender<Arc<str>>,
        sent: mpsc::UnboundedReceiver<Arc<str>>,
    }

    impl Fixture {
        fn new(config: MonitorConfig) -> Self {
            let (sink, sent) = mpsc::unbounded_channel();
            let context = MonitorContext::new(Arc::new(MemoryGraph::new()), config)
                .with_cache(Arc::new(SerializationCache::new()));
            Self { context, sink, sent }
        }

        fn ctx(&self) -> TickContext<'_> {
            TickContext {
                monitor: &self.context,
                sink: &self.sink,
                client: ClientId(1),
            }
        }

        fn hub(&self) -> &LogHub {
            self.context.logs()
        }

        fn next(&mut self) -> Option<JsonValue> {
            self.sent
                .try_recv()
                .ok()
                .map(|raw| serde_json::from_str(&raw).unwrap())
        }
    }

    #[test]
    fn test_verbose_burst_flushes_immediately() {
        let mut fx = Fixture::new(MonitorConfig::default());
        let mut manager = LogStreamManager::new(fx.hub().register(), fx.context.config());
        let now = Instant::now();
        manager.subscribe(LogLevel::Debug, &fx.ctx());

        for i in 0..25 {
            fx.hub().emit("decoder", LogLevel::Debug, format!("frame {}", i), None);
        }
        manager.tick(now, &fx.ctx());

        let batch = fx.next().expect("batch");
        assert_eq!(batch["message"], "log_batch");
        assert_eq!(batch["logs"].as_array().unwrap().len(), 25);
        assert!(!manager.flush_timer().is_armed());
    }

    #[test]
    fn test_quiet_burst_waits_for_timer() {
        let mut fx = Fixture::new(MonitorConfig::default());
        let mut manager = LogStreamManager::new(fx.hub().register(), fx.context.config());
        let now = Instant::now();
        manager.subscribe(LogLevel::Info, &fx.ctx());

        for i in 0..10 {
            fx.hub().emit("encoder", LogLevel::Error, format!("overflow {}", i), None);
        }
        manager.tick(now, &fx.ctx());
        assert!(fx.next().is_none());
        assert_eq!(
            manager.flush_timer().deadline(),
            Some(now + Duration::from_millis(250))
        );

        manager.on_flush_timer(now + Duration::from_millis(249), &fx.ctx());
        assert!(fx.next().is_none());

        manager.on_flush_timer(now + Duration::from_millis(250), &fx.ctx());
        let batch = fx.next().expect("batch");
        assert_eq!(batch["logs"].as_array().unwrap().len(), 10);
    }

    #[test]
    fn test_pending_flush_is_not_rearmed() {
        let mut fx = Fixture::new(MonitorConfig::default());
        let mut manager = LogStreamManager::new(fx.hub().register(), fx.context.config());
        let now = Instant::now();
        manager.subscribe(LogLevel::Debug, &fx.ctx());

        fx.hub().emit("mux", LogLevel::Warning, "late packet", None);
        manager.tick(now, &fx.ctx());
        let first = manager.flush_timer().deadline();

        let later = now + Duration::from_millis(100);
        fx.hub().emit("mux", LogLevel::Info, "resync", None);
        manager.tick(later, &fx.ctx());
        assert_eq!(manager.flush_timer().deadline(), first);
    }

    #[test]
    fn test_history_stays_bounded() {
        let config = MonitorConfig {
            log_history_capacity: 10,
            ..MonitorConfig::default()
        };
        let fx = Fixture::new(config);
        let mut manager = LogStreamManager::new(fx.hub().register(), fx.context.config());
        let mut now = Instant::now();
        manager.subscribe(LogLevel::Debug, &fx.ctx());

        for round in 0..5 {
            for i in 0..7 {
                fx.hub().emit("demux", LogLevel::Debug, format!("{}:{}", round, i), None);
            }
            manager.tick(now, &fx.ctx());
            assert!(manager.history().len() <= 10);
            now += Duration::from_millis(100);
        }
    }

    #[test]
    fn test_resubscribe_replays_own_history_at_level() {
        let mut fx = Fixture::new(MonitorConfig::default());
        let mut manager = LogStreamManager::new(fx.hub().register(), fx.context.config());
        let now = Instant::now();
        manager.subscribe(LogLevel::Debug, &fx.ctx());
        assert!(fx.next().is_none());

        fx.hub().emit("src", LogLevel::Error, "gone", None);
        fx.hub().emit("src", LogLevel::Debug, "chatter", None);
        manager.tick(now, &fx.ctx());
        manager.flush(&fx.ctx());
        fx.next().expect("first batch");

        manager.unsubscribe();
        manager.subscribe(LogLevel::Warning, &fx.ctx());
        let replay = fx.next().expect("replay");
        let logs = replay["logs"].as_array().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["level"], "error");
    }

    #[test]
    fn test_update_level_confirms() {
        let mut fx = Fixture::new(MonitorConfig::default());
        let mut manager = LogStreamManager::new(fx.hub().register(), fx.context.config());
        manager.subscribe(LogLevel::Info, &fx.ctx());

        manager.update_level(LogLevel::Error, &fx.ctx());
        let reply = fx.next().expect("reply");
        assert_eq!(reply["message"], "log_config_changed");
        assert_eq!(reply["logLevel"], "error");
        assert_eq!(manager.status().log_level, LogLevel::Error);

        fx.hub().emit("src", LogLevel::Warning, "filtered", None);
        assert_eq!(manager.status().pending, 0);
    }
}
