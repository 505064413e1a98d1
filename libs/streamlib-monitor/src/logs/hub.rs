// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Non-blocking log ingestion and per-client fan-out.
//!
//! `emit` may run synchronously inside the host's logging call, so it only
//! truncates, timestamps and pushes onto lock-free queues. Draining,
//! retention and batching happen later on each client's tick.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_queue::SegQueue;
use parking_lot::RwLock;

use super::entry::{truncate_message, LogEntry, LogLevel};

/// Incoming queue of one client.
pub struct LogQueue {
    incoming: SegQueue<LogEntry>,
    capturing: AtomicBool,
    level: AtomicU8,
}

impl LogQueue {
    fn new() -> Self {
        Self {
            incoming: SegQueue::new(),
            capturing: AtomicBool::new(false),
            level: AtomicU8::new(LogLevel::default().to_u8()),
        }
    }

    /// Start or stop accepting entries.
    pub fn set_capturing(&self, capturing: bool) {
        self.capturing.store(capturing, Ordering::Release);
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Acquire)
    }

    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level.to_u8(), Ordering::Release);
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Acquire))
    }

    pub fn pending(&self) -> usize {
        self.incoming.len()
    }

    /// Move everything queued so far out of the queue.
    pub fn drain(&self) -> Vec<LogEntry> {
        let mut drained = Vec::with_capacity(self.incoming.len());
        while let Some(entry) = self.incoming.pop() {
            drained.push(entry);
        }
        drained
    }

    fn accepts(&self, level: LogLevel) -> bool {
        self.is_capturing() && self.level().allows(level)
    }
}

/// Fan-out point for every log line the monitor sees.
pub struct LogHub {
    queues: RwLock<Vec<Weak<LogQueue>>>,
    max_message_len: usize,
    seq: AtomicU64,
}

impl LogHub {
    pub fn new(max_message_len: usize) -> Self {
        Self {
            queues: RwLock::new(Vec::new()),
            max_message_len,
            seq: AtomicU64::new(0),
        }
    }

    /// Create a queue for one client. It stops receiving once dropped.
    pub fn register(&self) -> Arc<LogQueue> {
        let queue = Arc::new(LogQueue::new());
        let mut queues = self.queues.write();
        queues.retain(|weak| weak.strong_count() > 0);
        queues.push(Arc::downgrade(&queue));
        queue
    }

    /// Record one log line. Never blocks on I/O or on a client.
    pub fn emit(
        &self,
        tool: &str,
        level: LogLevel,
        message: impl Into<String>,
        origin: Option<&str>,
    ) {
        let queues = self.queues.read();
        let mut targets = queues
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|queue| queue.accepts(level))
            .peekable();
        if targets.peek().is_none() {
            return;
        }

        let entry = LogEntry {
            timestamp: unix_millis(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            tool: tool.to_string(),
            level,
            message: truncate_message(message.into(), self.max_message_len),
            origin: origin.map(str::to_string),
        };
        for queue in targets {
            queue.incoming.push(entry.clone());
        }
    }

    pub fn queue_count(&self) -> usize {
        self.queues
            .read()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_only_capturing_queues_at_level() {
        let hub = LogHub::new(64);
        let verbose = hub.register();
        verbose.set_level(LogLevel::Debug);
        verbose.set_capturing(true);
        let quiet = hub.register();
        quiet.set_level(LogLevel::Error);
        quiet.set_capturing(true);
        let idle = hub.register();

        hub.emit("dec", LogLevel::Debug, "frame decoded", None);
        hub.emit("dec", LogLevel::Error, "corrupt slice", Some("dec.rs:42"));

        assert_eq!(verbose.pending(), 2);
        assert_eq!(quiet.pending(), 1);
        assert_eq!(idle.pending(), 0);

        let drained = quiet.drain();
        assert_eq!(drained[0].origin.as_deref(), Some("dec.rs:42"));
        assert_eq!(quiet.pending(), 0);
    }

    #[test]
    fn test_emit_truncates_and_orders() {
        let hub = LogHub::new(4);
        let queue = hub.register();
        queue.set_capturing(true);

        hub.emit("mux", LogLevel::Info, "abcdefgh", None);
        hub.emit("mux", LogLevel::Info, "second", None);

        let drained = queue.drain();
        assert_eq!(drained[0].message, "abcd");
        assert!(drained[0].seq < drained[1].seq);
    }

    #[test]
    fn test_dropped_queue_is_pruned() {
        let hub = LogHub::new(64);
        let queue = hub.register();
        drop(queue);
        let _live = hub.register();

        assert_eq!(hub.queue_count(), 1);
        hub.emit("x", LogLevel::Error, "no panic", None);
    }
}
