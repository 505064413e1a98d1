// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Live session monitor for a StreamLib processing graph.
//!
//! Observer clients subscribe to the node list, per-node statistics, session
//! counters, resource usage and log output. Each client gets its own tick
//! scheduler; topology bursts from the host are debounced before clients are
//! told about them.

pub mod cache;
pub mod client;
pub mod config;
pub mod detector;
pub mod error;
pub mod fields;
pub mod introspect;
pub mod logs;
pub mod managers;
pub mod memory_graph;
pub mod monitor;
pub mod protocol;
pub mod scheduler;
pub mod timer;

pub use cache::{topology_key, CacheStats, SerializationCache, TOPOLOGY_KEY_PREFIX};
pub use client::{ClientCommand, ClientConnection, ClientId, ClientSink};
pub use config::{MonitorConfig, RetentionRatios};
pub use detector::{ChangeDetector, DebounceState, Recheck};
pub use error::{MonitorError, Result};
pub use fields::{FieldKey, FieldSelector, ResourceField, SessionField};
pub use introspect::{
    GraphIntrospector, GraphView, NodeAttribute, NodeDescriptor, NodeId, PinDirection,
    PinProperties, PinProperty, PinStats, ResourceUsage, TopologyCallback, TopologyEvent,
};
pub use logs::{LogCaptureLayer, LogEntry, LogHub, LogLevel};
pub use memory_graph::{MemoryGraph, MemoryPin};
pub use monitor::{Monitor, MonitorBuilder, MonitorContext};
pub use protocol::{ClientRequest, PinScope, ServerMessage};
pub use scheduler::{SchedulerState, TickScheduler};
pub use timer::OneShotTimer;
