// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! JSON envelopes exchanged with observer clients.
//!
//! Both directions are discriminated by a `message` field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::cache::CacheStats;
use crate::error::Result;
use crate::introspect::{NodeDescriptor, NodeId, PinDirection, PinProperties, PinStats};
use crate::logs::{LogEntry, LogLevel};

/// Which pins a node-statistics subscription reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinScope {
    #[serde(alias = "ipid", alias = "inputs-only")]
    Inputs,
    #[serde(alias = "opid", alias = "outputs-only")]
    Outputs,
    #[default]
    Both,
}

impl PinScope {
    pub fn includes(self, direction: PinDirection) -> bool {
        match (self, direction) {
            (PinScope::Both, _) => true,
            (PinScope::Inputs, PinDirection::Input) => true,
            (PinScope::Outputs, PinDirection::Output) => true,
            _ => false,
        }
    }
}

/// Inbound request from a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum ClientRequest {
    GetAllFilters,
    #[serde(rename_all = "camelCase")]
    SubscribeFilter {
        idx: NodeId,
        #[serde(default)]
        interval: Option<u64>,
        #[serde(default)]
        pid_scope: PinScope,
    },
    UnsubscribeFilter {
        idx: NodeId,
    },
    SubscribeSession {
        #[serde(default)]
        interval: Option<u64>,
        #[serde(default)]
        fields: Vec<String>,
    },
    UnsubscribeSession,
    SubscribeCpuStats {
        #[serde(default)]
        interval: Option<u64>,
        #[serde(default)]
        fields: Vec<String>,
    },
    UnsubscribeCpuStats,
    #[serde(rename_all = "camelCase")]
    SubscribeLogs {
        #[serde(default)]
        log_level: LogLevel,
    },
    UnsubscribeLogs,
    #[serde(rename_all = "camelCase")]
    UpdateLogLevel {
        log_level: LogLevel,
    },
    GetLogStatus,
    #[serde(rename_all = "camelCase")]
    GetIpidProps {
        filter_idx: NodeId,
        ipid_idx: usize,
    },
    #[serde(rename_all = "camelCase")]
    UpdateArg {
        idx: NodeId,
        #[serde(default)]
        name: String,
        arg_name: String,
        new_value: JsonValue,
    },
    GetCacheStats,
}

impl ClientRequest {
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Statistics of one pin inside a `filter_stats` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinStatsEntry {
    pub index: usize,
    #[serde(flatten)]
    pub stats: PinStats,
}

/// Body of a `filter_stats` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatsPayload {
    pub idx: NodeId,
    pub name: String,
    pub stats: Map<String, JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipids: Option<Vec<PinStatsEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opids: Option<Vec<PinStatsEntry>>,
}

/// Body of a `log_status` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStatus {
    pub log_level: LogLevel,
    pub subscribed: bool,
    pub history_len: usize,
    pub capacity: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    GraphChanged,
}

/// Outbound message to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum ServerMessage {
    Filters {
        filters: Vec<NodeDescriptor>,
    },
    FilterStats(NodeStatsPayload),
    SessionStats {
        stats: Map<String, JsonValue>,
    },
    CpuStats {
        stats: Map<String, JsonValue>,
    },
    LogBatch {
        logs: Vec<LogEntry>,
    },
    #[serde(rename_all = "camelCase")]
    LogConfigChanged {
        log_level: LogLevel,
    },
    LogStatus(LogStatus),
    #[serde(rename_all = "camelCase")]
    Notification {
        #[serde(rename = "type")]
        kind: NotificationKind,
        graph_version: u64,
    },
    SessionEnd,
    CacheStats(CacheStats),
    #[serde(rename_all = "camelCase")]
    IpidProps {
        filter_idx: NodeId,
        ipid_idx: usize,
        properties: PinProperties,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
