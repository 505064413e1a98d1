// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Severity-weighted eviction of the log history.

use crate::config::RetentionRatios;

use super::entry::{LogEntry, LogLevel};

/// Shrink a full history so one more entry fits.
///
/// Runs in two phases, and the order matters:
/// 1. per severity, keep the `ceil(count * ratio)` most recent entries;
/// 2. if the result still leaves no room, keep only the most recent
///    `capacity - 1` entries regardless of severity.
///
/// Phase 2 can drop errors even though phase 1 kept all of them.
/// The returned history is sorted by timestamp, oldest first.
pub fn evict(history: &mut Vec<LogEntry>, capacity: usize, ratios: &RetentionRatios) {
    let mut buckets: [Vec<LogEntry>; 4] = Default::default();
    for entry in history.drain(..) {
        buckets[entry.level.to_u8() as usize].push(entry);
    }

    for level in LogLevel::ALL {
        let bucket = &mut buckets[level.to_u8() as usize];
        bucket.sort_by_key(LogEntry::sort_key);
        let keep = keep_count(bucket.len(), ratios.for_level(level));
        let excess = bucket.len() - keep;
        history.extend(bucket.drain(excess..));
    }

    history.sort_by_key(LogEntry::sort_key);

    let limit = capacity.saturating_sub(1);
    if history.len() > limit {
        let excess = history.len() - limit;
        history.drain(..excess);
    }
}

fn keep_count(count: usize, ratio: f64) -> usize {
    ((count as f64 * ratio).ceil() as usize).min(count)
}
