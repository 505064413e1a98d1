// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Log capture, retention and fan-out.

mod entry;
mod hub;
mod layer;
mod retention;

pub use entry::{truncate_message, LogEntry, LogLevel};
pub use hub::{LogHub, LogQueue};
pub use layer::LogCaptureLayer;
pub use retention::evict;
