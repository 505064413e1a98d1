// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Explicit one-shot timer state.
//!
//! Every timer in the monitor (debounce re-check, scheduler wake, log batch
//! flush) fires at most once per arming and must be re-armed by its owner.
//! Whether a timer is pending is stored here, never inferred from a task
//! handle.

use std::time::Duration;

use tokio::time::Instant;

/// One-shot timer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OneShotTimer {
    #[default]
    Idle,
    Armed { deadline: Instant },
}

impl OneShotTimer {
    pub fn is_armed(&self) -> bool {
        matches!(self, OneShotTimer::Armed { .. })
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self {
            OneShotTimer::Idle => None,
            OneShotTimer::Armed { deadline } => Some(*deadline),
        }
    }

    /// Arm at `now + delay`, replacing any pending deadline.
    pub fn arm(&mut self, now: Instant, delay: Duration) {
        *self = OneShotTimer::Armed {
            deadline: now + delay,
        };
    }

    /// Arm only if idle. Returns whether the timer was armed by this call.
    pub fn arm_if_idle(&mut self, now: Instant, delay: Duration) -> bool {
        if self.is_armed() {
            return false;
        }
        self.arm(now, delay);
        true
    }

    pub fn disarm(&mut self) {
        *self = OneShotTimer::Idle;
    }

    /// Consume the timer if its deadline has passed.
    ///
    /// Returns `true` exactly once per arming.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match *self {
            OneShotTimer::Armed { deadline } if now >= deadline => {
                *self = OneShotTimer::Idle;
                true
            }
            _ => false,
        }
    }
}

/// Sleep until the timer's deadline, or forever when idle.
///
/// Meant for `tokio::select!` arms so an idle timer never wakes the loop.
pub async fn sleep_until_armed(timer: OneShotTimer) {
    match timer.deadline() {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_if_idle_does_not_stack() {
        let now = Instant::now();
        let mut timer = OneShotTimer::default();

        assert!(timer.arm_if_idle(now, Duration::from_millis(250)));
        assert!(!timer.arm_if_idle(now, Duration::from_millis(100)));
        assert_eq!(timer.deadline(), Some(now + Duration::from_millis(250)));
    }

    #[test]
    fn test_fire_if_due_fires_once() {
        let now = Instant::now();
        let mut timer = OneShotTimer::default();
        timer.arm(now, Duration::from_millis(100));

        assert!(!timer.fire_if_due(now + Duration::from_millis(99)));
        assert!(timer.fire_if_due(now + Duration::from_millis(100)));
        assert!(!timer.fire_if_due(now + Duration::from_millis(200)));
        assert_eq!(timer, OneShotTimer::Idle);
    }
}
