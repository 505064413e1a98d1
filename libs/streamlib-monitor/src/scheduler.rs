// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-client tick scheduler.
//!
//! One wake timer per client. After every wake the next delay is the
//! fastest active cadence, capped by the tick ceiling.

use std::time::Duration;

use tokio::time::Instant;

use crate::timer::OneShotTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    Running,
}

#[derive(Debug)]
pub struct TickScheduler {
    state: SchedulerState,
    wake: OneShotTimer,
    ceiling: Duration,
}

impl TickScheduler {
    pub fn new(ceiling: Duration) -> Self {
        Self {
            state: SchedulerState::Idle,
            wake: OneShotTimer::Idle,
            ceiling,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SchedulerState::Running
    }

    /// Timer the client loop sleeps on.
    pub fn wake_timer(&self) -> OneShotTimer {
        self.wake
    }

    /// Leave `Idle` with a wake due immediately. No-op while running.
    pub fn start(&mut self, now: Instant) {
        if self.is_running() {
            return;
        }
        self.state = SchedulerState::Running;
        self.wake.arm(now, Duration::ZERO);
    }

    /// Bring the pending wake forward so it fires within `delay`.
    ///
    /// Used when a new subscription is faster than the wake already armed.
    pub fn pull_in(&mut self, now: Instant, delay: Duration) {
        if !self.is_running() {
            return;
        }
        let target = now + delay.min(self.ceiling);
        match self.wake.deadline() {
            Some(deadline) if deadline <= target => {}
            _ => self.wake.arm(now, delay.min(self.ceiling)),
        }
    }

    /// Consume a due wake. Returns `true` when the managers should be ticked.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        self.is_running() && self.wake.fire_if_due(now)
    }

    /// Plan the next wake from the intervals of the active managers.
    ///
    /// No active interval means nothing to wait for: the scheduler goes idle
    /// and arms nothing.
    pub fn reschedule<I>(&mut self, now: Instant, intervals: I) -> Option<Duration>
    where
        I: IntoIterator<Item = Option<Duration>>,
    {
        let Some(fastest) = intervals.into_iter().flatten().min() else {
            self.stop();
            return None;
        };
        let delay = fastest.min(self.ceiling);
        self.state = SchedulerState::Running;
        self.wake.arm(now, delay);
        Some(delay)
    }

    pub fn stop(&mut self) {
        self.state = SchedulerState::Idle;
        self.wake.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CEILING: Duration = Duration::from_millis(1000);

    #[test]
    fn test_fastest_interval_wins() {
        let now = Instant::now();
        let mut scheduler = TickScheduler::new(CEILING);
        scheduler.start(now);

        let delay = scheduler.reschedule(
            now,
            [
                Some(Duration::from_millis(1000)),
                Some(Duration::from_millis(250)),
                None,
            ],
        );
        assert_eq!(delay, Some(Duration::from_millis(250)));
        assert_eq!(
            scheduler.wake_timer().deadline(),
            Some(now + Duration::from_millis(250))
        );
    }

    #[test]
    fn test_ceiling_caps_slow_intervals() {
        let now = Instant::now();
        let mut scheduler = TickScheduler::new(CEILING);
        scheduler.start(now);
        let delay = scheduler.reschedule(now, [Some(Duration::from_secs(5))]);
        assert_eq!(delay, Some(CEILING));
    }

    #[test]
    fn test_all_inactive_goes_idle() {
        let now = Instant::now();
        let mut scheduler = TickScheduler::new(CEILING);
        scheduler.start(now);
        assert!(scheduler.fire_if_due(now));

        assert_eq!(scheduler.reschedule(now, [None, None, None]), None);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(!scheduler.wake_timer().is_armed());
        assert!(!scheduler.fire_if_due(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_pull_in_only_moves_earlier() {
        let now = Instant::now();
        let mut scheduler = TickScheduler::new(CEILING);
        scheduler.start(now);
        scheduler.reschedule(now, [Some(Duration::from_millis(1000))]);

        scheduler.pull_in(now, Duration::from_millis(250));
        assert_eq!(
            scheduler.wake_timer().deadline(),
            Some(now + Duration::from_millis(250))
        );

        scheduler.pull_in(now, Duration::from_millis(800));
        assert_eq!(
            scheduler.wake_timer().deadline(),
            Some(now + Duration::from_millis(250))
        );
    }

    #[test]
    fn test_start_while_running_is_noop() {
        let now = Instant::now();
        let mut scheduler = TickScheduler::new(CEILING);
        scheduler.start(now);
        scheduler.reschedule(now, [Some(Duration::from_millis(500))]);

        scheduler.start(now + Duration::from_millis(10));
        assert_eq!(
            scheduler.wake_timer().deadline(),
            Some(now + Duration::from_millis(500))
        );
    }
}
