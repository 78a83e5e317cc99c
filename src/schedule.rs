//! Explicitly polled timers.
//!
//! Nothing in teledash runs a free-standing background timer. Each component owns the
//! timers it needs and advances them from its own `poll`/`tick` with the current
//! [`Instant`], which keeps every timer cancellable and makes time injectable in tests.

use std::time::{Duration, Instant};

/// A repeating timer with a fixed period.
#[derive(Clone, Debug)]
pub struct Interval {
    period: Duration,
    next_due: Option<Instant>,
}

impl Interval {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next_due: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    /// Starts the timer with its first tick one period after `now`. Starting a running
    /// timer leaves its schedule untouched.
    pub fn start(&mut self, now: Instant) {
        if self.next_due.is_none() {
            self.next_due = Some(now + self.period);
        }
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    /// Returns true when a tick is due. A timer that fell several periods behind fires
    /// once and is rescheduled relative to `now`.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                let mut next = due + self.period;
                if next <= now {
                    next = now + self.period;
                }
                self.next_due = Some(next);
                true
            }
            _ => false,
        }
    }
}

/// A one-shot deadline.
#[derive(Clone, Debug)]
pub struct Timeout {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Timeout {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Arms (or re-arms) the deadline `delay` after `now`.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Returns true exactly once, on the first poll at or after the deadline.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
