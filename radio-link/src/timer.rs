//! Retransmission timer.
//!
//! A plain deadline the engine compares against the clock on each tick,
//! plus the retry counter that goes with it:
//!
//! ```text
//!   arm(now) ──▶ [armed, deadline = now + timeout] ──expired(t)──▶ caller
//!      ▲                         │                                  │
//!      └──── rearm / disarm ◀────┴──────── record_retry() ◀─────────┘
//! ```

use std::time::Duration;

use tokio::time::Instant;

/// Deadline-based retransmission timer with a retry budget.
#[derive(Debug, Clone)]
pub struct RetransmitTimer {
    timeout: Duration,
    max_retries: u32,
    deadline: Option<Instant>,
    retries: u32,
}

impl RetransmitTimer {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
            deadline: None,
            retries: 0,
        }
    }

    /// Start (or restart) the countdown from `now`.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.timeout);
    }

    /// Restart from `now` only if the timer is currently running.
    pub fn rearm_if_armed(&mut self, now: Instant) {
        if self.deadline.is_some() {
            self.arm(now);
        }
    }

    /// Stop the countdown and forget accumulated retries.
    pub fn disarm(&mut self) {
        self.deadline = None;
        self.retries = 0;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Count one more retry.  Returns `false` once the budget is spent.
    pub fn record_retry(&mut self) -> bool {
        self.retries += 1;
        self.retries <= self.max_retries
    }

    pub fn reset_retries(&mut self) {
        self.retries = 0;
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }
}
