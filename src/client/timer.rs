// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use std::time::Duration;

use tokio::time::Instant;

/// Default debounce delay between the last keystroke and a flush.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

/// A cancellable single-shot deadline.
///
/// The timer does not run anything by itself. Its owner polls [`is_due`]
/// (or sleeps until [`deadline`]) and fires at most once per schedule.
///
/// [`is_due`]: DebounceTimer::is_due
/// [`deadline`]: DebounceTimer::deadline
#[derive(Debug, Clone)]
pub struct DebounceTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl DebounceTimer {
    /// Creates a disarmed timer.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Configured delay.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Cancels any pending deadline and arms a new one `delay` after `now`.
    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    /// Disarms the timer.
    pub const fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Pending deadline, if armed.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the timer is armed and its deadline has passed.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Disarms and returns `true` if the timer was due.
    pub fn take_due(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }
}

impl Default for DebounceTimer {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY)
    }
}
