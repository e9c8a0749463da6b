//! Abandonment detection for locks held by other tasks
//!
//! A waiter samples the holder's temporary directory size and the lock file
//! contents. Samples are compared once per timeout window: if neither changed
//! across a full window, the holder is presumed dead. Either value changing
//! starts a new window.
//!
//! The baseline before the first sample is "size 0, no contents", so the first
//! due sample always counts as progress. A dead holder is therefore detected
//! between one and two timeout windows after the waiter started watching.

use std::time::{Duration, Instant};

/// Outcome of feeding one sample to a [`StalenessTracker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The current window has not elapsed yet; the sample was ignored
    NotDue,
    /// Something changed since the last window; a new window starts
    Progressing,
    /// Nothing changed across a whole window
    Abandoned,
}

/// Tracks observable progress of a lock holder
#[derive(Debug, Clone)]
pub struct StalenessTracker {
    timeout: Duration,
    window_start: Instant,
    last_size: u64,
    last_contents: Option<String>,
}

impl StalenessTracker {
    /// Start watching at `now`
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            window_start: now,
            last_size: 0,
            last_contents: None,
        }
    }

    /// Whether the current window has elapsed at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) > self.timeout
    }

    /// Compare a sample against the previous window
    pub fn observe(&mut self, now: Instant, size: u64, contents: &str) -> Observation {
        if !self.is_due(now) {
            return Observation::NotDue;
        }

        if size == self.last_size && self.last_contents.as_deref() == Some(contents) {
            return Observation::Abandoned;
        }

        self.last_size = size;
        self.last_contents = Some(contents.to_string());
        self.window_start = now;
        Observation::Progressing
    }
}
