//! Rise/fall tracking
//!
//! Converts noisy per-round results into stable online/offline
//! transitions. The database is written only when a transition fires,
//! so a flapping server never causes write storms.

/// Tracker verdict after recording a round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Rise threshold met; publish online
    GoesOnline,
    /// Fall threshold met; publish offline
    GoesOffline,
    /// Keep the previous published state
    Unchanged,
}

/// Per-server consecutive-round counter
#[derive(Debug, Clone)]
pub struct ProbeTracker {
    rise: u32,
    fall: u32,
    successes: u32,
    failures: u32,
    /// Last state announced for publication; None before the first
    /// transition. The maintenance pass re-syncs the database to it
    /// when a write went missing.
    published: Option<bool>,
}

impl ProbeTracker {
    /// Fresh tracker; fires as soon as either threshold is met
    pub fn new(rise: u32, fall: u32) -> Self {
        Self {
            rise,
            fall,
            successes: 0,
            failures: 0,
            published: None,
        }
    }

    /// Tracker warmed from the state already published in the database,
    /// so a daemon restart does not republish what is already there
    pub fn seeded(rise: u32, fall: u32, online: bool) -> Self {
        Self {
            rise,
            fall,
            successes: 0,
            failures: 0,
            published: Some(online),
        }
    }

    pub fn published(&self) -> Option<bool> {
        self.published
    }

    /// Apply reloaded thresholds; the current streak keeps counting
    pub fn set_thresholds(&mut self, rise: u32, fall: u32) {
        self.rise = rise;
        self.fall = fall;
    }

    /// Record one round and report whether a transition fires
    pub fn record(&mut self, success: bool) -> Verdict {
        if success {
            self.successes = self.successes.saturating_add(1);
            self.failures = 0;
            if self.successes >= self.rise && self.published != Some(true) {
                self.published = Some(true);
                return Verdict::GoesOnline;
            }
        } else {
            self.failures = self.failures.saturating_add(1);
            self.successes = 0;
            if self.failures >= self.fall && self.published != Some(false) {
                self.published = Some(false);
                return Verdict::GoesOffline;
            }
        }
        Verdict::Unchanged
    }
}
