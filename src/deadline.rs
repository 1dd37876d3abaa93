//! Invocation deadline bookkeeping.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Point in time at which the current invocation is terminated.
#[derive(Debug, Clone, Copy)]
pub struct ScanDeadline {
    at: Instant,
}

impl ScanDeadline {
    /// Deadline `remaining` from now.
    pub fn after(remaining: Duration) -> Self {
        Self {
            at: Instant::now() + remaining,
        }
    }

    /// Deadline given as milliseconds since the Unix epoch.
    ///
    /// A deadline already in the past leaves no time remaining.
    pub fn from_epoch_millis(deadline_ms: u64) -> Self {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self::after(Duration::from_millis(deadline_ms.saturating_sub(now_ms)))
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Time a scan may take: what remains minus `margin`, floored at zero.
    pub fn scan_budget(&self, margin: Duration) -> Duration {
        self.remaining().saturating_sub(margin)
    }
}
