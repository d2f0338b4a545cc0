//! Fixed-window rate limiting
//!
//! Non-overlapping windows with hard edges: once a window elapses the
//! counter resets to 1 rather than carrying over. Catches sustained abuse
//! cheaply (O(1) per request); short violent spikes are the burst
//! detector's job.

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct WindowCounter {
    count: u32,
    window_start: Instant,
}

/// Outcome of a fixed-window check.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window (0 when over the limit).
    pub remaining: u32,
    /// Time until the current window resets.
    pub reset_after: Duration,
}

/// Per-client fixed-window rate limiter.
pub struct FixedWindowLimiter {
    max_per_window: u32,
    window: Duration,
    counters: DashMap<String, WindowCounter>,
}

impl FixedWindowLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            counters: DashMap::new(),
        }
    }

    /// Count a request against the client's current window.
    ///
    /// The entry lock makes increment-and-check atomic per key, so rapid
    /// concurrent requests from one client cannot lose updates. Counts keep
    /// incrementing past the limit (diagnostics only); the client is not
    /// locked out of future windows by this component.
    pub fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| WindowCounter {
                count: 0,
                window_start: now,
            });

        // Window boundaries are half-open: [start, start + window)
        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 1;
            entry.window_start = now;
        } else {
            entry.count += 1;
        }

        let elapsed = now.duration_since(entry.window_start);
        let reset_after = self.window.saturating_sub(elapsed);
        RateDecision {
            allowed: entry.count <= self.max_per_window,
            remaining: self.max_per_window.saturating_sub(entry.count),
            reset_after,
        }
    }

    /// Evict counters whose window expired longer than `stale_after` ago.
    pub fn cleanup(&self, stale_after: Duration) {
        let now = Instant::now();
        self.counters
            .retain(|_, c| now.duration_since(c.window_start) < stale_after);
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
