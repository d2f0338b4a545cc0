//! Sliding-window burst detection
//!
//! Tracks recent request timestamps per client and prunes anything older
//! than the spike window on every access, so the tracked sequence stays
//! bounded for long-lived clients. Catches short violent spikes that a
//! coarse fixed window averages away.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Outcome of a sliding-window check.
#[derive(Debug, Clone, Copy)]
pub struct BurstDecision {
    pub allowed: bool,
    /// Instantaneous request rate over the spike window, in requests/sec.
    pub rate: f64,
    /// Advisory signal: rate is at or above the spike threshold. Logged and
    /// counted, never denies by itself.
    pub spike: bool,
}

struct BurstRecord {
    timestamps: VecDeque<Instant>,
}

/// Per-client sliding-window burst detector.
pub struct BurstDetector {
    window: Duration,
    max_requests_per_second: f64,
    spike_threshold: f64,
    records: DashMap<String, BurstRecord>,
}

impl BurstDetector {
    pub fn new(window: Duration, max_requests_per_second: f64, spike_threshold: f64) -> Self {
        Self {
            window,
            max_requests_per_second,
            spike_threshold,
            records: DashMap::new(),
        }
    }

    /// Record the request and compute the instantaneous rate.
    ///
    /// The spike threshold and the deny threshold are deliberately distinct:
    /// a spike is observability, exceeding `max_requests_per_second` is what
    /// actually denies.
    pub fn check(&self, key: &str) -> BurstDecision {
        let now = Instant::now();
        let mut entry = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| BurstRecord {
                timestamps: VecDeque::new(),
            });

        entry.timestamps.push_back(now);
        while let Some(oldest) = entry.timestamps.front() {
            if now.duration_since(*oldest) >= self.window {
                entry.timestamps.pop_front();
            } else {
                break;
            }
        }

        let rate = entry.timestamps.len() as f64 / self.window.as_secs_f64();
        BurstDecision {
            allowed: rate < self.max_requests_per_second,
            rate,
            spike: rate >= self.spike_threshold,
        }
    }

    /// Evict records whose newest timestamp is older than `stale_after`.
    pub fn cleanup(&self, stale_after: Duration) {
        let now = Instant::now();
        self.records.retain(|_, rec| {
            rec.timestamps
                .back()
                .is_some_and(|t| now.duration_since(*t) < stale_after)
        });
    }

    /// Tracked timestamp count for a client (diagnostics/tests).
    pub fn tracked_len(&self, key: &str) -> usize {
        self.records
            .get(key)
            .map(|rec| rec.timestamps.len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
