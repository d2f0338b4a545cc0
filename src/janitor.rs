//! Background state janitor
//!
//! Sweeps every per-client map on a fixed interval, decoupled from request
//! handling, so memory stays bounded for an otherwise unbounded set of
//! distinct clients. Permanent blocks are never evicted.

use crate::state::SharedState;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Handle to the recurring sweep task. `stop` must be called at process
/// shutdown so the timer does not leak.
pub struct Janitor {
    handle: JoinHandle<()>,
}

impl Janitor {
    /// Spawn the sweep loop.
    pub fn start(state: SharedState, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so a fresh engine
            // is not swept before serving anything.
            timer.tick().await;

            info!(interval_secs = interval.as_secs(), "Janitor started");
            loop {
                timer.tick().await;
                state.sweep();
                debug!(
                    rate_counters = state.limiter.len(),
                    burst_records = state.burst.len(),
                    pattern_histories = state.patterns.len(),
                    fingerprints = state.fingerprints.len(),
                    "Janitor sweep complete"
                );
            }
        });
        Self { handle }
    }

    /// Cancel the sweep task.
    pub fn stop(self) {
        self.handle.abort();
    }
}
