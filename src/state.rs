use crate::burst::BurstDetector;
use crate::config::GuardConfig;
use crate::error::GuardError;
use crate::events::{EventReceiver, EventSender};
use crate::identity::FingerprintTracker;
use crate::pattern::PatternAnalyzer;
use crate::rate_limit::FixedWindowLimiter;
use crate::reputation::BlocklistManager;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Everything the protection engine tracks, owned by one struct and shared
/// by reference. No global mutable state; tests build isolated instances.
///
/// Every field is internally synchronized (sharded maps, atomics), so the
/// state is shared as a plain `Arc` with no outer lock on the hot path.
pub struct GuardState {
    pub config: GuardConfig,
    pub limiter: FixedWindowLimiter,
    pub burst: BurstDetector,
    pub patterns: PatternAnalyzer,
    pub fingerprints: FingerprintTracker,
    pub blocklist: BlocklistManager,
    pub stats: GuardStats,
    pub events: EventSender,
}

/// Shared handle used by the middleware, admin routes, and the janitor.
pub type SharedState = Arc<GuardState>;

/// Aggregate counters, updated from the request path with relaxed atomics.
#[derive(Default)]
pub struct GuardStats {
    pub total_requests: AtomicU64,
    pub blocked_requests: AtomicU64,
    pub spikes_detected: AtomicU64,
    pub suspicious_patterns: AtomicU64,
    pub challenges_issued: AtomicU64,
}

/// Point-in-time view of the engine, served by the admin stats endpoint.
#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub spikes_detected: u64,
    pub suspicious_patterns: u64,
    pub challenges_issued: u64,
    pub active_blocks: usize,
    pub blocked_clients: Vec<BlockedClientView>,
}

#[derive(Debug, Serialize)]
pub struct BlockedClientView {
    pub key: String,
    pub reason: &'static str,
    pub permanent: bool,
    /// Remaining block time in seconds; absent for permanent blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<u64>,
}

impl GuardState {
    /// Build the engine from validated options.
    ///
    /// Returns the state plus the receiving end of the event channel; the
    /// caller decides whether to spawn a logger or drop the receiver.
    pub fn new(config: GuardConfig) -> Result<(SharedState, EventReceiver), GuardError> {
        config.validate()?;
        let (tx, rx) = crate::events::channel();

        let state = GuardState {
            limiter: FixedWindowLimiter::new(config.max_requests_per_window, config.window()),
            burst: BurstDetector::new(
                config.spike_window(),
                config.max_requests_per_second,
                config.spike_threshold,
            ),
            patterns: PatternAnalyzer::new(config.suspicious_pattern_threshold),
            fingerprints: FingerprintTracker::new(),
            blocklist: BlocklistManager::new(
                config.violation_threshold,
                config.block_duration(),
                config.permanent_block_threshold,
                tx.clone(),
            ),
            stats: GuardStats::default(),
            events: tx,
            config,
        };
        Ok((Arc::new(state), rx))
    }

    /// Whitelisted addresses skip every check: exact or substring match.
    pub fn is_whitelisted(&self, addr: &str) -> bool {
        self.config
            .whitelist
            .iter()
            .any(|entry| addr == entry || addr.contains(entry.as_str()))
    }

    /// One janitor pass over every tracked map, with type-specific
    /// staleness thresholds. Safe to run concurrently with request
    /// handling; running it twice back-to-back is a no-op the second time.
    pub fn sweep(&self) {
        self.limiter.cleanup(self.config.window() * 2);
        self.burst.cleanup(self.config.spike_window() * 2);
        self.patterns.cleanup(Duration::from_secs(300));
        self.fingerprints.cleanup(self.config.fingerprint_ttl());
        self.blocklist.cleanup(self.config.block_duration());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let blocked_clients = self
            .blocklist
            .blocked_clients()
            .into_iter()
            .map(|c| BlockedClientView {
                key: c.key,
                reason: c.reason.as_str(),
                permanent: c.permanent,
                remaining_secs: c.remaining.map(|d| d.as_secs()),
            })
            .collect::<Vec<_>>();

        StatsSnapshot {
            total_requests: self.stats.total_requests.load(Ordering::Relaxed),
            blocked_requests: self.stats.blocked_requests.load(Ordering::Relaxed),
            spikes_detected: self.stats.spikes_detected.load(Ordering::Relaxed),
            suspicious_patterns: self.stats.suspicious_patterns.load(Ordering::Relaxed),
            challenges_issued: self.stats.challenges_issued.load(Ordering::Relaxed),
            active_blocks: blocked_clients.len(),
            blocked_clients,
        }
    }
}
