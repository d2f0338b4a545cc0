//! Reputation scoring and blocklist management
//!
//! Every client starts at a score of 100. Violations apply type-specific
//! penalties; a depleted score or too many violations triggers a block.
//! Repeated temporary blocks escalate to a permanent one. Block expiry is
//! lazy: an expired temporary block is lifted the first time the client is
//! observed again, with the janitor as the backstop for idle clients.

use crate::events::{EventSender, GuardEvent};
use dashmap::DashMap;
use std::time::{Duration, Instant};

const INITIAL_SCORE: i32 = 100;

/// A reputation-damaging observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    RateLimit,
    Burst,
    SuspiciousPattern,
    FingerprintAbuse,
}

impl ViolationKind {
    /// Score penalty for this violation type.
    pub fn penalty(&self) -> i32 {
        match self {
            ViolationKind::RateLimit => 20,
            ViolationKind::Burst => 25,
            ViolationKind::SuspiciousPattern => 30,
            ViolationKind::FingerprintAbuse => 40,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::RateLimit => "rate_limit",
            ViolationKind::Burst => "burst",
            ViolationKind::SuspiciousPattern => "suspicious_pattern",
            ViolationKind::FingerprintAbuse => "fingerprint_abuse",
        }
    }
}

/// Why a client was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    ScoreDepleted,
    TooManyViolations,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::ScoreDepleted => "score_depleted",
            BlockReason::TooManyViolations => "too_many_violations",
        }
    }
}

struct Reputation {
    score: i32,
    violations: u32,
    last_violation: Instant,
}

struct BlockRecord {
    blocked_at: Instant,
    /// None means permanent; never auto-evicted.
    duration: Option<Duration>,
    reason: BlockReason,
}

/// Snapshot of a client's block state.
#[derive(Debug, Clone, Copy)]
pub struct BlockStatus {
    pub permanent: bool,
    /// Remaining block time; None for permanent blocks.
    pub remaining: Option<Duration>,
    pub reason: BlockReason,
}

/// An entry in the blocked-clients listing.
#[derive(Debug, Clone)]
pub struct BlockedClient {
    pub key: String,
    pub reason: BlockReason,
    pub permanent: bool,
    pub remaining: Option<Duration>,
}

/// Tracks reputation, blocks, and temporary-block escalation per client key.
pub struct BlocklistManager {
    violation_threshold: u32,
    block_duration: Duration,
    permanent_block_threshold: u32,
    reputations: DashMap<String, Reputation>,
    blocks: DashMap<String, BlockRecord>,
    /// Survives natural block expiry; this is what allows escalation.
    /// Cleared only by administrative unblock.
    temp_block_counts: DashMap<String, u32>,
    events: EventSender,
}

impl BlocklistManager {
    pub fn new(
        violation_threshold: u32,
        block_duration: Duration,
        permanent_block_threshold: u32,
        events: EventSender,
    ) -> Self {
        Self {
            violation_threshold,
            block_duration,
            permanent_block_threshold,
            reputations: DashMap::new(),
            blocks: DashMap::new(),
            temp_block_counts: DashMap::new(),
            events,
        }
    }

    /// Apply a violation penalty; block the client when the score hits zero
    /// or the violation count reaches the threshold. Returns the block
    /// reason when this violation tipped the client over.
    pub fn record_violation(&self, key: &str, kind: ViolationKind) -> Option<BlockReason> {
        let (score, violations) = {
            let mut rep = self
                .reputations
                .entry(key.to_string())
                .or_insert_with(|| Reputation {
                    score: INITIAL_SCORE,
                    violations: 0,
                    last_violation: Instant::now(),
                });
            rep.score = (rep.score - kind.penalty()).max(0);
            rep.violations += 1;
            rep.last_violation = Instant::now();
            (rep.score, rep.violations)
        };

        let _ = self.events.send(GuardEvent::Violation {
            key: key.to_string(),
            kind,
            score,
        });

        let reason = if score <= 0 {
            Some(BlockReason::ScoreDepleted)
        } else if violations >= self.violation_threshold {
            Some(BlockReason::TooManyViolations)
        } else {
            None
        };
        if let Some(reason) = reason {
            self.block(key, reason);
        }
        reason
    }

    /// Block a client, escalating to permanent once the temporary-block
    /// count reaches the threshold.
    pub fn block(&self, key: &str, reason: BlockReason) {
        let count = {
            let mut entry = self.temp_block_counts.entry(key.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        let permanent = count >= self.permanent_block_threshold;

        self.blocks.insert(
            key.to_string(),
            BlockRecord {
                blocked_at: Instant::now(),
                duration: if permanent {
                    None
                } else {
                    Some(self.block_duration)
                },
                reason,
            },
        );

        let _ = self.events.send(GuardEvent::ClientBlocked {
            key: key.to_string(),
            reason,
            permanent,
        });
    }

    /// Current block state, lifting expired temporary blocks lazily.
    pub fn is_blocked(&self, key: &str) -> Option<BlockStatus> {
        let status = {
            let record = self.blocks.get(key)?;
            match record.duration {
                None => Some(BlockStatus {
                    permanent: true,
                    remaining: None,
                    reason: record.reason,
                }),
                Some(duration) => {
                    let elapsed = record.blocked_at.elapsed();
                    if elapsed >= duration {
                        None // expired, lift below once the Ref is dropped
                    } else {
                        Some(BlockStatus {
                            permanent: false,
                            remaining: Some(duration - elapsed),
                            reason: record.reason,
                        })
                    }
                }
            }
        };
        if status.is_none() {
            self.blocks.remove(key);
        }
        status
    }

    /// Administrative amnesty: deletes the block, the reputation, and the
    /// escalation count. A full pardon, distinct from natural expiry.
    /// Returns false when nothing was known about the key.
    pub fn unblock(&self, key: &str) -> bool {
        let had_block = self.blocks.remove(key).is_some();
        let had_rep = self.reputations.remove(key).is_some();
        let had_count = self.temp_block_counts.remove(key).is_some();
        let known = had_block || had_rep || had_count;
        if known {
            let _ = self.events.send(GuardEvent::ClientUnblocked {
                key: key.to_string(),
            });
        }
        known
    }

    /// Violation count for a client (drives the challenge headers).
    pub fn violation_count(&self, key: &str) -> u32 {
        self.reputations.get(key).map(|r| r.violations).unwrap_or(0)
    }

    /// Currently blocked clients (expired temporaries excluded).
    pub fn blocked_clients(&self) -> Vec<BlockedClient> {
        self.blocks
            .iter()
            .filter_map(|entry| {
                let record = entry.value();
                match record.duration {
                    None => Some(BlockedClient {
                        key: entry.key().clone(),
                        reason: record.reason,
                        permanent: true,
                        remaining: None,
                    }),
                    Some(duration) => {
                        let elapsed = record.blocked_at.elapsed();
                        if elapsed >= duration {
                            None
                        } else {
                            Some(BlockedClient {
                                key: entry.key().clone(),
                                reason: record.reason,
                                permanent: false,
                                remaining: Some(duration - elapsed),
                            })
                        }
                    }
                }
            })
            .collect()
    }

    pub fn active_block_count(&self) -> usize {
        self.blocked_clients().len()
    }

    /// Janitor sweep: drop expired temporary blocks and reputations idle
    /// longer than `reputation_stale_after`. Permanent blocks are never
    /// touched.
    pub fn cleanup(&self, reputation_stale_after: Duration) {
        self.blocks.retain(|_, record| match record.duration {
            None => true,
            Some(duration) => record.blocked_at.elapsed() < duration,
        });
        self.reputations
            .retain(|_, rep| rep.last_violation.elapsed() < reputation_stale_after);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn manager(
        violation_threshold: u32,
        block_duration: Duration,
        permanent_block_threshold: u32,
    ) -> BlocklistManager {
        let (tx, _rx) = crate::events::channel();
        BlocklistManager::new(
            violation_threshold,
            block_duration,
            permanent_block_threshold,
            tx,
        )
    }

    #[test]
    fn test_score_depletion_triggers_block() {
        let m = manager(100, Duration::from_secs(60), 10);
        // 100 / 40 = 3 fingerprint-abuse violations to deplete
        assert!(m.record_violation("c", ViolationKind::FingerprintAbuse).is_none());
        assert!(m.record_violation("c", ViolationKind::FingerprintAbuse).is_none());
        let reason = m.record_violation("c", ViolationKind::FingerprintAbuse);
        assert_eq!(reason, Some(BlockReason::ScoreDepleted));
        assert!(m.is_blocked("c").is_some());
    }

    #[test]
    fn test_violation_count_triggers_block() {
        let m = manager(5, Duration::from_secs(60), 10);
        for _ in 0..4 {
            // -20 each; score stays above 0 until the 5th
            assert!(m.record_violation("c", ViolationKind::RateLimit).is_none());
        }
        let reason = m.record_violation("c", ViolationKind::RateLimit);
        // 5th violation: score hits 0 and the count hits the threshold;
        // score depletion is checked first
        assert_eq!(reason, Some(BlockReason::ScoreDepleted));
    }

    #[test]
    fn test_violation_threshold_independent_of_score() {
        let m = manager(2, Duration::from_secs(60), 10);
        assert!(m.record_violation("c", ViolationKind::RateLimit).is_none());
        let reason = m.record_violation("c", ViolationKind::RateLimit);
        // score still 60, but two violations reach the threshold
        assert_eq!(reason, Some(BlockReason::TooManyViolations));
    }

    #[test]
    fn test_score_clamped_at_zero() {
        // A violation on an already-clamped score must still report score 0,
        // never a negative value
        let (tx, mut rx) = crate::events::channel();
        let m = BlocklistManager::new(100, Duration::from_secs(60), 100, tx);
        for _ in 0..5 {
            m.record_violation("c", ViolationKind::FingerprintAbuse);
        }
        let mut last_score = i32::MAX;
        while let Ok(event) = rx.try_recv() {
            if let GuardEvent::Violation { score, .. } = event {
                last_score = score;
            }
        }
        assert_eq!(last_score, 0);
    }

    #[test]
    fn test_temporary_block_expires_lazily() {
        let m = manager(1, Duration::from_millis(30), 10);
        m.record_violation("c", ViolationKind::Burst);
        assert!(m.is_blocked("c").is_some());

        thread::sleep(Duration::from_millis(50));
        // First observation past expiry lifts the block and deletes the record
        assert!(m.is_blocked("c").is_none());
        assert!(m.blocks.get("c").is_none());
    }

    #[test]
    fn test_escalation_to_permanent() {
        let m = manager(1, Duration::from_millis(10), 3);
        for i in 1..=3 {
            m.block("c", BlockReason::TooManyViolations);
            let status = m.is_blocked("c").unwrap();
            if i < 3 {
                assert!(!status.permanent, "block {i} should be temporary");
                thread::sleep(Duration::from_millis(20));
                assert!(m.is_blocked("c").is_none());
            } else {
                assert!(status.permanent, "block {i} should be permanent");
            }
        }
        // Permanent blocks do not expire
        thread::sleep(Duration::from_millis(30));
        assert!(m.is_blocked("c").unwrap().permanent);
    }

    #[test]
    fn test_unblock_resets_escalation() {
        let m = manager(1, Duration::from_millis(10), 2);
        m.block("c", BlockReason::ScoreDepleted);
        m.block("c", BlockReason::ScoreDepleted);
        assert!(m.is_blocked("c").unwrap().permanent);

        assert!(m.unblock("c"));
        assert!(m.is_blocked("c").is_none());
        assert_eq!(m.violation_count("c"), 0);

        // Escalation starts over: next block is temporary again
        m.block("c", BlockReason::ScoreDepleted);
        assert!(!m.is_blocked("c").unwrap().permanent);
    }

    #[test]
    fn test_unblock_unknown_key() {
        let m = manager(5, Duration::from_secs(60), 10);
        assert!(!m.unblock("nobody"));
    }

    #[test]
    fn test_cleanup_spares_permanent_blocks() {
        let m = manager(1, Duration::from_millis(10), 1);
        m.block("perm", BlockReason::ScoreDepleted); // count 1 == threshold: permanent
        thread::sleep(Duration::from_millis(20));
        m.cleanup(Duration::from_millis(5));
        assert!(m.is_blocked("perm").unwrap().permanent);
    }

    #[test]
    fn test_cleanup_drops_expired_temporaries_and_stale_reputations() {
        let m = manager(100, Duration::from_millis(10), 10);
        m.record_violation("c", ViolationKind::RateLimit);
        m.block("d", BlockReason::TooManyViolations);
        thread::sleep(Duration::from_millis(30));

        m.cleanup(Duration::from_millis(20));
        assert!(m.blocks.get("d").is_none());
        assert_eq!(m.violation_count("c"), 0);

        // Idempotent: immediate second sweep changes nothing
        let blocks_before = m.blocks.len();
        let reps_before = m.reputations.len();
        m.cleanup(Duration::from_millis(20));
        assert_eq!(m.blocks.len(), blocks_before);
        assert_eq!(m.reputations.len(), reps_before);
    }

    #[test]
    fn test_blocked_clients_listing() {
        let m = manager(1, Duration::from_secs(60), 10);
        m.block("a", BlockReason::ScoreDepleted);
        m.block("b", BlockReason::TooManyViolations);

        let mut listed: Vec<String> = m.blocked_clients().into_iter().map(|c| c.key).collect();
        listed.sort();
        assert_eq!(listed, vec!["a".to_string(), "b".to_string()]);

        let entry = &m.blocked_clients()[0];
        assert!(!entry.permanent);
        assert!(entry.remaining.unwrap() <= Duration::from_secs(60));
    }
}
