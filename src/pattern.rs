//! Request-pattern analysis
//!
//! Classifies recent traffic shape per client address: scripted hammering,
//! ID enumeration, endpoint probing, submission spam. Keyed by bare address
//! rather than the composite client key since shape analysis is about
//! traffic, not per-device precision. This analyzer never denies a request
//! by itself; it only feeds the reputation component.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Ring-buffer capacity per client address.
const HISTORY_CAPACITY: usize = 100;

/// Heuristics only run once this many samples have accumulated.
const MIN_SAMPLES: usize = 10;

/// A traffic-shape heuristic that matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    /// One path accounts for >80% of recent requests.
    RepetitivePath,
    /// Paths ending in numeric segments mostly increment by exactly +1.
    SequentialScanning,
    /// Unique-path ratio >90% over a sample of >50.
    PathFuzzing,
    /// >90% of methods are POST over a sample of >20.
    PostFlooding,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::RepetitivePath => "repetitive_path",
            PatternKind::SequentialScanning => "sequential_scanning",
            PatternKind::PathFuzzing => "path_fuzzing",
            PatternKind::PostFlooding => "post_flooding",
        }
    }
}

/// Result of recording one request into the history.
#[derive(Debug, Clone)]
pub struct PatternReport {
    /// True when enough heuristics matched simultaneously.
    pub suspicious: bool,
    pub matched: Vec<PatternKind>,
}

struct PatternHistory {
    paths: VecDeque<String>,
    methods: VecDeque<String>,
    timestamps: VecDeque<Instant>,
}

impl PatternHistory {
    fn new() -> Self {
        Self {
            paths: VecDeque::with_capacity(HISTORY_CAPACITY),
            methods: VecDeque::with_capacity(HISTORY_CAPACITY),
            timestamps: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    fn push(&mut self, path: String, method: String, now: Instant) {
        // Parallel buffers stay equal-length; FIFO eviction at capacity.
        if self.paths.len() == HISTORY_CAPACITY {
            self.paths.pop_front();
            self.methods.pop_front();
            self.timestamps.pop_front();
        }
        self.paths.push_back(path);
        self.methods.push_back(method);
        self.timestamps.push_back(now);
    }
}

/// Per-address traffic-shape analyzer.
pub struct PatternAnalyzer {
    /// Matched-tag count at or above which the sample is suspicious.
    suspicion_threshold: usize,
    histories: DashMap<String, PatternHistory>,
}

impl PatternAnalyzer {
    pub fn new(suspicion_threshold: usize) -> Self {
        Self {
            suspicion_threshold,
            histories: DashMap::new(),
        }
    }

    /// Record the request and evaluate the heuristics over the history.
    pub fn record_and_analyze(&self, addr: &str, path: &str, method: &str) -> PatternReport {
        let now = Instant::now();
        let mut entry = self
            .histories
            .entry(addr.to_string())
            .or_insert_with(PatternHistory::new);
        entry.push(path.to_string(), method.to_string(), now);

        if entry.paths.len() < MIN_SAMPLES {
            return PatternReport {
                suspicious: false,
                matched: Vec::new(),
            };
        }

        let mut matched = Vec::new();
        if detect_repetitive_path(&entry.paths) {
            matched.push(PatternKind::RepetitivePath);
        }
        if detect_sequential_scanning(&entry.paths) {
            matched.push(PatternKind::SequentialScanning);
        }
        if detect_path_fuzzing(&entry.paths) {
            matched.push(PatternKind::PathFuzzing);
        }
        if detect_post_flooding(&entry.methods) {
            matched.push(PatternKind::PostFlooding);
        }

        PatternReport {
            suspicious: matched.len() >= self.suspicion_threshold,
            matched,
        }
    }

    /// Evict histories with no activity for `stale_after`.
    pub fn cleanup(&self, stale_after: Duration) {
        let now = Instant::now();
        self.histories.retain(|_, h| {
            h.timestamps
                .back()
                .is_some_and(|t| now.duration_since(*t) < stale_after)
        });
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }
}

/// One path accounts for more than 80% of the sample.
fn detect_repetitive_path(paths: &VecDeque<String>) -> bool {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for p in paths {
        *counts.entry(p.as_str()).or_insert(0) += 1;
    }
    let max = counts.values().copied().max().unwrap_or(0);
    max as f64 > paths.len() as f64 * 0.8
}

/// Among paths ending in a numeric segment, a majority of consecutive
/// observed numbers differ by exactly +1 (ID enumeration).
fn detect_sequential_scanning(paths: &VecDeque<String>) -> bool {
    let numbers: Vec<i64> = paths.iter().filter_map(|p| trailing_number(p)).collect();
    if numbers.len() < 5 {
        return false;
    }
    let sequential = numbers.windows(2).filter(|w| w[1] == w[0] + 1).count();
    let pairs = numbers.len() - 1;
    sequential * 2 > pairs
}

/// Unique-path ratio above 90% over a sample larger than 50.
fn detect_path_fuzzing(paths: &VecDeque<String>) -> bool {
    if paths.len() <= 50 {
        return false;
    }
    let unique: HashSet<&str> = paths.iter().map(String::as_str).collect();
    unique.len() as f64 / paths.len() as f64 > 0.9
}

/// More than 90% POST over a sample larger than 20.
fn detect_post_flooding(methods: &VecDeque<String>) -> bool {
    if methods.len() <= 20 {
        return false;
    }
    let posts = methods.iter().filter(|m| m.as_str() == "POST").count();
    posts as f64 / methods.len() as f64 > 0.9
}

/// Parse the last path segment as an integer, if numeric.
fn trailing_number(path: &str) -> Option<i64> {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|seg| seg.parse::<i64>().ok())
}
