//! Client identity resolution
//!
//! Derives a stable per-client key from the network address plus a
//! behavioral fingerprint over slow-changing request headers. The key is a
//! heuristic, not a cryptographic identity: collisions and evasion are
//! acceptable within the threat model (best-effort abuse mitigation).

use axum::http::HeaderMap;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Headers that rarely change per device, in fixed order.
const FINGERPRINT_HEADERS: [&str; 4] =
    ["user-agent", "accept-language", "accept-encoding", "accept"];

/// Sentinel used when no address can be resolved. Resolution must never
/// block the pipeline, so it degrades instead of erroring.
pub const UNKNOWN_ADDR: &str = "unknown";

/// Extract the best available client address from the request.
///
/// Prefers the first hop of `x-forwarded-for`, then `x-real-ip`, then the
/// transport-layer remote address, then the `"unknown"` sentinel.
pub fn resolve_address(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    if let Some(h) = headers.get("x-forwarded-for") {
        if let Ok(val) = h.to_str() {
            if let Some(ip) = val.split(',').next() {
                let ip = ip.trim();
                if !ip.is_empty() && ip != UNKNOWN_ADDR {
                    return ip.to_string();
                }
            }
        }
    }
    if let Some(h) = headers.get("x-real-ip") {
        if let Ok(val) = h.to_str() {
            let val = val.trim();
            if !val.is_empty() && val != UNKNOWN_ADDR {
                return val.to_string();
            }
        }
    }
    if let Some(addr) = remote {
        return addr.ip().to_string();
    }
    UNKNOWN_ADDR.to_string()
}

/// Behavioral fingerprint: fixed-length hex digest over a deterministic
/// header concatenation. Missing headers contribute the empty string.
pub fn fingerprint(headers: &HeaderMap) -> String {
    let mut hasher = Sha256::new();
    for name in FINGERPRINT_HEADERS {
        let value = headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");
        hasher.update(value.as_bytes());
        hasher.update(b"|");
    }
    let digest = hasher.finalize();
    // 8 bytes is plenty for a heuristic key and keeps logs readable.
    hex::encode(&digest[..8])
}

/// Composite per-client identity: fingerprint + address.
///
/// Address alone is defeated by NAT; fingerprint alone by address rotation.
/// Returns the parts alongside the key so callers can reuse them without
/// hashing twice.
pub fn client_key(headers: &HeaderMap, remote: Option<SocketAddr>) -> (String, String, String) {
    let addr = resolve_address(headers, remote);
    let fp = fingerprint(headers);
    let key = format!("{fp}:{addr}");
    (key, addr, fp)
}

struct FingerprintRecord {
    addresses: HashSet<String>,
    last_seen: Instant,
}

/// Tracks how many distinct addresses share a fingerprint.
///
/// A single device profile fanning out across many addresses is a sign of
/// botnets sharing a fingerprint, or fingerprint spoofing at scale.
pub struct FingerprintTracker {
    records: DashMap<String, FingerprintRecord>,
}

impl FingerprintTracker {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Record an observation and return the distinct-address count for the
    /// fingerprint.
    pub fn record(&self, fp: &str, addr: &str) -> usize {
        let mut entry = self
            .records
            .entry(fp.to_string())
            .or_insert_with(|| FingerprintRecord {
                addresses: HashSet::new(),
                last_seen: Instant::now(),
            });
        entry.addresses.insert(addr.to_string());
        entry.last_seen = Instant::now();
        entry.addresses.len()
    }

    /// Evict fingerprints idle past their TTL.
    pub fn cleanup(&self, ttl: Duration) {
        let now = Instant::now();
        self.records
            .retain(|_, rec| now.duration_since(rec.last_seen) < ttl);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for FingerprintTracker {
    fn default() -> Self {
        Self::new()
    }
}
