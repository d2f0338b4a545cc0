//! Middleware orchestrator
//!
//! Runs the per-request protection pipeline in a fixed order, cheapest and
//! least-stateful checks first, short-circuiting on the first denial:
//! whitelist, blocklist, fixed-window rate limit, burst, then pattern and
//! reputation bookkeeping as side effects before admission. Bookkeeping
//! never gates the current request; a block it triggers takes effect on the
//! client's next request.
//!
//! Nothing here reads the request body, and no check can panic into the
//! framework: heuristic failures degrade toward observation, identity
//! resolution degrades to `"unknown"`. Only the blocklist check itself is
//! deny-oriented.

use crate::identity;
use crate::reputation::{BlockStatus, ViolationKind};
use crate::state::SharedState;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const HEADER_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
const HEADER_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RATELIMIT_RESET: &str = "x-ratelimit-reset";
const HEADER_CHALLENGE_REQUIRED: &str = "x-challenge-required";
const HEADER_CHALLENGE_TYPE: &str = "x-challenge-type";

/// The protection pipeline, wired via `axum::middleware::from_fn_with_state`.
pub async fn guard(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    state
        .stats
        .total_requests
        .fetch_add(1, Ordering::Relaxed);

    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let (key, addr, fingerprint) = identity::client_key(req.headers(), remote);

    // Whitelisted clients skip every check and get no headers.
    if state.is_whitelisted(&addr) {
        return next.run(req).await;
    }

    // Blocklist, with lazy expiry of temporary blocks.
    if let Some(status) = state.blocklist.is_blocked(&key) {
        warn!(
            policy_decision = "deny",
            reason = "blocked",
            client = %key,
            permanent = status.permanent,
            "Request denied: client is blocked"
        );
        state
            .stats
            .blocked_requests
            .fetch_add(1, Ordering::Relaxed);
        return deny_blocked(&state, &key, status);
    }

    // Fixed-window rate limit.
    let rate = state.limiter.check(&key);
    if !rate.allowed {
        warn!(
            policy_decision = "deny",
            reason = "rate_limit_exceeded",
            client = %key,
            "Request denied: rate limit exceeded"
        );
        state.blocklist.record_violation(&key, ViolationKind::RateLimit);
        state
            .stats
            .blocked_requests
            .fetch_add(1, Ordering::Relaxed);
        let mut resp = deny(
            "rate_limited",
            "Too many requests, slow down",
            Some(rate.reset_after),
        );
        set_rate_headers(&state, resp.headers_mut(), 0, rate.reset_after);
        attach_challenge(&state, &key, resp.headers_mut());
        return resp;
    }

    // Sliding-window burst detection. The spike signal is advisory and
    // independent of the deny decision.
    let burst = state.burst.check(&key);
    if burst.spike {
        state
            .stats
            .spikes_detected
            .fetch_add(1, Ordering::Relaxed);
        let _ = state.events.send(crate::events::GuardEvent::SpikeDetected {
            key: key.clone(),
            rate: burst.rate,
        });
    }
    if !burst.allowed {
        warn!(
            policy_decision = "deny",
            reason = "burst_detected",
            client = %key,
            rate = burst.rate,
            "Request denied: request velocity too high"
        );
        state.blocklist.record_violation(&key, ViolationKind::Burst);
        state
            .stats
            .blocked_requests
            .fetch_add(1, Ordering::Relaxed);
        let mut resp = deny(
            "burst_detected",
            "Request velocity too high",
            Some(state.config.spike_window()),
        );
        attach_challenge(&state, &key, resp.headers_mut());
        return resp;
    }

    // Pattern and fingerprint bookkeeping: observed, never gating.
    let report = state
        .patterns
        .record_and_analyze(&addr, req.uri().path(), req.method().as_str());
    if report.suspicious {
        state
            .stats
            .suspicious_patterns
            .fetch_add(1, Ordering::Relaxed);
        let _ = state
            .events
            .send(crate::events::GuardEvent::SuspiciousPattern {
                addr: addr.clone(),
                patterns: report.matched.clone(),
            });
        state
            .blocklist
            .record_violation(&key, ViolationKind::SuspiciousPattern);
    }

    let fanout = state.fingerprints.record(&fingerprint, &addr);
    if fanout > state.config.max_addresses_per_fingerprint {
        debug!(
            client = %key,
            fanout,
            "Fingerprint fanned out across too many addresses"
        );
        state
            .blocklist
            .record_violation(&key, ViolationKind::FingerprintAbuse);
    }

    let mut resp = next.run(req).await;
    set_rate_headers(&state, resp.headers_mut(), rate.remaining, rate.reset_after);
    attach_challenge(&state, &key, resp.headers_mut());
    resp
}

/// 429 with a structured JSON body; no stack traces or internal state.
fn deny(error: &str, message: &str, retry_after: Option<Duration>) -> Response {
    let mut body = json!({
        "error": error,
        "message": message,
    });
    if let Some(retry) = retry_after {
        body["retryAfter"] = json!(retry.as_secs());
    }
    let mut resp = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
    if let Some(retry) = retry_after {
        if let Ok(value) = HeaderValue::from_str(&retry.as_secs().to_string()) {
            resp.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
        }
    }
    resp
}

fn deny_blocked(state: &SharedState, key: &str, status: BlockStatus) -> Response {
    let mut resp = if status.permanent {
        deny("blocked", "Access permanently revoked", None)
    } else {
        deny("blocked", "Temporarily blocked due to abusive traffic", status.remaining)
    };
    attach_challenge(state, key, resp.headers_mut());
    resp
}

fn set_rate_headers(
    state: &SharedState,
    headers: &mut axum::http::HeaderMap,
    remaining: u32,
    reset_after: Duration,
) {
    let limit = state.config.max_requests_per_window;
    let reset_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .saturating_add(reset_after)
        .as_secs();

    for (name, value) in [
        (HEADER_RATELIMIT_LIMIT, limit.to_string()),
        (HEADER_RATELIMIT_REMAINING, remaining.to_string()),
        (HEADER_RATELIMIT_RESET, reset_epoch.to_string()),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

/// Once a client's violation count passes the challenge threshold, signal
/// the caller to present a client-side proof-of-work challenge. Advisory;
/// enforcement, if any, happens outside this core.
fn attach_challenge(state: &SharedState, key: &str, headers: &mut axum::http::HeaderMap) {
    if state.blocklist.violation_count(key) >= state.config.challenge_threshold {
        headers.insert(
            HeaderName::from_static(HEADER_CHALLENGE_REQUIRED),
            HeaderValue::from_static("true"),
        );
        headers.insert(
            HeaderName::from_static(HEADER_CHALLENGE_TYPE),
            HeaderValue::from_static("proof-of-work"),
        );
        state
            .stats
            .challenges_issued
            .fetch_add(1, Ordering::Relaxed);
    }
}
