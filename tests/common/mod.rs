// Common test utilities

use axum::{body::Body, http::Request, middleware, routing::any, Router};
use rampart::{GuardConfig, GuardState, SharedState};

/// Build an isolated engine; the event receiver is dropped (events are
/// fire-and-forget).
pub fn test_state(config: GuardConfig) -> SharedState {
    let (state, _rx) = GuardState::new(config).expect("valid test config");
    state
}

/// Router with the guard middleware in front of a trivial handler, the
/// same wiring the binary uses minus the listener.
pub fn guarded_router(state: SharedState) -> Router {
    Router::new()
        .route("/", any(ok))
        .route("/*path", any(ok))
        .layer(middleware::from_fn_with_state(state, rampart::guard))
}

async fn ok() -> &'static str {
    "OK"
}

/// GET request from a given client address and user agent.
pub fn request(path: &str, addr: &str, user_agent: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("x-real-ip", addr)
        .header("user-agent", user_agent)
        .body(Body::empty())
        .expect("request")
}

pub fn post_request(path: &str, addr: &str, user_agent: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("x-real-ip", addr)
        .header("user-agent", user_agent)
        .body(Body::empty())
        .expect("request")
}
