//! Administrative endpoints
//!
//! Mounted outside the guard middleware so operators are never locked out
//! by the engine they are operating.

use crate::state::{SharedState, StatsSnapshot};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
struct UnblockResponse {
    key: String,
    unblocked: bool,
}

/// GET /stats
async fn handle_stats(State(state): State<SharedState>) -> Json<StatsSnapshot> {
    Json(state.snapshot())
}

/// POST /unblock/{key}
///
/// Full amnesty: clears the block, the reputation, and the escalation
/// count. 404 when nothing is known about the key.
async fn handle_unblock(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Result<Json<UnblockResponse>, StatusCode> {
    if state.blocklist.unblock(&key) {
        info!(client = %key, "Administrative unblock");
        Ok(Json(UnblockResponse {
            key,
            unblocked: true,
        }))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

/// Router for the operational interface.
pub fn admin_router(state: SharedState) -> Router {
    Router::new()
        .route("/stats", get(handle_stats))
        .route("/unblock/:key", post(handle_unblock))
        .with_state(state)
}
