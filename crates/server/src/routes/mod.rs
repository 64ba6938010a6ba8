pub mod elections;
pub mod tally;
pub mod trustees;
pub mod vote;

use crate::edge_sync::sync_batch;
use crate::state::AppState;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/elections", post(elections::create_election))
        .route("/api/elections/:election_id", get(elections::get_election))
        .route(
            "/api/elections/:election_id/status",
            axum::routing::patch(elections::update_status),
        )
        .route(
            "/api/elections/:election_id/trustees",
            post(trustees::register_trustee),
        )
        .route(
            "/api/elections/:election_id/trustees/:trustee_id/commitment",
            post(trustees::submit_commitment),
        )
        .route("/api/vote", post(vote::submit_vote))
        .route("/api/vote/ballot", post(vote::submit_ballot))
        .route("/api/vote/stats/:election_id", get(vote::get_stats))
        .route("/api/vote/root/:election_id", get(vote::get_aggregate_root))
        .route(
            "/api/vote/tally/:election_id/start",
            post(tally::start_decryption),
        )
        .route(
            "/api/vote/tally/:election_id/decrypt",
            post(tally::submit_decryption_share),
        )
        .route(
            "/api/vote/tally/:election_id/status",
            get(tally::get_status),
        )
        .route("/api/sync/upload", post(sync_batch))
        .with_state(state)
}
