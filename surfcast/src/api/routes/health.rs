//! Health probe route.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::models::HealthResponse;
use crate::api::server::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Health check endpoint. Observational only; always 200 regardless of
/// session state.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.session.snapshot();
    Json(HealthResponse {
        status: "OK".to_string(),
        whatsapp_ready: snapshot.ready,
        group_found: snapshot.target_resolved,
    })
}
