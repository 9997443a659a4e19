//! API route modules.
//!
//! Organizes routes by concern.

pub mod groups;
pub mod health;
pub mod notify;

use axum::http::StatusCode;
use axum::{Json, Router, routing::get};

use crate::api::models::ServiceInfo;
use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .merge(health::router())
        .merge(notify::router())
        .merge(groups::router())
        .fallback(not_found)
        .with_state(state)
}

/// Service banner with a route map, for humans poking at the port.
async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        status: "OK".to_string(),
        service: "surfcast-notifier".to_string(),
        health: "/health".to_string(),
        notify: "/notify".to_string(),
    })
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Not found" })),
    )
}
