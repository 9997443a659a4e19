//! Notify route: accepts a logged-session event and relays it to the group.

use axum::{Json, Router, extract::State, routing::post};
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::NotifyResponse;
use crate::api::server::AppState;
use crate::notifier::SessionNotification;

/// Create the notify router.
pub fn router() -> Router<AppState> {
    Router::new().route("/notify", post(notify_session))
}

/// Format the session into the fixed template and relay it. The response
/// resolves with the terminal delivery outcome; the CRUD collaborator fires
/// this without blocking its own response on it.
async fn notify_session(
    State(state): State<AppState>,
    Json(notification): Json<SessionNotification>,
) -> ApiResult<Json<NotifyResponse>> {
    if notification.user_name.trim().is_empty() {
        return Err(ApiError::bad_request("user_name must not be empty"));
    }

    let message = notification.format_message();
    state.notifier.deliver(message).await?;

    info!("notification relayed to the group");
    Ok(Json(NotifyResponse {
        success: true,
        message: "Notification sent".to_string(),
    }))
}
