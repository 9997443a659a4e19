//! Operational aid: list joined group conversations.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::GroupsResponse;
use crate::api::server::AppState;

/// Create the debug-groups router.
pub fn router() -> Router<AppState> {
    Router::new().route("/debug-groups", get(debug_groups))
}

/// List the groups the session can see, with ids, so an operator can pin
/// the target by id instead of display name.
async fn debug_groups(State(state): State<AppState>) -> ApiResult<Json<GroupsResponse>> {
    let client = state
        .session
        .ready_client()
        .map_err(|_| ApiError::service_unavailable("WhatsApp not ready"))?;

    let groups = client
        .group_chats()
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;

    Ok(Json(GroupsResponse { groups }))
}
