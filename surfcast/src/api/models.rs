//! API wire models.

use serde::{Deserialize, Serialize};

use crate::messaging::client::GroupChat;

/// Body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub whatsapp_ready: bool,
    pub group_found: bool,
}

/// Body of the service banner at `/`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub status: String,
    pub service: String,
    pub health: String,
    pub notify: String,
}

/// Success body of `POST /notify`.
#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub success: bool,
    pub message: String,
}

/// Body of `GET /debug-groups`.
#[derive(Debug, Serialize, Deserialize)]
pub struct GroupsResponse {
    pub groups: Vec<GroupChat>,
}
