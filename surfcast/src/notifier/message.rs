//! Notification text formatting.

use serde::{Deserialize, Serialize};

/// WhatsApp text message limit (UTF-8 characters).
const MESSAGE_LIMIT: usize = 65536;

/// A logged surf session as reported by the CRUD collaborator. This is the
/// wire contract of `POST /notify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionNotification {
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
}

impl SessionNotification {
    /// Render the fixed message template. Optional lines are omitted when
    /// absent or blank.
    pub fn format_message(&self) -> String {
        let mut message = String::from("\u{1f3c4} Surf session logged\n\n");
        message.push_str(&format!("Surfer: {}\n", self.user_name));
        if let Some(location) = nonblank(&self.location) {
            message.push_str(&format!("Location: {location}\n"));
        }
        if let Some(team) = nonblank(&self.team_name) {
            message.push_str(&format!("Team: {team}\n"));
        }
        if let Some(notes) = nonblank(&self.notes) {
            message.push_str(&format!("Notes: {notes}\n"));
        }
        truncate_message(&message, MESSAGE_LIMIT)
    }
}

fn nonblank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Truncate a message to fit within the network text limit.
fn truncate_message(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let suffix = "\n\n[truncated]";
    let budget = limit - suffix.len();
    let truncated: String = text.chars().take(budget).collect();
    format!("{truncated}{suffix}")
}
