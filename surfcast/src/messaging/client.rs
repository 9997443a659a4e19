//! Client seam for the WhatsApp Web connection.
//!
//! The session manager owns client lifecycles through [`ChatClientFactory`];
//! everything network-facing hides behind [`ChatClient`] so the relay core
//! can be exercised against scripted implementations.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

/// A joined group conversation as reported by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupChat {
    pub id: String,
    pub name: String,
}

/// Lifecycle events emitted by the underlying connection.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Pairing QR payload for the operator to scan with their phone.
    Qr(String),
    Authenticated,
    Ready,
    AuthFailure(String),
    Disconnected(String),
}

/// One connection to the messaging network.
///
/// Implementations own the underlying transport. Exactly one client is live
/// at a time; the session manager destroys the previous one before creating
/// the next.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Open the connection and authenticate. Resolves once the session is
    /// usable for sends.
    async fn initialize(&self) -> Result<()>;

    /// Destroy the connection. Best-effort; callers swallow errors.
    async fn destroy(&self) -> Result<()>;

    /// Subscribe to lifecycle events.
    fn events(&self) -> broadcast::Receiver<ClientEvent>;

    /// Enumerate joined group conversations.
    async fn group_chats(&self) -> Result<Vec<GroupChat>>;

    /// Accept an invite code, returning the id of the joined group.
    async fn accept_invite(&self, code: &str) -> Result<String>;

    /// Send a text message to a chat.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()>;
}

/// Creates a fresh client for each session.
pub trait ChatClientFactory: Send + Sync {
    fn create(&self) -> Arc<dyn ChatClient>;
}
