//! WhatsApp Web bridge client.
//!
//! The bridge is a sidecar that drives WhatsApp Web in a headless browser
//! and exposes a small REST surface plus a websocket event stream. This
//! client is the production [`ChatClient`]: REST for commands, the event
//! socket for lifecycle signals (qr, authenticated, ready, auth_failure,
//! disconnected).

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, warn};

use super::client::{ChatClient, ChatClientFactory, ClientEvent, GroupChat};
use crate::config::BridgeConfig;
use crate::error::{Error, Result};

/// One event frame from the bridge socket.
#[derive(Debug, Deserialize)]
struct BridgeEvent {
    event: String,
    #[serde(default)]
    data: Option<String>,
}

impl BridgeEvent {
    fn into_client_event(self) -> Option<ClientEvent> {
        let data = self.data.unwrap_or_default();
        match self.event.as_str() {
            "qr" => Some(ClientEvent::Qr(data)),
            "authenticated" => Some(ClientEvent::Authenticated),
            "ready" => Some(ClientEvent::Ready),
            "auth_failure" => Some(ClientEvent::AuthFailure(data)),
            "disconnected" => Some(ClientEvent::Disconnected(data)),
            other => {
                debug!(event = other, "ignoring unknown bridge event");
                None
            }
        }
    }
}

#[derive(Deserialize)]
struct JoinedGroup {
    id: String,
}

/// Production client talking to the wweb bridge.
pub struct BridgeClient {
    config: BridgeConfig,
    http: reqwest::Client,
    events_tx: broadcast::Sender<ClientEvent>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeClient {
    pub fn new(config: BridgeConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.page_timeout)
            .build()
            .unwrap_or_else(|error| {
                warn!(error = %error, "failed to build HTTP client, falling back to defaults");
                reqwest::Client::new()
            });
        let (events_tx, _) = broadcast::channel(64);
        Self {
            config,
            http,
            events_tx,
            event_task: Mutex::new(None),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Websocket URL of the event stream, derived from the REST base URL.
    fn events_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{base}")
        };
        format!("{ws_base}/events")
    }

    async fn post_json(&self, path: &str, payload: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(self.endpoint(path))
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::transport(format!("{path} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transport(format!("{path} failed: {status} - {body}")));
        }
        Ok(response)
    }

    /// Connect the event socket and forward decoded frames into the
    /// broadcast channel until the socket closes.
    async fn spawn_event_stream(&self) -> Result<()> {
        let url = self.events_url();
        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| Error::transport(format!("event socket connect failed: {e}")))?;
        let (_, mut read) = ws_stream.split();
        let tx = self.events_tx.clone();

        let handle = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<BridgeEvent>(text.as_str()) {
                            Ok(event) => {
                                if let Some(event) = event.into_client_event() {
                                    let _ = tx.send(event);
                                }
                            }
                            Err(error) => {
                                warn!(error = %error, "undecodable bridge event frame");
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        let _ =
                            tx.send(ClientEvent::Disconnected("event socket closed".to_string()));
                        break;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        let _ = tx.send(ClientEvent::Disconnected(format!(
                            "event socket error: {error}"
                        )));
                        break;
                    }
                }
            }
            debug!("bridge event stream ended");
        });

        if let Some(previous) = self.event_task.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Wait for the session to report ready, failing on auth failure or
    /// when the page timeout elapses.
    async fn wait_until_ready(&self, mut events: broadcast::Receiver<ClientEvent>) -> Result<()> {
        let ready_wait = async {
            loop {
                match events.recv().await {
                    Ok(ClientEvent::Ready) => return Ok(()),
                    Ok(ClientEvent::AuthFailure(reason)) => {
                        return Err(Error::AuthFailure(reason));
                    }
                    Ok(ClientEvent::Disconnected(reason)) => {
                        return Err(Error::transport(format!(
                            "disconnected before ready: {reason}"
                        )));
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("bridge event receiver lagged by {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::transport("event stream closed before ready"));
                    }
                }
            }
        };

        tokio::time::timeout(self.config.page_timeout, ready_wait)
            .await
            .map_err(|_| Error::transport("timed out waiting for session ready"))?
    }
}

#[async_trait]
impl ChatClient for BridgeClient {
    async fn initialize(&self) -> Result<()> {
        self.spawn_event_stream().await?;

        // Subscribe before starting the session so no lifecycle event can
        // slip between the start call and the wait.
        let events = self.events_tx.subscribe();

        self.post_json(
            "/session/start",
            &json!({
                "auth_data_dir": self.config.auth_data_dir,
                "browser_path": self.config.browser_path,
                "page_timeout_ms": self.config.page_timeout.as_millis() as u64,
            }),
        )
        .await?;

        self.wait_until_ready(events).await
    }

    async fn destroy(&self) -> Result<()> {
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
        self.post_json("/session/stop", &json!({})).await?;
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events_tx.subscribe()
    }

    async fn group_chats(&self) -> Result<Vec<GroupChat>> {
        let response = self
            .http
            .get(self.endpoint("/groups"))
            .send()
            .await
            .map_err(|e| Error::transport(format!("/groups request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transport(format!("/groups failed: {status} - {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| Error::transport(format!("/groups response undecodable: {e}")))
    }

    async fn accept_invite(&self, code: &str) -> Result<String> {
        let response = self
            .post_json("/groups/join", &json!({ "code": code }))
            .await?;
        let joined: JoinedGroup = response
            .json()
            .await
            .map_err(|e| Error::transport(format!("/groups/join response undecodable: {e}")))?;
        Ok(joined.id)
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint("/messages"))
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .map_err(|e| Error::delivery(format!("send request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::delivery(format!("send failed: {status} - {body}")));
        }
        Ok(())
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
    }
}

/// Creates one [`BridgeClient`] per session.
pub struct BridgeClientFactory {
    config: BridgeConfig,
}

impl BridgeClientFactory {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

impl ChatClientFactory for BridgeClientFactory {
    fn create(&self) -> Arc<dyn ChatClient> {
        Arc::new(BridgeClient::new(self.config.clone()))
    }
}
