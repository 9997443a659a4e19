//! Session lifecycle management for the messaging connection.
//!
//! Owns the single live [`ChatClient`]: creation, target resolution,
//! disconnect detection, teardown, and the single-flight reinitialize used
//! when deliveries fail in a cluster. The previous client is always fully
//! destroyed before a new one is created.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::{ChatClient, ChatClientFactory, ClientEvent, GroupChat};
use crate::config::TargetConfig;
use crate::error::{Error, Result};

/// Tunables for session establishment.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Extra initialize attempts after a transient connect failure.
    pub init_max_retries: u32,
    /// Fixed delay between initialize attempts.
    pub init_retry_delay: Duration,
    /// Total attempts for group enumeration during target resolution.
    pub enumeration_attempts: u32,
    /// Fixed delay between enumeration attempts.
    pub enumeration_retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            init_max_retries: 4,
            init_retry_delay: Duration::from_secs(20),
            enumeration_attempts: 3,
            enumeration_retry_delay: Duration::from_secs(10),
        }
    }
}

/// Where the session currently stands.
#[derive(Debug, Clone)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    /// Connected and authenticated. `target_id` is `None` when target
    /// resolution failed; sends then fail until a reinitialize succeeds.
    Ready { target_id: Option<String> },
    /// Connection lost or establishment gave up; health reports not ready.
    Degraded,
    Reinitializing,
}

/// Health view of the current session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSnapshot {
    pub ready: bool,
    pub target_resolved: bool,
}

/// Outcome of a reinitialize request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReinitOutcome {
    Performed,
    /// Another reinitialize was already in flight; this request was dropped.
    AlreadyRunning,
}

struct ListenerHandle {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl ListenerHandle {
    fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Owner of the connection lifecycle. Exactly one session is live at a
/// time, process-wide.
pub struct SessionManager {
    factory: Arc<dyn ChatClientFactory>,
    target: TargetConfig,
    config: SessionConfig,
    state: RwLock<SessionState>,
    client: RwLock<Option<Arc<dyn ChatClient>>>,
    listener: Mutex<Option<ListenerHandle>>,
    // Serializes initialize/reinitialize; try_lock failure is how
    // concurrent reinitialize requests get dropped.
    init_lock: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(
        factory: Arc<dyn ChatClientFactory>,
        target: TargetConfig,
        config: SessionConfig,
    ) -> Self {
        Self {
            factory,
            target,
            config,
            state: RwLock::new(SessionState::Uninitialized),
            client: RwLock::new(None),
            listener: Mutex::new(None),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Establish a session. On a transient connect failure the attempt is
    /// repeated up to the retry budget; on exhaustion (or a non-transient
    /// failure) the session is left degraded and the process keeps running.
    pub async fn initialize(self: &Arc<Self>) {
        let _guard = self.init_lock.lock().await;
        *self.state.write() = SessionState::Initializing;
        self.establish().await;
    }

    /// Tear down the current session and establish a new one. At most one
    /// reinitialize runs at a time; concurrent requests are dropped.
    pub async fn reinitialize(self: &Arc<Self>) -> ReinitOutcome {
        let Ok(_guard) = self.init_lock.try_lock() else {
            debug!("reinitialize already in flight, dropping request");
            return ReinitOutcome::AlreadyRunning;
        };
        warn!("reinitializing messaging session");
        *self.state.write() = SessionState::Reinitializing;
        self.establish().await;
        ReinitOutcome::Performed
    }

    /// Destroy the current client. Best-effort; teardown errors are logged
    /// and swallowed.
    pub async fn teardown(&self) {
        self.destroy_current().await;
        *self.state.write() = SessionState::Uninitialized;
    }

    async fn establish(self: &Arc<Self>) {
        let mut retries = 0;
        loop {
            self.destroy_current().await;

            let client = self.factory.create();
            *self.client.write() = Some(Arc::clone(&client));
            self.spawn_event_listener(&client);

            match client.initialize().await {
                Ok(()) => {
                    info!("messaging session ready");
                    let target_id = self.resolve_target(client.as_ref()).await;
                    *self.state.write() = SessionState::Ready { target_id };
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "session initialization failed");
                    if is_context_destroyed(&err) && retries < self.config.init_max_retries {
                        retries += 1;
                        info!(
                            attempt = retries,
                            max = self.config.init_max_retries,
                            "retrying initialization in {:?}",
                            self.config.init_retry_delay
                        );
                        tokio::time::sleep(self.config.init_retry_delay).await;
                        continue;
                    }
                    error!(
                        "session initialization gave up; service keeps running and health \
                         reports not ready"
                    );
                    *self.state.write() = SessionState::Degraded;
                    return;
                }
            }
        }
    }

    async fn destroy_current(&self) {
        // Stop the old listener first so its disconnect event cannot mark
        // the fresh session degraded.
        if let Some(listener) = self.listener.lock().take() {
            listener.stop();
        }
        let client = self.client.write().take();
        if let Some(client) = client {
            if let Err(err) = client.destroy().await {
                debug!(error = %err, "ignoring client teardown error");
            }
        }
    }

    fn spawn_event_listener(self: &Arc<Self>, client: &Arc<dyn ChatClient>) {
        let mut events = client.events();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let manager = Arc::clone(self);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = events.recv() => match result {
                        Ok(event) => manager.handle_event(event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("session event listener lagged by {} events", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        if let Some(previous) = self.listener.lock().replace(ListenerHandle { task, cancel }) {
            previous.stop();
        }
    }

    fn handle_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::Qr(payload) => {
                info!("pairing QR received, scan it with your phone");
                info!(qr = %payload, "QR payload");
            }
            ClientEvent::Authenticated => info!("messaging session authenticated"),
            ClientEvent::Ready => debug!("client reported ready"),
            ClientEvent::AuthFailure(reason) => {
                error!(reason = %reason, "authentication failed");
            }
            ClientEvent::Disconnected(reason) => {
                warn!(reason = %reason, "messaging session disconnected");
                let mut state = self.state.write();
                if matches!(*state, SessionState::Ready { .. }) {
                    *state = SessionState::Degraded;
                }
            }
        }
    }

    /// Map the configured target to a concrete group id. Precedence:
    /// configured id, then invite code, then display-name enumeration.
    /// Runs exactly once per session; the result is immutable afterward.
    async fn resolve_target(&self, client: &dyn ChatClient) -> Option<String> {
        if let Some(id) = self.target.group_id.as_deref() {
            let id = id.trim().to_string();
            info!(group_id = %id, "using configured group id");
            return Some(id);
        }

        if let Some(code) = self.target.invite_code.as_deref() {
            match client.accept_invite(code).await {
                Ok(id) if !id.trim().is_empty() => {
                    info!(group_id = %id, "resolved group from invite code");
                    return Some(id);
                }
                Ok(_) => warn!("invite lookup returned no group id"),
                Err(err) => {
                    warn!(error = %err, "invite lookup failed (may already be in the group)");
                }
            }
        }

        let wanted = normalize_name(&self.target.group_name);
        match self.group_chats_with_retry(client).await {
            Ok(chats) => {
                if let Some(chat) = chats.iter().find(|c| normalize_name(&c.name) == wanted) {
                    info!(group = %chat.name, group_id = %chat.id, "found target group");
                    Some(chat.id.clone())
                } else {
                    let known: Vec<&str> = chats.iter().map(|c| c.name.as_str()).collect();
                    error!(
                        group = %self.target.group_name,
                        available = ?known,
                        "target group not found"
                    );
                    None
                }
            }
            Err(err) => {
                error!(error = %err, "failed to enumerate group chats");
                None
            }
        }
    }

    async fn group_chats_with_retry(&self, client: &dyn ChatClient) -> Result<Vec<GroupChat>> {
        let mut attempt = 1;
        loop {
            match client.group_chats().await {
                Ok(chats) => return Ok(chats),
                Err(err) => {
                    if is_timeout(&err) && attempt < self.config.enumeration_attempts {
                        warn!(
                            attempt,
                            max = self.config.enumeration_attempts,
                            "group enumeration timed out, retrying in {:?}",
                            self.config.enumeration_retry_delay
                        );
                        attempt += 1;
                        tokio::time::sleep(self.config.enumeration_retry_delay).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        match &*self.state.read() {
            SessionState::Ready { target_id } => SessionSnapshot {
                ready: true,
                target_resolved: target_id.is_some(),
            },
            _ => SessionSnapshot {
                ready: false,
                target_resolved: false,
            },
        }
    }

    /// Client handle and resolved target for a send. Precondition errors
    /// when the session is not ready or the target was never resolved.
    pub fn sender(&self) -> Result<(Arc<dyn ChatClient>, String)> {
        let target_id = match &*self.state.read() {
            SessionState::Ready { target_id } => {
                target_id.clone().ok_or(Error::TargetNotResolved)?
            }
            _ => return Err(Error::NotReady),
        };
        let client = self.client.read().clone().ok_or(Error::NotReady)?;
        Ok((client, target_id))
    }

    /// Current client regardless of target resolution, for operational
    /// endpoints like the group listing.
    pub fn ready_client(&self) -> Result<Arc<dyn ChatClient>> {
        if !matches!(&*self.state.read(), SessionState::Ready { .. }) {
            return Err(Error::NotReady);
        }
        self.client.read().clone().ok_or(Error::NotReady)
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn is_context_destroyed(err: &Error) -> bool {
    err.to_string()
        .to_ascii_lowercase()
        .contains("execution context was destroyed")
}

fn is_timeout(err: &Error) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("timed out") || msg.contains("timeout")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::messaging::client::testing::{ScriptedClient, StubFactory};

    fn fast_config() -> SessionConfig {
        SessionConfig {
            init_retry_delay: Duration::from_millis(1),
            enumeration_retry_delay: Duration::from_millis(1),
            ..SessionConfig::default()
        }
    }

    fn manager_with(
        factory: Arc<StubFactory>,
        target: TargetConfig,
    ) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(factory, target, fast_config()))
    }

    fn groups() -> Vec<GroupChat> {
        vec![
            GroupChat {
                id: "111@g.us".to_string(),
                name: "Dawn Patrol".to_string(),
            },
            GroupChat {
                id: "222@g.us".to_string(),
                name: "Semi-kooks".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn configured_id_takes_precedence_over_invite_code() {
        let client = ScriptedClient::ready();
        let factory = StubFactory::single(Arc::clone(&client));
        let manager = manager_with(
            factory,
            TargetConfig {
                group_name: "Semi-kooks".to_string(),
                group_id: Some("  999@g.us  ".to_string()),
                invite_code: Some("AbC123".to_string()),
            },
        );

        manager.initialize().await;

        let snapshot = manager.snapshot();
        assert!(snapshot.ready);
        assert!(snapshot.target_resolved);
        let (_, target_id) = manager.sender().unwrap();
        assert_eq!(target_id, "999@g.us");
        // The invite code must never be consulted when an id is configured.
        assert_eq!(client.invite_calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.group_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invite_code_resolves_when_no_id_configured() {
        let client = Arc::new(ScriptedClient {
            invite_id: Some("333@g.us".to_string()),
            ..ScriptedClient::base()
        });
        let factory = StubFactory::single(Arc::clone(&client));
        let manager = manager_with(
            factory,
            TargetConfig {
                group_name: "Semi-kooks".to_string(),
                group_id: None,
                invite_code: Some("AbC123".to_string()),
            },
        );

        manager.initialize().await;

        assert_eq!(client.invite_calls.load(Ordering::SeqCst), 1);
        // Enumeration is never needed when the invite resolves.
        assert_eq!(client.group_calls.load(Ordering::SeqCst), 0);
        let (_, target_id) = manager.sender().unwrap();
        assert_eq!(target_id, "333@g.us");
    }

    #[tokio::test]
    async fn invite_failure_falls_back_to_name_enumeration() {
        let client = Arc::new(ScriptedClient {
            groups: groups(),
            invite_id: None,
            ..ScriptedClient::base()
        });
        let factory = StubFactory::single(Arc::clone(&client));
        let manager = manager_with(
            factory,
            TargetConfig {
                group_name: "  SEMI-KOOKS ".to_string(),
                group_id: None,
                invite_code: Some("AbC123".to_string()),
            },
        );

        manager.initialize().await;

        assert_eq!(client.invite_calls.load(Ordering::SeqCst), 1);
        let (_, target_id) = manager.sender().unwrap();
        assert_eq!(target_id, "222@g.us");
    }

    #[tokio::test]
    async fn unresolved_target_leaves_session_ready() {
        let client = ScriptedClient::with_groups(groups());
        let factory = StubFactory::single(client);
        let manager = manager_with(
            factory,
            TargetConfig {
                group_name: "No Such Group".to_string(),
                ..TargetConfig::default()
            },
        );

        manager.initialize().await;

        let snapshot = manager.snapshot();
        assert!(snapshot.ready);
        assert!(!snapshot.target_resolved);
        assert!(matches!(manager.sender(), Err(Error::TargetNotResolved)));
    }

    #[tokio::test]
    async fn enumeration_retries_on_timeout() {
        let client = Arc::new(ScriptedClient {
            groups: groups(),
            group_errors: parking_lot::Mutex::new(
                vec![
                    Error::transport("getChats timed out"),
                    Error::transport("getChats timed out"),
                ]
                .into(),
            ),
            ..ScriptedClient::base()
        });
        let factory = StubFactory::single(Arc::clone(&client));
        let manager = manager_with(
            factory,
            TargetConfig {
                group_name: "Semi-kooks".to_string(),
                ..TargetConfig::default()
            },
        );

        manager.initialize().await;

        assert_eq!(client.group_calls.load(Ordering::SeqCst), 3);
        assert!(manager.snapshot().target_resolved);
    }

    #[tokio::test]
    async fn enumeration_gives_up_after_attempt_budget() {
        let client = Arc::new(ScriptedClient {
            groups: groups(),
            group_errors: parking_lot::Mutex::new(
                vec![
                    Error::transport("getChats timed out"),
                    Error::transport("getChats timed out"),
                    Error::transport("getChats timed out"),
                ]
                .into(),
            ),
            ..ScriptedClient::base()
        });
        let factory = StubFactory::single(Arc::clone(&client));
        let manager = manager_with(
            factory,
            TargetConfig {
                group_name: "Semi-kooks".to_string(),
                ..TargetConfig::default()
            },
        );

        manager.initialize().await;

        assert_eq!(client.group_calls.load(Ordering::SeqCst), 3);
        let snapshot = manager.snapshot();
        assert!(snapshot.ready);
        assert!(!snapshot.target_resolved);
    }

    #[tokio::test]
    async fn init_retries_transient_failures_then_succeeds() {
        let failing = || {
            ScriptedClient::failing_init(vec![Error::transport(
                "Protocol error: Execution context was destroyed",
            )])
        };
        let ok = ScriptedClient::with_groups(groups());
        let factory = StubFactory::with_clients(vec![failing(), failing(), Arc::clone(&ok)]);
        let manager = manager_with(
            Arc::clone(&factory),
            TargetConfig {
                group_name: "Semi-kooks".to_string(),
                ..TargetConfig::default()
            },
        );

        manager.initialize().await;

        assert_eq!(factory.created.load(Ordering::SeqCst), 3);
        let snapshot = manager.snapshot();
        assert!(snapshot.ready);
        assert!(snapshot.target_resolved);
    }

    #[tokio::test]
    async fn init_does_not_retry_non_transient_failures() {
        let client = ScriptedClient::failing_init(vec![Error::AuthFailure("bad auth".to_string())]);
        let factory = StubFactory::single(client);
        let manager = manager_with(Arc::clone(&factory), TargetConfig::default());

        manager.initialize().await;

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(!manager.snapshot().ready);
        assert!(matches!(manager.sender(), Err(Error::NotReady)));
    }

    #[tokio::test]
    async fn init_exhausts_retry_budget_and_degrades() {
        let failing = || {
            ScriptedClient::failing_init(vec![Error::transport(
                "Execution context was destroyed",
            )])
        };
        // Initial attempt plus four retries.
        let factory = StubFactory::with_clients(vec![
            failing(),
            failing(),
            failing(),
            failing(),
            failing(),
        ]);
        let manager = manager_with(Arc::clone(&factory), TargetConfig::default());

        manager.initialize().await;

        assert_eq!(factory.created.load(Ordering::SeqCst), 5);
        assert!(!manager.snapshot().ready);
    }

    #[tokio::test]
    async fn previous_client_destroyed_before_next_attempt() {
        let first = ScriptedClient::failing_init(vec![Error::transport(
            "Execution context was destroyed",
        )]);
        let second = ScriptedClient::ready();
        let factory = StubFactory::with_clients(vec![Arc::clone(&first), second]);
        let manager = manager_with(factory, TargetConfig::default());

        manager.initialize().await;

        assert_eq!(first.destroy_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reinitialize_is_single_flight() {
        let slow = Arc::new(ScriptedClient {
            init_delay: Duration::from_millis(100),
            ..ScriptedClient::base()
        });
        let factory = StubFactory::with_clients(vec![slow]);
        let manager = manager_with(Arc::clone(&factory), TargetConfig::default());

        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.reinitialize().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = manager.reinitialize().await;

        assert_eq!(second, ReinitOutcome::AlreadyRunning);
        assert_eq!(first.await.unwrap(), ReinitOutcome::Performed);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnect_event_degrades_ready_session() {
        let client = ScriptedClient::ready();
        let factory = StubFactory::single(Arc::clone(&client));
        let manager = manager_with(
            factory,
            TargetConfig {
                group_id: Some("999@g.us".to_string()),
                ..TargetConfig::default()
            },
        );

        manager.initialize().await;
        assert!(manager.snapshot().ready);

        client
            .events
            .send(ClientEvent::Disconnected("NAVIGATION".to_string()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!manager.snapshot().ready);
    }

    #[tokio::test]
    async fn teardown_destroys_client_and_resets_state() {
        let client = ScriptedClient::ready();
        let factory = StubFactory::single(Arc::clone(&client));
        let manager = manager_with(
            factory,
            TargetConfig {
                group_id: Some("999@g.us".to_string()),
                ..TargetConfig::default()
            },
        );

        manager.initialize().await;
        manager.teardown().await;

        assert_eq!(client.destroy_calls.load(Ordering::SeqCst), 1);
        assert!(!manager.snapshot().ready);
        assert!(matches!(manager.sender(), Err(Error::NotReady)));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Semi-Kooks "), "semi-kooks");
    }

    #[test]
    fn test_is_context_destroyed() {
        assert!(is_context_destroyed(&Error::transport(
            "Protocol error: Execution context was destroyed"
        )));
        assert!(!is_context_destroyed(&Error::transport("timed out")));
    }
}
