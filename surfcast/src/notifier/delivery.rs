//! Single-message delivery with bounded retries.
//!
//! Transient failures are recognized by message signature, the same set the
//! underlying browser stack produces when the page or protocol session dies
//! underneath a send.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::monitor::FailureMonitor;
use crate::error::{Error, Result};
use crate::messaging::session::SessionManager;

/// Tunables for the delivery executor.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Attempts per message, including the first.
    pub max_attempts: u32,
    /// Backoff schedule per retry; capped at the last entry.
    pub backoff: Vec<Duration>,
    /// Upper bound of the random jitter added to each backoff delay.
    pub max_jitter: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: vec![
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
            max_jitter: Duration::from_millis(300),
        }
    }
}

/// Error-message signatures believed recoverable by retrying or
/// reconnecting.
const TRANSIENT_SIGNATURES: &[&str] = &[
    "timed out",
    "timeout",
    "execution context was destroyed",
    "protocolerror",
    "protocol error",
    "target closed",
    "session closed",
];

/// Whether a delivery error is worth retrying or reconnecting over.
/// Precondition errors are never transient.
pub fn is_transient(err: &Error) -> bool {
    if matches!(
        err,
        Error::NotReady | Error::TargetNotResolved | Error::QueueFull
    ) {
        return false;
    }
    let msg = err.to_string().to_ascii_lowercase();
    TRANSIENT_SIGNATURES.iter().any(|sig| msg.contains(sig))
}

/// Sends one message at a time through the live session.
pub struct DeliveryExecutor {
    session: Arc<SessionManager>,
    monitor: Arc<FailureMonitor>,
    config: DeliveryConfig,
}

impl DeliveryExecutor {
    pub fn new(
        session: Arc<SessionManager>,
        monitor: Arc<FailureMonitor>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            session,
            monitor,
            config,
        }
    }

    /// Send one payload. A not-ready session fails immediately; transient
    /// errors are retried up to the attempt budget with escalating backoff.
    /// The terminal outcome feeds the failure monitor.
    pub async fn send(&self, payload: &str) -> Result<()> {
        let mut last_err = Error::NotReady;

        for attempt in 1..=self.config.max_attempts {
            // Re-check the session each attempt; it may have been torn down
            // or reinitialized since the previous one.
            let result = match self.session.sender() {
                Ok((client, target_id)) => client.send_message(&target_id, payload).await,
                Err(err) => Err(err),
            };

            match result {
                Ok(()) => {
                    self.monitor.record_success();
                    return Ok(());
                }
                Err(err) => {
                    let retryable = is_transient(&err) && attempt < self.config.max_attempts;
                    if retryable {
                        let delay = backoff_delay(&self.config, attempt);
                        warn!(
                            attempt,
                            error = %err,
                            "send attempt failed, retrying in {:?}",
                            delay
                        );
                        last_err = err;
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    last_err = err;
                    break;
                }
            }
        }

        self.monitor.record_failure(&last_err);
        Err(last_err)
    }
}

/// Backoff for the given attempt number: the schedule entry (capped at the
/// last one) plus random jitter.
fn backoff_delay(config: &DeliveryConfig, attempt: u32) -> Duration {
    let idx = (attempt as usize).saturating_sub(1);
    let base = config
        .backoff
        .get(idx)
        .or_else(|| config.backoff.last())
        .copied()
        .unwrap_or_default();

    let max_jitter_ms = config.max_jitter.as_millis() as u64;
    let jitter_ms = if max_jitter_ms > 0 {
        rand::random::<u64>() % max_jitter_ms
    } else {
        0
    };
    base + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::Ordering;

    use parking_lot::Mutex;

    use super::*;
    use crate::config::TargetConfig;
    use crate::messaging::client::testing::{ScriptedClient, StubFactory};
    use crate::messaging::session::SessionConfig;
    use crate::notifier::monitor::MonitorConfig;

    fn fast_delivery_config() -> DeliveryConfig {
        DeliveryConfig {
            max_attempts: 3,
            backoff: vec![Duration::from_millis(1)],
            max_jitter: Duration::ZERO,
        }
    }

    /// Session manager brought up against a scripted client with a
    /// configured target id.
    async fn ready_executor(client: Arc<ScriptedClient>) -> DeliveryExecutor {
        let session = Arc::new(SessionManager::new(
            StubFactory::single(client),
            TargetConfig {
                group_id: Some("999@g.us".to_string()),
                ..TargetConfig::default()
            },
            SessionConfig::default(),
        ));
        session.initialize().await;
        let monitor = Arc::new(FailureMonitor::new(
            Arc::clone(&session),
            MonitorConfig::default(),
        ));
        DeliveryExecutor::new(session, monitor, fast_delivery_config())
    }

    fn scripted_sends(errors: Vec<Error>) -> Arc<ScriptedClient> {
        Arc::new(ScriptedClient {
            send_errors: Mutex::new(VecDeque::from(errors)),
            ..ScriptedClient::base()
        })
    }

    #[test]
    fn test_transient_signatures() {
        for msg in [
            "Evaluation failed: getChats timed out",
            "Navigation timeout of 30000 ms exceeded",
            "Protocol error (Runtime.callFunctionOn): Execution context was destroyed",
            "ProtocolError: Connection closed",
            "Protocol error: Target closed",
            "Session closed. Most likely the page has been closed",
        ] {
            assert!(is_transient(&Error::delivery(msg)), "expected transient: {msg}");
        }

        assert!(!is_transient(&Error::delivery("invalid wid")));
        assert!(!is_transient(&Error::NotReady));
        assert!(!is_transient(&Error::TargetNotResolved));
        assert!(!is_transient(&Error::QueueFull));
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let client = scripted_sends(vec![
            Error::delivery("send failed: timed out"),
            Error::delivery("send failed: timed out"),
        ]);
        let executor = ready_executor(Arc::clone(&client)).await;

        executor.send("hello").await.unwrap();

        assert_eq!(client.send_calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.monitor.consecutive_failures(), 0);
        assert_eq!(client.sent.lock()[0].0, "999@g.us");
    }

    #[tokio::test]
    async fn transient_failures_exhaust_attempt_budget() {
        let client = scripted_sends(vec![
            Error::delivery("send failed: Session closed"),
            Error::delivery("send failed: Session closed"),
            Error::delivery("send failed: Session closed"),
        ]);
        let executor = ready_executor(Arc::clone(&client)).await;

        let err = executor.send("hello").await.unwrap_err();

        assert!(is_transient(&err));
        assert_eq!(client.send_calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.monitor.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn non_transient_failure_gets_exactly_one_attempt() {
        let client = scripted_sends(vec![Error::delivery("invalid wid")]);
        let executor = ready_executor(Arc::clone(&client)).await;

        let err = executor.send("hello").await.unwrap_err();

        assert!(!is_transient(&err));
        assert_eq!(client.send_calls.load(Ordering::SeqCst), 1);
        assert_eq!(executor.monitor.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn not_ready_session_fails_without_touching_the_client() {
        let client = ScriptedClient::ready();
        let session = Arc::new(SessionManager::new(
            StubFactory::single(Arc::clone(&client)),
            TargetConfig::default(),
            SessionConfig::default(),
        ));
        let monitor = Arc::new(FailureMonitor::new(
            Arc::clone(&session),
            MonitorConfig::default(),
        ));
        let executor = DeliveryExecutor::new(session, monitor, fast_delivery_config());

        let err = executor.send("hello").await.unwrap_err();

        assert!(matches!(err, Error::NotReady));
        assert_eq!(client.send_calls.load(Ordering::SeqCst), 0);
        assert_eq!(executor.monitor.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn success_resets_the_failure_counter() {
        let client = scripted_sends(vec![
            Error::delivery("send failed: timed out"),
            Error::delivery("send failed: timed out"),
            Error::delivery("send failed: timed out"),
        ]);
        let executor = ready_executor(Arc::clone(&client)).await;

        // First send exhausts its budget and fails terminally.
        executor.send("first").await.unwrap_err();
        assert_eq!(executor.monitor.consecutive_failures(), 1);

        // Second send succeeds and clears the streak.
        executor.send("second").await.unwrap();
        assert_eq!(executor.monitor.consecutive_failures(), 0);
    }

    #[test]
    fn test_backoff_schedule_caps_at_last_entry() {
        let config = DeliveryConfig {
            max_attempts: 5,
            backoff: vec![Duration::from_millis(2), Duration::from_millis(5)],
            max_jitter: Duration::ZERO,
        };
        let delays: Vec<Duration> = (1..=4).map(|a| backoff_delay(&config, a)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(2),
                Duration::from_millis(5),
                Duration::from_millis(5),
                Duration::from_millis(5),
            ]
        );
    }

    #[test]
    fn test_backoff_jitter_stays_within_bound() {
        let config = DeliveryConfig::default();
        for attempt in 1..=3 {
            let delay = backoff_delay(&config, attempt);
            let base = config.backoff[(attempt as usize) - 1];
            assert!(delay >= base);
            assert!(delay < base + config.max_jitter);
        }
    }
}
