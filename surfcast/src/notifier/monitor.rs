//! Consecutive-failure tracking and forced session reinitialization.
//!
//! A degraded underlying connection can fail silently forever; this bounds
//! the stuck window to roughly one failure streak by forcing a reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::warn;

use super::delivery::is_transient;
use crate::error::Error;
use crate::messaging::session::{ReinitOutcome, SessionManager};

/// Tunables for the failure monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Consecutive transient terminal failures before a reinitialize.
    pub failure_threshold: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
        }
    }
}

/// Observes delivery outcomes and restarts the session when transient
/// failures cluster.
pub struct FailureMonitor {
    session: Arc<SessionManager>,
    config: MonitorConfig,
    consecutive_failures: Arc<AtomicU32>,
}

impl FailureMonitor {
    pub fn new(session: Arc<SessionManager>, config: MonitorConfig) -> Self {
        Self {
            session,
            config,
            consecutive_failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// A successful delivery clears the streak.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// A terminal delivery failure. Every terminal failure extends the
    /// streak; only a transient one can trip the reinitialize.
    pub fn record_failure(&self, err: &Error) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if !is_transient(err) {
            return;
        }
        if failures < self.config.failure_threshold {
            return;
        }

        warn!(
            failures,
            "consecutive transient send failures crossed threshold, reinitializing session"
        );
        // The job that tripped the threshold still fails normally; the
        // restart happens off to the side.
        let session = Arc::clone(&self.session);
        let counter = Arc::clone(&self.consecutive_failures);
        tokio::spawn(async move {
            if session.reinitialize().await == ReinitOutcome::Performed {
                counter.store(0, Ordering::SeqCst);
            }
        });
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }
}
