//! Server-wide stop signal and session drain.
//!
//! One `CancellationToken` stops the accept loop and every session. Each
//! admitted session holds a [`TaskTrackerToken`] until it has unregistered
//! and sent its Close frame, so a drain can wait for all of them.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::{TaskTracker, task_tracker::TaskTrackerToken};
use tracing::{info, warn};

/// Drain budget when the caller gives none.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Stop signal plus the set of live sessions.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a coordinator with no sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the stop token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Guard held by one session for its whole lifetime.
    pub fn session_guard(&self) -> TaskTrackerToken {
        self.sessions.token()
    }

    /// Sessions still holding a guard.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Signal every task to stop. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop, then wait for the serve task and every session to finish.
    ///
    /// Returns `false` if `timeout` (default 10s) elapsed first.
    pub async fn graceful_shutdown(&self, server: JoinHandle<()>, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.shutdown();
        self.sessions.close();
        info!(
            sessions = self.active_sessions(),
            timeout_ms = timeout.as_millis(),
            "draining server"
        );

        let drain = async {
            if let Err(e) = server.await {
                warn!(error = %e, "serve task ended abnormally");
            }
            self.sessions.wait().await;
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                remaining = self.active_sessions(),
                "drain timed out, abandoning sessions"
            );
            return false;
        }
        true
    }
}
