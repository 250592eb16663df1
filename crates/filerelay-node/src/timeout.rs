use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default time a user has to send the file after a trigger.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Ownership of one scheduled expiry action.
///
/// Disarming is idempotent: disarming a handle that already fired or was
/// already disarmed does nothing.
#[derive(Debug)]
pub struct TimeoutHandle {
    token: CancellationToken,
}

impl TimeoutHandle {
    pub fn disarm(&self) {
        self.token.cancel();
    }

    pub fn is_disarmed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Schedules cancellable delayed-expiry actions, one per session.
///
/// Every handle is a child of the supervisor's root token, so
/// [`TimeoutSupervisor::shutdown`] disarms all outstanding timers at once.
pub struct TimeoutSupervisor {
    root: CancellationToken,
}

impl TimeoutSupervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
        }
    }

    /// Run `on_expire` after `duration` unless the returned handle is disarmed first.
    ///
    /// A disarm that lands in the same poll as the deadline wins.
    pub fn arm<F, Fut>(&self, user_id: &str, duration: Duration, on_expire: F) -> TimeoutHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.root.child_token();
        let cancelled = token.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {
                    tracing::trace!(user_id = %user_id, "upload timer disarmed");
                }
                _ = tokio::time::sleep(duration) => {
                    tracing::debug!(user_id = %user_id, ?duration, "upload timer fired");
                    on_expire().await;
                }
            }
        });
        TimeoutHandle { token }
    }

    /// Disarm every outstanding timer.
    pub fn shutdown(&self) {
        self.root.cancel();
    }
}

impl Default for TimeoutSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
