pub mod session;

use crate::registry::SessionRegistry;
use crate::timeout::{DEFAULT_UPLOAD_TIMEOUT, TimeoutSupervisor};
use crate::transfer::TransferPipeline;
use filerelay::protocol::{Notice, NoticeKind, Request, Response, SessionStatus};
use filerelay::{DEFAULT_CANCEL_TOKEN, DEFAULT_TRIGGER};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast};

/// Runtime configuration for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Base URL of the destination service; uploads go to `{base}/api`.
    pub destination_url: String,
    /// Directory holding in-flight scratch files.
    pub scratch_dir: PathBuf,
    /// How long a user has to send the file after a trigger.
    pub upload_timeout: Duration,
    /// Keyword that introduces the target filename, e.g. `tg` in `tgreport.pdf`.
    pub trigger: String,
    /// Message that cancels a pending upload (case-insensitive).
    pub cancel_token: String,
}

impl RelayConfig {
    pub fn new(destination_url: impl Into<String>) -> Self {
        Self {
            destination_url: destination_url.into(),
            scratch_dir: std::env::temp_dir(),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            trigger: DEFAULT_TRIGGER.to_string(),
            cancel_token: DEFAULT_CANCEL_TOKEN.to_string(),
        }
    }
}

/// Shared relay state accessible by all host connections.
pub struct RelayState {
    pub config: RelayConfig,
    pub registry: Arc<SessionRegistry>,
    pub timeouts: TimeoutSupervisor,
    pub pipeline: TransferPipeline,
    pub notice_tx: broadcast::Sender<Notice>,
    /// Signalled by a `Shutdown` request.
    pub shutdown: Notify,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Arc<Self> {
        let pipeline = TransferPipeline::new(config.scratch_dir.clone());
        Self::with_pipeline(config, pipeline)
    }

    pub fn with_pipeline(config: RelayConfig, pipeline: TransferPipeline) -> Arc<Self> {
        let (notice_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            timeouts: TimeoutSupervisor::new(),
            pipeline,
            notice_tx,
            shutdown: Notify::new(),
        })
    }

    /// Push a notice to every connected host.
    pub fn notify(&self, user_id: &str, kind: NoticeKind, text: impl Into<String>) {
        send_notice(&self.notice_tx, user_id, kind, text);
    }
}

pub(crate) fn send_notice(
    tx: &broadcast::Sender<Notice>,
    user_id: &str,
    kind: NoticeKind,
    text: impl Into<String>,
) {
    let notice = Notice {
        user_id: user_id.to_string(),
        kind,
        text: text.into(),
    };
    tracing::debug!(user_id = %user_id, %kind, "notice");
    // No connected host is fine; the notice is simply dropped.
    let _ = tx.send(notice);
}

/// Handle a single request from a host connection.
pub async fn handle_request(state: &Arc<RelayState>, req: Request) -> Response {
    match req {
        Request::Trigger { event } => {
            let transition = session::on_trigger(state, &event).await;
            transition_response(transition)
        }
        Request::Message { event } => {
            let transition = session::on_message(state, &event).await;
            transition_response(transition)
        }
        Request::Status { user_id } => handle_status(state, &user_id),
        Request::Shutdown => handle_shutdown(state),
    }
}

fn handle_status(state: &Arc<RelayState>, user_id: &str) -> Response {
    let info = state.registry.get(user_id);
    let status = SessionStatus {
        user_id: user_id.to_string(),
        waiting: info.is_some(),
        target_filename: info.as_ref().map(|i| i.target_filename.clone()),
        created_at_ms: info.as_ref().map(|i| i.created_at_ms),
    };
    match serde_json::to_value(status) {
        Ok(v) => ok_response(Some(v)),
        Err(e) => error_response("internal", &e.to_string()),
    }
}

fn handle_shutdown(state: &Arc<RelayState>) -> Response {
    tracing::info!(pending = state.registry.len(), "shutdown requested");
    state.timeouts.shutdown();
    state.shutdown.notify_one();
    ok_response(None)
}

fn transition_response(transition: session::Transition) -> Response {
    ok_response(Some(serde_json::json!({ "transition": transition })))
}

// ---- Shared helpers ----

pub fn ok_response(data: Option<serde_json::Value>) -> Response {
    Response::Ok { data }
}

pub fn error_response(code: &str, message: &str) -> Response {
    Response::Error {
        code: code.to_string(),
        message: message.to_string(),
    }
}
