use super::{RelayState, send_notice};
use crate::command::parse_trigger_event;
use crate::error::RelayError;
use crate::registry::SessionRegistry;
use filerelay::protocol::{HostEvent, MessagePart, Notice, NoticeKind};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// What a host event did to the sender's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Idle → Waiting.
    Started,
    /// Trigger while Waiting; the existing session is untouched.
    AlreadyPending,
    /// Malformed trigger or unreadable attachment.
    Rejected,
    Cancelled,
    /// File accepted; the relay runs in the background and reports its
    /// outcome as a notice.
    Processing,
    /// No session, an unrelated message, or a lost race.
    Ignored,
}

/// Entry point for messages that matched the trigger filter.
pub async fn on_trigger(state: &Arc<RelayState>, event: &HostEvent) -> Transition {
    let user_id = event.sender_id.as_str();

    if state.registry.peek(user_id) {
        return already_pending(state, user_id);
    }

    let filename = match parse_trigger_event(event, &state.config.trigger) {
        Ok(name) => name,
        Err(e) => {
            tracing::debug!(user_id = %user_id, err = %e, "trigger rejected");
            state.notify(
                user_id,
                NoticeKind::Rejected,
                format!("Could not read the target filename ({e})."),
            );
            return Transition::Rejected;
        }
    };

    let timeout = state.config.upload_timeout;
    let created = state.registry.try_create(user_id, &filename, |session_id| {
        let registry = state.registry.clone();
        let notices = state.notice_tx.clone();
        let user = user_id.to_string();
        state.timeouts.arm(user_id, timeout, move || async move {
            expire(&registry, &notices, &user, session_id);
        })
    });

    match created {
        Ok(info) => {
            tracing::info!(
                user_id = %user_id,
                file = %info.target_filename,
                session = %info.id,
                "upload session started"
            );
            state.notify(
                user_id,
                NoticeKind::Prompt,
                format!(
                    "Send the file now (reply `{}` to cancel).",
                    state.config.cancel_token
                ),
            );
            Transition::Started
        }
        Err(_) => already_pending(state, user_id),
    }
}

fn already_pending(state: &RelayState, user_id: &str) -> Transition {
    state.notify(
        user_id,
        NoticeKind::Pending,
        "An upload is already pending, please don't start another one.",
    );
    Transition::AlreadyPending
}

/// Expiry action for session `session_id`.
///
/// Resolving here is what decides the race against cancel and fulfillment:
/// if the session is already gone this does nothing at all.
fn expire(
    registry: &SessionRegistry,
    notices: &broadcast::Sender<Notice>,
    user_id: &str,
    session_id: Uuid,
) {
    match registry.resolve_session(user_id, session_id) {
        Ok(session) => {
            tracing::info!(
                user_id = %user_id,
                file = %session.target_filename,
                age = ?session.age(),
                "upload session timed out"
            );
            send_notice(
                notices,
                user_id,
                NoticeKind::TimedOut,
                "Upload timed out, send the command again to retry.",
            );
        }
        Err(_) => {
            tracing::debug!(user_id = %user_id, session = %session_id, "timer lost race, session already resolved");
        }
    }
}

/// Entry point for every message from every user.
pub async fn on_message(state: &Arc<RelayState>, event: &HostEvent) -> Transition {
    let user_id = event.sender_id.as_str();

    if !state.registry.peek(user_id) {
        return Transition::Ignored;
    }

    if is_cancel(event, &state.config.cancel_token) {
        return match state.registry.resolve(user_id) {
            Ok(session) => {
                session.disarm();
                tracing::info!(user_id = %user_id, file = %session.target_filename, "upload cancelled");
                state.notify(user_id, NoticeKind::Cancelled, "Upload cancelled.");
                Transition::Cancelled
            }
            Err(_) => Transition::Ignored,
        };
    }

    if !event.has_file() {
        return Transition::Ignored;
    }

    let Ok(session) = state.registry.resolve(user_id) else {
        return Transition::Ignored;
    };
    session.disarm();
    tracing::info!(user_id = %user_id, file = %session.target_filename, "file received");

    let source_url = match attachment_url(event) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(user_id = %user_id, err = %e, "unusable attachment");
            state.notify(
                user_id,
                NoticeKind::Rejected,
                "Could not read the file, please try again.",
            );
            return Transition::Rejected;
        }
    };

    state.notify(user_id, NoticeKind::Processing, "Processing file...");
    tokio::spawn(relay_file(
        state.clone(),
        user_id.to_string(),
        source_url.to_string(),
        session.target_filename.clone(),
        session.id,
    ));
    Transition::Processing
}

/// Run one relay off the request path and report its outcome.
async fn relay_file(
    state: Arc<RelayState>,
    user_id: String,
    source_url: String,
    target_filename: String,
    session_id: Uuid,
) {
    let result = state
        .pipeline
        .relay(
            &source_url,
            &target_filename,
            &session_id.to_string(),
            &state.config.destination_url,
        )
        .await;

    let kind = if result.ok {
        NoticeKind::Completed
    } else {
        NoticeKind::Failed
    };
    tracing::info!(user_id = %user_id, file = %target_filename, ok = result.ok, "relay finished");
    state.notify(&user_id, kind, result.message);
}

/// Whether the message is exactly the cancel token, ignoring case and surrounding whitespace.
fn is_cancel(event: &HostEvent, cancel_token: &str) -> bool {
    let text = if event.outline.trim().is_empty() {
        event
            .parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Plain { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<String>()
    } else {
        event.outline.clone()
    };
    text.trim().eq_ignore_ascii_case(cancel_token.trim())
}

/// Retrievable URL of the attached file.
fn attachment_url(event: &HostEvent) -> Result<&str, RelayError> {
    let url = event
        .file_url()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| RelayError::Attachment("file part has no url".to_string()))?;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(RelayError::Attachment(format!("unsupported url: {url}")));
    }
    Ok(url)
}
