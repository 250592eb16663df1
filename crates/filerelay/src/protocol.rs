use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum size of a JSON-lines frame on the Unix socket (64 KiB).
pub const MAX_LINE_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Host events
// ---------------------------------------------------------------------------

/// One component of a chat message as delivered by the host platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    /// Plain text segment.
    Plain { text: String },
    /// File attachment. `url` is where the host made the file retrievable.
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Inline image.
    Image {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// Any part type this relay does not understand (at, face, reply, ...).
    #[serde(other)]
    Unknown,
}

impl MessagePart {
    pub fn is_file(&self) -> bool {
        matches!(self, MessagePart::File { .. })
    }
}

/// A message received by the host platform, forwarded to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEvent {
    pub sender_id: String,
    /// Flattened plain-text rendering of the message.
    #[serde(default)]
    pub outline: String,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl HostEvent {
    /// A text-only message.
    pub fn text(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            sender_id: sender_id.into(),
            outline: text.clone(),
            parts: vec![MessagePart::Plain { text }],
        }
    }

    /// A message carrying a single file attachment.
    pub fn file(sender_id: impl Into<String>, url: Option<String>, name: Option<String>) -> Self {
        let outline = format!("[File] {}", name.as_deref().unwrap_or_default());
        Self {
            sender_id: sender_id.into(),
            outline,
            parts: vec![MessagePart::File { url, name }],
        }
    }

    pub fn has_file(&self) -> bool {
        self.parts.iter().any(MessagePart::is_file)
    }

    /// URL of the first file part, if any.
    pub fn file_url(&self) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            MessagePart::File { url, .. } => url.as_deref(),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

/// What a notice reports about a user's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Session opened, the user should send the file.
    Prompt,
    /// A session is already waiting for this user.
    Pending,
    Cancelled,
    TimedOut,
    /// The file was received and the transfer started.
    Processing,
    Completed,
    Failed,
    /// Trigger or attachment could not be understood.
    Rejected,
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NoticeKind::Prompt => "prompt",
            NoticeKind::Pending => "pending",
            NoticeKind::Cancelled => "cancelled",
            NoticeKind::TimedOut => "timed_out",
            NoticeKind::Processing => "processing",
            NoticeKind::Completed => "completed",
            NoticeKind::Failed => "failed",
            NoticeKind::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// A plain-text notification the host should deliver to `user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub user_id: String,
    pub kind: NoticeKind,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A request sent from the host dispatcher to the relay daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// A message that matched the trigger filter.
    Trigger { event: HostEvent },
    /// Any message from any user.
    Message { event: HostEvent },
    /// Whether a user currently has an upload session open.
    Status { user_id: String },
    /// Shut down the daemon.
    Shutdown,
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// A response sent from the relay daemon to the host dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Connection established.
    Hello { version: String },
    /// Request succeeded with optional data.
    Ok { data: Option<serde_json::Value> },
    /// Request failed.
    Error { code: String, message: String },
    /// Asynchronous notice for some user (including timeouts).
    Notice { notice: Notice },
}

// ---------------------------------------------------------------------------
// Data types returned in Ok.data
// ---------------------------------------------------------------------------

/// Session status returned by the `Status` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub user_id: String,
    pub waiting: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_ms: Option<u64>,
}
