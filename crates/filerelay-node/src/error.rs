use reqwest::StatusCode;
use thiserror::Error;

/// Longest slice of a destination error body shown to the user.
const BODY_EXCERPT_CHARS: usize = 200;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("malformed trigger: {0}")]
    Parse(String),

    #[error("upload already pending for {0}")]
    AlreadyPending(String),

    #[error("no pending upload for {0}")]
    NotFound(String),

    #[error("could not read file: {0}")]
    Attachment(String),

    #[error("download failed: HTTP {status}")]
    Download { status: StatusCode },

    #[error("download failed: {0}")]
    DownloadIo(String),

    #[error("upload failed: HTTP {status}{}", body_excerpt(.body))]
    Upload { status: StatusCode, body: String },

    #[error("upload failed: {0}")]
    UploadIo(String),
}

/// `": <body>"` cut to [`BODY_EXCERPT_CHARS`], or nothing for a blank body.
fn body_excerpt(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return String::new();
    }
    let mut chars = body.chars();
    let excerpt: String = chars.by_ref().take(BODY_EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!(": {excerpt}...")
    } else {
        format!(": {excerpt}")
    }
}
