use crate::protocol::{HostEvent, MAX_LINE_BYTES, Notice, Request, Response};
use anyhow::{Context, Result, anyhow, bail};
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

/// Client for the relay daemon's Unix socket API, used by host dispatchers.
pub struct RelayClient {
    reader: FramedRead<tokio::net::unix::OwnedReadHalf, LinesCodec>,
    writer: FramedWrite<tokio::net::unix::OwnedWriteHalf, LinesCodec>,
    version: String,
    /// Notices that arrived while waiting for a request's reply.
    pending_notices: VecDeque<Notice>,
}

impl RelayClient {
    /// Connect to the daemon at the given socket path.
    /// Waits for the Hello response before returning.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("failed to connect to {}", socket_path.display()))?;
        let (r, w) = stream.into_split();
        let reader = FramedRead::new(r, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
        let writer = FramedWrite::new(w, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

        let mut client = Self {
            reader,
            writer,
            version: String::new(),
            pending_notices: VecDeque::new(),
        };

        match client.next_response().await? {
            Response::Hello { version } => {
                client.version = version;
                Ok(client)
            }
            other => Err(anyhow!("expected Hello, got {other:?}")),
        }
    }

    /// Daemon version received from the Hello handshake.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Send a request to the daemon.
    pub async fn send(&mut self, req: Request) -> Result<()> {
        let line = serde_json::to_string(&req)?;
        self.writer.send(line).await?;
        Ok(())
    }

    /// Read the next response from the daemon.
    pub async fn next_response(&mut self) -> Result<Response> {
        let Some(line) = self.reader.next().await else {
            bail!("daemon disconnected");
        };
        Ok(serde_json::from_str(&line?)?)
    }

    /// Send a request and wait for the Ok/Error response.
    /// Notices received in the meantime are kept for [`RelayClient::next_notice`].
    pub async fn request(&mut self, req: Request) -> Result<Option<serde_json::Value>> {
        self.send(req).await?;
        loop {
            match self.next_response().await? {
                Response::Hello { .. } => continue,
                Response::Notice { notice } => self.pending_notices.push_back(notice),
                Response::Ok { data } => return Ok(data),
                Response::Error { message, .. } => bail!("{message}"),
            }
        }
    }

    /// Forward a message that matched the trigger filter.
    pub async fn trigger(&mut self, event: HostEvent) -> Result<()> {
        self.request(Request::Trigger { event }).await.map(|_| ())
    }

    /// Forward an ordinary message.
    pub async fn message(&mut self, event: HostEvent) -> Result<()> {
        self.request(Request::Message { event }).await.map(|_| ())
    }

    /// Next notice pushed by the daemon, buffered or freshly read.
    pub async fn next_notice(&mut self) -> Result<Notice> {
        if let Some(notice) = self.pending_notices.pop_front() {
            return Ok(notice);
        }
        loop {
            match self.next_response().await? {
                Response::Notice { notice } => return Ok(notice),
                _ => continue,
            }
        }
    }
}

/// Discover the default socket path.
///
/// Checks `$FILERELAY_SOCKET` env, then falls back to
/// `$XDG_RUNTIME_DIR/filerelay/filerelay.sock` or `/tmp/filerelay-$UID/filerelay.sock`.
pub fn default_socket_path() -> PathBuf {
    if let Ok(p) = std::env::var("FILERELAY_SOCKET") {
        return PathBuf::from(p);
    }
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir)
            .join("filerelay")
            .join("filerelay.sock");
    }
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/filerelay-{uid}/filerelay.sock"))
}
