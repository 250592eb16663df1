use crate::handler::{RelayState, error_response, handle_request};
use anyhow::{Context, Result};
use filerelay::protocol::{MAX_LINE_BYTES, Notice, Request, Response};
use futures_util::{SinkExt, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

/// Responses queued per connection before request handling waits on the writer.
const OUTBOUND_QUEUE: usize = 1024;

/// Start the Unix socket server. Accepts host connections and processes requests.
pub async fn serve(state: Arc<RelayState>, socket_path: &Path) -> Result<()> {
    let listener = bind(socket_path)?;
    accept_loop(state, listener).await
}

/// Bind the socket, creating the parent directory and replacing a stale socket file.
pub fn bind(socket_path: &Path) -> Result<UnixListener> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700)).ok();
        }
    }

    if socket_path.exists() {
        std::fs::remove_file(socket_path).ok();
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("failed to bind {}", socket_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600)).ok();
    }

    tracing::info!(path = %socket_path.display(), "Unix socket listening");
    Ok(listener)
}

/// Serve connections on an already bound listener.
pub async fn accept_loop(state: Arc<RelayState>, listener: UnixListener) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(state, stream).await {
                tracing::debug!(err = %e, "host disconnected");
            }
        });
    }
}

async fn handle_client(state: Arc<RelayState>, stream: tokio::net::UnixStream) -> Result<()> {
    let (r, w) = stream.into_split();
    let mut reader = FramedRead::new(r, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let mut writer = FramedWrite::new(w, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

    // Replies and notices share one outbound queue with a single writer.
    let (out_tx, mut out_rx) = mpsc::channel::<Response>(OUTBOUND_QUEUE);
    let writer_task = tokio::spawn(async move {
        while let Some(resp) = out_rx.recv().await {
            let line = match serde_json::to_string(&resp) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!(err = %e, "failed to encode response");
                    continue;
                }
            };
            if let Err(e) = writer.send(line).await {
                tracing::debug!(err = %e, "socket write failed");
                break;
            }
        }
    });

    // Subscribe before Hello so no notice for this host is missed.
    let notice_rx = state.notice_tx.subscribe();
    let hello = Response::Hello {
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    out_tx.send(hello).await.context("connection closed")?;
    let forwarder = tokio::spawn(forward_notices(notice_rx, out_tx.clone()));

    while let Some(line) = reader.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::debug!(err = %e, "socket read failed");
                break;
            }
        };

        let resp = match serde_json::from_str::<Request>(&line) {
            Ok(req) => {
                let is_shutdown = matches!(req, Request::Shutdown);
                let resp = handle_request(&state, req).await;
                if is_shutdown {
                    let _ = out_tx.send(resp).await;
                    break;
                }
                resp
            }
            Err(e) => error_response("invalid_request", &format!("invalid request: {e}")),
        };
        if out_tx.send(resp).await.is_err() {
            break;
        }
    }

    forwarder.abort();
    let _ = forwarder.await;
    drop(out_tx);
    let _ = writer_task.await;
    Ok(())
}

/// Push every broadcast notice onto this connection's outbound queue.
async fn forward_notices(mut notice_rx: broadcast::Receiver<Notice>, out_tx: mpsc::Sender<Response>) {
    loop {
        match notice_rx.recv().await {
            Ok(notice) => {
                if out_tx.send(Response::Notice { notice }).await.is_err() {
                    break;
                }
            }
            Err(RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "host lagging, notices dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
