use anyhow::{Context, Result};
use clap::Parser;
use filerelay::client::default_socket_path;
use filerelay::{DEFAULT_CANCEL_TOKEN, DEFAULT_TRIGGER};
use filerelay_node::handler::{RelayConfig, RelayState};
use filerelay_node::socket;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "filerelay upload session daemon")]
struct Args {
    /// Path to the Unix socket the host dispatcher connects to.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Base URL of the destination service (uploads go to <URL>/api).
    #[arg(long)]
    destination_url: String,

    /// Directory for in-flight scratch files (default: system temp dir).
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Seconds a user has to send the file after the trigger.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    /// Keyword introducing the target filename.
    #[arg(long, default_value = DEFAULT_TRIGGER)]
    trigger: String,

    /// Message that cancels a pending upload.
    #[arg(long, default_value = DEFAULT_CANCEL_TOKEN)]
    cancel_token: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filerelay_node=info".into()),
        )
        .init();

    let args = Args::parse();

    let scratch_dir = args.scratch_dir.unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&scratch_dir)
        .with_context(|| format!("failed to create {}", scratch_dir.display()))?;

    let socket_path = args.socket.unwrap_or_else(default_socket_path);

    let config = RelayConfig {
        destination_url: args.destination_url,
        scratch_dir,
        upload_timeout: Duration::from_secs(args.timeout_secs),
        trigger: args.trigger,
        cancel_token: args.cancel_token,
    };
    tracing::info!(
        destination = %config.destination_url,
        scratch_dir = %config.scratch_dir.display(),
        timeout = ?config.upload_timeout,
        "relay configured"
    );

    let state = RelayState::new(config);

    // Run Unix socket server (blocks until shutdown)
    tokio::select! {
        result = socket::serve(state.clone(), &socket_path) => {
            result.context("socket server failed")?;
        }
        _ = state.shutdown.notified() => {
            tracing::info!("shutdown requested by host");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
            state.timeouts.shutdown();
        }
    }

    std::fs::remove_file(&socket_path).ok();
    tracing::info!(pending = state.registry.len(), "filerelay-node shut down");
    Ok(())
}
