// Standalone webhook receiver
//
// COURIER_RECEIVER_ADDR   bind address (default 127.0.0.1:8787)
// COURIER_RECEIVER_STATUS answer every request with this status instead of 200

use anyhow::{Context, Result};
use courier_webhook_receiver::{spawn, Behavior};
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "127.0.0.1:8787";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("courier_webhook_receiver=debug")),
        )
        .init();

    let addr = std::env::var("COURIER_RECEIVER_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let behavior = match std::env::var("COURIER_RECEIVER_STATUS") {
        Ok(raw) => Behavior::Always(
            raw.parse()
                .with_context(|| format!("COURIER_RECEIVER_STATUS is not a status code: {}", raw))?,
        ),
        Err(_) => Behavior::Accept,
    };

    let receiver = spawn(&addr, behavior)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    println!("Webhook receiver on {}", receiver.url("/"));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    tracing::info!(received = receiver.count(), "Webhook receiver shutting down");
    Ok(())
}
