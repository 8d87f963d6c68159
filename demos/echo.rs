//! Keeps a connection to an echo server alive and prints what comes back.
//!
//! Run with:
//! ```sh
//! RUST_LOG=debug,rustls=off cargo run --example echo --features tracing
//! ```
//!
//! Set `ECHO_ADDRESS` to use another server.
use std::time::Duration;

use heartbeat_ws::Client;
use heartbeat_ws::error::Error;
use heartbeat_ws::ws::config::{ConnectionConfig, HeartbeatConfig};
use heartbeat_ws::ws::transport::{Handshake, Payload};
use tracing::{info, warn};

const ECHO_ADDRESS_VAR: &str = "ECHO_ADDRESS";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let address = std::env::var(ECHO_ADDRESS_VAR)
        .unwrap_or_else(|_| "wss://echo.websocket.org".to_owned());

    let config = ConnectionConfig::builder()
        .address(address)
        .on_failure(|error: &Error| warn!(%error, "connect attempt failed"))
        .build();
    let heartbeat = HeartbeatConfig::builder()
        .message("ping")
        .interval(Duration::from_secs(1))
        .build();

    let client = Client::new(config, heartbeat)?;
    client.on_open(|handshake: &Handshake| info!(headers = handshake.headers.len(), "open"));
    client.on_message(|payload: &Payload| info!(?payload, "message"));
    client.on_error(|| warn!("transport error"));
    client.on_close(|| info!("closed"));

    let mut state = client.state_receiver();
    state.wait_for(|state| state.is_open()).await?;

    for n in 0..3 {
        client.send(format!("hello {n}"))?;
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    client.close();

    tokio::time::sleep(Duration::from_secs(1)).await;

    Ok(())
}
