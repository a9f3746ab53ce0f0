//! # Bridge Demo
//!
//! Wires a host page and an embedded client page together over an in-memory
//! window pair and walks through one full session.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging from `BRIDGE_LOG_LEVEL` / `BRIDGE_JSON_LOGS`
//! 2. Build both engines (the host config honors `BRIDGE_*` overrides)
//! 3. Client registers `xmc.publishing.status`, host connects
//! 4. Host requests the publishing status
//! 5. Client subscribes to `host.state`, host publishes, client unsubscribes

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bridge_core::{
    handler_fn, BridgeBuilder, BridgeConfig, BridgeHandle, HandlerError, IncomingRequest,
    MemoryWindow,
};
use bridge_telemetry::{init_logging, TelemetryConfig};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{info, warn};

const HOST_ORIGIN: &str = "https://pages.example.com";
const CLIENT_ORIGIN: &str = "https://editor.example.com";

#[derive(Debug, Serialize, Deserialize)]
struct StatusQuery {
    #[serde(default)]
    item_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PublishingStatus {
    published: bool,
    version: u32,
}

async fn publishing_status(req: IncomingRequest) -> Result<serde_json::Value, HandlerError> {
    let query: StatusQuery = req.parse()?;
    info!(origin = %req.origin, item = ?query.item_id, "Answering status request");
    let status = PublishingStatus {
        published: true,
        version: 3,
    };
    serde_json::to_value(status).map_err(|e| HandlerError::new(e.to_string()))
}

fn start_engines() -> Result<(BridgeHandle, BridgeHandle)> {
    let (host_window, client_window) = MemoryWindow::pair(HOST_ORIGIN, CLIENT_ORIGIN);

    let host_config = BridgeConfig::for_peer(CLIENT_ORIGIN)
        .with_env_overrides()
        .context("Invalid BRIDGE_* environment")?;
    let client_config = BridgeConfig::for_peer(HOST_ORIGIN);

    let host = BridgeBuilder::new(host_config, Arc::new(host_window))
        .diagnostic_hook(|event| warn!(?event, "host diagnostic"))
        .spawn()
        .context("Failed to start host engine")?;
    let client = BridgeBuilder::new(client_config, Arc::new(client_window))
        .diagnostic_hook(|event| warn!(?event, "client diagnostic"))
        .spawn()
        .context("Failed to start client engine")?;

    Ok((host, client))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&TelemetryConfig::for_service("bridge-demo"))?;

    let (host, client) = start_engines()?;

    client.register_handler("xmc.publishing.status", handler_fn(publishing_status))?;

    host.connect().await.context("Handshake failed")?;
    client.wait_connected().await?;
    info!(session = %host.state().session_id, "Session established");

    let status: PublishingStatus = host
        .call(
            "xmc.publishing.status",
            &StatusQuery { item_id: None },
            Some(Duration::from_secs(2)),
        )
        .await?;
    info!(published = status.published, version = status.version, "Publishing status");

    let mut states = client.subscribe_stream("host.state").await?;
    // The SUBSCRIBE must reach the host before it will publish.
    let mut sent = false;
    for _ in 0..50 {
        sent = host.publish("host.state", json!({ "mode": "edit" })).await?;
        if sent {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    if !sent {
        bail!("host never saw the client's subscription");
    }

    match tokio::time::timeout(Duration::from_secs(1), states.next()).await {
        Ok(Some(Ok(state))) => info!(%state, "Client received host state"),
        Ok(Some(Err(e))) => warn!(error = %e, "Channel error"),
        Ok(None) | Err(_) => bail!("no host.state event delivered"),
    }
    drop(states);

    let snapshot = host.diagnostics();
    info!(
        requests_sent = snapshot.requests_sent,
        responses_matched = snapshot.responses_matched,
        events_published = snapshot.events_published,
        rejected = snapshot.total_rejected(),
        "Host diagnostics"
    );

    host.shutdown();
    client.shutdown();
    Ok(())
}
