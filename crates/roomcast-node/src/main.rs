//! Roomcast node binary.
//!
//! # Usage
//!
//! ```bash
//! roomcast-node --node-id node1 \
//!     --client-bind 0.0.0.0:8081 \
//!     --rpc-bind 0.0.0.0:9091 \
//!     --rpc-advertise 10.0.0.1:9091 \
//!     --peers "node2=10.0.0.2:9092,node3=10.0.0.3:9093"
//! ```
//!
//! Every flag also reads an environment variable (`NODE_ID`,
//! `ROOMCAST_CLIENT_BIND`, `ROOMCAST_RPC_BIND`, `ROOMCAST_RPC_ADVERTISE`,
//! `ROOMCAST_PEERS`).

use clap::Parser;
use roomcast_node::{detector, rpc, ws, Node, NodeConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = NodeConfig::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    // Fail fast on a malformed peer list instead of silently running alone.
    let peers = config.parse_peers()?;
    tracing::info!(
        node_id = %config.node_id,
        client_bind = %config.client_bind,
        rpc_bind = %config.rpc_bind,
        peer_count = peers.len(),
        "roomcast node starting"
    );

    let rpc_listener = TcpListener::bind(&config.rpc_bind).await?;
    let client_listener = TcpListener::bind(&config.client_bind).await?;

    let node = Node::new(config);
    let shutdown = CancellationToken::new();

    let rpc_task = tokio::spawn(rpc::serve(node.clone(), rpc_listener, shutdown.clone()));
    let ws_task = tokio::spawn(ws::serve(node.clone(), client_listener, shutdown.clone()));
    let (heartbeat_task, sweeper_task) = detector::spawn(node.clone(), shutdown.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    shutdown.cancel();

    let _ = tokio::join!(rpc_task, ws_task, heartbeat_task, sweeper_task);
    tracing::info!("node stopped");
    Ok(())
}
