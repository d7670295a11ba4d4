//! Inter-node RPC listener.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use roomcast_proto::{ErrorCode, RpcReply, RpcRequest};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::{
    codec::{Framed, LinesCodec},
    sync::CancellationToken,
};

use super::{handlers, MAX_LINE_BYTES};
use crate::Node;

/// Accept and serve peer connections until shutdown.
pub async fn serve(node: Arc<Node>, listener: TcpListener, shutdown: CancellationToken) {
    tracing::info!(node_id = %node.node_id(), "RPC endpoint listening");
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!("RPC endpoint shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let node = Arc::clone(&node);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(node, stream).await {
                            tracing::debug!(%peer_addr, error = %e, "RPC connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "RPC accept failed");
                }
            }
        }
    }
}

/// Serve request/reply exchanges on one connection until the peer hangs up.
async fn handle_connection(node: Arc<Node>, stream: TcpStream) -> Result<(), super::RpcError> {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

    while let Some(line) = framed.next().await {
        let line = line?;
        let reply = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => {
                tracing::debug!(method = request.method_name(), "RPC request");
                handlers::handle_request(&node, request).await
            }
            Err(e) => RpcReply::err(ErrorCode::InvalidRequest, format!("malformed request: {e}")),
        };
        framed.send(serde_json::to_string(&reply)?).await?;
    }
    Ok(())
}
