//! Synchronous inter-node RPC.
//!
//! The transport is newline-delimited JSON over TCP: the caller connects,
//! writes one request line, and waits for one reply line. From the caller's
//! view every call is synchronous request/response; concurrency comes from
//! issuing calls on separate tasks (see [`crate::peers::PeerRegistry`]).

mod handlers;
mod server;

pub use handlers::handle_request;
pub use server::serve;

use futures_util::{SinkExt, StreamExt};
use roomcast_proto::{RpcReply, RpcRequest};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

/// Upper bound on a single RPC line. Sized for a join reply carrying a full
/// 100-message catch-up buffer of maximum-length messages, with headroom.
pub(crate) const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Transport-level RPC failures.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Line framing failure (including oversized lines).
    #[error("codec error: {0}")]
    Codec(#[from] LinesCodecError),
    /// The payload was not valid JSON for the expected shape.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    /// The peer closed the connection before replying.
    #[error("connection closed before reply")]
    ConnectionClosed,
}

/// Issue one request to `addr` and wait for the reply.
///
/// Deadlines are the caller's concern; wrap in `tokio::time::timeout` (the
/// peer registry does this uniformly).
pub async fn call(addr: &str, request: &RpcRequest) -> Result<RpcReply, RpcError> {
    let stream = TcpStream::connect(addr).await?;
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

    framed.send(serde_json::to_string(request)?).await?;

    match framed.next().await {
        Some(Ok(line)) => Ok(serde_json::from_str(&line)?),
        Some(Err(e)) => Err(e.into()),
        None => Err(RpcError::ConnectionClosed),
    }
}
