//! WebSocket transport to a node's client endpoint.

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use roomcast_proto::{ClientRequest, ProtoError, ServerFrame};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport-level client failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket-level failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// The server sent a frame that did not decode.
    #[error(transparent)]
    Proto(#[from] ProtoError),
    /// The server closed the connection.
    #[error("connection closed")]
    Closed,
}

/// An open connection to a node.
pub struct Connection {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

impl Connection {
    /// Connect to a node's client endpoint, e.g. `ws://127.0.0.1:8080`.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
        tracing::info!(url, "connected to node");
        let (sink, stream) = ws.split();
        Ok(Self { sink, stream })
    }

    /// Send one request.
    pub async fn send(&mut self, request: &ClientRequest) -> Result<(), TransportError> {
        self.sink.send(Message::Text(request.to_json())).await?;
        Ok(())
    }

    /// Wait for the next decodable server frame. Non-text frames are
    /// skipped; `Closed` is returned once the server hangs up.
    pub async fn next_frame(&mut self) -> Result<ServerFrame, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(ServerFrame::from_json(&text)?),
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Ok(_)) => {} // binary/ping/pong
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<(), TransportError> {
        self.sink.close().await?;
        Ok(())
    }
}
