//! Wire schema for the roomcast distributed chat protocol.
//!
//! This crate is the only place that touches the on-wire format. It defines
//! the client↔node JSON envelope, the inter-node RPC request/reply shapes,
//! the shared data types they carry, and content validation.
//!
//! Both transports speak JSON: clients over text-framed WebSocket messages,
//! nodes over newline-delimited request/reply exchanges. Incoming frames are
//! decoded once at the edge into tagged enums ([`ClientRequest`],
//! [`ServerFrame`], [`RpcRequest`]); interior code matches on variants and
//! never sees raw JSON.

mod client;
mod rpc;
mod types;
mod validate;

pub use client::{ClientRequest, ServerFrame};
pub use rpc::{
    AckResult, CommitResult, ForwardMessageResult, HeartbeatResult, HostedRoomsResult,
    JoinRoomResult, LeaveRoomResult, PrepareResult, RollbackResult, RpcReply, RpcRequest,
};
pub use types::{
    ErrorCode, MemberEventData, MemberEventKind, MessageData, RoomSnapshot, RoomSummary, Vote,
};
pub use validate::{validate_content, ContentError, MAX_CONTENT_CHARS};

/// Errors produced while encoding or decoding wire frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// The frame was not valid JSON or did not match any known shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}
