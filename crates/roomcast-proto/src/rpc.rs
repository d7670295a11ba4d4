//! Inter-node RPC request and reply shapes.
//!
//! One exchange per connection: the caller writes a single
//! `{"method": ..., "params": ...}` line, the callee answers with one
//! `{"status":"ok","result":...}` or `{"status":"err","error":...,"code":...}`
//! line. Method results are typed structs serialized into `result`; callers
//! decode them with [`RpcReply::into_result`].

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    ErrorCode, MemberEventData, MemberEventKind, MessageData, RoomSnapshot, RoomSummary, Vote,
};

/// Calls a node may receive from its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum RpcRequest {
    /// Summaries of rooms administered by the callee, each annotated with
    /// the callee's reachable address.
    GetHostedRooms,
    /// Add a member to a room the callee administers.
    JoinRoom {
        /// Target room.
        room_id: Uuid,
        /// Joining user.
        username: String,
        /// Node hosting the member's client session.
        source_node_id: String,
    },
    /// Remove a member from a room the callee administers.
    LeaveRoom {
        /// Target room.
        room_id: Uuid,
        /// Leaving user.
        username: String,
        /// Node hosting the member's client session.
        source_node_id: String,
    },
    /// Submit a message for sequencing by the room's administrator.
    ForwardMessage {
        /// Target room.
        room_id: Uuid,
        /// Sending user.
        username: String,
        /// Message text.
        content: String,
        /// Node hosting the sender's client session.
        source_node_id: String,
    },
    /// Deliver a finalized message to the callee's local subscribers.
    /// Must not be re-broadcast.
    ReceiveMessageBroadcast {
        /// Target room.
        room_id: Uuid,
        /// Finalized, sequence-stamped message.
        message: MessageData,
    },
    /// Deliver a member join/leave event to the callee's local subscribers.
    ReceiveMemberEventBroadcast {
        /// Target room.
        room_id: Uuid,
        /// Event discriminator.
        event_type: MemberEventKind,
        /// Event payload.
        event_data: MemberEventData,
    },
    /// A member's client session on the caller was lost; remove them.
    NotifyMemberDisconnect {
        /// Room the member was in.
        room_id: Uuid,
        /// Disconnected member.
        username: String,
        /// Node that lost the session.
        source_node_id: String,
        /// Why the session ended.
        reason: String,
    },
    /// Liveness probe.
    Heartbeat,
    /// Two-phase-commit PREPARE for room deletion.
    PrepareDeleteRoom {
        /// Room being deleted.
        room_id: Uuid,
        /// Coordinator's transaction id.
        transaction_id: Uuid,
        /// Coordinating node.
        coordinator_node_id: String,
    },
    /// Two-phase-commit COMMIT for room deletion.
    CommitDeleteRoom {
        /// Room being deleted.
        room_id: Uuid,
        /// Coordinator's transaction id.
        transaction_id: Uuid,
    },
    /// Two-phase-commit ROLLBACK for room deletion.
    RollbackDeleteRoom {
        /// Room whose deletion is being cancelled.
        room_id: Uuid,
        /// Coordinator's transaction id.
        transaction_id: Uuid,
    },
}

impl RpcRequest {
    /// Wire name of the method, for logging.
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::GetHostedRooms => "get_hosted_rooms",
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom { .. } => "leave_room",
            Self::ForwardMessage { .. } => "forward_message",
            Self::ReceiveMessageBroadcast { .. } => "receive_message_broadcast",
            Self::ReceiveMemberEventBroadcast { .. } => "receive_member_event_broadcast",
            Self::NotifyMemberDisconnect { .. } => "notify_member_disconnect",
            Self::Heartbeat => "heartbeat",
            Self::PrepareDeleteRoom { .. } => "prepare_delete_room",
            Self::CommitDeleteRoom { .. } => "commit_delete_room",
            Self::RollbackDeleteRoom { .. } => "rollback_delete_room",
        }
    }
}

/// Reply envelope for every RPC method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RpcReply {
    /// The call succeeded; `result` holds the method's typed result.
    Ok {
        /// Method-specific result payload.
        result: serde_json::Value,
    },
    /// The call failed with a typed error.
    Err {
        /// Human-readable description.
        error: String,
        /// Stable error code.
        code: ErrorCode,
    },
}

impl RpcReply {
    /// Build a success reply from a typed result.
    pub fn ok<T: Serialize>(result: &T) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self::Ok { result: value },
            Err(e) => Self::Err {
                error: format!("result serialization failed: {e}"),
                code: ErrorCode::InternalError,
            },
        }
    }

    /// Build an error reply.
    pub fn err(code: ErrorCode, error: impl Into<String>) -> Self {
        Self::Err { error: error.into(), code }
    }

    /// Decode the success payload into the method's result type, or surface
    /// the callee's error.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, (ErrorCode, String)> {
        match self {
            Self::Ok { result } => serde_json::from_value(result)
                .map_err(|e| (ErrorCode::InternalError, format!("malformed result: {e}"))),
            Self::Err { error, code } => Err((code, error)),
        }
    }
}

/// Result of `get_hosted_rooms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedRoomsResult {
    /// Rooms administered by the callee.
    pub rooms: Vec<RoomSummary>,
}

/// Result of `join_room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomResult {
    /// Room view after the join.
    pub room: RoomSnapshot,
    /// The admin's buffered message history for late-joiner catch-up,
    /// in sequence order. At most the buffer capacity (100) entries.
    pub messages: Vec<MessageData>,
    /// True when the user was already a member; no `member_joined`
    /// event was re-broadcast in that case.
    pub already_member: bool,
}

/// Result of `leave_room` and `notify_member_disconnect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRoomResult {
    /// Whether a removal actually occurred.
    pub removed: bool,
    /// Member count after the operation.
    pub member_count: usize,
}

/// Result of `forward_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardMessageResult {
    /// Assigned message identifier.
    pub message_id: Uuid,
    /// Assigned position in the room's total order.
    pub sequence_number: u64,
    /// Admin-stamped timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Result of the broadcast-receipt methods (`receive_message_broadcast`,
/// `receive_member_event_broadcast`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResult {
    /// Whether the event was delivered to local subscribers.
    pub success: bool,
    /// Responding node.
    pub node_id: String,
}

/// Result of `heartbeat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResult {
    /// Always "ok".
    pub status: String,
    /// Responding node.
    pub node_id: String,
    /// Responder's clock.
    pub timestamp: DateTime<Utc>,
}

/// Result of `prepare_delete_room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareResult {
    /// The participant's vote.
    pub vote: Vote,
    /// Voting node.
    pub node_id: String,
    /// Transaction the vote belongs to.
    pub transaction_id: Uuid,
    /// Why the participant voted ABORT, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Result of `commit_delete_room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResult {
    /// Whether the participant removed the room (true also when it never
    /// had a copy).
    pub success: bool,
    /// Responding node.
    pub node_id: String,
}

/// Result of `rollback_delete_room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResult {
    /// Always true; rollback of an unknown room is trivially successful.
    pub success: bool,
    /// Responding node.
    pub node_id: String,
}
