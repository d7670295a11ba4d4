//! Data types shared between the client envelope and the inter-node RPC layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A finalized chat message as assigned by the room's administrator node.
///
/// The `sequence_number` is the sole arbiter of total order within a room:
/// it is assigned by the admin at acceptance time, is 1-based, dense, and is
/// never reused or reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    /// Unique identifier, generated by the admin node.
    pub message_id: Uuid,
    /// Room the message belongs to.
    pub room_id: Uuid,
    /// Sender's username.
    pub username: String,
    /// Message text.
    pub content: String,
    /// Position in the room's total order (1-based, gap-free).
    pub sequence_number: u64,
    /// Server clock timestamp stamped at acceptance.
    pub timestamp: DateTime<Utc>,
}

/// Room metadata as returned by listing and discovery operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    /// Room identifier.
    pub room_id: Uuid,
    /// Room name, unique on its admin node.
    pub room_name: String,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Current member count.
    pub member_count: usize,
    /// Node that administers the room.
    pub admin_node: String,
    /// User who created the room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
    /// Reachable RPC address of the admin node. Populated by
    /// `get_hosted_rooms` so discovery callers can route follow-up calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_address: Option<String>,
}

/// Full room view returned on a successful join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// Room identifier.
    pub room_id: Uuid,
    /// Room name.
    pub room_name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Current members.
    pub members: Vec<String>,
    /// Current member count.
    pub member_count: usize,
    /// Node that administers the room.
    pub admin_node: String,
}

/// The closed set of error codes surfaced to clients and peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The referenced room does not exist on the contacted node.
    RoomNotFound,
    /// The user is already a member of the room.
    AlreadyInRoom,
    /// The user is not a member of the room.
    NotInRoom,
    /// The session or user is not a member and may not send.
    NotMember,
    /// Message content failed validation (empty or too long).
    InvalidContent,
    /// The request was malformed or missing required fields.
    InvalidRequest,
    /// The room is not in a state that permits the operation.
    InvalidState,
    /// The user is not permitted to perform the operation.
    Unauthorized,
    /// The room's administrator node could not be reached.
    AdminNodeUnavailable,
    /// A distributed deletion could not be completed.
    DeletionFailed,
    /// Unexpected server-side failure.
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RoomNotFound => "ROOM_NOT_FOUND",
            Self::AlreadyInRoom => "ALREADY_IN_ROOM",
            Self::NotInRoom => "NOT_IN_ROOM",
            Self::NotMember => "NOT_MEMBER",
            Self::InvalidContent => "INVALID_CONTENT",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InvalidState => "INVALID_STATE",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::AdminNodeUnavailable => "ADMIN_NODE_UNAVAILABLE",
            Self::DeletionFailed => "DELETION_FAILED",
            Self::InternalError => "INTERNAL_ERROR",
        };
        f.write_str(name)
    }
}

/// A participant's vote in the two-phase-commit deletion protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Vote {
    /// The participant can delete the room (or has nothing to clean up).
    Ready,
    /// The participant refuses; the coordinator must roll back.
    Abort,
}

/// Kind discriminator for member events carried over the RPC broadcast path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberEventKind {
    /// A member joined the room.
    MemberJoined,
    /// A member left the room (voluntarily, on disconnect, or evicted).
    MemberLeft,
}

/// Payload of a member join/leave event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEventData {
    /// Room the event belongs to.
    pub room_id: Uuid,
    /// Affected member.
    pub username: String,
    /// Member count after the event was applied.
    pub member_count: usize,
    /// When the event was applied on the admin node.
    pub timestamp: DateTime<Utc>,
    /// Why the member left, when the event was not user-initiated
    /// (e.g. "Node unreachable", "Connection timeout", "User disconnected").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
