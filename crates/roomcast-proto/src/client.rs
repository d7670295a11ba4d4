//! Client↔node envelope.
//!
//! Every frame on the client socket is a JSON object `{"type": ..., "data":
//! ...}` where `data` may be omitted for request types that carry no payload.
//! The adjacently-tagged enums below encode exactly that shape, so the
//! string-tagged dispatch of the wire collapses into a single decode at the
//! edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    types::{ErrorCode, MessageData, RoomSummary},
    ProtoError,
};

/// Requests a client may send to its node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientRequest {
    /// List rooms hosted on the contacted node.
    ListRooms,
    /// List rooms across the whole fleet (parallel peer discovery).
    DiscoverRooms,
    /// Create a room administered by the contacted node.
    CreateRoom {
        /// Requested room name (unique per node).
        room_name: String,
        /// User creating the room.
        creator_id: String,
        /// Optional description.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Join a room, wherever it is hosted.
    JoinRoom {
        /// Target room.
        room_id: Uuid,
        /// Joining user.
        username: String,
    },
    /// Leave a previously joined room.
    LeaveRoom {
        /// Target room.
        room_id: Uuid,
        /// Leaving user.
        username: String,
    },
    /// Send a message to a joined room.
    SendMessage {
        /// Target room.
        room_id: Uuid,
        /// Sending user.
        username: String,
        /// Message text.
        content: String,
    },
    /// Delete a room via the distributed deletion protocol.
    /// Only the room's creator is authorized.
    DeleteRoom {
        /// Target room.
        room_id: Uuid,
        /// Requesting user.
        username: String,
    },
}

/// Responses and notifications a node may push to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Reply to `list_rooms`.
    RoomsList {
        /// Rooms hosted on this node.
        rooms: Vec<RoomSummary>,
        /// Convenience count.
        total_count: usize,
    },
    /// Reply to `discover_rooms`.
    GlobalRoomsList {
        /// Local and peer-hosted rooms, merged.
        rooms: Vec<RoomSummary>,
        /// Convenience count.
        total_count: usize,
        /// All nodes that were asked, this node included.
        nodes_queried: Vec<String>,
        /// Nodes that answered.
        nodes_available: Vec<String>,
        /// Nodes that did not answer within the deadline.
        nodes_unavailable: Vec<String>,
    },
    /// Reply to `create_room`.
    RoomCreated {
        /// New room's identifier.
        room_id: Uuid,
        /// New room's name.
        room_name: String,
        /// Node administering the room.
        admin_node: String,
        /// Initial member list (empty).
        members: Vec<String>,
        /// Creation timestamp.
        created_at: DateTime<Utc>,
    },
    /// Successful join. May be followed by a catch-up run of `new_message`
    /// frames replaying the admin's buffered history in sequence order.
    JoinRoomSuccess {
        /// Joined room.
        room_id: Uuid,
        /// Room name.
        room_name: String,
        /// Optional description.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        /// Members after the join.
        members: Vec<String>,
        /// Member count after the join.
        member_count: usize,
        /// Node administering the room.
        admin_node: String,
    },
    /// Failed join.
    JoinRoomError {
        /// Target room.
        room_id: Uuid,
        /// Human-readable description.
        error: String,
        /// Stable error code.
        error_code: ErrorCode,
    },
    /// A member joined a subscribed room.
    MemberJoined {
        /// Room the member joined.
        room_id: Uuid,
        /// Joining member.
        username: String,
        /// Member count after the join.
        member_count: usize,
        /// When the join was applied.
        timestamp: DateTime<Utc>,
    },
    /// A member left a subscribed room.
    MemberLeft {
        /// Room the member left.
        room_id: Uuid,
        /// Leaving member.
        username: String,
        /// Member count after the leave.
        member_count: usize,
        /// When the leave was applied.
        timestamp: DateTime<Utc>,
        /// Present when the leave was not user-initiated.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Synchronous confirmation for the sender of `send_message`.
    MessageSent {
        /// Target room.
        room_id: Uuid,
        /// Assigned message identifier.
        message_id: Uuid,
        /// Assigned position in the room's total order.
        sequence_number: u64,
        /// Admin-stamped timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A finalized message fanned out to a subscribed room.
    NewMessage(MessageData),
    /// A `send_message` request was rejected.
    MessageError {
        /// Target room.
        room_id: Uuid,
        /// Human-readable description.
        error: String,
        /// Stable error code.
        error_code: ErrorCode,
    },
    /// Distributed deletion has started.
    DeleteRoomInitiated {
        /// Room being deleted.
        room_id: Uuid,
        /// User who initiated deletion.
        initiator: String,
        /// Always "in_progress".
        status: String,
        /// Coordinator's transaction id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transaction_id: Option<Uuid>,
    },
    /// Deletion committed everywhere reachable; reply to the initiator.
    DeleteRoomSuccess {
        /// Deleted room.
        room_id: Uuid,
        /// Completed transaction.
        transaction_id: Uuid,
        /// Human-readable confirmation.
        message: String,
    },
    /// Deletion aborted and rolled back; reply to the initiator.
    DeleteRoomFailed {
        /// Room that was not deleted.
        room_id: Uuid,
        /// First observed abort reason, or "timeout".
        reason: String,
        /// Stable error code.
        error_code: ErrorCode,
        /// Transaction that was rolled back, when one was started.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transaction_id: Option<Uuid>,
    },
    /// A subscribed room was deleted (broadcast to all members).
    RoomDeleted {
        /// Deleted room.
        room_id: Uuid,
        /// Its name at deletion time.
        room_name: String,
        /// Human-readable notice.
        message: String,
        /// Transaction that deleted it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transaction_id: Option<Uuid>,
    },
    /// A pending deletion was rolled back (broadcast to members).
    DeleteRoomCancelled {
        /// Room restored to active service.
        room_id: Uuid,
        /// Transaction that was rolled back.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transaction_id: Option<Uuid>,
    },
    /// Request-level failure not tied to a specific room operation.
    Error {
        /// Human-readable description.
        error: String,
        /// Stable error code.
        error_code: ErrorCode,
    },
}

impl ClientRequest {
    /// Decode a request from a text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode the request into a text frame.
    pub fn to_json(&self) -> String {
        // Serialization of these enums cannot fail: no maps with non-string
        // keys, no non-finite floats.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl ServerFrame {
    /// Decode a server frame from a text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode the frame into a text frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
