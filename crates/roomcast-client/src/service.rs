//! Chat service state machine.
//!
//! Sits between the transport and a display layer: consumes decoded
//! [`ServerFrame`]s, runs messages through the per-room ordering buffer,
//! and yields display-ready [`ClientUpdate`]s. Pure state machine, no I/O;
//! the caller owns the socket loop.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use roomcast_proto::{ErrorCode, MessageData, RoomSummary, ServerFrame};
use uuid::Uuid;

use crate::buffer::{Admission, OrderingBuffer};

/// Display-ready updates produced from server frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientUpdate {
    /// A room listing (local or global) arrived.
    RoomList {
        /// Listed rooms.
        rooms: Vec<RoomSummary>,
        /// Nodes that did not answer a global discovery; empty for local
        /// listings.
        nodes_unavailable: Vec<String>,
    },
    /// A room this client created is ready.
    RoomCreated {
        /// New room.
        room_id: Uuid,
        /// Its name.
        room_name: String,
    },
    /// This client joined a room.
    Joined {
        /// Joined room.
        room_id: Uuid,
        /// Room name.
        room_name: String,
        /// Members at join time.
        members: Vec<String>,
    },
    /// A join attempt failed.
    JoinFailed {
        /// Target room.
        room_id: Uuid,
        /// Description.
        error: String,
        /// Stable code.
        error_code: ErrorCode,
    },
    /// A message in total order, ready to display.
    Message(MessageData),
    /// The stream has a gap: later messages are buffered while earlier
    /// ones are still missing. Emitted once per gap onset.
    OrderingGap {
        /// Affected room.
        room_id: Uuid,
        /// Sequence numbers still missing.
        missing: Vec<u64>,
    },
    /// A duplicate delivery was suppressed.
    DuplicateDropped {
        /// Affected room.
        room_id: Uuid,
        /// The duplicate's id.
        message_id: Uuid,
    },
    /// Membership change in a joined room.
    MembershipChanged {
        /// Affected room.
        room_id: Uuid,
        /// Member who joined or left.
        username: String,
        /// True for a join, false for a leave.
        joined: bool,
        /// Member count after the change.
        member_count: usize,
        /// Reason for a non-user-initiated leave.
        reason: Option<String>,
    },
    /// The server confirmed a sent message.
    MessageConfirmed {
        /// Target room.
        room_id: Uuid,
        /// Assigned sequence number.
        sequence_number: u64,
        /// Admin timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A send was rejected.
    MessageFailed {
        /// Target room.
        room_id: Uuid,
        /// Description.
        error: String,
        /// Stable code.
        error_code: ErrorCode,
    },
    /// A deletion started in a joined room.
    DeletionInitiated {
        /// Affected room.
        room_id: Uuid,
        /// Who initiated.
        initiator: String,
    },
    /// A room was deleted; local state for it is gone.
    RoomDeleted {
        /// Deleted room.
        room_id: Uuid,
        /// Server-provided notice.
        message: String,
    },
    /// A deletion this client initiated succeeded.
    DeletionSucceeded {
        /// Deleted room.
        room_id: Uuid,
    },
    /// A deletion failed or was cancelled; the room remains usable.
    DeletionFailed {
        /// Affected room.
        room_id: Uuid,
        /// Why, when the server said.
        reason: Option<String>,
    },
    /// A request-level error not tied to an operation above.
    ProtocolError {
        /// Description.
        error: String,
        /// Stable code.
        error_code: ErrorCode,
    },
}

/// Per-room client state.
#[derive(Debug)]
struct RoomSession {
    room_name: String,
    buffer: OrderingBuffer,
    /// Tracks gap onset so each gap is surfaced exactly once.
    gap_open: bool,
}

/// Client-side chat state machine.
#[derive(Debug, Default)]
pub struct ChatService {
    rooms: HashMap<Uuid, RoomSession>,
}

impl ChatService {
    /// Create an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rooms this client is currently joined to.
    pub fn joined_rooms(&self) -> Vec<(Uuid, String)> {
        self.rooms.iter().map(|(id, s)| (*id, s.room_name.clone())).collect()
    }

    /// True when the client is joined to the room.
    pub fn is_joined(&self, room_id: Uuid) -> bool {
        self.rooms.contains_key(&room_id)
    }

    /// Forget a room's local state (after a deliberate leave).
    pub fn leave_room(&mut self, room_id: Uuid) {
        self.rooms.remove(&room_id);
    }

    /// Fast-forward a room's delivered cursor, skipping messages the admin
    /// has already trimmed from its buffer. Catch-up for a long-lived room
    /// starts at the oldest retained message, which leaves a permanent gap
    /// warning otherwise; a UI layer may call this to dismiss it.
    pub fn skip_to_sequence(&mut self, room_id: Uuid, sequence_number: u64) {
        if let Some(session) = self.rooms.get_mut(&room_id) {
            session.buffer.set_last_delivered(sequence_number);
            session.gap_open = false;
        }
    }

    /// Process one server frame into display updates.
    pub fn handle_frame(&mut self, frame: ServerFrame) -> Vec<ClientUpdate> {
        match frame {
            ServerFrame::RoomsList { rooms, .. } => {
                vec![ClientUpdate::RoomList { rooms, nodes_unavailable: Vec::new() }]
            }
            ServerFrame::GlobalRoomsList { rooms, nodes_unavailable, .. } => {
                vec![ClientUpdate::RoomList { rooms, nodes_unavailable }]
            }
            ServerFrame::RoomCreated { room_id, room_name, .. } => {
                vec![ClientUpdate::RoomCreated { room_id, room_name }]
            }
            ServerFrame::JoinRoomSuccess { room_id, room_name, members, .. } => {
                self.rooms.insert(
                    room_id,
                    RoomSession {
                        room_name: room_name.clone(),
                        buffer: OrderingBuffer::new(),
                        gap_open: false,
                    },
                );
                vec![ClientUpdate::Joined { room_id, room_name, members }]
            }
            ServerFrame::JoinRoomError { room_id, error, error_code } => {
                vec![ClientUpdate::JoinFailed { room_id, error, error_code }]
            }
            ServerFrame::NewMessage(message) => self.handle_message(message),
            ServerFrame::MemberJoined { room_id, username, member_count, .. } => {
                vec![ClientUpdate::MembershipChanged {
                    room_id,
                    username,
                    joined: true,
                    member_count,
                    reason: None,
                }]
            }
            ServerFrame::MemberLeft { room_id, username, member_count, reason, .. } => {
                vec![ClientUpdate::MembershipChanged {
                    room_id,
                    username,
                    joined: false,
                    member_count,
                    reason,
                }]
            }
            ServerFrame::MessageSent { room_id, sequence_number, timestamp, .. } => {
                vec![ClientUpdate::MessageConfirmed { room_id, sequence_number, timestamp }]
            }
            ServerFrame::MessageError { room_id, error, error_code } => {
                vec![ClientUpdate::MessageFailed { room_id, error, error_code }]
            }
            ServerFrame::DeleteRoomInitiated { room_id, initiator, .. } => {
                vec![ClientUpdate::DeletionInitiated { room_id, initiator }]
            }
            ServerFrame::DeleteRoomSuccess { room_id, .. } => {
                self.rooms.remove(&room_id);
                vec![ClientUpdate::DeletionSucceeded { room_id }]
            }
            ServerFrame::DeleteRoomFailed { room_id, reason, .. } => {
                vec![ClientUpdate::DeletionFailed { room_id, reason: Some(reason) }]
            }
            ServerFrame::RoomDeleted { room_id, message, .. } => {
                self.rooms.remove(&room_id);
                vec![ClientUpdate::RoomDeleted { room_id, message }]
            }
            ServerFrame::DeleteRoomCancelled { room_id, .. } => {
                vec![ClientUpdate::DeletionFailed { room_id, reason: None }]
            }
            ServerFrame::Error { error, error_code } => {
                vec![ClientUpdate::ProtocolError { error, error_code }]
            }
        }
    }

    /// Run a message through the room's ordering buffer.
    fn handle_message(&mut self, message: MessageData) -> Vec<ClientUpdate> {
        let room_id = message.room_id;
        let Some(session) = self.rooms.get_mut(&room_id) else {
            // Broadcast for a room we are not (or no longer) joined to.
            tracing::debug!(room_id = %room_id, "dropping message for unjoined room");
            return Vec::new();
        };

        let message_id = message.message_id;
        let mut updates = Vec::new();
        match session.buffer.admit(message) {
            Admission::Admitted => {
                updates.extend(session.buffer.drain_ready().into_iter().map(ClientUpdate::Message));
                if session.buffer.has_gap() {
                    if !session.gap_open {
                        session.gap_open = true;
                        updates.push(ClientUpdate::OrderingGap {
                            room_id,
                            missing: session.buffer.missing_sequences(),
                        });
                    }
                } else {
                    session.gap_open = false;
                }
            }
            Admission::DuplicateId | Admission::DuplicateSequence => {
                updates.push(ClientUpdate::DuplicateDropped { room_id, message_id });
            }
            Admission::Stale | Admission::InvalidSequence => {
                tracing::debug!(room_id = %room_id, "dropping stale or invalid message");
            }
        }
        updates
    }
}
