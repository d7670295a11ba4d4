//! Room state management.
//!
//! [`RoomStateManager`] is the single authority on every room this node
//! administers, on the 2PC deletion tables, and on peer-node health. All
//! mutation flows through it; endpoints hold it behind one mutex and never
//! await while the lock is held, which makes room-level operations
//! linearizable.

mod health;
mod twopc;

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
pub use health::{NodeHealth, NodeStatus};
use roomcast_proto::{MessageData, RoomSnapshot, RoomSummary, Vote};
use thiserror::Error;
pub use twopc::{DeletionTransaction, PreparedTransaction, TransactionState};
use uuid::Uuid;

use crate::config::MESSAGE_BUFFER_CAP;

/// Room lifecycle for the 2PC deletion protocol.
///
/// Only an `Active` room accepts joins, messages, and new deletions.
/// `Committing` is a point of no return: once the coordinator decides
/// COMMIT, the room never returns to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomLifecycle {
    /// Normal service.
    Active,
    /// PREPARE accepted (participant) or issued (coordinator).
    DeletionPending,
    /// Coordinator decided COMMIT; removal is imminent.
    Committing,
    /// Rolling back to `Active`.
    RollingBack,
}

impl std::fmt::Display for RoomLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Active => "ACTIVE",
            Self::DeletionPending => "DELETION_PENDING",
            Self::Committing => "COMMITTING",
            Self::RollingBack => "ROLLING_BACK",
        };
        f.write_str(name)
    }
}

/// Per-member bookkeeping.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    /// Member's username.
    pub username: String,
    /// Node hosting the member's client session. The admin uses it to scope
    /// heartbeats and node-failure eviction.
    pub node_id: String,
    /// When the member joined.
    pub joined_at: DateTime<Utc>,
    /// Refreshed on every observed member-originated event.
    pub last_activity: DateTime<Utc>,
}

impl MemberInfo {
    fn new(username: impl Into<String>, node_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self { username: username.into(), node_id: node_id.into(), joined_at: now, last_activity: now }
    }

    /// Refresh the activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// A chat room administered by this node (or a participant's copy of one
/// mid-deletion).
#[derive(Debug, Clone)]
pub struct Room {
    /// Room identifier.
    pub room_id: Uuid,
    /// Room name, unique on this node.
    pub room_name: String,
    /// Optional description.
    pub description: Option<String>,
    /// User who created the room; the only user allowed to delete it.
    pub creator_id: String,
    /// Node administering the room.
    pub admin_node: String,
    /// Current member usernames.
    pub members: HashSet<String>,
    /// Detailed member bookkeeping; always agrees with `members`.
    pub member_info: HashMap<String, MemberInfo>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Monotonic sequencer. The sole source of total order for this room:
    /// never reused, never reset, never reordered.
    pub message_counter: u64,
    /// Bounded FIFO of finalized messages, ordered by sequence number.
    /// Trimmed from the head; trimmed messages are never replayed.
    pub messages: VecDeque<MessageData>,
    /// Lifecycle state.
    pub state: RoomLifecycle,
}

impl Room {
    /// Listing/discovery view of this room.
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.room_id,
            room_name: self.room_name.clone(),
            description: self.description.clone(),
            member_count: self.members.len(),
            admin_node: self.admin_node.clone(),
            creator_id: Some(self.creator_id.clone()),
            node_address: None,
        }
    }

    /// Join-time view of this room.
    pub fn snapshot(&self) -> RoomSnapshot {
        let mut members: Vec<String> = self.members.iter().cloned().collect();
        members.sort_unstable();
        RoomSnapshot {
            room_id: self.room_id,
            room_name: self.room_name.clone(),
            description: self.description.clone(),
            member_count: members.len(),
            members,
            admin_node: self.admin_node.clone(),
        }
    }

    /// Usernames of members whose sessions live on `node_id`.
    pub fn members_on_node(&self, node_id: &str) -> Vec<String> {
        self.member_info
            .values()
            .filter(|info| info.node_id == node_id)
            .map(|info| info.username.clone())
            .collect()
    }

    /// Distinct nodes hosting members of this room.
    pub fn member_nodes(&self) -> HashSet<String> {
        self.member_info.values().map(|info| info.node_id.clone()).collect()
    }
}

/// Outcome of an `add_member` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipChange {
    /// False when the user was already a member (idempotent re-join).
    pub newly_added: bool,
    /// Member count after the call.
    pub member_count: usize,
}

/// Outcome of a `remove_member` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalOutcome {
    /// False when the user was not a member (idempotent re-leave).
    pub removed: bool,
    /// Member count after the call.
    pub member_count: usize,
}

/// Errors from state-manager operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// No room with the given id on this node.
    #[error("room not found")]
    RoomNotFound,
    /// A room with the given name already exists on this node.
    #[error("room with name '{0}' already exists")]
    NameInUse(String),
    /// The user is not a member of the room.
    #[error("user is not a member of this room")]
    NotMember,
    /// The room's lifecycle state forbids the operation.
    #[error("room is in {0} state")]
    InvalidState(RoomLifecycle),
}

/// Single authority on room state, 2PC tables, and node health.
#[derive(Debug)]
pub struct RoomStateManager {
    node_id: String,
    rooms: HashMap<Uuid, Room>,
    deletion_transactions: HashMap<Uuid, DeletionTransaction>,
    prepared_transactions: HashMap<Uuid, PreparedTransaction>,
    node_health: HashMap<String, NodeHealth>,
}

impl RoomStateManager {
    /// Create an empty manager for the given node.
    pub fn new(node_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        tracing::info!(node_id = %node_id, "room state manager initialized");
        Self {
            node_id,
            rooms: HashMap::new(),
            deletion_transactions: HashMap::new(),
            prepared_transactions: HashMap::new(),
            node_health: HashMap::new(),
        }
    }

    /// This node's identifier.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Create a room administered by this node. Room names are unique per
    /// node; the room starts `Active` with no members and counter 0.
    pub fn create_room(
        &mut self,
        room_name: &str,
        creator_id: &str,
        description: Option<String>,
    ) -> Result<&Room, StateError> {
        if self.rooms.values().any(|r| r.room_name == room_name) {
            return Err(StateError::NameInUse(room_name.to_string()));
        }

        let room_id = Uuid::new_v4();
        let room = Room {
            room_id,
            room_name: room_name.to_string(),
            description,
            creator_id: creator_id.to_string(),
            admin_node: self.node_id.clone(),
            members: HashSet::new(),
            member_info: HashMap::new(),
            created_at: Utc::now(),
            message_counter: 0,
            messages: VecDeque::new(),
            state: RoomLifecycle::Active,
        };

        tracing::info!(room_id = %room_id, room_name, creator_id, "room created");
        Ok(self.rooms.entry(room_id).or_insert(room))
    }

    /// Look up a room.
    pub fn room(&self, room_id: Uuid) -> Option<&Room> {
        self.rooms.get(&room_id)
    }

    /// Summaries of every room on this node.
    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        self.rooms.values().map(Room::summary).collect()
    }

    /// Number of rooms on this node.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Remove a room outright, returning it if it existed.
    fn delete_room(&mut self, room_id: Uuid) -> Option<Room> {
        let room = self.rooms.remove(&room_id);
        if let Some(room) = &room {
            tracing::info!(room_id = %room_id, room_name = %room.room_name, "room deleted");
        }
        room
    }

    /// True iff normal operations (join, leave, message, new deletion) are
    /// currently allowed on the room.
    pub fn can_operate_on_room(&self, room_id: Uuid) -> bool {
        self.rooms.get(&room_id).is_some_and(|r| r.state == RoomLifecycle::Active)
    }

    /// Add a member. Idempotent: re-joining refreshes activity and reports
    /// `newly_added = false` so callers do not re-broadcast. Seeds a health
    /// entry for remote source nodes so the heartbeat monitor picks them up.
    pub fn add_member(
        &mut self,
        room_id: Uuid,
        username: &str,
        source_node_id: &str,
    ) -> Result<MembershipChange, StateError> {
        let node_id = self.node_id.clone();
        let room = self.rooms.get_mut(&room_id).ok_or(StateError::RoomNotFound)?;
        if room.state != RoomLifecycle::Active {
            return Err(StateError::InvalidState(room.state));
        }

        if room.members.contains(username) {
            if let Some(info) = room.member_info.get_mut(username) {
                info.touch();
            }
            return Ok(MembershipChange { newly_added: false, member_count: room.members.len() });
        }

        room.members.insert(username.to_string());
        room.member_info.insert(username.to_string(), MemberInfo::new(username, source_node_id));
        let member_count = room.members.len();

        if source_node_id != node_id {
            self.node_health
                .entry(source_node_id.to_string())
                .or_insert_with(|| NodeHealth::new(source_node_id));
        }

        tracing::info!(room_id = %room_id, username, source_node_id, "member added");
        Ok(MembershipChange { newly_added: true, member_count })
    }

    /// Remove a member. Idempotent: removing a non-member reports
    /// `removed = false`.
    pub fn remove_member(
        &mut self,
        room_id: Uuid,
        username: &str,
    ) -> Result<RemovalOutcome, StateError> {
        let room = self.rooms.get_mut(&room_id).ok_or(StateError::RoomNotFound)?;
        let removed = room.members.remove(username);
        room.member_info.remove(username);
        if removed {
            tracing::info!(room_id = %room_id, username, "member removed");
        }
        Ok(RemovalOutcome { removed, member_count: room.members.len() })
    }

    /// Refresh a member's activity timestamp. Returns false when the room
    /// or member is unknown.
    pub fn touch_member(&mut self, room_id: Uuid, username: &str) -> bool {
        self.rooms
            .get_mut(&room_id)
            .and_then(|room| room.member_info.get_mut(username))
            .map(MemberInfo::touch)
            .is_some()
    }

    /// Accept a message into the room's total order.
    ///
    /// The administrator increments the room's counter, assigns the new
    /// value as the message's sequence number, stamps id and timestamp, and
    /// appends to the bounded buffer (trimming the oldest entries). Rejected
    /// when the room is missing, not `Active`, or the sender is not a
    /// member; a rejection never mutates state.
    pub fn add_message(
        &mut self,
        room_id: Uuid,
        username: &str,
        content: &str,
    ) -> Result<MessageData, StateError> {
        let room = self.rooms.get_mut(&room_id).ok_or(StateError::RoomNotFound)?;
        if room.state != RoomLifecycle::Active {
            return Err(StateError::InvalidState(room.state));
        }
        if !room.members.contains(username) {
            return Err(StateError::NotMember);
        }

        room.message_counter += 1;
        let message = MessageData {
            message_id: Uuid::new_v4(),
            room_id,
            username: username.to_string(),
            content: content.to_string(),
            sequence_number: room.message_counter,
            timestamp: Utc::now(),
        };

        room.messages.push_back(message.clone());
        while room.messages.len() > MESSAGE_BUFFER_CAP {
            room.messages.pop_front();
        }

        if let Some(info) = room.member_info.get_mut(username) {
            info.touch();
        }

        tracing::debug!(
            room_id = %room_id,
            username,
            sequence_number = message.sequence_number,
            "message sequenced"
        );
        Ok(message)
    }

    /// Usernames whose `last_activity` is older than `timeout`.
    pub fn get_stale_members(&self, room_id: Uuid, timeout: std::time::Duration) -> Vec<String> {
        let Some(room) = self.rooms.get(&room_id) else {
            return Vec::new();
        };
        let Ok(window) = chrono::Duration::from_std(timeout) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - window;
        room.member_info
            .values()
            .filter(|info| info.last_activity < cutoff)
            .map(|info| info.username.clone())
            .collect()
    }

    /// Remote nodes hosting at least one member of a room administered here.
    /// This is the set the heartbeat monitor probes.
    pub fn member_nodes(&self) -> HashSet<String> {
        self.rooms
            .values()
            .flat_map(Room::member_nodes)
            .filter(|node| node != &self.node_id)
            .collect()
    }

    /// Evict every member hosted by `node_id` from every room. Returns the
    /// `(room_id, username, member_count_after)` of each eviction so callers
    /// can broadcast `member_left` events.
    pub fn remove_all_members_from_node(
        &mut self,
        node_id: &str,
    ) -> Vec<(Uuid, String, usize)> {
        let mut removed = Vec::new();
        for room in self.rooms.values_mut() {
            for username in room.members_on_node(node_id) {
                room.members.remove(&username);
                room.member_info.remove(&username);
                removed.push((room.room_id, username, room.members.len()));
            }
        }
        if !removed.is_empty() {
            tracing::warn!(node_id, evicted = removed.len(), "evicted all members from node");
        }
        removed
    }

    /// Health record for a peer, if tracked.
    pub fn node_health(&self, node_id: &str) -> Option<&NodeHealth> {
        self.node_health.get(node_id)
    }

    /// Record a successful heartbeat for a peer.
    pub fn record_node_heartbeat_success(&mut self, node_id: &str) {
        self.node_health
            .entry(node_id.to_string())
            .or_insert_with(|| NodeHealth::new(node_id))
            .record_success();
    }

    /// Record a missed heartbeat. Returns true when the peer has just
    /// crossed the failure threshold.
    pub fn record_node_heartbeat_failure(&mut self, node_id: &str) -> bool {
        let failed = self
            .node_health
            .entry(node_id.to_string())
            .or_insert_with(|| NodeHealth::new(node_id))
            .record_failure();
        if failed {
            tracing::warn!(node_id, "node marked FAILED after missed heartbeats");
        }
        failed
    }

    // ----- 2PC, coordinator side -----

    /// Open a deletion transaction for a room administered here. Moves the
    /// room to `DeletionPending` so no new joins, messages, or deletions
    /// land while votes are collected.
    pub fn start_deletion_transaction(
        &mut self,
        room_id: Uuid,
        participants: Vec<String>,
    ) -> Result<Uuid, StateError> {
        let room = self.rooms.get_mut(&room_id).ok_or(StateError::RoomNotFound)?;
        if room.state != RoomLifecycle::Active {
            return Err(StateError::InvalidState(room.state));
        }

        let transaction_id = Uuid::new_v4();
        room.state = RoomLifecycle::DeletionPending;
        self.deletion_transactions
            .insert(transaction_id, DeletionTransaction::new(transaction_id, room_id, participants));

        tracing::info!(room_id = %room_id, transaction_id = %transaction_id, "deletion transaction started");
        Ok(transaction_id)
    }

    /// Look up a coordinator-side transaction.
    pub fn deletion_transaction(&self, transaction_id: Uuid) -> Option<&DeletionTransaction> {
        self.deletion_transactions.get(&transaction_id)
    }

    /// Record a participant's vote. Returns false for unknown transactions
    /// or non-participants.
    pub fn record_vote(&mut self, transaction_id: Uuid, node_id: &str, vote: Vote) -> bool {
        let Some(txn) = self.deletion_transactions.get_mut(&transaction_id) else {
            tracing::warn!(transaction_id = %transaction_id, "vote for unknown transaction");
            return false;
        };
        let Some(slot) = txn.votes.get_mut(node_id) else {
            tracing::warn!(transaction_id = %transaction_id, node_id, "vote from non-participant");
            return false;
        };
        *slot = Some(vote);
        true
    }

    /// True when every participant has voted READY.
    pub fn all_votes_ready(&self, transaction_id: Uuid) -> bool {
        self.deletion_transactions
            .get(&transaction_id)
            .is_some_and(DeletionTransaction::all_votes_ready)
    }

    /// Move the transaction (and its room) into the COMMIT phase.
    pub fn transition_to_commit(&mut self, transaction_id: Uuid) -> bool {
        let Some(txn) = self.deletion_transactions.get_mut(&transaction_id) else {
            return false;
        };
        txn.state = TransactionState::Commit;
        if let Some(room) = self.rooms.get_mut(&txn.room_id) {
            room.state = RoomLifecycle::Committing;
        }
        true
    }

    /// Move the transaction (and its room) into the ROLLBACK phase.
    pub fn transition_to_rollback(&mut self, transaction_id: Uuid) -> bool {
        let Some(txn) = self.deletion_transactions.get_mut(&transaction_id) else {
            return false;
        };
        txn.state = TransactionState::Rollback;
        if let Some(room) = self.rooms.get_mut(&txn.room_id) {
            room.state = RoomLifecycle::RollingBack;
        }
        true
    }

    /// Finish a committed deletion: remove the room and the transaction.
    /// Returns the removed room so the caller can notify subscribers.
    pub fn complete_deletion(&mut self, transaction_id: Uuid) -> Option<Room> {
        let txn = self.deletion_transactions.remove(&transaction_id)?;
        let room = self.delete_room(txn.room_id);
        tracing::info!(
            transaction_id = %transaction_id,
            room_removed = room.is_some(),
            "deletion transaction completed"
        );
        room
    }

    /// Abort a deletion: restore the room to `Active` and drop the
    /// transaction.
    pub fn rollback_deletion(&mut self, transaction_id: Uuid) -> bool {
        let Some(txn) = self.deletion_transactions.remove(&transaction_id) else {
            return false;
        };
        if let Some(room) = self.rooms.get_mut(&txn.room_id) {
            room.state = RoomLifecycle::Active;
        }
        tracing::info!(transaction_id = %transaction_id, "deletion transaction rolled back");
        true
    }

    // ----- 2PC, participant side -----

    /// PREPARE phase on a participant.
    ///
    /// Votes READY for an unknown room: there is nothing to clean up
    /// locally, which keeps the coordinator making progress when room
    /// propagation is partial. Votes ABORT when this node's copy is already
    /// mid-deletion (a concurrent attempt).
    pub fn prepare_for_deletion(
        &mut self,
        room_id: Uuid,
        transaction_id: Uuid,
        coordinator_node_id: &str,
    ) -> (Vote, Option<String>) {
        let Some(room) = self.rooms.get_mut(&room_id) else {
            tracing::info!(
                room_id = %room_id,
                transaction_id = %transaction_id,
                "room not hosted here, voting READY"
            );
            return (Vote::Ready, None);
        };

        if room.state != RoomLifecycle::Active {
            let reason = format!("Room in {} state", room.state);
            tracing::warn!(room_id = %room_id, transaction_id = %transaction_id, %reason, "voting ABORT");
            return (Vote::Abort, Some(reason));
        }

        room.state = RoomLifecycle::DeletionPending;
        self.prepared_transactions.insert(
            transaction_id,
            PreparedTransaction::ready(transaction_id, room_id, coordinator_node_id),
        );
        tracing::info!(room_id = %room_id, transaction_id = %transaction_id, "prepared for deletion, voting READY");
        (Vote::Ready, None)
    }

    /// COMMIT phase on a participant: drop the prepared record and the
    /// room. Committing a room that was never hosted here is trivially
    /// successful.
    pub fn commit_deletion(&mut self, room_id: Uuid, transaction_id: Uuid) -> Option<Room> {
        self.prepared_transactions.remove(&transaction_id);
        self.delete_room(room_id)
    }

    /// ROLLBACK phase on a participant: drop the prepared record and
    /// restore the room to `Active` if we hold a copy.
    pub fn rollback_deletion_participant(&mut self, room_id: Uuid, transaction_id: Uuid) -> bool {
        self.prepared_transactions.remove(&transaction_id);
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.state = RoomLifecycle::Active;
            tracing::info!(room_id = %room_id, transaction_id = %transaction_id, "deletion rolled back");
            true
        } else {
            false
        }
    }

    /// Number of prepared transactions currently held (participant side).
    pub fn prepared_transaction_count(&self) -> usize {
        self.prepared_transactions.len()
    }
}
