//! Administrator protocol: the operations only a room's owning node may
//! perform, shared by the client endpoint (for locally-owned rooms) and the
//! RPC endpoint (for requests forwarded by peers).
//!
//! Each operation mutates state under one lock acquisition, releases the
//! lock, and only then fans out broadcasts.

use chrono::Utc;
use roomcast_proto::{
    validate_content, JoinRoomResult, LeaveRoomResult, MemberEventData, MemberEventKind,
    MessageData,
};
use uuid::Uuid;

use crate::{broadcast, NodeError, Node};

/// Add a member to a locally-administered room and announce the join.
///
/// Idempotent: a second join by the same username succeeds without a second
/// `member_joined` broadcast. The reply carries the room snapshot plus the
/// admin's buffered messages for late-joiner catch-up.
pub async fn admin_join(
    node: &Node,
    room_id: Uuid,
    username: &str,
    source_node_id: &str,
) -> Result<JoinRoomResult, NodeError> {
    let (result, event) = {
        let mut state = node.state.lock().await;
        let change = state.add_member(room_id, username, source_node_id)?;
        let room = state
            .room(room_id)
            .ok_or_else(|| NodeError::Internal("room vanished during join".into()))?;
        let result = JoinRoomResult {
            room: room.snapshot(),
            messages: room.messages.iter().cloned().collect(),
            already_member: !change.newly_added,
        };
        let event = change.newly_added.then(|| MemberEventData {
            room_id,
            username: username.to_string(),
            member_count: change.member_count,
            timestamp: Utc::now(),
            reason: None,
        });
        (result, event)
    };

    if let Some(event) = event {
        broadcast::announce_member_event(node, MemberEventKind::MemberJoined, &event, None).await;
    }
    Ok(result)
}

/// Remove a member from a locally-administered room and announce the leave.
///
/// Idempotent: removing a non-member reports `removed = false` and emits no
/// event. `reason` is carried on the broadcast for non-user-initiated
/// departures (disconnects, eviction).
pub async fn admin_leave(
    node: &Node,
    room_id: Uuid,
    username: &str,
    reason: Option<String>,
) -> Result<LeaveRoomResult, NodeError> {
    let (outcome, event) = {
        let mut state = node.state.lock().await;
        let outcome = state.remove_member(room_id, username)?;
        let event = outcome.removed.then(|| MemberEventData {
            room_id,
            username: username.to_string(),
            member_count: outcome.member_count,
            timestamp: Utc::now(),
            reason,
        });
        (outcome, event)
    };

    if let Some(event) = event {
        broadcast::announce_member_event(node, MemberEventKind::MemberLeft, &event, None).await;
    }
    Ok(LeaveRoomResult { removed: outcome.removed, member_count: outcome.member_count })
}

/// Sequence a message on a locally-administered room and fan it out.
///
/// Content is validated uniformly here regardless of which endpoint the
/// message arrived through. The broadcast targets only peers that actually
/// host members of the room.
pub async fn admin_send_message(
    node: &Node,
    room_id: Uuid,
    username: &str,
    content: &str,
) -> Result<MessageData, NodeError> {
    validate_content(content)?;

    let (message, target_peers) = {
        let mut state = node.state.lock().await;
        let message = state.add_message(room_id, username, content)?;
        let target_peers: Vec<String> = state
            .room(room_id)
            .map(|room| {
                room.member_nodes()
                    .into_iter()
                    .filter(|peer| peer != node.node_id())
                    .collect()
            })
            .unwrap_or_default();
        (message, target_peers)
    };

    broadcast::fan_out_message(node, &message, &target_peers).await;
    Ok(message)
}
