//! Broadcast fan-out.
//!
//! Local delivery goes through the session registry; remote delivery uses
//! the peer registry's parallel helper to call the `receive_*` RPC methods.
//! Per-peer failures are logged and never fail the originating operation;
//! members on an unreachable peer reconverge through heartbeat eviction.
//!
//! Everything here runs strictly after the state mutation it announces has
//! returned, so no state lock is ever held across these awaits.

use std::time::Duration;

use roomcast_proto::{
    AckResult, MemberEventData, MemberEventKind, MessageData, RpcRequest, ServerFrame,
};
use uuid::Uuid;

use crate::Node;

/// Per-peer deadline for broadcast deliveries.
pub(crate) const BROADCAST_TIMEOUT: Duration = Duration::from_secs(3);

/// Build the client-facing frame for a member event.
pub fn member_event_frame(kind: MemberEventKind, event: &MemberEventData) -> ServerFrame {
    match kind {
        MemberEventKind::MemberJoined => ServerFrame::MemberJoined {
            room_id: event.room_id,
            username: event.username.clone(),
            member_count: event.member_count,
            timestamp: event.timestamp,
        },
        MemberEventKind::MemberLeft => ServerFrame::MemberLeft {
            room_id: event.room_id,
            username: event.username.clone(),
            member_count: event.member_count,
            timestamp: event.timestamp,
            reason: event.reason.clone(),
        },
    }
}

/// Deliver a finalized message to local subscribers and to the given peers.
///
/// `target_peers` is the set of nodes hosting members of the room (the
/// admin's view); peers without members are skipped entirely.
pub async fn fan_out_message(node: &Node, message: &MessageData, target_peers: &[String]) {
    node.sessions.broadcast(message.room_id, &ServerFrame::NewMessage(message.clone()));

    if target_peers.is_empty() {
        return;
    }
    let request =
        RpcRequest::ReceiveMessageBroadcast { room_id: message.room_id, message: message.clone() };
    let results =
        node.peers.fan_out::<AckResult>(target_peers, &request, BROADCAST_TIMEOUT).await;
    for (peer, result) in results {
        if let Err(e) = result {
            tracing::warn!(
                peer,
                room_id = %message.room_id,
                error = %e,
                "message broadcast to peer failed"
            );
        }
    }
}

/// Announce a member join/leave to local subscribers and to every peer
/// (optionally excluding one, e.g. a node that just failed).
pub async fn announce_member_event(
    node: &Node,
    kind: MemberEventKind,
    event: &MemberEventData,
    exclude_peer: Option<&str>,
) {
    node.sessions.broadcast(event.room_id, &member_event_frame(kind, event));

    let targets: Vec<String> = node
        .peers
        .peer_ids()
        .into_iter()
        .filter(|peer| Some(peer.as_str()) != exclude_peer)
        .collect();
    if targets.is_empty() {
        return;
    }

    let request = RpcRequest::ReceiveMemberEventBroadcast {
        room_id: event.room_id,
        event_type: kind,
        event_data: event.clone(),
    };
    let results = node.peers.fan_out::<AckResult>(&targets, &request, BROADCAST_TIMEOUT).await;
    for (peer, result) in results {
        if let Err(e) = result {
            tracing::warn!(%peer, room_id = %event.room_id, error = %e, "member event broadcast failed");
        }
    }
}

/// Notify local subscribers that a room was deleted and drop their
/// subscriptions. Peers announce to their own subscribers when they commit.
///
/// Keyed by `room_id` alone: a 2PC participant that never held a copy of
/// the room (it READYs unknown rooms during PREPARE) still has subscribed
/// sessions that joined through the remote owner, and they must hear about
/// the deletion. `room_name` is filled in when the caller had the room.
pub fn announce_room_deleted(
    node: &Node,
    room_id: Uuid,
    room_name: Option<&str>,
    transaction_id: Option<Uuid>,
) {
    let message = match room_name {
        Some(name) => format!("Room '{name}' has been deleted"),
        None => "Room has been deleted".to_string(),
    };
    let frame = ServerFrame::RoomDeleted {
        room_id,
        room_name: room_name.unwrap_or_default().to_string(),
        message,
        transaction_id,
    };
    node.sessions.broadcast(room_id, &frame);
    node.sessions.clear_room(room_id);
}
