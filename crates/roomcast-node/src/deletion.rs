//! Two-phase-commit room deletion, coordinator side.
//!
//! The room's administrator node drives deletion: PREPARE collects votes
//! from every peer under a deadline (a timeout counts as ABORT), then the
//! decision is COMMIT iff the vote was unanimous READY. After a unanimous
//! READY, a commit-phase failure on one peer does not abort: the coordinator
//! commits locally and logs the unreachable peer, which converges once the
//! peer's members are evicted by the failure detector. A coordinator crash
//! between PREPARE and decision leaves participants pending; this classical
//! blocking behavior is accepted.

use roomcast_proto::{
    ErrorCode, PrepareResult, RpcRequest, ServerFrame, Vote,
};
use uuid::Uuid;

use crate::{
    broadcast,
    config::{COMMIT_TIMEOUT, PREPARE_TIMEOUT},
    state::StateError,
    Node,
};

fn failed(
    room_id: Uuid,
    transaction_id: Option<Uuid>,
    error_code: ErrorCode,
    reason: impl Into<String>,
) -> ServerFrame {
    ServerFrame::DeleteRoomFailed { room_id, reason: reason.into(), error_code, transaction_id }
}

/// Coordinate deletion of a locally-administered room.
///
/// Emits `delete_room_initiated` to the initiator and the room's local
/// subscribers as soon as the transaction opens, then returns the terminal
/// frame (`delete_room_success` or `delete_room_failed`) for the initiator.
/// Only the recorded creator may initiate.
pub async fn run(
    node: &Node,
    initiator_session: u64,
    room_id: Uuid,
    username: &str,
) -> ServerFrame {
    // Phase 0: authorize and open the transaction under one lock.
    let transaction_id = {
        let mut state = node.state.lock().await;
        let Some(room) = state.room(room_id) else {
            return failed(room_id, None, ErrorCode::RoomNotFound, "room not found");
        };
        if room.creator_id != username {
            return failed(
                room_id,
                None,
                ErrorCode::Unauthorized,
                "only the room creator may delete the room",
            );
        }
        match state.start_deletion_transaction(room_id, node.peers.peer_ids()) {
            Ok(txn) => txn,
            Err(StateError::InvalidState(lifecycle)) => {
                return failed(
                    room_id,
                    None,
                    ErrorCode::InvalidState,
                    format!("room is in {lifecycle} state"),
                );
            }
            Err(e) => {
                return failed(room_id, None, ErrorCode::InternalError, e.to_string());
            }
        }
    };

    let initiated = ServerFrame::DeleteRoomInitiated {
        room_id,
        initiator: username.to_string(),
        status: "in_progress".to_string(),
        transaction_id: Some(transaction_id),
    };
    node.sessions.broadcast_except(room_id, Some(initiator_session), &initiated);
    node.sessions.send_to(initiator_session, initiated);

    // Phase 1: PREPARE. A vote that does not arrive in time is an ABORT.
    let participants = node.peers.peer_ids();
    let prepare = RpcRequest::PrepareDeleteRoom {
        room_id,
        transaction_id,
        coordinator_node_id: node.node_id().to_string(),
    };
    let results =
        node.peers.fan_out::<PrepareResult>(&participants, &prepare, PREPARE_TIMEOUT).await;

    let mut abort_reason: Option<String> = None;
    {
        let mut state = node.state.lock().await;
        for (peer, result) in results {
            match result {
                Ok(prepared) => {
                    if prepared.vote == Vote::Abort && abort_reason.is_none() {
                        abort_reason = Some(
                            prepared
                                .reason
                                .clone()
                                .unwrap_or_else(|| format!("peer {peer} voted ABORT")),
                        );
                    }
                    state.record_vote(transaction_id, &peer, prepared.vote);
                }
                Err(e) => {
                    if abort_reason.is_none() {
                        abort_reason = Some(format!("peer {peer} unreachable: {e}"));
                    }
                    state.record_vote(transaction_id, &peer, Vote::Abort);
                }
            }
        }
    }

    let unanimous = node.state.lock().await.all_votes_ready(transaction_id);

    if unanimous {
        commit(node, room_id, transaction_id).await
    } else {
        rollback(node, room_id, transaction_id, abort_reason).await
    }
}

/// Phase 2, COMMIT: instruct every participant, then remove the room
/// locally and notify subscribers.
async fn commit(node: &Node, room_id: Uuid, transaction_id: Uuid) -> ServerFrame {
    node.state.lock().await.transition_to_commit(transaction_id);

    let participants = node.peers.peer_ids();
    let request = RpcRequest::CommitDeleteRoom { room_id, transaction_id };
    let results = node
        .peers
        .fan_out::<roomcast_proto::CommitResult>(&participants, &request, COMMIT_TIMEOUT)
        .await;
    for (peer, result) in results {
        if let Err(e) = result {
            // The decision is already fixed; the peer converges via the
            // failure detector when it comes back.
            tracing::warn!(%peer, transaction_id = %transaction_id, error = %e, "commit delivery failed");
        }
    }

    let removed = node.state.lock().await.complete_deletion(transaction_id);
    let room_name = removed.map(|room| room.room_name);
    broadcast::announce_room_deleted(node, room_id, room_name.as_deref(), Some(transaction_id));

    tracing::info!(room_id = %room_id, transaction_id = %transaction_id, "room deletion committed");
    ServerFrame::DeleteRoomSuccess {
        room_id,
        transaction_id,
        message: format!("Room '{}' deleted", room_name.unwrap_or_default()),
    }
}

/// Phase 2, ROLLBACK: instruct every participant, then restore the room to
/// active service.
async fn rollback(
    node: &Node,
    room_id: Uuid,
    transaction_id: Uuid,
    abort_reason: Option<String>,
) -> ServerFrame {
    node.state.lock().await.transition_to_rollback(transaction_id);

    let participants = node.peers.peer_ids();
    let request = RpcRequest::RollbackDeleteRoom { room_id, transaction_id };
    let results = node
        .peers
        .fan_out::<roomcast_proto::RollbackResult>(&participants, &request, COMMIT_TIMEOUT)
        .await;
    for (peer, result) in results {
        if let Err(e) = result {
            tracing::warn!(%peer, transaction_id = %transaction_id, error = %e, "rollback delivery failed");
        }
    }

    node.state.lock().await.rollback_deletion(transaction_id);
    node.sessions.broadcast(
        room_id,
        &ServerFrame::DeleteRoomCancelled { room_id, transaction_id: Some(transaction_id) },
    );

    let reason = abort_reason.unwrap_or_else(|| "timeout".to_string());
    tracing::warn!(room_id = %room_id, transaction_id = %transaction_id, %reason, "room deletion rolled back");
    ServerFrame::DeleteRoomFailed {
        room_id,
        reason,
        error_code: ErrorCode::DeletionFailed,
        transaction_id: Some(transaction_id),
    }
}
