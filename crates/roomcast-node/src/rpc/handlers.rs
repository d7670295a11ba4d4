//! RPC method implementations.
//!
//! Each method is stateless beyond the room state manager it wraps; the
//! admin-side operations are shared with the client endpoint through
//! [`crate::ops`].

use chrono::Utc;
use roomcast_proto::{
    AckResult, CommitResult, HeartbeatResult, HostedRoomsResult, PrepareResult, RollbackResult,
    RpcReply, RpcRequest, ServerFrame, Vote,
};

use crate::{broadcast, ops, Node, NodeError};

fn error_reply(err: &NodeError) -> RpcReply {
    RpcReply::err(err.code(), err.to_string())
}

/// Dispatch one RPC request.
pub async fn handle_request(node: &Node, request: RpcRequest) -> RpcReply {
    match request {
        RpcRequest::GetHostedRooms => {
            let mut rooms = node.state.lock().await.list_rooms();
            for room in &mut rooms {
                room.node_address = Some(node.config.rpc_advertise.clone());
            }
            RpcReply::ok(&HostedRoomsResult { rooms })
        }

        RpcRequest::JoinRoom { room_id, username, source_node_id } => {
            match ops::admin_join(node, room_id, &username, &source_node_id).await {
                Ok(result) => RpcReply::ok(&result),
                Err(e) => error_reply(&e),
            }
        }

        RpcRequest::LeaveRoom { room_id, username, source_node_id: _ } => {
            match ops::admin_leave(node, room_id, &username, None).await {
                Ok(result) => RpcReply::ok(&result),
                Err(e) => error_reply(&e),
            }
        }

        RpcRequest::ForwardMessage { room_id, username, content, source_node_id: _ } => {
            match ops::admin_send_message(node, room_id, &username, &content).await {
                Ok(message) => RpcReply::ok(&roomcast_proto::ForwardMessageResult {
                    message_id: message.message_id,
                    sequence_number: message.sequence_number,
                    timestamp: message.timestamp,
                }),
                Err(e) => error_reply(&e),
            }
        }

        RpcRequest::ReceiveMessageBroadcast { room_id, message } => {
            // Inject into local subscribers only; never re-broadcast.
            node.sessions.broadcast(room_id, &ServerFrame::NewMessage(message));
            RpcReply::ok(&AckResult { success: true, node_id: node.node_id().to_string() })
        }

        RpcRequest::ReceiveMemberEventBroadcast { room_id, event_type, event_data } => {
            node.sessions.broadcast(room_id, &broadcast::member_event_frame(event_type, &event_data));
            RpcReply::ok(&AckResult { success: true, node_id: node.node_id().to_string() })
        }

        RpcRequest::NotifyMemberDisconnect { room_id, username, source_node_id: _, reason } => {
            match ops::admin_leave(node, room_id, &username, Some(reason)).await {
                Ok(result) => RpcReply::ok(&result),
                Err(e) => error_reply(&e),
            }
        }

        RpcRequest::Heartbeat => RpcReply::ok(&HeartbeatResult {
            status: "ok".to_string(),
            node_id: node.node_id().to_string(),
            timestamp: Utc::now(),
        }),

        RpcRequest::PrepareDeleteRoom { room_id, transaction_id, coordinator_node_id } => {
            let (vote, reason) = node
                .state
                .lock()
                .await
                .prepare_for_deletion(room_id, transaction_id, &coordinator_node_id);
            debug_assert!(vote == Vote::Ready || reason.is_some());
            RpcReply::ok(&PrepareResult {
                vote,
                node_id: node.node_id().to_string(),
                transaction_id,
                reason,
            })
        }

        RpcRequest::CommitDeleteRoom { room_id, transaction_id } => {
            let removed = node.state.lock().await.commit_deletion(room_id, transaction_id);
            // Subscribers joined through the remote owner even when this
            // node never held a copy of the room, so the notice always
            // goes out; the name is only known when a copy was removed.
            let room_name = removed.map(|room| room.room_name);
            broadcast::announce_room_deleted(
                node,
                room_id,
                room_name.as_deref(),
                Some(transaction_id),
            );
            RpcReply::ok(&CommitResult { success: true, node_id: node.node_id().to_string() })
        }

        RpcRequest::RollbackDeleteRoom { room_id, transaction_id } => {
            let existed =
                node.state.lock().await.rollback_deletion_participant(room_id, transaction_id);
            if existed {
                node.sessions.broadcast(
                    room_id,
                    &ServerFrame::DeleteRoomCancelled {
                        room_id,
                        transaction_id: Some(transaction_id),
                    },
                );
            }
            RpcReply::ok(&RollbackResult { success: true, node_id: node.node_id().to_string() })
        }
    }
}
