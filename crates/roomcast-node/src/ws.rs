//! Client endpoint: WebSocket sessions and request dispatch.
//!
//! Each session owns an outbound channel registered with the session
//! registry; a writer task drains it onto the socket so broadcasts from any
//! thread are ordered per session. The reader loop decodes each text frame
//! once into a [`ClientRequest`] and dispatches on the variant.
//!
//! Requests for rooms administered by this node are applied directly via
//! [`crate::ops`]; requests for remotely-owned rooms are forwarded to the
//! owner over RPC, with `ADMIN_NODE_UNAVAILABLE` surfaced when the owner
//! cannot be reached.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use futures_util::{SinkExt, StreamExt};
use roomcast_proto::{
    validate_content, ClientRequest, ErrorCode, HostedRoomsResult, JoinRoomResult,
    LeaveRoomResult, RpcRequest, ServerFrame,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::{DISCOVERY_TIMEOUT, FORWARD_TIMEOUT},
    deletion, ops, Node, NodeError,
};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Accept and serve client sessions until shutdown.
pub async fn serve(node: Arc<Node>, listener: TcpListener, shutdown: CancellationToken) {
    tracing::info!(node_id = %node.node_id(), "client endpoint listening");
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!("client endpoint shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let node = Arc::clone(&node);
                    let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(async move {
                        if let Err(e) = handle_session(node, stream, session_id).await {
                            tracing::debug!(session_id, %peer_addr, error = %e, "session ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "client accept failed");
                }
            }
        }
    }
}

/// Run one client session to completion, then tear down its subscriptions
/// and notify room owners.
async fn handle_session(
    node: Arc<Node>,
    stream: TcpStream,
    session_id: u64,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut reader) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    node.sessions.register(session_id, tx);
    tracing::info!(session_id, "client connected");

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.to_json())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = reader.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientRequest::from_json(&text) {
                Ok(request) => dispatch(&node, session_id, request).await,
                Err(e) => {
                    tracing::debug!(session_id, error = %e, "malformed client frame");
                    node.sessions.send_to(
                        session_id,
                        ServerFrame::Error {
                            error: format!("malformed request: {e}"),
                            error_code: ErrorCode::InvalidRequest,
                        },
                    );
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // binary/ping/pong frames are ignored
            Err(e) => {
                tracing::debug!(session_id, error = %e, "client read error");
                break;
            }
        }
    }

    teardown(&node, session_id).await;
    writer.abort();
    tracing::info!(session_id, "client disconnected");
    Ok(())
}

/// Unregister every subscription the session held and notify the owning
/// node of each joined room.
async fn teardown(node: &Node, session_id: u64) {
    for (room_id, subscription) in node.sessions.unregister(session_id) {
        match subscription.owner_node {
            None => {
                if let Err(e) = ops::admin_leave(
                    node,
                    room_id,
                    &subscription.username,
                    Some("User disconnected".to_string()),
                )
                .await
                {
                    tracing::debug!(room_id = %room_id, error = %e, "disconnect cleanup failed");
                }
            }
            Some(owner) => {
                let request = RpcRequest::NotifyMemberDisconnect {
                    room_id,
                    username: subscription.username.clone(),
                    source_node_id: node.node_id().to_string(),
                    reason: "User disconnected".to_string(),
                };
                if let Err(e) =
                    node.peers.call::<LeaveRoomResult>(&owner, &request, FORWARD_TIMEOUT).await
                {
                    tracing::debug!(room_id = %room_id, %owner, error = %e, "disconnect notify failed");
                }
            }
        }
    }
}

/// Dispatch one decoded client request.
async fn dispatch(node: &Node, session_id: u64, request: ClientRequest) {
    match request {
        ClientRequest::ListRooms => {
            let rooms = node.state.lock().await.list_rooms();
            let total_count = rooms.len();
            node.sessions.send_to(session_id, ServerFrame::RoomsList { rooms, total_count });
        }

        ClientRequest::DiscoverRooms => {
            let local = node.state.lock().await.list_rooms();
            let discovery = node.peers.discover_global_rooms(local).await;
            node.sessions.send_to(
                session_id,
                ServerFrame::GlobalRoomsList {
                    total_count: discovery.rooms.len(),
                    rooms: discovery.rooms,
                    nodes_queried: discovery.nodes_queried,
                    nodes_available: discovery.nodes_available,
                    nodes_unavailable: discovery.nodes_unavailable,
                },
            );
        }

        ClientRequest::CreateRoom { room_name, creator_id, description } => {
            handle_create(node, session_id, &room_name, &creator_id, description).await;
        }

        ClientRequest::JoinRoom { room_id, username } => {
            handle_join(node, session_id, room_id, username).await;
        }

        ClientRequest::LeaveRoom { room_id, username } => {
            handle_leave(node, session_id, room_id, &username).await;
        }

        ClientRequest::SendMessage { room_id, username, content } => {
            handle_send(node, session_id, room_id, &username, &content).await;
        }

        ClientRequest::DeleteRoom { room_id, username } => {
            let is_local = node.state.lock().await.room(room_id).is_some();
            let frame = if is_local {
                deletion::run(node, session_id, room_id, &username).await
            } else {
                // Deletion is coordinated by the administrator node only;
                // there is no forwarding RPC for it.
                ServerFrame::DeleteRoomFailed {
                    room_id,
                    reason: "room is not administered by this node".to_string(),
                    error_code: ErrorCode::RoomNotFound,
                    transaction_id: None,
                }
            };
            node.sessions.send_to(session_id, frame);
        }
    }
}

async fn handle_create(
    node: &Node,
    session_id: u64,
    room_name: &str,
    creator_id: &str,
    description: Option<String>,
) {
    if room_name.trim().is_empty() || creator_id.trim().is_empty() {
        node.sessions.send_to(
            session_id,
            ServerFrame::Error {
                error: "room_name and creator_id must be non-empty".to_string(),
                error_code: ErrorCode::InvalidRequest,
            },
        );
        return;
    }

    let mut state = node.state.lock().await;
    let frame = match state.create_room(room_name, creator_id, description) {
        Ok(room) => ServerFrame::RoomCreated {
            room_id: room.room_id,
            room_name: room.room_name.clone(),
            admin_node: room.admin_node.clone(),
            members: Vec::new(),
            created_at: room.created_at,
        },
        Err(e) => {
            ServerFrame::Error { error: e.to_string(), error_code: ErrorCode::InvalidRequest }
        }
    };
    drop(state);
    node.sessions.send_to(session_id, frame);
}

/// Find which peer administers a room by asking everyone in parallel.
async fn find_room_owner(node: &Node, room_id: Uuid) -> Option<String> {
    let peer_ids = node.peers.peer_ids();
    let results = node
        .peers
        .fan_out::<HostedRoomsResult>(&peer_ids, &RpcRequest::GetHostedRooms, DISCOVERY_TIMEOUT)
        .await;
    results.into_iter().find_map(|(peer, result)| match result {
        Ok(hosted) if hosted.rooms.iter().any(|room| room.room_id == room_id) => Some(peer),
        _ => None,
    })
}

/// Register the subscription and replay the catch-up buffer after a
/// successful join, in sequence order.
fn finish_join(
    node: &Node,
    session_id: u64,
    username: &str,
    result: JoinRoomResult,
    owner_node: Option<String>,
) {
    let room = result.room;
    node.sessions.subscribe(session_id, room.room_id, username, owner_node);
    node.sessions.send_to(
        session_id,
        ServerFrame::JoinRoomSuccess {
            room_id: room.room_id,
            room_name: room.room_name,
            description: room.description,
            members: room.members,
            member_count: room.member_count,
            admin_node: room.admin_node,
        },
    );
    for message in result.messages {
        node.sessions.send_to(session_id, ServerFrame::NewMessage(message));
    }
}

async fn handle_join(node: &Node, session_id: u64, room_id: Uuid, username: String) {
    let is_local = node.state.lock().await.room(room_id).is_some();

    let outcome = if is_local {
        ops::admin_join(node, room_id, &username, node.node_id()).await.map(|r| (r, None))
    } else {
        match find_room_owner(node, room_id).await {
            Some(owner) => {
                let request = RpcRequest::JoinRoom {
                    room_id,
                    username: username.clone(),
                    source_node_id: node.node_id().to_string(),
                };
                node.peers
                    .call::<JoinRoomResult>(&owner, &request, FORWARD_TIMEOUT)
                    .await
                    .map(|r| (r, Some(owner)))
                    .map_err(NodeError::from)
            }
            None => Err(NodeError::RoomNotFound),
        }
    };

    match outcome {
        Ok((result, owner)) => finish_join(node, session_id, &username, result, owner),
        Err(e) => {
            node.sessions.send_to(
                session_id,
                ServerFrame::JoinRoomError {
                    room_id,
                    error: e.to_string(),
                    error_code: e.code(),
                },
            );
        }
    }
}

async fn handle_leave(node: &Node, session_id: u64, room_id: Uuid, username: &str) {
    let subscription = node.sessions.subscription(session_id, room_id);
    // The subscription is dropped up front: whatever the owner says, this
    // session no longer receives broadcasts for the room.
    node.sessions.unsubscribe(session_id, room_id);

    let owner = subscription.and_then(|s| s.owner_node);
    let outcome: Result<LeaveRoomResult, NodeError> = match owner {
        None => ops::admin_leave(node, room_id, username, None).await,
        Some(owner) => {
            let request = RpcRequest::LeaveRoom {
                room_id,
                username: username.to_string(),
                source_node_id: node.node_id().to_string(),
            };
            node.peers
                .call::<LeaveRoomResult>(&owner, &request, FORWARD_TIMEOUT)
                .await
                .map_err(NodeError::from)
        }
    };

    match outcome {
        Ok(result) => {
            // Direct confirmation: the session is already unsubscribed, so
            // the room broadcast no longer reaches it.
            node.sessions.send_to(
                session_id,
                ServerFrame::MemberLeft {
                    room_id,
                    username: username.to_string(),
                    member_count: result.member_count,
                    timestamp: chrono::Utc::now(),
                    reason: None,
                },
            );
        }
        Err(e) => {
            node.sessions.send_to(
                session_id,
                ServerFrame::Error { error: e.to_string(), error_code: e.code() },
            );
        }
    }
}

async fn handle_send(node: &Node, session_id: u64, room_id: Uuid, username: &str, content: &str) {
    // Sessions may only send to rooms they are subscribed to, regardless of
    // server-side membership. A room that exists nowhere (e.g. deleted) is
    // reported as missing rather than as a membership failure.
    let Some(subscription) = node.sessions.subscription(session_id, room_id) else {
        let known_locally = node.state.lock().await.room(room_id).is_some();
        let frame = if known_locally || find_room_owner(node, room_id).await.is_some() {
            ServerFrame::MessageError {
                room_id,
                error: "not subscribed to this room".to_string(),
                error_code: ErrorCode::NotMember,
            }
        } else {
            ServerFrame::MessageError {
                room_id,
                error: "room not found".to_string(),
                error_code: ErrorCode::RoomNotFound,
            }
        };
        node.sessions.send_to(session_id, frame);
        return;
    };

    if let Err(e) = validate_content(content) {
        node.sessions.send_to(
            session_id,
            ServerFrame::MessageError {
                room_id,
                error: e.to_string(),
                error_code: ErrorCode::InvalidContent,
            },
        );
        return;
    }

    let confirmation = match subscription.owner_node {
        None => ops::admin_send_message(node, room_id, username, content).await.map(|message| {
            ServerFrame::MessageSent {
                room_id,
                message_id: message.message_id,
                sequence_number: message.sequence_number,
                timestamp: message.timestamp,
            }
        }),
        Some(owner) => {
            let request = RpcRequest::ForwardMessage {
                room_id,
                username: username.to_string(),
                content: content.to_string(),
                source_node_id: node.node_id().to_string(),
            };
            node.peers
                .call::<roomcast_proto::ForwardMessageResult>(&owner, &request, FORWARD_TIMEOUT)
                .await
                .map(|result| ServerFrame::MessageSent {
                    room_id,
                    message_id: result.message_id,
                    sequence_number: result.sequence_number,
                    timestamp: result.timestamp,
                })
                .map_err(NodeError::from)
        }
    };

    match confirmation {
        Ok(frame) => node.sessions.send_to(session_id, frame),
        Err(e) => {
            node.sessions.send_to(
                session_id,
                ServerFrame::MessageError { room_id, error: e.to_string(), error_code: e.code() },
            );
        }
    }
}
