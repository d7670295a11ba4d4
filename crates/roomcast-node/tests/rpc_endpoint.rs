//! Integration tests for the inter-node RPC endpoint over real loopback
//! sockets.

use std::sync::Arc;

use roomcast_node::{rpc, Node, NodeConfig};
use roomcast_proto::{
    ErrorCode, ForwardMessageResult, HeartbeatResult, HostedRoomsResult, JoinRoomResult,
    LeaveRoomResult, RpcReply, RpcRequest,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn config(node_id: &str, peers: String) -> NodeConfig {
    NodeConfig {
        node_id: node_id.to_string(),
        client_bind: "127.0.0.1:0".to_string(),
        rpc_bind: "127.0.0.1:0".to_string(),
        rpc_advertise: format!("{node_id}.test:9090"),
        peers,
        log_level: "warn".to_string(),
    }
}

/// Start a node's RPC endpoint on an ephemeral loopback port.
async fn start_node(node_id: &str) -> (Arc<Node>, String, CancellationToken) {
    let node = Node::new(config(node_id, String::new()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let shutdown = CancellationToken::new();
    tokio::spawn(rpc::serve(node.clone(), listener, shutdown.clone()));
    (node, addr, shutdown)
}

async fn call_ok<T: serde::de::DeserializeOwned>(addr: &str, request: &RpcRequest) -> T {
    let reply = rpc::call(addr, request).await.unwrap();
    reply.into_result().unwrap()
}

#[tokio::test]
async fn heartbeat_answers_with_node_id() {
    let (_node, addr, _shutdown) = start_node("node1").await;

    let result: HeartbeatResult = call_ok(&addr, &RpcRequest::Heartbeat).await;
    assert_eq!(result.status, "ok");
    assert_eq!(result.node_id, "node1");
}

#[tokio::test]
async fn hosted_rooms_are_annotated_with_address() {
    let (node, addr, _shutdown) = start_node("node1").await;
    node.state.lock().await.create_room("general", "alice", None).unwrap();

    let result: HostedRoomsResult = call_ok(&addr, &RpcRequest::GetHostedRooms).await;
    assert_eq!(result.rooms.len(), 1);
    assert_eq!(result.rooms[0].room_name, "general");
    assert_eq!(result.rooms[0].node_address.as_deref(), Some("node1.test:9090"));
}

#[tokio::test]
async fn join_is_idempotent_and_returns_catchup() {
    let (node, addr, _shutdown) = start_node("node1").await;
    let room_id = {
        let mut state = node.state.lock().await;
        let room_id = state.create_room("general", "alice", None).map(|r| r.room_id).unwrap();
        state.add_member(room_id, "alice", "node1").unwrap();
        state.add_message(room_id, "alice", "hello").unwrap();
        state.add_message(room_id, "alice", "again").unwrap();
        room_id
    };

    let join = RpcRequest::JoinRoom {
        room_id,
        username: "bob".to_string(),
        source_node_id: "node2".to_string(),
    };
    let first: JoinRoomResult = call_ok(&addr, &join).await;
    assert!(!first.already_member);
    assert_eq!(first.room.member_count, 2);
    // Catch-up carries the buffered history in sequence order.
    let sequences: Vec<u64> = first.messages.iter().map(|m| m.sequence_number).collect();
    assert_eq!(sequences, vec![1, 2]);

    let second: JoinRoomResult = call_ok(&addr, &join).await;
    assert!(second.already_member);
    assert_eq!(second.room.member_count, 2);
}

#[tokio::test]
async fn forwarded_messages_are_sequenced_in_call_order() {
    let (node, addr, _shutdown) = start_node("node1").await;
    let room_id = {
        let mut state = node.state.lock().await;
        let room_id = state.create_room("general", "alice", None).map(|r| r.room_id).unwrap();
        state.add_member(room_id, "bob", "node2").unwrap();
        room_id
    };

    for expected in 1..=3_u64 {
        let result: ForwardMessageResult = call_ok(
            &addr,
            &RpcRequest::ForwardMessage {
                room_id,
                username: "bob".to_string(),
                content: format!("msg-{expected}"),
                source_node_id: "node2".to_string(),
            },
        )
        .await;
        assert_eq!(result.sequence_number, expected);
    }
}

#[tokio::test]
async fn forward_from_non_member_is_rejected() {
    let (node, addr, _shutdown) = start_node("node1").await;
    let room_id = {
        let mut state = node.state.lock().await;
        state.create_room("general", "alice", None).map(|r| r.room_id).unwrap()
    };

    let reply = rpc::call(
        &addr,
        &RpcRequest::ForwardMessage {
            room_id,
            username: "mallory".to_string(),
            content: "hi".to_string(),
            source_node_id: "node2".to_string(),
        },
    )
    .await
    .unwrap();

    match reply {
        RpcReply::Err { code, .. } => assert_eq!(code, ErrorCode::NotMember),
        RpcReply::Ok { .. } => panic!("expected NOT_MEMBER rejection"),
    }
}

#[tokio::test]
async fn forward_validates_content_uniformly() {
    let (node, addr, _shutdown) = start_node("node1").await;
    let room_id = {
        let mut state = node.state.lock().await;
        let room_id = state.create_room("general", "alice", None).map(|r| r.room_id).unwrap();
        state.add_member(room_id, "bob", "node2").unwrap();
        room_id
    };

    let send = |content: String| RpcRequest::ForwardMessage {
        room_id,
        username: "bob".to_string(),
        content,
        source_node_id: "node2".to_string(),
    };

    // Empty and oversized are rejected without touching the sequencer.
    for bad in ["".to_string(), "a".repeat(5001)] {
        let reply = rpc::call(&addr, &send(bad)).await.unwrap();
        match reply {
            RpcReply::Err { code, .. } => assert_eq!(code, ErrorCode::InvalidContent),
            RpcReply::Ok { .. } => panic!("expected INVALID_CONTENT rejection"),
        }
    }

    // Exactly at the limit is accepted and gets sequence 1.
    let result: ForwardMessageResult = call_ok(&addr, &send("a".repeat(5000))).await;
    assert_eq!(result.sequence_number, 1);
}

#[tokio::test]
async fn unknown_room_is_room_not_found() {
    let (_node, addr, _shutdown) = start_node("node1").await;

    let reply = rpc::call(
        &addr,
        &RpcRequest::ForwardMessage {
            room_id: Uuid::new_v4(),
            username: "bob".to_string(),
            content: "hi".to_string(),
            source_node_id: "node2".to_string(),
        },
    )
    .await
    .unwrap();

    match reply {
        RpcReply::Err { code, .. } => assert_eq!(code, ErrorCode::RoomNotFound),
        RpcReply::Ok { .. } => panic!("expected ROOM_NOT_FOUND rejection"),
    }
}

#[tokio::test]
async fn leave_and_disconnect_are_idempotent() {
    let (node, addr, _shutdown) = start_node("node1").await;
    let room_id = {
        let mut state = node.state.lock().await;
        let room_id = state.create_room("general", "alice", None).map(|r| r.room_id).unwrap();
        state.add_member(room_id, "bob", "node2").unwrap();
        room_id
    };

    let leave = RpcRequest::LeaveRoom {
        room_id,
        username: "bob".to_string(),
        source_node_id: "node2".to_string(),
    };
    let first: LeaveRoomResult = call_ok(&addr, &leave).await;
    assert!(first.removed);
    assert_eq!(first.member_count, 0);

    let second: LeaveRoomResult = call_ok(&addr, &leave).await;
    assert!(!second.removed);

    // A disconnect notification for a long-gone member is harmless too.
    let notify = RpcRequest::NotifyMemberDisconnect {
        room_id,
        username: "bob".to_string(),
        source_node_id: "node2".to_string(),
        reason: "User disconnected".to_string(),
    };
    let third: LeaveRoomResult = call_ok(&addr, &notify).await;
    assert!(!third.removed);
}

#[tokio::test]
async fn malformed_request_line_gets_typed_error() {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{Framed, LinesCodec};

    let (_node, addr, _shutdown) = start_node("node1").await;
    let stream = tokio::net::TcpStream::connect(&addr).await.unwrap();
    let mut framed = Framed::new(stream, LinesCodec::new());

    framed.send("this is not json").await.unwrap();
    let line = framed.next().await.unwrap().unwrap();
    let reply: RpcReply = serde_json::from_str(&line).unwrap();
    match reply {
        RpcReply::Err { code, .. } => assert_eq!(code, ErrorCode::InvalidRequest),
        RpcReply::Ok { .. } => panic!("expected INVALID_REQUEST"),
    }
}
