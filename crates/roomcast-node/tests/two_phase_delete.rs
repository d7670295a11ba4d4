//! Integration tests for distributed room deletion over real loopback RPC.

use std::sync::Arc;

use roomcast_node::{deletion, rpc, state::RoomLifecycle, Node, NodeConfig};
use roomcast_proto::{ErrorCode, ServerFrame};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

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

/// Start a participant node serving RPC on an ephemeral port.
async fn start_participant(node_id: &str) -> (Arc<Node>, String, CancellationToken) {
    let node = Node::new(config(node_id, String::new()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let shutdown = CancellationToken::new();
    tokio::spawn(rpc::serve(node.clone(), listener, shutdown.clone()));
    (node, addr, shutdown)
}

/// Reserve a loopback address nothing listens on.
async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

#[tokio::test]
async fn happy_path_commits_on_coordinator_and_participants() {
    let (p2, addr2, _s2) = start_participant("node2").await;
    let (p3, addr3, _s3) = start_participant("node3").await;

    let coordinator =
        Node::new(config("node1", format!("node2={addr2},node3={addr3}")));
    let room_id = {
        let mut state = coordinator.state.lock().await;
        state.create_room("room-r", "alice", None).map(|r| r.room_id).unwrap()
    };

    let frame = deletion::run(&coordinator, 1, room_id, "alice").await;
    match frame {
        ServerFrame::DeleteRoomSuccess { room_id: deleted, .. } => assert_eq!(deleted, room_id),
        other => panic!("expected delete_room_success, got {other:?}"),
    }

    // The room is gone on the coordinator and no participant holds residue.
    assert!(coordinator.state.lock().await.room(room_id).is_none());
    assert_eq!(p2.state.lock().await.prepared_transaction_count(), 0);
    assert_eq!(p3.state.lock().await.prepared_transaction_count(), 0);
}

#[tokio::test]
async fn unreachable_participant_aborts_and_rolls_back() {
    let (p2, addr2, _s2) = start_participant("node2").await;
    let dead = dead_address().await;

    let coordinator = Node::new(config("node1", format!("node2={addr2},node3={dead}")));
    let room_id = {
        let mut state = coordinator.state.lock().await;
        state.create_room("room-r", "alice", None).map(|r| r.room_id).unwrap()
    };

    let frame = deletion::run(&coordinator, 1, room_id, "alice").await;
    match frame {
        ServerFrame::DeleteRoomFailed { error_code, reason, .. } => {
            assert_eq!(error_code, ErrorCode::DeletionFailed);
            assert!(
                reason.contains("unreachable") || reason.contains("timed out"),
                "unexpected abort reason: {reason}"
            );
        }
        other => panic!("expected delete_room_failed, got {other:?}"),
    }

    // The room survives, back in active service.
    let state = coordinator.state.lock().await;
    assert_eq!(state.room(room_id).map(|r| r.state), Some(RoomLifecycle::Active));
    assert!(state.can_operate_on_room(room_id));
    drop(state);

    // The reachable participant was rolled back and holds no residue.
    assert_eq!(p2.state.lock().await.prepared_transaction_count(), 0);
}

#[tokio::test]
async fn only_the_creator_may_delete() {
    let coordinator = Node::new(config("node1", String::new()));
    let room_id = {
        let mut state = coordinator.state.lock().await;
        state.create_room("room-r", "alice", None).map(|r| r.room_id).unwrap()
    };

    let frame = deletion::run(&coordinator, 1, room_id, "bob").await;
    match frame {
        ServerFrame::DeleteRoomFailed { error_code, transaction_id, .. } => {
            assert_eq!(error_code, ErrorCode::Unauthorized);
            assert!(transaction_id.is_none(), "no transaction should have started");
        }
        other => panic!("expected delete_room_failed, got {other:?}"),
    }

    // Untouched and fully operational.
    let state = coordinator.state.lock().await;
    assert_eq!(state.room(room_id).map(|r| r.state), Some(RoomLifecycle::Active));
}

#[tokio::test]
async fn concurrent_deletion_attempt_is_rejected_in_invalid_state() {
    let coordinator = Node::new(config("node1", String::new()));
    let room_id = {
        let mut state = coordinator.state.lock().await;
        let room_id = state.create_room("room-r", "alice", None).map(|r| r.room_id).unwrap();
        // Simulate a deletion already in flight.
        state.start_deletion_transaction(room_id, Vec::new()).unwrap();
        room_id
    };

    let frame = deletion::run(&coordinator, 1, room_id, "alice").await;
    match frame {
        ServerFrame::DeleteRoomFailed { error_code, .. } => {
            assert_eq!(error_code, ErrorCode::InvalidState);
        }
        other => panic!("expected delete_room_failed, got {other:?}"),
    }
}

#[tokio::test]
async fn commit_notifies_participant_subscribers_without_a_room_copy() {
    // A participant never holds a copy of a remotely-administered room (it
    // READYs unknown rooms during PREPARE), but clients connected to it
    // may be subscribed via the remote owner. Commit must still tell them.
    let (participant, addr, _shutdown) = start_participant("node2").await;
    let room_id = uuid::Uuid::new_v4();
    let transaction_id = uuid::Uuid::new_v4();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    participant.sessions.register(7, tx);
    participant.sessions.subscribe(7, room_id, "bob", Some("node1".into()));

    let prepare = roomcast_proto::RpcRequest::PrepareDeleteRoom {
        room_id,
        transaction_id,
        coordinator_node_id: "node1".to_string(),
    };
    rpc::call(&addr, &prepare).await.unwrap();

    let commit = roomcast_proto::RpcRequest::CommitDeleteRoom { room_id, transaction_id };
    rpc::call(&addr, &commit).await.unwrap();

    match rx.recv().await {
        Some(ServerFrame::RoomDeleted { room_id: r, transaction_id: txn, .. }) => {
            assert_eq!(r, room_id);
            assert_eq!(txn, Some(transaction_id));
        }
        other => panic!("expected room_deleted, got {other:?}"),
    }
    // The subscription went with the room.
    assert_eq!(participant.sessions.room_session_count(room_id), 0);
}

#[tokio::test]
async fn happy_path_notifies_members_on_participant_nodes() {
    let (participant, addr2, _s2) = start_participant("node2").await;

    let coordinator = Node::new(config("node1", format!("node2={addr2}")));
    let room_id = {
        let mut state = coordinator.state.lock().await;
        state.create_room("room-r", "alice", None).map(|r| r.room_id).unwrap()
    };

    // A client on the participant node, subscribed through the owner.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    participant.sessions.register(1, tx);
    participant.sessions.subscribe(1, room_id, "bob", Some("node1".into()));

    let frame = deletion::run(&coordinator, 1, room_id, "alice").await;
    assert!(matches!(frame, ServerFrame::DeleteRoomSuccess { .. }));

    match rx.recv().await {
        Some(ServerFrame::RoomDeleted { room_id: r, .. }) => assert_eq!(r, room_id),
        other => panic!("expected room_deleted on the participant, got {other:?}"),
    }
}

#[tokio::test]
async fn deletion_with_no_peers_commits_locally() {
    let coordinator = Node::new(config("node1", String::new()));
    let room_id = {
        let mut state = coordinator.state.lock().await;
        state.create_room("solo", "alice", None).map(|r| r.room_id).unwrap()
    };

    let frame = deletion::run(&coordinator, 1, room_id, "alice").await;
    assert!(matches!(frame, ServerFrame::DeleteRoomSuccess { .. }));
    assert!(coordinator.state.lock().await.room(room_id).is_none());
}
