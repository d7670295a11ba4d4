//! Integration tests for heartbeat-driven node failure eviction.

use std::sync::Arc;

use roomcast_node::{detector, rpc, Node, NodeConfig};
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

async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

#[tokio::test]
async fn repeated_heartbeat_misses_evict_remote_members() {
    let dead = dead_address().await;
    let admin = Node::new(config("node1", format!("node2={dead}")));

    let room_id = {
        let mut state = admin.state.lock().await;
        let room_id = state.create_room("general", "alice", None).map(|r| r.room_id).unwrap();
        state.add_member(room_id, "alice", "node1").unwrap();
        state.add_member(room_id, "bob", "node2").unwrap();
        room_id
    };

    // First miss only degrades the node; membership is untouched.
    detector::heartbeat_round(&admin).await;
    assert!(admin.state.lock().await.room(room_id).unwrap().members.contains("bob"));

    // Second consecutive miss crosses the threshold and evicts.
    detector::heartbeat_round(&admin).await;
    let state = admin.state.lock().await;
    let room = state.room(room_id).unwrap();
    assert!(!room.members.contains("bob"));
    assert!(room.members.contains("alice"));
    assert_eq!(room.members.len(), 1);
}

#[tokio::test]
async fn healthy_peer_is_not_evicted() {
    // A live peer node answering heartbeats.
    let peer = Node::new(config("node2", String::new()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let shutdown = CancellationToken::new();
    tokio::spawn(rpc::serve(Arc::clone(&peer), listener, shutdown.clone()));

    let admin = Node::new(config("node1", format!("node2={addr}")));
    let room_id = {
        let mut state = admin.state.lock().await;
        let room_id = state.create_room("general", "alice", None).map(|r| r.room_id).unwrap();
        state.add_member(room_id, "bob", "node2").unwrap();
        room_id
    };

    for _ in 0..3 {
        detector::heartbeat_round(&admin).await;
    }
    assert!(admin.state.lock().await.room(room_id).unwrap().members.contains("bob"));
}

#[tokio::test]
async fn recovered_peer_resets_failure_count() {
    // Bind a listener but only start serving after the first miss.
    let dead = dead_address().await;
    let admin = Node::new(config("node1", format!("node2={dead}")));
    let room_id = {
        let mut state = admin.state.lock().await;
        let room_id = state.create_room("general", "alice", None).map(|r| r.room_id).unwrap();
        state.add_member(room_id, "bob", "node2").unwrap();
        room_id
    };

    detector::heartbeat_round(&admin).await;

    // The peer comes back on the same address before the second round.
    let listener = TcpListener::bind(dead.clone()).await.unwrap();
    let peer = Node::new(config("node2", String::new()));
    let shutdown = CancellationToken::new();
    tokio::spawn(rpc::serve(peer, listener, shutdown.clone()));

    detector::heartbeat_round(&admin).await;
    // Success cleared the failure count; a later single miss must not evict.
    shutdown.cancel();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    detector::heartbeat_round(&admin).await;

    assert!(admin.state.lock().await.room(room_id).unwrap().members.contains("bob"));
}

#[tokio::test]
async fn eviction_only_touches_the_failed_node() {
    let dead = dead_address().await;
    let live_peer = Node::new(config("node3", String::new()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live_addr = listener.local_addr().unwrap().to_string();
    let shutdown = CancellationToken::new();
    tokio::spawn(rpc::serve(live_peer, listener, shutdown.clone()));

    let admin = Node::new(config("node1", format!("node2={dead},node3={live_addr}")));
    let room_id = {
        let mut state = admin.state.lock().await;
        let room_id = state.create_room("general", "alice", None).map(|r| r.room_id).unwrap();
        state.add_member(room_id, "bob", "node2").unwrap();
        state.add_member(room_id, "carol", "node3").unwrap();
        room_id
    };

    detector::heartbeat_round(&admin).await;
    detector::heartbeat_round(&admin).await;

    let state = admin.state.lock().await;
    let room = state.room(room_id).unwrap();
    assert!(!room.members.contains("bob"));
    assert!(room.members.contains("carol"));
}
