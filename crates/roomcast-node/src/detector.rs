//! Failure detection: heartbeat monitor and stale-member sweeper.
//!
//! Two cooperative loops on the node's runtime. The heartbeat monitor
//! probes every remote node hosting members of locally-administered rooms;
//! when a node crosses the failure threshold, all of its members are
//! evicted and `member_left` is broadcast with `reason="Node unreachable"`.
//! The sweeper evicts members whose `last_activity` exceeds the inactivity
//! window, with `reason="Connection timeout"`.
//!
//! Both loops are fully error-isolated per iteration: a failing RPC never
//! stops the periodic task. They terminate cooperatively on shutdown.

use std::sync::Arc;

use chrono::Utc;
use roomcast_proto::{HeartbeatResult, MemberEventData, MemberEventKind, RpcRequest};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    broadcast,
    config::{CLEANUP_INTERVAL, HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT, INACTIVITY_TIMEOUT},
    Node,
};

/// Spawn both detector loops. Returned handles complete after `shutdown`
/// is cancelled.
pub fn spawn(node: Arc<Node>, shutdown: CancellationToken) -> (JoinHandle<()>, JoinHandle<()>) {
    let heartbeat = {
        let node = Arc::clone(&node);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tracing::info!("heartbeat monitor started");
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(HEARTBEAT_INTERVAL) => heartbeat_round(&node).await,
                }
            }
            tracing::info!("heartbeat monitor stopped");
        })
    };

    let sweeper = tokio::spawn(async move {
        tracing::info!("stale-member sweeper started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(CLEANUP_INTERVAL) => sweep_round(&node).await,
            }
        }
        tracing::info!("stale-member sweeper stopped");
    });

    (heartbeat, sweeper)
}

/// One heartbeat pass: probe every remote node that hosts members of a
/// locally-administered room, record the outcome, and evict members of any
/// node that has just crossed the failure threshold.
pub async fn heartbeat_round(node: &Node) {
    let targets: Vec<String> = node.state.lock().await.member_nodes().into_iter().collect();
    if targets.is_empty() {
        return;
    }
    tracing::debug!(targets = targets.len(), "heartbeat round");

    let results = node
        .peers
        .fan_out::<HeartbeatResult>(&targets, &RpcRequest::Heartbeat, HEARTBEAT_TIMEOUT)
        .await;

    for (peer, result) in results {
        match result {
            Ok(_) => {
                node.state.lock().await.record_node_heartbeat_success(&peer);
            }
            Err(e) => {
                tracing::debug!(%peer, error = %e, "heartbeat failed");
                let failed_now = node.state.lock().await.record_node_heartbeat_failure(&peer);
                if failed_now {
                    evict_failed_node(node, &peer).await;
                }
            }
        }
    }
}

/// Evict every member hosted by a failed node and broadcast their
/// departures locally and to every other peer.
pub async fn evict_failed_node(node: &Node, failed_peer: &str) {
    let events: Vec<MemberEventData> = {
        let mut state = node.state.lock().await;
        state
            .remove_all_members_from_node(failed_peer)
            .into_iter()
            .map(|(room_id, username, member_count)| MemberEventData {
                room_id,
                username,
                member_count,
                timestamp: Utc::now(),
                reason: Some("Node unreachable".to_string()),
            })
            .collect()
    };

    for event in &events {
        broadcast::announce_member_event(node, MemberEventKind::MemberLeft, event, Some(failed_peer))
            .await;
    }
}

/// One sweep pass: evict members of locally-administered rooms whose last
/// activity is older than the inactivity window.
pub async fn sweep_round(node: &Node) {
    let events: Vec<MemberEventData> = {
        let mut state = node.state.lock().await;
        let room_ids: Vec<_> = state.list_rooms().into_iter().map(|r| r.room_id).collect();
        let mut events = Vec::new();
        for room_id in room_ids {
            for username in state.get_stale_members(room_id, INACTIVITY_TIMEOUT) {
                match state.remove_member(room_id, &username) {
                    Ok(outcome) if outcome.removed => {
                        tracing::info!(room_id = %room_id, %username, "evicting stale member");
                        events.push(MemberEventData {
                            room_id,
                            username,
                            member_count: outcome.member_count,
                            timestamp: Utc::now(),
                            reason: Some("Connection timeout".to_string()),
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(room_id = %room_id, error = %e, "stale eviction failed");
                    }
                }
            }
        }
        events
    };

    for event in &events {
        broadcast::announce_member_event(node, MemberEventKind::MemberLeft, event, None).await;
    }
}
