//! Peer node registry and parallel fan-out.
//!
//! The peer set is supplied at startup and immutable afterwards; there is no
//! dynamic discovery. All outbound inter-node calls go through this module
//! so deadlines and error classification live in one place.

use std::{collections::HashMap, time::Duration};

use futures_util::future::join_all;
use roomcast_proto::{
    ErrorCode, HostedRoomsResult, RoomSummary, RpcReply, RpcRequest,
};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{config::DISCOVERY_TIMEOUT, rpc};

/// Errors from calling a peer.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The node id is not in the startup peer set.
    #[error("unknown peer '{0}'")]
    UnknownPeer(String),
    /// The call did not complete within its deadline.
    #[error("call to peer timed out")]
    Timeout,
    /// Connection or framing failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The peer answered with a typed error.
    #[error("{error}")]
    Remote {
        /// Stable error code from the peer.
        code: ErrorCode,
        /// Human-readable description from the peer.
        error: String,
    },
}

/// Aggregated result of a global room discovery sweep.
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    /// Local and peer rooms, merged. Unreachable peers contribute nothing.
    pub rooms: Vec<RoomSummary>,
    /// All nodes asked, this node first.
    pub nodes_queried: Vec<String>,
    /// Nodes that answered in time.
    pub nodes_available: Vec<String>,
    /// Nodes that did not.
    pub nodes_unavailable: Vec<String>,
}

/// Immutable `node_id → RPC address` map with concurrent call helpers.
#[derive(Debug)]
pub struct PeerRegistry {
    node_id: String,
    peers: HashMap<String, String>,
}

impl PeerRegistry {
    /// Build the registry from the startup peer map.
    pub fn new(node_id: impl Into<String>, peers: HashMap<String, String>) -> Self {
        let node_id = node_id.into();
        for (peer, addr) in &peers {
            tracing::info!(%peer, %addr, "registered peer node");
        }
        Self { node_id, peers }
    }

    /// This node's identifier.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Address of a peer, if known.
    pub fn get(&self, node_id: &str) -> Option<&str> {
        self.peers.get(node_id).map(String::as_str)
    }

    /// All peers as `(node_id, address)` pairs.
    pub fn list(&self) -> impl Iterator<Item = (&str, &str)> {
        self.peers.iter().map(|(id, addr)| (id.as_str(), addr.as_str()))
    }

    /// All peer ids.
    pub fn peer_ids(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True when no peers are registered.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Call one peer with a per-call deadline and decode the typed result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        node_id: &str,
        request: &RpcRequest,
        deadline: Duration,
    ) -> Result<T, PeerError> {
        let reply = self.call_raw(node_id, request, deadline).await?;
        reply.into_result().map_err(|(code, error)| PeerError::Remote { code, error })
    }

    /// Call one peer with a per-call deadline, returning the raw reply.
    pub async fn call_raw(
        &self,
        node_id: &str,
        request: &RpcRequest,
        deadline: Duration,
    ) -> Result<RpcReply, PeerError> {
        let addr = self
            .get(node_id)
            .ok_or_else(|| PeerError::UnknownPeer(node_id.to_string()))?;

        match tokio::time::timeout(deadline, rpc::call(addr, request)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(PeerError::Transport(e.to_string())),
            Err(_) => Err(PeerError::Timeout),
        }
    }

    /// Invoke the same request on many peers concurrently under a shared
    /// deadline. Returns one `(node_id, result)` entry per requested peer,
    /// in input order; individual failures never fail the batch.
    pub async fn fan_out<T: DeserializeOwned>(
        &self,
        peers: &[String],
        request: &RpcRequest,
        deadline: Duration,
    ) -> Vec<(String, Result<T, PeerError>)> {
        let calls = peers.iter().map(|peer| async move {
            let result = self.call::<T>(peer, request, deadline).await;
            if let Err(e) = &result {
                tracing::debug!(%peer, method = request.method_name(), error = %e, "peer call failed");
            }
            (peer.clone(), result)
        });
        join_all(calls).await
    }

    /// Ask every peer for its hosted rooms and merge with the local list.
    /// Unreachable peers are reported, not fatal.
    pub async fn discover_global_rooms(&self, local_rooms: Vec<RoomSummary>) -> DiscoveryResult {
        let mut rooms = local_rooms;
        let mut nodes_queried = vec![self.node_id.clone()];
        let mut nodes_available = vec![self.node_id.clone()];
        let mut nodes_unavailable = Vec::new();

        let peer_ids = self.peer_ids();
        let results = self
            .fan_out::<HostedRoomsResult>(&peer_ids, &RpcRequest::GetHostedRooms, DISCOVERY_TIMEOUT)
            .await;

        for (peer, result) in results {
            nodes_queried.push(peer.clone());
            match result {
                Ok(hosted) => {
                    rooms.extend(hosted.rooms);
                    nodes_available.push(peer);
                }
                Err(e) => {
                    tracing::warn!(%peer, error = %e, "room discovery failed for peer");
                    nodes_unavailable.push(peer);
                }
            }
        }

        tracing::info!(
            total = rooms.len(),
            available = nodes_available.len(),
            unavailable = nodes_unavailable.len(),
            "global room discovery complete"
        );

        DiscoveryResult { rooms, nodes_queried, nodes_available, nodes_unavailable }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PeerRegistry {
        let peers = HashMap::from([
            ("node2".to_string(), "127.0.0.1:1".to_string()),
            ("node3".to_string(), "127.0.0.1:2".to_string()),
        ]);
        PeerRegistry::new("node1", peers)
    }

    #[test]
    fn lookup_known_and_unknown_peers() {
        let peers = registry();
        assert_eq!(peers.get("node2"), Some("127.0.0.1:1"));
        assert_eq!(peers.get("node9"), None);
        assert_eq!(peers.len(), 2);
    }

    #[tokio::test]
    async fn call_to_unknown_peer_is_sentinel_error() {
        let peers = registry();
        let result = peers
            .call_raw("node9", &RpcRequest::Heartbeat, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(PeerError::UnknownPeer(id)) if id == "node9"));
    }

    #[tokio::test]
    async fn discovery_reports_unreachable_peers() {
        // Nothing listens on the registered addresses, so both peers fail;
        // the local list still comes back and nothing errors out.
        let peers = registry();
        let result = peers.discover_global_rooms(Vec::new()).await;
        assert!(result.rooms.is_empty());
        assert_eq!(result.nodes_queried.len(), 3);
        assert_eq!(result.nodes_available, vec!["node1".to_string()]);
        assert_eq!(result.nodes_unavailable.len(), 2);
    }
}
