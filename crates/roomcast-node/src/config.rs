//! Node configuration.
//!
//! Every flag also binds an environment variable so deployments can be
//! driven entirely from the environment. The peer set is fixed at startup;
//! there is no dynamic discovery.

use std::{collections::HashMap, time::Duration};

use clap::Parser;
use thiserror::Error;

/// Seconds between heartbeat rounds.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Per-call deadline for a heartbeat RPC.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);

/// Consecutive heartbeat misses before a peer is considered failed.
pub const MAX_HEARTBEAT_FAILURES: u32 = 2;

/// Inactivity window after which a member is considered stale.
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(900);

/// Seconds between stale-member sweeps.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Deadline for the 2PC PREPARE phase. A participant that does not answer
/// in time counts as an ABORT vote.
pub const PREPARE_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for the 2PC COMMIT phase. Failures here are logged, not fatal.
pub const COMMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-peer deadline for room discovery.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Deadline for forwarding join/leave/send operations to a room's
/// administrator node.
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-room message buffer capacity on the admin node. Older messages are
/// trimmed from the head and are never replayed.
pub const MESSAGE_BUFFER_CAP: usize = 100;

/// Startup configuration for a node.
#[derive(Parser, Debug, Clone)]
#[command(name = "roomcast-node")]
#[command(about = "Distributed chat room node")]
#[command(version)]
pub struct NodeConfig {
    /// Unique identifier of this node within the fleet.
    #[arg(long, env = "NODE_ID")]
    pub node_id: String,

    /// Bind address for the client-facing WebSocket endpoint.
    #[arg(long, env = "ROOMCAST_CLIENT_BIND", default_value = "0.0.0.0:8080")]
    pub client_bind: String,

    /// Bind address for the inter-node RPC endpoint.
    #[arg(long, env = "ROOMCAST_RPC_BIND", default_value = "0.0.0.0:9090")]
    pub rpc_bind: String,

    /// Address peers should use to reach this node's RPC endpoint.
    #[arg(long, env = "ROOMCAST_RPC_ADVERTISE")]
    pub rpc_advertise: String,

    /// Peer list as comma-separated `node_id=host:port` pairs.
    #[arg(long, env = "ROOMCAST_PEERS", default_value = "")]
    pub peers: String,

    /// Log level when `RUST_LOG` is unset (trace, debug, info, warn, error).
    #[arg(long, env = "ROOMCAST_LOG", default_value = "info")]
    pub log_level: String,
}

/// Configuration parse failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A peer entry was not of the form `node_id=address`.
    #[error("invalid peer entry '{0}', expected node_id=host:port")]
    InvalidPeerEntry(String),
    /// The same peer id appeared twice.
    #[error("duplicate peer id '{0}'")]
    DuplicatePeer(String),
    /// The local node id appeared in the peer list.
    #[error("peer list contains this node's own id '{0}'")]
    SelfPeer(String),
}

impl NodeConfig {
    /// Parse the peer list into a map, or exit-worthy error.
    pub fn parse_peers(&self) -> Result<HashMap<String, String>, ConfigError> {
        parse_peer_list(&self.peers, &self.node_id)
    }

    /// Parsed peer map, dropping malformed entries with a warning. Used at
    /// wiring time after [`NodeConfig::parse_peers`] has already validated
    /// the list.
    pub fn peer_map(&self) -> HashMap<String, String> {
        self.parse_peers().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring malformed peer list");
            HashMap::new()
        })
    }
}

/// Parse `node2=host:port,node3=host:port` into a map.
pub fn parse_peer_list(
    raw: &str,
    own_id: &str,
) -> Result<HashMap<String, String>, ConfigError> {
    let mut peers = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (id, addr) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidPeerEntry(entry.to_string()))?;
        let (id, addr) = (id.trim(), addr.trim());
        if id.is_empty() || addr.is_empty() {
            return Err(ConfigError::InvalidPeerEntry(entry.to_string()));
        }
        if id == own_id {
            return Err(ConfigError::SelfPeer(id.to_string()));
        }
        if peers.insert(id.to_string(), addr.to_string()).is_some() {
            return Err(ConfigError::DuplicatePeer(id.to_string()));
        }
    }
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_peer_list() {
        let peers = parse_peer_list("node2=127.0.0.1:9092, node3=127.0.0.1:9093", "node1").unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers["node2"], "127.0.0.1:9092");
        assert_eq!(peers["node3"], "127.0.0.1:9093");
    }

    #[test]
    fn empty_peer_list_is_ok() {
        let peers = parse_peer_list("", "node1").unwrap();
        assert!(peers.is_empty());
    }

    #[test]
    fn rejects_malformed_entry() {
        assert!(matches!(
            parse_peer_list("node2:9092", "node1"),
            Err(ConfigError::InvalidPeerEntry(_))
        ));
    }

    #[test]
    fn rejects_duplicate_peer() {
        assert!(matches!(
            parse_peer_list("node2=a:1,node2=b:2", "node1"),
            Err(ConfigError::DuplicatePeer(_))
        ));
    }

    #[test]
    fn rejects_self_in_peer_list() {
        assert!(matches!(
            parse_peer_list("node1=127.0.0.1:9091", "node1"),
            Err(ConfigError::SelfPeer(_))
        ));
    }
}
