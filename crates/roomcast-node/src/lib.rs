//! Distributed chat room runtime for a single node.
//!
//! Each node serves two sockets: a WebSocket endpoint for client sessions
//! and a TCP endpoint for synchronous inter-node RPC. Every room is owned by
//! exactly one administrator node which totally orders the room's messages
//! and coordinates membership; requests for remotely-owned rooms are
//! forwarded to the owner over RPC.
//!
//! # Components
//!
//! - [`state::RoomStateManager`]: single authority on rooms, membership, the
//!   per-room sequencer, 2PC tables, and node health
//! - [`peers::PeerRegistry`]: immutable peer map plus parallel fan-out
//! - [`rpc`]: inter-node RPC endpoint and caller
//! - [`ws`]: client endpoint (sessions, dispatch, subscription bookkeeping)
//! - [`deletion`]: two-phase-commit room deletion coordinator
//! - [`detector`]: heartbeat monitor and stale-member sweeper
//!
//! # Concurrency
//!
//! All room-state mutation flows through a single `tokio::sync::Mutex`
//! around the state manager; no lock is ever held across an await, and peer
//! broadcasts are issued strictly after the mutation returns. This gives a
//! total order for operations on any one room.

pub mod broadcast;
pub mod config;
pub mod deletion;
pub mod detector;
mod error;
pub mod ops;
pub mod peers;
pub mod rpc;
pub mod sessions;
pub mod state;
pub mod ws;

use std::sync::Arc;

pub use config::NodeConfig;
pub use error::NodeError;
use peers::PeerRegistry;
use sessions::SessionRegistry;
use state::RoomStateManager;
use tokio::sync::Mutex;

/// Top-level handle tying a node's components together.
///
/// Owned by the supervisor in `main` and threaded through endpoint handlers
/// as `Arc<Node>`; nothing in this crate reaches for process-global state.
pub struct Node {
    /// Startup configuration.
    pub config: NodeConfig,
    /// Single authority on room state. Lock, mutate, release; never await
    /// while holding it.
    pub state: Mutex<RoomStateManager>,
    /// Immutable peer map and RPC fan-out helper.
    pub peers: PeerRegistry,
    /// Client session and subscription registry.
    pub sessions: SessionRegistry,
}

impl Node {
    /// Assemble a node from configuration.
    pub fn new(config: NodeConfig) -> Arc<Self> {
        let state = RoomStateManager::new(config.node_id.clone());
        let peers = PeerRegistry::new(config.node_id.clone(), config.peer_map());
        Arc::new(Self { config, state: Mutex::new(state), peers, sessions: SessionRegistry::new() })
    }

    /// This node's identifier.
    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }
}
