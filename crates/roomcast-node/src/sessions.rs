//! Client session and room subscription registry.
//!
//! Maintains bidirectional mappings: room → sessions (for broadcast) and
//! session → rooms (for cleanup on disconnect), plus the username each
//! session joined a room under so teardown can notify the owning node.
//! Delivery is a non-blocking push into each session's outbound channel;
//! the per-session writer task drains it onto the socket.
//!
//! All methods take `&self` over an internal lock and never await, so the
//! registry can be shared freely between the WebSocket endpoint, the RPC
//! endpoint, and the background tasks.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, PoisonError},
};

use roomcast_proto::ServerFrame;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// What a session joined a room as, and where the room lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Username the session joined under.
    pub username: String,
    /// Administrator node when the room is remotely owned; `None` for rooms
    /// administered by this node. Used to route leave/send/disconnect calls
    /// without re-discovery.
    pub owner_node: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Session id → outbound frame channel.
    senders: HashMap<u64, UnboundedSender<ServerFrame>>,
    /// Room id → subscribed session ids.
    room_subscriptions: HashMap<Uuid, HashSet<u64>>,
    /// Session id → (room id → subscription details).
    session_rooms: HashMap<u64, HashMap<Uuid, Subscription>>,
}

/// Registry of live client sessions and their room subscriptions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a session with its outbound channel. Returns false if the
    /// session id is already taken.
    pub fn register(&self, session_id: u64, sender: UnboundedSender<ServerFrame>) -> bool {
        let mut inner = self.lock();
        if inner.senders.contains_key(&session_id) {
            return false;
        }
        inner.senders.insert(session_id, sender);
        inner.session_rooms.insert(session_id, HashMap::new());
        true
    }

    /// Unregister a session, removing all its subscriptions. Returns the
    /// `(room_id, subscription)` pairs the session was joined to, for owner
    /// notification.
    pub fn unregister(&self, session_id: u64) -> Vec<(Uuid, Subscription)> {
        let mut inner = self.lock();
        inner.senders.remove(&session_id);
        let rooms = inner.session_rooms.remove(&session_id).unwrap_or_default();
        for room_id in rooms.keys() {
            if let Some(subscribers) = inner.room_subscriptions.get_mut(room_id) {
                subscribers.remove(&session_id);
                if subscribers.is_empty() {
                    inner.room_subscriptions.remove(room_id);
                }
            }
        }
        rooms.into_iter().collect()
    }

    /// Subscribe a session to a room. `owner_node` is the room's
    /// administrator when it is remotely owned. Returns false if the
    /// session is not registered.
    pub fn subscribe(
        &self,
        session_id: u64,
        room_id: Uuid,
        username: &str,
        owner_node: Option<String>,
    ) -> bool {
        let mut inner = self.lock();
        if !inner.senders.contains_key(&session_id) {
            return false;
        }
        inner.room_subscriptions.entry(room_id).or_default().insert(session_id);
        inner
            .session_rooms
            .entry(session_id)
            .or_default()
            .insert(room_id, Subscription { username: username.to_string(), owner_node });
        true
    }

    /// Subscription details for one session/room pair.
    pub fn subscription(&self, session_id: u64, room_id: Uuid) -> Option<Subscription> {
        self.lock().session_rooms.get(&session_id).and_then(|rooms| rooms.get(&room_id)).cloned()
    }

    /// Unsubscribe a session from a room. Returns true if it was subscribed.
    pub fn unsubscribe(&self, session_id: u64, room_id: Uuid) -> bool {
        let mut inner = self.lock();
        let removed_from_room = inner
            .room_subscriptions
            .get_mut(&room_id)
            .is_some_and(|subscribers| subscribers.remove(&session_id));
        if inner.room_subscriptions.get(&room_id).is_some_and(HashSet::is_empty) {
            inner.room_subscriptions.remove(&room_id);
        }
        let removed_from_session = inner
            .session_rooms
            .get_mut(&session_id)
            .is_some_and(|rooms| rooms.remove(&room_id).is_some());
        removed_from_room && removed_from_session
    }

    /// Check whether a session is subscribed to a room.
    pub fn is_subscribed(&self, session_id: u64, room_id: Uuid) -> bool {
        self.lock()
            .room_subscriptions
            .get(&room_id)
            .is_some_and(|subscribers| subscribers.contains(&session_id))
    }

    /// Send a frame to one session. Delivery is best-effort: a session mid
    /// teardown just drops the frame.
    pub fn send_to(&self, session_id: u64, frame: ServerFrame) {
        let inner = self.lock();
        if let Some(sender) = inner.senders.get(&session_id) {
            if sender.send(frame).is_err() {
                tracing::debug!(session_id, "dropping frame for closing session");
            }
        }
    }

    /// Deliver a frame to every session subscribed to a room.
    pub fn broadcast(&self, room_id: Uuid, frame: &ServerFrame) {
        self.broadcast_except(room_id, None, frame);
    }

    /// Deliver a frame to every subscribed session except one.
    pub fn broadcast_except(&self, room_id: Uuid, except: Option<u64>, frame: &ServerFrame) {
        let inner = self.lock();
        let Some(subscribers) = inner.room_subscriptions.get(&room_id) else {
            return;
        };
        for session_id in subscribers {
            if Some(*session_id) == except {
                continue;
            }
            if let Some(sender) = inner.senders.get(session_id) {
                if sender.send(frame.clone()).is_err() {
                    tracing::debug!(session_id, "dropping broadcast for closing session");
                }
            }
        }
    }

    /// Drop every subscription for a room (used after room deletion).
    pub fn clear_room(&self, room_id: Uuid) {
        let mut inner = self.lock();
        if let Some(subscribers) = inner.room_subscriptions.remove(&room_id) {
            for session_id in subscribers {
                if let Some(rooms) = inner.session_rooms.get_mut(&session_id) {
                    rooms.remove(&room_id);
                }
            }
        }
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.lock().senders.len()
    }

    /// Number of sessions subscribed to a room.
    pub fn room_session_count(&self, room_id: Uuid) -> usize {
        self.lock().room_subscriptions.get(&room_id).map_or(0, HashSet::len)
    }
}
