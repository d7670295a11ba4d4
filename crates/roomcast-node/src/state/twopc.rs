//! Two-phase-commit transaction records for distributed room deletion.
//!
//! The coordinator (the room's administrator node) tracks a
//! [`DeletionTransaction`] per in-flight deletion; every participant that
//! voted READY tracks a [`PreparedTransaction`] until it learns the outcome.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use roomcast_proto::Vote;
use uuid::Uuid;

/// Coordinator-side transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Collecting votes.
    Prepare,
    /// All votes READY; instructing participants to commit.
    Commit,
    /// At least one ABORT or timeout; instructing participants to roll back.
    Rollback,
    /// Terminal. The record is removed once reached.
    Completed,
}

/// A deletion transaction tracked by the coordinator.
#[derive(Debug, Clone)]
pub struct DeletionTransaction {
    /// Transaction identifier.
    pub transaction_id: Uuid,
    /// Room being deleted.
    pub room_id: Uuid,
    /// Current phase.
    pub state: TransactionState,
    /// Participant node ids.
    pub participants: Vec<String>,
    /// Votes collected so far; `None` until a participant answers.
    pub votes: HashMap<String, Option<Vote>>,
    /// When the transaction started.
    pub start_time: DateTime<Utc>,
}

impl DeletionTransaction {
    /// Open a transaction in the PREPARE phase with empty votes.
    pub fn new(transaction_id: Uuid, room_id: Uuid, participants: Vec<String>) -> Self {
        let votes = participants.iter().map(|p| (p.clone(), None)).collect();
        Self {
            transaction_id,
            room_id,
            state: TransactionState::Prepare,
            participants,
            votes,
            start_time: Utc::now(),
        }
    }

    /// True when every participant has voted READY.
    pub fn all_votes_ready(&self) -> bool {
        self.votes.values().all(|v| *v == Some(Vote::Ready))
    }

    /// True when every participant has voted, either way.
    pub fn all_votes_received(&self) -> bool {
        self.votes.values().all(Option::is_some)
    }
}

/// A READY vote remembered by a participant.
///
/// Removed on COMMIT or ROLLBACK. If the coordinator crashes between
/// PREPARE and its decision, the record lingers and the room stays in
/// `DELETION_PENDING`; this blocking behavior is inherent to 2PC and is
/// accepted here (volatile state clears it on restart).
#[derive(Debug, Clone)]
pub struct PreparedTransaction {
    /// Transaction identifier.
    pub transaction_id: Uuid,
    /// Room being deleted.
    pub room_id: Uuid,
    /// Coordinating node.
    pub coordinator_node_id: String,
    /// The vote this node cast (always READY; ABORT votes are not tracked).
    pub vote: Vote,
    /// When the vote was cast.
    pub prepared_at: DateTime<Utc>,
}

impl PreparedTransaction {
    /// Record a READY vote for a transaction.
    pub fn ready(transaction_id: Uuid, room_id: Uuid, coordinator_node_id: impl Into<String>) -> Self {
        Self {
            transaction_id,
            room_id,
            coordinator_node_id: coordinator_node_id.into(),
            vote: Vote::Ready,
            prepared_at: Utc::now(),
        }
    }
}
