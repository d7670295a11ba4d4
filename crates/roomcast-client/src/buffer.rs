//! Message ordering buffer.
//!
//! Broadcast fan-out does not preserve the admin's sequencing over the
//! network; this buffer restores it on the receiving client. Messages are
//! admitted in any order and released strictly by consecutive sequence
//! number, with duplicates (by message id or sequence) dropped.
//!
//! Insertion is a binary search by sequence number; release walks the
//! contiguous prefix. Both the pending buffer and the delivered-id history
//! are bounded so a hostile or badly-gapped stream cannot grow memory
//! without limit.

use std::collections::{HashSet, VecDeque};

use roomcast_proto::MessageData;
use uuid::Uuid;

/// Default cap on buffered out-of-order messages.
pub const DEFAULT_MAX_BUFFERED: usize = 1000;

/// Default cap on remembered delivered message ids.
pub const DEFAULT_MAX_DELIVERED_IDS: usize = 5000;

/// Outcome of offering a message to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Accepted into the pending buffer.
    Admitted,
    /// A message with this id was already seen or delivered.
    DuplicateId,
    /// A pending message already holds this sequence number.
    DuplicateSequence,
    /// The sequence number was already delivered (or is stale).
    Stale,
    /// Sequence numbers are 1-based; 0 is never valid.
    InvalidSequence,
}

/// Per-room buffer restoring the admin's total order.
#[derive(Debug)]
pub struct OrderingBuffer {
    /// Pending messages, sorted ascending by sequence number.
    pending: Vec<MessageData>,
    /// Highest sequence number released so far.
    last_delivered_seq: u64,
    max_buffered: usize,
    max_delivered_ids: usize,
    /// Ids of messages currently pending.
    seen_ids: HashSet<Uuid>,
    /// Ids of messages already released, for duplicate suppression.
    delivered_ids: HashSet<Uuid>,
    /// FIFO order of `delivered_ids` so the set can be capped.
    delivered_order: VecDeque<Uuid>,
}

impl Default for OrderingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderingBuffer {
    /// Buffer with default caps.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_BUFFERED, DEFAULT_MAX_DELIVERED_IDS)
    }

    /// Buffer with explicit caps.
    pub fn with_limits(max_buffered: usize, max_delivered_ids: usize) -> Self {
        Self {
            pending: Vec::new(),
            last_delivered_seq: 0,
            max_buffered,
            max_delivered_ids,
            seen_ids: HashSet::new(),
            delivered_ids: HashSet::new(),
            delivered_order: VecDeque::new(),
        }
    }

    /// Offer a message to the buffer.
    pub fn admit(&mut self, message: MessageData) -> Admission {
        if message.sequence_number == 0 {
            return Admission::InvalidSequence;
        }
        if self.seen_ids.contains(&message.message_id)
            || self.delivered_ids.contains(&message.message_id)
        {
            return Admission::DuplicateId;
        }
        if message.sequence_number <= self.last_delivered_seq {
            return Admission::Stale;
        }

        match self.pending.binary_search_by_key(&message.sequence_number, |m| m.sequence_number) {
            Ok(_) => Admission::DuplicateSequence,
            Err(position) => {
                self.seen_ids.insert(message.message_id);
                self.pending.insert(position, message);
                self.enforce_buffer_limit();
                Admission::Admitted
            }
        }
    }

    /// Release every message that extends the delivered prefix
    /// consecutively, in order. Stops at the first gap.
    pub fn drain_ready(&mut self) -> Vec<MessageData> {
        let mut ready = 0;
        let mut expected = self.last_delivered_seq + 1;
        for message in &self.pending {
            if message.sequence_number != expected {
                break;
            }
            ready += 1;
            expected += 1;
        }
        if ready == 0 {
            return Vec::new();
        }

        let released: Vec<MessageData> = self.pending.drain(..ready).collect();
        self.last_delivered_seq = released[released.len() - 1].sequence_number;
        for message in &released {
            self.seen_ids.remove(&message.message_id);
            if self.delivered_ids.insert(message.message_id) {
                self.delivered_order.push_back(message.message_id);
            }
        }
        self.enforce_delivered_limit();
        released
    }

    /// True when the next expected sequence number has not arrived but
    /// later ones have.
    pub fn has_gap(&self) -> bool {
        self.pending
            .first()
            .is_some_and(|m| m.sequence_number > self.last_delivered_seq + 1)
    }

    /// Sequence numbers expected before the first pending message.
    pub fn missing_sequences(&self) -> Vec<u64> {
        match self.pending.first() {
            Some(first) if first.sequence_number > self.last_delivered_seq + 1 => {
                (self.last_delivered_seq + 1..first.sequence_number).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Number of messages waiting for their predecessors.
    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }

    /// Highest sequence number released so far.
    pub fn last_delivered_seq(&self) -> u64 {
        self.last_delivered_seq
    }

    /// True when nothing has been admitted or delivered yet.
    pub fn is_fresh(&self) -> bool {
        self.last_delivered_seq == 0 && self.pending.is_empty() && self.delivered_ids.is_empty()
    }

    /// Fast-forward the delivered cursor, e.g. when joining a room whose
    /// history starts beyond sequence 1. Only moves forward.
    pub fn set_last_delivered(&mut self, sequence_number: u64) {
        if sequence_number > self.last_delivered_seq {
            self.last_delivered_seq = sequence_number;
        }
    }

    /// Reset all state, e.g. when leaving a room.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.last_delivered_seq = 0;
        self.seen_ids.clear();
        self.delivered_ids.clear();
        self.delivered_order.clear();
    }

    /// Drop oldest pending entries over the cap. Reaching this point means
    /// the gap ahead of them is effectively unbounded.
    fn enforce_buffer_limit(&mut self) {
        while self.pending.len() > self.max_buffered {
            let dropped = self.pending.remove(0);
            self.seen_ids.remove(&dropped.message_id);
            tracing::warn!(
                room_id = %dropped.room_id,
                sequence_number = dropped.sequence_number,
                "ordering buffer overflow, dropping oldest pending message"
            );
        }
    }

    fn enforce_delivered_limit(&mut self) {
        while self.delivered_order.len() > self.max_delivered_ids {
            if let Some(old) = self.delivered_order.pop_front() {
                self.delivered_ids.remove(&old);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn message(seq: u64) -> MessageData {
        MessageData {
            message_id: Uuid::new_v4(),
            room_id: Uuid::nil(),
            username: "alice".into(),
            content: format!("msg-{seq}"),
            sequence_number: seq,
            timestamp: Utc::now(),
        }
    }

    fn sequences(messages: &[MessageData]) -> Vec<u64> {
        messages.iter().map(|m| m.sequence_number).collect()
    }

    #[test]
    fn in_order_stream_flows_through() {
        let mut buffer = OrderingBuffer::new();
        for seq in 1..=3 {
            assert_eq!(buffer.admit(message(seq)), Admission::Admitted);
            assert_eq!(sequences(&buffer.drain_ready()), vec![seq]);
        }
        assert_eq!(buffer.last_delivered_seq(), 3);
    }

    #[test]
    fn out_of_order_delivery_is_restored() {
        let mut buffer = OrderingBuffer::new();
        // The reorder scenario: (2) arrives, then (1), then (3).
        buffer.admit(message(2));
        assert!(buffer.drain_ready().is_empty());
        assert!(buffer.has_gap());
        assert_eq!(buffer.missing_sequences(), vec![1]);

        buffer.admit(message(1));
        assert!(!buffer.has_gap());
        assert_eq!(sequences(&buffer.drain_ready()), vec![1, 2]);

        buffer.admit(message(3));
        assert_eq!(sequences(&buffer.drain_ready()), vec![3]);
    }

    #[test]
    fn duplicate_id_rejected_even_after_delivery() {
        let mut buffer = OrderingBuffer::new();
        let original = message(1);
        assert_eq!(buffer.admit(original.clone()), Admission::Admitted);

        // Still pending.
        assert_eq!(buffer.admit(original.clone()), Admission::DuplicateId);

        buffer.drain_ready();
        // Already delivered.
        assert_eq!(buffer.admit(original), Admission::DuplicateId);
    }

    #[test]
    fn duplicate_sequence_with_fresh_id_rejected() {
        let mut buffer = OrderingBuffer::new();
        buffer.admit(message(2));
        assert_eq!(buffer.admit(message(2)), Admission::DuplicateSequence);
    }

    #[test]
    fn stale_sequence_rejected() {
        let mut buffer = OrderingBuffer::new();
        buffer.admit(message(1));
        buffer.drain_ready();
        assert_eq!(buffer.admit(message(1)), Admission::Stale);
    }

    #[test]
    fn zero_sequence_rejected() {
        let mut buffer = OrderingBuffer::new();
        assert_eq!(buffer.admit(message(0)), Admission::InvalidSequence);
    }

    #[test]
    fn drain_stops_at_gap() {
        let mut buffer = OrderingBuffer::new();
        buffer.admit(message(1));
        buffer.admit(message(2));
        buffer.admit(message(4));

        assert_eq!(sequences(&buffer.drain_ready()), vec![1, 2]);
        assert!(buffer.has_gap());
        assert_eq!(buffer.missing_sequences(), vec![3]);
        assert_eq!(buffer.buffered_len(), 1);
    }

    #[test]
    fn buffer_cap_drops_oldest_pending() {
        let mut buffer = OrderingBuffer::with_limits(3, 100);
        // Sequence 1 never arrives, so nothing drains.
        for seq in 2..=6 {
            buffer.admit(message(seq));
        }
        assert_eq!(buffer.buffered_len(), 3);
        // The oldest (2, 3) were dropped; 4..=6 remain.
        assert_eq!(buffer.missing_sequences(), vec![1, 2, 3]);
    }

    #[test]
    fn delivered_ids_are_fifo_capped() {
        let mut buffer = OrderingBuffer::with_limits(1000, 5);
        let mut early = Vec::new();
        for seq in 1..=10 {
            let m = message(seq);
            if seq <= 3 {
                early.push(m.clone());
            }
            buffer.admit(m);
            buffer.drain_ready();
        }
        assert!(buffer.delivered_order.len() <= 5);
        // Early ids aged out of the dedup window; their sequences are still
        // rejected as stale.
        assert_eq!(buffer.admit(early[0].clone()), Admission::Stale);
    }

    #[test]
    fn fast_forward_for_late_join() {
        let mut buffer = OrderingBuffer::new();
        assert!(buffer.is_fresh());
        buffer.set_last_delivered(41);
        assert_eq!(buffer.admit(message(42)), Admission::Admitted);
        assert_eq!(sequences(&buffer.drain_ready()), vec![42]);
        assert!(!buffer.has_gap());
    }

    #[test]
    fn clear_resets_everything() {
        let mut buffer = OrderingBuffer::new();
        buffer.admit(message(1));
        buffer.drain_ready();
        buffer.admit(message(3));
        buffer.clear();

        assert!(buffer.is_fresh());
        assert_eq!(buffer.last_delivered_seq(), 0);
        assert_eq!(buffer.buffered_len(), 0);
    }
}
