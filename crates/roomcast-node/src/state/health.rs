//! Peer node health tracking for the failure detector.

use chrono::{DateTime, Utc};

use crate::config::MAX_HEARTBEAT_FAILURES;

/// Health status of a peer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Last heartbeat succeeded.
    Healthy,
    /// At least one heartbeat missed, below the failure threshold.
    Degraded,
    /// Threshold reached; members hosted there are being evicted.
    Failed,
}

/// Heartbeat bookkeeping for a single peer node.
///
/// Transitions: success always restores `Healthy` and clears the failure
/// count; a failure moves to `Degraded`, and to `Failed` once
/// [`MAX_HEARTBEAT_FAILURES`] consecutive misses accumulate. A node that
/// comes back is readmitted by its next successful heartbeat.
#[derive(Debug, Clone)]
pub struct NodeHealth {
    /// Tracked node.
    pub node_id: String,
    /// When the last successful heartbeat was observed.
    pub last_heartbeat: DateTime<Utc>,
    /// Current status.
    pub status: NodeStatus,
    /// Consecutive misses since the last success.
    pub consecutive_failures: u32,
}

impl NodeHealth {
    /// Start tracking a node, optimistically healthy.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            last_heartbeat: Utc::now(),
            status: NodeStatus::Healthy,
            consecutive_failures: 0,
        }
    }

    /// Record a successful heartbeat.
    pub fn record_success(&mut self) {
        self.last_heartbeat = Utc::now();
        self.status = NodeStatus::Healthy;
        self.consecutive_failures = 0;
    }

    /// Record a missed heartbeat. Returns true when the node has just
    /// crossed the failure threshold.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= MAX_HEARTBEAT_FAILURES {
            self.status = NodeStatus::Failed;
            true
        } else {
            self.status = NodeStatus::Degraded;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fails_after_threshold_misses() {
        let mut health = NodeHealth::new("node2");
        assert!(!health.record_failure());
        assert_eq!(health.status, NodeStatus::Degraded);
        assert!(health.record_failure());
        assert_eq!(health.status, NodeStatus::Failed);
    }

    #[test]
    fn success_clears_failures() {
        let mut health = NodeHealth::new("node2");
        health.record_failure();
        health.record_success();
        assert_eq!(health.status, NodeStatus::Healthy);
        assert_eq!(health.consecutive_failures, 0);

        // Counting restarts from zero after recovery.
        assert!(!health.record_failure());
        assert_eq!(health.status, NodeStatus::Degraded);
    }
}
