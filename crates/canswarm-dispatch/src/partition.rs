//! Heartbeat-based partition detection.
//!
//! A peer is gone after K_miss consecutive missed intervals. When the
//! connected fraction drops below quorum, the PARTITION_SUSPECTED flag is
//! raised and handlers mark their writes provisional; nothing stops — the
//! minority keeps a log the reconciler can merge later.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use tracing::{info, warn};

use canswarm_core::config::SwarmConfig;
use canswarm_core::types::{AgentId, Timestamp};

use crate::context::SwarmContext;

pub struct PartitionDetector {
    /// Last heartbeat seen per peer.
    peers: Mutex<HashMap<AgentId, Timestamp>>,
    /// Peers this node expects to hear from.
    expected: usize,
}

impl PartitionDetector {
    pub fn new(expected: usize) -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            expected,
        }
    }

    pub fn observe_peer(&self, peer: AgentId, now: Timestamp) {
        self.peers
            .lock()
            .expect("peer map poisoned")
            .insert(peer, now);
    }

    /// Peers currently considered connected.
    pub fn connected(&self, now: Timestamp, cfg: &SwarmConfig) -> usize {
        let deadline =
            (cfg.peer_miss_threshold as i64) * (cfg.peer_heartbeat_interval_secs as i64);
        self.peers
            .lock()
            .expect("peer map poisoned")
            .values()
            .filter(|last| now - **last <= deadline)
            .count()
    }

    /// Evaluate the split state and update the context flag. Returns true
    /// while a partition is suspected.
    pub fn check(&self, ctx: &SwarmContext, now: Timestamp) -> bool {
        if self.expected == 0 {
            return false;
        }
        let connected = self.connected(now, &ctx.cfg);
        let quorum = (self.expected * ctx.cfg.partition_quorum_pct as usize).div_ceil(100);
        let suspected = connected < quorum;
        let was = ctx.partition_suspected.swap(suspected, Ordering::SeqCst);
        if suspected && !was {
            warn!(connected, expected = self.expected, "partition suspected; writes provisional");
        } else if !suspected && was {
            info!(connected, expected = self.expected, "peer quorum restored");
        }
        suspected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_is_gone_after_missed_intervals() {
        let detector = PartitionDetector::new(3);
        let cfg = SwarmConfig::default();
        detector.observe_peer(AgentId::from_bytes([1; 32]), 100);
        // 3 × 10 s = 30 s tolerance.
        assert_eq!(detector.connected(129, &cfg), 1);
        assert_eq!(detector.connected(131, &cfg), 0);
    }

    #[test]
    fn quorum_math() {
        let detector = PartitionDetector::new(4);
        let cfg = SwarmConfig::default();
        for tag in 1..=4u8 {
            detector.observe_peer(AgentId::from_bytes([tag; 32]), 100);
        }
        assert_eq!(detector.connected(100, &cfg), 4);
    }
}
