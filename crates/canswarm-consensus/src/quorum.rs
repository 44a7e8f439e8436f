//! K-of-N attestation tracking.
//!
//! One tracker entry per (scope, subject) pair — plan quorums key on
//! (need, proposal), result quorums on (task, commit). Independent proposals
//! for the same need get separate entries and do not interfere; only the
//! first DECIDE to reach consensus wins.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::debug;

use canswarm_core::types::AgentId;

#[derive(Default)]
struct QuorumState {
    attestors: HashSet<AgentId>,
    /// Set once the K-th attestation has been reported, so the quorum event
    /// fires at most once even if more attestations arrive.
    fired: bool,
}

/// In-memory quorum tracker. Rebuilt from the attestation log on restart by
/// whoever owns the restart path (replay never needs it — quorum events are
/// re-derived from the logged envelopes).
#[derive(Default)]
pub struct QuorumTracker {
    entries: Mutex<HashMap<([u8; 32], [u8; 32]), QuorumState>>,
}

impl QuorumTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attestation. Returns `true` exactly once per (scope,
    /// subject): on the invocation that brings the distinct-attestor count
    /// to `k`. Duplicate attestors never advance the count.
    pub fn add_attestation(
        &self,
        scope: [u8; 32],
        subject: [u8; 32],
        attestor: AgentId,
        k: u32,
    ) -> bool {
        let mut entries = self.entries.lock().expect("quorum lock poisoned");
        let state = entries.entry((scope, subject)).or_default();
        if state.fired {
            return false;
        }
        if !state.attestors.insert(attestor) {
            return false;
        }
        let count = state.attestors.len() as u32;
        debug!(count, k, "attestation recorded");
        if count >= k {
            state.fired = true;
            return true;
        }
        false
    }

    /// Distinct attestors recorded for a (scope, subject).
    pub fn count(&self, scope: [u8; 32], subject: [u8; 32]) -> u32 {
        let entries = self.entries.lock().expect("quorum lock poisoned");
        entries
            .get(&(scope, subject))
            .map(|s| s.attestors.len() as u32)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(tag: u8) -> AgentId {
        AgentId::from_bytes([tag; 32])
    }

    #[test]
    fn fires_exactly_on_kth_distinct_attestor() {
        let tracker = QuorumTracker::new();
        assert!(!tracker.add_attestation([1; 32], [2; 32], agent(1), 3));
        assert!(!tracker.add_attestation([1; 32], [2; 32], agent(2), 3));
        assert!(tracker.add_attestation([1; 32], [2; 32], agent(3), 3));
        // K+1th attestation does not fire again.
        assert!(!tracker.add_attestation([1; 32], [2; 32], agent(4), 3));
    }

    #[test]
    fn duplicate_attestor_does_not_count() {
        let tracker = QuorumTracker::new();
        assert!(!tracker.add_attestation([1; 32], [2; 32], agent(1), 2));
        assert!(!tracker.add_attestation([1; 32], [2; 32], agent(1), 2));
        assert_eq!(tracker.count([1; 32], [2; 32]), 1);
        assert!(tracker.add_attestation([1; 32], [2; 32], agent(2), 2));
    }

    #[test]
    fn k_of_one_fires_immediately() {
        let tracker = QuorumTracker::new();
        assert!(tracker.add_attestation([1; 32], [2; 32], agent(1), 1));
    }

    #[test]
    fn proposals_for_same_need_are_independent() {
        let tracker = QuorumTracker::new();
        assert!(tracker.add_attestation([1; 32], [2; 32], agent(1), 1));
        // Same scope, different subject: its own quorum.
        assert!(tracker.add_attestation([1; 32], [3; 32], agent(1), 1));
    }
}
