//! Bucketed, epoch-fenced DECIDE.
//!
//! Each need hashes into one of 256 buckets; each bucket is an independent
//! linearizable sequencer (here: a sled compare-and-swap on the bucket's
//! keyspace). This shards decision throughput and keeps the at-most-one
//! guarantee per need without any global ordering of DECIDEs.

use std::sync::Arc;

use tracing::{debug, info, warn};

use canswarm_core::error::SwarmError;
use canswarm_core::protocol::DecideRecord;
use canswarm_core::types::{AgentId, Epoch, Lamport, NeedId, ProposalId, Timestamp};
use canswarm_store::SwarmDb;

/// Everything a caller submits to `try_decide`.
#[derive(Clone, Copy, Debug)]
pub struct DecideCandidate {
    pub need: NeedId,
    pub proposal: ProposalId,
    pub epoch: Epoch,
    pub lamport: Lamport,
    pub k_plan: u32,
    pub decider: AgentId,
    pub ts: Timestamp,
    pub provisional: bool,
}

/// Outcome of a decide attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// This call won the need.
    Won(DecideRecord),
    /// An identical (proposal, epoch) record already exists — a retried
    /// envelope, not a conflict.
    Idempotent(DecideRecord),
    /// A different proposal already won. Losing branches do not retry.
    Conflict(DecideRecord),
    /// The submitted epoch is behind the bucket fence.
    Fenced { current_epoch: Epoch },
}

pub struct ConsensusStore {
    db: Arc<SwarmDb>,
}

impl ConsensusStore {
    pub fn new(db: Arc<SwarmDb>) -> Self {
        Self { db }
    }

    /// Attempt the at-most-one decision for a need.
    ///
    /// Succeeds only if the decide key is absent (or holds an identical
    /// (proposal, epoch) pair) and the submitted epoch is not behind the
    /// bucket's fence. The winning call advances the fence to its epoch.
    pub fn try_decide(&self, candidate: DecideCandidate) -> Result<Decision, SwarmError> {
        let bucket = SwarmDb::bucket_of(&candidate.need);
        let fence = self.db.bucket_epoch(bucket)?;
        if candidate.epoch < fence {
            warn!(
                need = %candidate.need,
                submitted = candidate.epoch,
                fence,
                "decide fenced"
            );
            return Ok(Decision::Fenced {
                current_epoch: fence,
            });
        }

        let record = DecideRecord {
            need: candidate.need,
            proposal: candidate.proposal,
            epoch: candidate.epoch,
            lamport: candidate.lamport,
            k_plan: candidate.k_plan,
            decider: candidate.decider,
            ts: candidate.ts,
            provisional: candidate.provisional,
        };

        match self.db.decide_cas(&record)? {
            None => {
                if candidate.epoch > fence {
                    self.db.set_bucket_epoch(bucket, candidate.epoch)?;
                }
                info!(
                    need = %candidate.need,
                    proposal = %candidate.proposal,
                    epoch = candidate.epoch,
                    "decide won"
                );
                Ok(Decision::Won(record))
            }
            Some(existing) => {
                if existing.proposal == candidate.proposal && existing.epoch == candidate.epoch {
                    debug!(need = %candidate.need, "idempotent decide retry");
                    Ok(Decision::Idempotent(existing))
                } else {
                    debug!(
                        need = %candidate.need,
                        winner = %existing.proposal,
                        loser = %candidate.proposal,
                        "decide conflict"
                    );
                    Ok(Decision::Conflict(existing))
                }
            }
        }
    }

    pub fn get_decide(&self, need: &NeedId) -> Result<Option<DecideRecord>, SwarmError> {
        self.db.get_decide(need)
    }

    pub fn all_decides(&self) -> Result<Vec<DecideRecord>, SwarmError> {
        self.db.iter_decides()
    }

    /// Partition-heal merge: install `remote` if it outranks the local
    /// record (or if there is none). Returns the record that was displaced,
    /// if any — the caller orphans its branch.
    pub fn merge_decide(
        &self,
        remote: &DecideRecord,
    ) -> Result<Option<DecideRecord>, SwarmError> {
        match self.db.get_decide(&remote.need)? {
            None => {
                self.db.put_decide(remote)?;
                Ok(None)
            }
            Some(local) if local.proposal == remote.proposal => Ok(None),
            Some(local) => {
                if remote.outranks(&local) {
                    self.db.put_decide(remote)?;
                    info!(
                        need = %remote.need,
                        winner = %remote.proposal,
                        orphaned = %local.proposal,
                        "heal merge displaced local decide"
                    );
                    Ok(Some(local))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consensus(name: &str) -> ConsensusStore {
        let dir =
            std::env::temp_dir().join(format!("canswarm_decide_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        ConsensusStore::new(Arc::new(SwarmDb::open(&dir).unwrap()))
    }

    fn candidate(need: u8, proposal: u8, epoch: Epoch, lamport: Lamport) -> DecideCandidate {
        DecideCandidate {
            need: NeedId::from_bytes([need; 32]),
            proposal: ProposalId::from_bytes([proposal; 32]),
            epoch,
            lamport,
            k_plan: 1,
            decider: AgentId::from_bytes([1; 32]),
            ts: 0,
            provisional: false,
        }
    }

    #[test]
    fn first_decide_wins_second_conflicts() {
        let consensus = consensus("race");
        assert!(matches!(
            consensus.try_decide(candidate(1, 1, 1, 10)).unwrap(),
            Decision::Won(_)
        ));
        match consensus.try_decide(candidate(1, 2, 1, 11)).unwrap() {
            Decision::Conflict(existing) => {
                assert_eq!(existing.proposal, ProposalId::from_bytes([1; 32]));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn identical_retry_is_idempotent() {
        let consensus = consensus("idem");
        consensus.try_decide(candidate(1, 1, 1, 10)).unwrap();
        assert!(matches!(
            consensus.try_decide(candidate(1, 1, 1, 10)).unwrap(),
            Decision::Idempotent(_)
        ));
    }

    #[test]
    fn stale_epoch_is_fenced() {
        let consensus = consensus("fence");
        consensus.try_decide(candidate(1, 1, 2, 10)).unwrap();
        // Zombie publishing into the same bucket at an older epoch.
        assert_eq!(
            consensus.try_decide(candidate(1, 3, 1, 99)).unwrap(),
            Decision::Fenced { current_epoch: 2 }
        );
    }

    #[test]
    fn different_needs_do_not_interfere() {
        let consensus = consensus("buckets");
        assert!(matches!(
            consensus.try_decide(candidate(1, 1, 1, 10)).unwrap(),
            Decision::Won(_)
        ));
        assert!(matches!(
            consensus.try_decide(candidate(2, 2, 1, 11)).unwrap(),
            Decision::Won(_)
        ));
    }

    #[test]
    fn merge_prefers_higher_epoch_then_lamport() {
        let consensus = consensus("merge");
        consensus.try_decide(candidate(1, 1, 1, 40)).unwrap();

        // Remote decided the same need at the same epoch with higher lamport.
        let remote = DecideRecord {
            need: NeedId::from_bytes([1; 32]),
            proposal: ProposalId::from_bytes([2; 32]),
            epoch: 1,
            lamport: 42,
            k_plan: 1,
            decider: AgentId::from_bytes([2; 32]),
            ts: 0,
            provisional: true,
        };
        let displaced = consensus.merge_decide(&remote).unwrap().unwrap();
        assert_eq!(displaced.proposal, ProposalId::from_bytes([1; 32]));
        assert_eq!(
            consensus
                .get_decide(&NeedId::from_bytes([1; 32]))
                .unwrap()
                .unwrap()
                .proposal,
            ProposalId::from_bytes([2; 32])
        );

        // A lower-ranked remote does not displace.
        let weaker = DecideRecord {
            lamport: 5,
            proposal: ProposalId::from_bytes([3; 32]),
            ..remote
        };
        assert!(consensus.merge_decide(&weaker).unwrap().is_none());
    }
}
