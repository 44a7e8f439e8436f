//! Records owned by the consensus, auction, lease, verifier and challenge
//! components. The structs live here (data in core, lifecycle logic in the
//! owning crate) so they can be stored in sled trees and referenced from
//! envelope payloads by immutable id.

use serde::{Deserialize, Serialize};

use crate::types::{
    AgentId, ArtifactHash, ChallengeId, CommitId, Credits, EnvelopeId, Epoch, EscrowId, Lamport,
    LeaseId, NeedId, ProposalId, TaskId, Timestamp,
};

// ── Consensus ────────────────────────────────────────────────────────────────

/// The consensus singleton per need: exactly one per need id within an
/// epoch; across epochs the highest (epoch, lamport, decider) wins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecideRecord {
    pub need: NeedId,
    pub proposal: ProposalId,
    pub epoch: Epoch,
    pub lamport: Lamport,
    /// K_plan in force when this decision was made.
    pub k_plan: u32,
    pub decider: AgentId,
    pub ts: Timestamp,
    /// Set while the deciding side suspected a partition. Provisional
    /// decisions are merge candidates on heal, never silently deleted.
    pub provisional: bool,
}

impl DecideRecord {
    /// Total order used on partition heal: highest epoch wins, then highest
    /// Lamport, then decider id lexicographic.
    pub fn outranks(&self, other: &DecideRecord) -> bool {
        (self.epoch, self.lamport, self.decider.as_bytes())
            > (other.epoch, other.lamport, other.decider.as_bytes())
    }
}

/// Why an epoch was advanced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpochReason {
    Bootstrap,
    PartitionHeal,
    Governance,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: Epoch,
    pub reason: EpochReason,
    pub started_at: Timestamp,
}

// ── Attestation log ──────────────────────────────────────────────────────────

/// What an ATTEST envelope voted on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttestTarget {
    /// ATTEST_PLAN over a proposal.
    Plan,
    /// ATTEST over a commit.
    Result,
}

/// One recorded attestation. This log is the ground truth for "honest
/// verifier" payout claims: a claimant with no record here receives nothing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestRecord {
    pub target: AttestTarget,
    pub need: NeedId,
    pub task: TaskId,
    /// Proposal (plan attestations) or commit (result attestations) id bytes.
    pub subject: [u8; 32],
    pub attestor: AgentId,
    pub verdict: bool,
    pub lamport: Lamport,
    pub envelope: EnvelopeId,
}

// ── Leases ───────────────────────────────────────────────────────────────────

/// Exclusive hold of a task by a worker for bounded time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub lease_id: LeaseId,
    pub task: TaskId,
    pub need: NeedId,
    pub holder: AgentId,
    pub ttl_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub last_heartbeat: Timestamp,
    pub created_at: Timestamp,
    /// Leases created in epoch e are scavengeable at e+1 without a fresh
    /// heartbeat inside the new epoch.
    pub created_epoch: Epoch,
    pub last_heartbeat_epoch: Epoch,
}

impl Lease {
    /// Heartbeat intervals elapsed since the last renewal.
    pub fn missed_intervals(&self, now: Timestamp) -> u32 {
        let silent = now.saturating_sub(self.last_heartbeat).max(0) as u64;
        (silent / self.heartbeat_interval_secs.max(1)) as u32
    }

    pub fn expired(&self, now: Timestamp) -> bool {
        now >= self.last_heartbeat + self.ttl_secs as i64
    }
}

// ── Auctions ─────────────────────────────────────────────────────────────────

/// A recorded bid under an auction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub proposal: ProposalId,
    pub bidder: AgentId,
    pub cost: Credits,
    pub eta_ms: u64,
    pub arrived_at: Timestamp,
    pub lamport: Lamport,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionPhase {
    Open,
    Closed { winner: Option<ProposalId> },
}

/// Auction state for one need. Owned by `canswarm-auction`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionRecord {
    pub need: NeedId,
    pub task: TaskId,
    pub budget: Credits,
    /// Escrow holding the bounty budget for the auction's lifetime.
    pub bounty_escrow: EscrowId,
    pub opened_at: Timestamp,
    /// Bid window this auction was opened with. Scoring normalizes ETAs
    /// against this, not the configured default, so per-need window
    /// overrides score correctly.
    pub window_secs: u64,
    pub closes_at: Timestamp,
    /// Anti-snipe extensions granted so far.
    pub extensions: u32,
    pub bids: Vec<Bid>,
    pub phase: AuctionPhase,
}

// ── Challenges ───────────────────────────────────────────────────────────────

/// Typed challenge proofs. Each type has a deterministic check procedure
/// and a base bond that scales with severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofType {
    SchemaViolation,
    MissingCitation,
    SemanticContradiction,
    OutputMismatch,
    PolicyBreach,
}

impl ProofType {
    /// Base bond in credits, before the complexity multiplier.
    pub fn base_bond(&self) -> Credits {
        match self {
            ProofType::SchemaViolation => 10,
            ProofType::MissingCitation => 25,
            ProofType::SemanticContradiction => 50,
            ProofType::OutputMismatch => 100,
            ProofType::PolicyBreach => 100,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengePhase {
    Pending,
    Upheld,
    Rejected,
    Withdrawn,
}

/// A bonded challenge against a COMMIT.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub challenge_id: ChallengeId,
    pub task: TaskId,
    pub commit: CommitId,
    pub challenger: AgentId,
    pub proof_type: ProofType,
    pub complexity: u8,
    /// Evidence blob in the CAS.
    pub evidence: ArtifactHash,
    pub bond: Credits,
    /// Escrow locked atomically at submission.
    pub bond_escrow: EscrowId,
    /// End of the challenge window for this commit.
    pub deadline: Timestamp,
    pub submitted_at: Timestamp,
    pub phase: ChallengePhase,
}

// ── Policy capsules ──────────────────────────────────────────────────────────

/// A versioned bundle of validation rules. Its identity is the SHA-256 of
/// its canonical serialization (`CapsuleHash`), bound into every envelope;
/// nodes refuse envelopes against capsule hashes they do not recognize.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyCapsule {
    pub version: u32,
    /// Maximum canonical envelope size accepted under this capsule.
    pub max_envelope_bytes: usize,
    /// Prior capsule hashes accepted during rollover (compatibility list).
    pub compat: Vec<crate::types::CapsuleHash>,
}

// ── Verifiers ────────────────────────────────────────────────────────────────

/// Static facts an agent declares when registering as a verifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierManifest {
    pub agent: AgentId,
    pub capabilities: Vec<String>,
    /// Organisation this agent belongs to. Related-party signal.
    pub org: String,
    /// Network autonomy zone. Related-party signal.
    pub zone: String,
    pub region: String,
}

/// Registry entry for a verifier. Stake amounts live in the ledger
/// (`AccountState::locked`); the pool reads them through the ledger
/// interface so there is a single source of truth.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierRecord {
    pub manifest: VerifierManifest,
    /// Reputation in basis points (0..=10_000). Integer so that selection
    /// weights are exactly reproducible under replay.
    pub reputation_bp: u32,
    pub registered_at: Timestamp,
    pub last_active: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentId, NeedId, ProposalId};

    fn record(epoch: Epoch, lamport: Lamport, decider: u8) -> DecideRecord {
        DecideRecord {
            need: NeedId::from_bytes([1; 32]),
            proposal: ProposalId::from_bytes([2; 32]),
            epoch,
            lamport,
            k_plan: 1,
            decider: AgentId::from_bytes([decider; 32]),
            ts: 0,
            provisional: false,
        }
    }

    #[test]
    fn outranks_prefers_epoch_then_lamport_then_decider() {
        assert!(record(2, 1, 0).outranks(&record(1, 99, 9)));
        assert!(record(1, 42, 0).outranks(&record(1, 40, 9)));
        assert!(record(1, 42, 9).outranks(&record(1, 42, 1)));
        assert!(!record(1, 42, 1).outranks(&record(1, 42, 1)));
    }

    #[test]
    fn missed_intervals_counts_whole_intervals() {
        let lease = Lease {
            lease_id: LeaseId::from_bytes([0; 32]),
            task: TaskId::from_bytes([0; 32]),
            need: NeedId::from_bytes([0; 32]),
            holder: AgentId::from_bytes([0; 32]),
            ttl_secs: 30,
            heartbeat_interval_secs: 10,
            last_heartbeat: 100,
            created_at: 100,
            created_epoch: 0,
            last_heartbeat_epoch: 0,
        };
        assert_eq!(lease.missed_intervals(105), 0);
        assert_eq!(lease.missed_intervals(125), 2);
        assert!(lease.expired(130));
        assert!(!lease.expired(129));
    }

    #[test]
    fn proof_type_bonds_scale_with_severity() {
        assert!(ProofType::OutputMismatch.base_bond() > ProofType::SchemaViolation.base_bond());
    }
}
