use serde::{Deserialize, Serialize};

use crate::plan::PlanOp;
use crate::protocol::ProofType;
use crate::types::{
    AgentId, ArtifactHash, CapsuleHash, ChallengeId, CommitId, Credits, EnvelopeId, Epoch,
    Lamport, LeaseId, NeedId, Nonce, PayloadHash, ProposalId, PublicKey, Signature, TaskId,
    ThreadId, Timestamp,
};

// ── Verb ─────────────────────────────────────────────────────────────────────

/// The closed set of protocol verbs. Binding for bit-level compatibility:
/// any other kind is rejected at the policy gate before dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verb {
    Need,
    Propose,
    Claim,
    Commit,
    Attest,
    Decide,
    Finalize,
    Yield,
    Release,
    UpdatePlan,
    AttestPlan,
    Heartbeat,
    Challenge,
    Invalidate,
    Reconcile,
    Checkpoint,
}

impl Verb {
    /// Wire name as it appears in subjects and audit records.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Verb::Need => "NEED",
            Verb::Propose => "PROPOSE",
            Verb::Claim => "CLAIM",
            Verb::Commit => "COMMIT",
            Verb::Attest => "ATTEST",
            Verb::Decide => "DECIDE",
            Verb::Finalize => "FINALIZE",
            Verb::Yield => "YIELD",
            Verb::Release => "RELEASE",
            Verb::UpdatePlan => "UPDATE_PLAN",
            Verb::AttestPlan => "ATTEST_PLAN",
            Verb::Heartbeat => "HEARTBEAT",
            Verb::Challenge => "CHALLENGE",
            Verb::Invalidate => "INVALIDATE",
            Verb::Reconcile => "RECONCILE",
            Verb::Checkpoint => "CHECKPOINT",
        }
    }

    /// Parse a wire name. Fails closed: anything outside the set is `None`.
    pub fn from_wire(s: &str) -> Option<Self> {
        Some(match s {
            "NEED" => Verb::Need,
            "PROPOSE" => Verb::Propose,
            "CLAIM" => Verb::Claim,
            "COMMIT" => Verb::Commit,
            "ATTEST" => Verb::Attest,
            "DECIDE" => Verb::Decide,
            "FINALIZE" => Verb::Finalize,
            "YIELD" => Verb::Yield,
            "RELEASE" => Verb::Release,
            "UPDATE_PLAN" => Verb::UpdatePlan,
            "ATTEST_PLAN" => Verb::AttestPlan,
            "HEARTBEAT" => Verb::Heartbeat,
            "CHALLENGE" => Verb::Challenge,
            "INVALIDATE" => Verb::Invalidate,
            "RECONCILE" => Verb::Reconcile,
            "CHECKPOINT" => Verb::Checkpoint,
            _ => return None,
        })
    }

    pub const ALL: [Verb; 16] = [
        Verb::Need,
        Verb::Propose,
        Verb::Claim,
        Verb::Commit,
        Verb::Attest,
        Verb::Decide,
        Verb::Finalize,
        Verb::Yield,
        Verb::Release,
        Verb::UpdatePlan,
        Verb::AttestPlan,
        Verb::Heartbeat,
        Verb::Challenge,
        Verb::Invalidate,
        Verb::Reconcile,
        Verb::Checkpoint,
    ];
}

// ── Per-verb payloads ────────────────────────────────────────────────────────

/// Declared resource usage attached to a COMMIT. The commit gate compares
/// these against observed telemetry before verifiers ever see the commit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceClaims {
    pub cpu_ms: u64,
    pub mem_bytes: u64,
    pub io_bytes: u64,
}

/// Opens a task: creates the task node and an auction over it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NeedPayload {
    /// Free-form task class, e.g. "classify", "summarize".
    pub task_type: String,
    /// Opaque task input. The protocol does not interpret this.
    pub input: serde_json::Value,
    /// Maximum credits the requester will escrow as bounty.
    pub budget: Credits,
    /// Bid window override in seconds (None = configured default).
    pub bid_window_secs: Option<u64>,
}

/// A bid under an open auction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProposePayload {
    pub need: NeedId,
    /// Asking price in credits.
    pub cost: Credits,
    /// Estimated time to produce the artifact.
    pub eta_ms: u64,
    /// Optional plan patch the proposer wants applied on win.
    pub plan_patch: Option<Vec<PlanOp>>,
}

/// The winning worker takes the task under a lease.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPayload {
    pub need: NeedId,
    pub task: TaskId,
    pub proposal: ProposalId,
}

/// Worker hands off a finished artifact by content hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPayload {
    pub task: TaskId,
    /// Artifact must already exist in the CAS; COMMIT carries only the hash.
    pub artifact: ArtifactHash,
    pub resource_claims: ResourceClaims,
}

/// Verifier vote on a COMMIT (result attestation).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestPayload {
    pub task: TaskId,
    pub commit: CommitId,
    pub verdict: bool,
}

/// Verifier vote on a PROPOSE (plan attestation).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestPlanPayload {
    pub need: NeedId,
    pub proposal: ProposalId,
    pub verdict: bool,
}

/// Broadcast of a successful consensus decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecidePayload {
    pub need: NeedId,
    pub proposal: ProposalId,
    /// K_plan in force when the quorum was reached.
    pub k_plan: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizePayload {
    pub task: TaskId,
    pub commit: CommitId,
}

/// Holder voluntarily releases its lease. Not penalized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct YieldPayload {
    pub task: TaskId,
    pub lease: LeaseId,
}

/// Why a lease was reclaimed by the system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseReason {
    /// TTL elapsed with no renewal.
    Expired,
    /// Holder missed `missed` consecutive heartbeat intervals past grace.
    MissedHeartbeats { missed: u32 },
    /// Lease created in a prior epoch and not re-confirmed after heal.
    EpochFence,
}

/// System scavenge of an abandoned lease. Slashes the holder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasePayload {
    pub task: TaskId,
    pub lease: LeaseId,
    pub reason: ReleaseReason,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdatePlanPayload {
    pub ops: Vec<PlanOp>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub task: TaskId,
    pub lease: LeaseId,
}

/// Bonded dispute of a COMMIT within the challenge window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengePayload {
    pub task: TaskId,
    pub commit: CommitId,
    pub proof_type: ProofType,
    /// Complexity multiplier class: 1, 2 or 5.
    pub complexity: u8,
    /// Evidence blob in the CAS supporting the proof.
    pub evidence: ArtifactHash,
    pub bond: Credits,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidatePayload {
    pub task: TaskId,
    pub commit: CommitId,
    pub challenge: ChallengeId,
}

/// One conflict resolved during partition heal. Carries the full winning
/// record so every receiver can install it without a second exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub need: NeedId,
    pub winner: crate::protocol::DecideRecord,
    pub orphaned: ProposalId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePayload {
    /// Epoch produced by the heal.
    pub healed_epoch: Epoch,
    pub resolved: Vec<ReconcileOutcome>,
}

/// Epoch checkpoint summarizing the op-log with a merkle root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    pub thread: ThreadId,
    pub merkle_root: PayloadHash,
    pub op_count: u64,
}

/// Kind-specific envelope payload. The variant must match the envelope's
/// `kind` field; `canswarm-crypto` rejects envelopes where they disagree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    Need(NeedPayload),
    Propose(ProposePayload),
    Claim(ClaimPayload),
    Commit(CommitPayload),
    Attest(AttestPayload),
    Decide(DecidePayload),
    Finalize(FinalizePayload),
    Yield(YieldPayload),
    Release(ReleasePayload),
    UpdatePlan(UpdatePlanPayload),
    AttestPlan(AttestPlanPayload),
    Heartbeat(HeartbeatPayload),
    Challenge(ChallengePayload),
    Invalidate(InvalidatePayload),
    Reconcile(ReconcilePayload),
    Checkpoint(CheckpointPayload),
}

impl Payload {
    /// The verb this payload belongs to.
    pub fn verb(&self) -> Verb {
        match self {
            Payload::Need(_) => Verb::Need,
            Payload::Propose(_) => Verb::Propose,
            Payload::Claim(_) => Verb::Claim,
            Payload::Commit(_) => Verb::Commit,
            Payload::Attest(_) => Verb::Attest,
            Payload::Decide(_) => Verb::Decide,
            Payload::Finalize(_) => Verb::Finalize,
            Payload::Yield(_) => Verb::Yield,
            Payload::Release(_) => Verb::Release,
            Payload::UpdatePlan(_) => Verb::UpdatePlan,
            Payload::AttestPlan(_) => Verb::AttestPlan,
            Payload::Heartbeat(_) => Verb::Heartbeat,
            Payload::Challenge(_) => Verb::Challenge,
            Payload::Invalidate(_) => Verb::Invalidate,
            Payload::Reconcile(_) => Verb::Reconcile,
            Payload::Checkpoint(_) => Verb::Checkpoint,
        }
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// A signed, Lamport-stamped protocol message. Immutable once signed.
///
/// The envelope ID (`id`) is SHA-256 of the canonical JSON serialization of
/// all fields EXCEPT `id` and `signature` (see [`EnvelopeBody`]); the
/// signature covers the same bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique identifier (SHA-256 of body).
    pub id: EnvelopeId,

    /// Causal scope this envelope belongs to.
    pub thread: ThreadId,

    /// Protocol verb.
    pub kind: Verb,

    /// Logical timestamp. Strictly positive.
    pub lamport: Lamport,

    /// Wall-clock time at build (UTC Unix seconds). Advisory only.
    pub ts: Timestamp,

    /// Stable identity of the sender (SHA-256 of `sender_key`).
    pub sender: AgentId,

    /// Sender's Ed25519 verifying key.
    pub sender_key: PublicKey,

    /// SHA-256 of the canonical payload serialization.
    pub payload_hash: PayloadHash,

    /// Kind-specific payload.
    pub payload: Payload,

    /// Policy capsule this envelope was validated against.
    pub capsule: CapsuleHash,

    /// Coordination epoch the sender believed current.
    pub epoch: Epoch,

    /// Per-sender counter within the thread.
    pub nonce: Nonce,

    /// Detached Ed25519 signature over the body bytes.
    pub signature: Signature,
}

/// The fields that are hashed to produce `id` and covered by `signature`.
#[derive(Serialize)]
pub struct EnvelopeBody<'a> {
    pub thread: &'a ThreadId,
    pub kind: Verb,
    pub lamport: Lamport,
    pub ts: Timestamp,
    pub sender: &'a AgentId,
    pub sender_key: &'a PublicKey,
    pub payload_hash: &'a PayloadHash,
    pub payload: &'a Payload,
    pub capsule: &'a CapsuleHash,
    pub epoch: Epoch,
    pub nonce: Nonce,
}

impl Envelope {
    /// Extract the body view for hashing / signing.
    pub fn body(&self) -> EnvelopeBody<'_> {
        EnvelopeBody {
            thread: &self.thread,
            kind: self.kind,
            lamport: self.lamport,
            ts: self.ts,
            sender: &self.sender,
            sender_key: &self.sender_key,
            payload_hash: &self.payload_hash,
            payload: &self.payload,
            capsule: &self.capsule,
            epoch: self.epoch,
            nonce: self.nonce,
        }
    }
}
