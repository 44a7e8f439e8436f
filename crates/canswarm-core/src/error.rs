use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwarmError {
    // ── Validation errors ────────────────────────────────────────────────────
    #[error("invalid signature")]
    SignatureInvalid,

    #[error("payload hash mismatch: declared {declared}, computed {computed}")]
    PayloadHashMismatch { declared: String, computed: String },

    #[error("canonicalization error: {0}")]
    Canonicalization(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("unknown policy capsule: {0}")]
    PolicyCapsuleUnknown(String),

    #[error("lamport timestamp must be strictly positive")]
    LamportInvalid,

    #[error("envelope exceeds size limit of {max} bytes (got {got})")]
    SizeLimit { max: usize, got: usize },

    #[error("unknown verb: {0}")]
    UnknownVerb(String),

    #[error("payload variant does not match envelope kind {kind}")]
    PayloadKindMismatch { kind: String },

    // ── Consensus errors ─────────────────────────────────────────────────────
    #[error("decide conflict: need already decided for a different proposal")]
    ConsensusConflict,

    #[error("decide fenced: submitted epoch {submitted} is behind current {current}")]
    ConsensusFenced { submitted: u64, current: u64 },

    #[error("consensus operation timed out")]
    ConsensusTimeout,

    // ── Lease errors ─────────────────────────────────────────────────────────
    #[error("no lease found for task {0}")]
    LeaseMissing(String),

    #[error("task {task} is leased by another holder")]
    LeaseHeldByOther { task: String },

    #[error("lease expired for task {0}")]
    LeaseExpired(String),

    // ── Economic errors ──────────────────────────────────────────────────────
    #[error("insufficient balance: need {need} credits, have {have}")]
    InsufficientBalance { need: u64, have: u64 },

    #[error("insufficient stake: need {need} credits, have {have}")]
    InsufficientStake { need: u64, have: u64 },

    #[error("a bond of {required} credits is required")]
    BondRequired { required: u64 },

    #[error("bond escrow failed: {0}")]
    BondEscrowFailed(String),

    #[error("related party detected between {a} and {b}")]
    RelatedPartyDetected { a: String, b: String },

    #[error("mint requires SYSTEM authority")]
    MintUnauthorized,

    #[error("mint would exceed supply cap: supply {supply}, mint {mint}, cap {cap}")]
    SupplyCapExceeded { supply: u64, mint: u64, cap: u64 },

    #[error("escrow not found: {0}")]
    EscrowMissing(String),

    #[error("escrow already released: {0}")]
    EscrowAlreadyReleased(String),

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    // ── Storage errors ───────────────────────────────────────────────────────
    #[error("artifact not in CAS: {0}")]
    CasMissing(String),

    #[error("CAS backend unavailable (circuit open)")]
    CasBackendUnavailable,

    #[error("ledger busy; retry")]
    LedgerBusy,

    // ── Structural errors ────────────────────────────────────────────────────
    #[error("cycle detected in plan graph involving task {0}")]
    CycleDetected(String),

    #[error("branch orphaned by epoch {0}")]
    OrphanedBranch(u64),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("unknown need: {0}")]
    UnknownNeed(String),

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // ── Bus errors ───────────────────────────────────────────────────────────
    #[error("bus unavailable: {0}")]
    BusUnavailable(String),

    // ── Auction errors ───────────────────────────────────────────────────────
    #[error("no auction open for need {0}")]
    AuctionMissing(String),

    #[error("auction already closed for need {0}")]
    AuctionClosed(String),

    #[error("bid window closed for need {0}")]
    BidWindowClosed(String),

    // ── Challenge errors ─────────────────────────────────────────────────────
    #[error("challenge not found: {0}")]
    ChallengeMissing(String),

    #[error("challenge window closed at {deadline}")]
    ChallengeWindowClosed { deadline: i64 },

    #[error("challenge already resolved: {0}")]
    ChallengeAlreadyResolved(String),

    // ── Verifier errors ──────────────────────────────────────────────────────
    #[error("agent is not a registered verifier: {0}")]
    NotAVerifier(String),

    #[error("verifier already attested this subject")]
    AlreadyAttested,

    #[error("committee of {k} cannot satisfy diversity caps with {eligible} eligible verifiers")]
    CommitteeInfeasible { k: usize, eligible: usize },

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    // ── Genesis ──────────────────────────────────────────────────────────────
    #[error("genesis already applied")]
    GenesisAlreadyApplied,

    // ── General ──────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}
