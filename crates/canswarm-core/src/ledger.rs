//! Data structures for the credit ledger. The ledger engine itself lives in
//! `canswarm-ledger`; these records are what it stores.

use serde::{Deserialize, Serialize};

use crate::types::{AgentId, ArtifactHash, ChallengeId, Credits, EscrowId, NeedId, Timestamp};

// ── Accounts ─────────────────────────────────────────────────────────────────

/// Full ledger state for one account.
///
/// Invariants (enforced by every ledger operation):
///   balance ≥ 0, locked ≥ 0, and across all accounts
///   Σ balance + Σ locked + Σ unbonding + Σ in-flight escrow + burned ≡ minted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub account: AgentId,
    /// Freely spendable credits.
    pub balance: Credits,
    /// Credits locked as verifier/worker stake. Slashable.
    pub locked: Credits,
    pub created_at: Timestamp,
}

impl AccountState {
    pub fn new(account: AgentId, created_at: Timestamp) -> Self {
        Self {
            account,
            balance: 0,
            locked: 0,
            created_at,
        }
    }
}

/// One in-flight unbonding tranche. Stake leaves `locked` immediately and
/// returns to `balance` only after the unbonding period.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbondingEntry {
    pub account: AgentId,
    pub amount: Credits,
    pub started_at: Timestamp,
    pub matures_at: Timestamp,
}

// ── Escrow ───────────────────────────────────────────────────────────────────

/// What an escrow is holding funds for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowPurpose {
    /// Bounty budget for a need, released to the worker on clean FINALIZE.
    Bounty { need: NeedId },
    /// Challenger bond, resolved by adjudication.
    ChallengeBond { challenge: ChallengeId },
}

/// An escrow contract. `released` flips inside the same transaction that
/// emits the transfer, so concurrent release attempts produce exactly one
/// success.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowState {
    pub escrow_id: EscrowId,
    pub from: AgentId,
    pub amount: Credits,
    pub purpose: EscrowPurpose,
    pub created_at: Timestamp,
    pub released: bool,
}

// ── Slashing ─────────────────────────────────────────────────────────────────

/// Why a stake reduction happened. Recorded with the evidence hash so the
/// audit trail explains every burned or redistributed credit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlashCause {
    /// Worker missed heartbeats; lease was scavenged.
    MissedHeartbeat,
    /// Verifier attested a COMMIT that a challenge later invalidated.
    UpheldChallenge,
    /// Challenger's proof was rejected; bond forfeited.
    RejectedChallenge,
    Governance,
}

/// Audit record of one slash event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashEvent {
    pub account: AgentId,
    pub amount: Credits,
    pub cause: SlashCause,
    pub evidence: Option<ArtifactHash>,
    pub ts: Timestamp,
}

/// Running totals used by the conservation check.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMeta {
    pub minted: Credits,
    pub burned: Credits,
}
