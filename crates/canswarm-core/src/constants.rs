//! ─── CAN Swarm Protocol Constants ───────────────────────────────────────────
//!
//! Values that are part of the wire protocol or the economic invariants and
//! therefore not runtime-configurable. Tunable knobs live in
//! [`crate::config::SwarmConfig`].

use crate::types::{AgentId, Credits};

// ── Supply ───────────────────────────────────────────────────────────────────

/// Hard cap on total credits ever minted. The SYSTEM authority cannot mint
/// past this.
pub const MAX_SUPPLY_CREDITS: Credits = 1_000_000_000_000;

/// The minting authority. Account id is all zeroes; no keypair hashes to it.
pub const SYSTEM_AGENT: AgentId = AgentId([0u8; 32]);

// ── Consensus ────────────────────────────────────────────────────────────────

/// Number of independent decide buckets. bucket = H(need_id) mod 256, i.e.
/// the first byte of the hash.
pub const DECIDE_BUCKETS: u16 = 256;

// ── Lamport clock ────────────────────────────────────────────────────────────

/// Ticks between asynchronous persistence flushes. Crash recovery ceils the
/// restored value to the next multiple of this, covering any in-flight
/// Lamport the node may have advertised.
pub const LAMPORT_FLUSH_BATCH: u64 = 100;

/// Maximum age of an unflushed Lamport value before a timed flush.
pub const LAMPORT_FLUSH_INTERVAL_SECS: u64 = 1;

// ── Slash distribution (integer percentages; remainder is burned) ────────────

/// Share of a slash total paid to the challenger.
pub const SLASH_SHARE_CHALLENGER_PCT: Credits = 50;

/// Share of a slash total split among attest-log-verified honest verifiers.
pub const SLASH_SHARE_HONEST_PCT: Credits = 40;

/// Reward to the challenger on UPHELD, as a percentage of the slash total,
/// paid from the honest-share pool before distribution.
pub const UPHELD_REWARD_PCT: Credits = 20;

// ── Challenge escalation ─────────────────────────────────────────────────────

/// K_result increase applied when a challenge is upheld.
pub const K_ESCALATION_STEP: u32 = 2;

/// K_result never escalates past this multiple of its pre-escalation value.
pub const K_ESCALATION_CAP_FACTOR: u32 = 2;

/// Withdrawal fee on a WITHDRAWN challenge, in percent of the bond.
pub const CHALLENGE_WITHDRAW_FEE_PCT: Credits = 5;

// ── Reputation (basis points) ────────────────────────────────────────────────

pub const REPUTATION_MAX_BP: u32 = 10_000;

/// Baseline reputation for a freshly registered identity.
pub const REPUTATION_BASELINE_BP: u32 = 5_000;

/// Gain per successful attestation.
pub const REPUTATION_DELTA_UP_BP: u32 = 100;

/// Loss per slashed attestation.
pub const REPUTATION_DELTA_DOWN_BP: u32 = 1_500;

/// Weekly inactivity decay: reputation retains 95% per idle week.
pub const REPUTATION_DECAY_PER_WEEK_PCT: u32 = 5;

// ── Envelope limits ──────────────────────────────────────────────────────────

/// Maximum canonical envelope size accepted at any policy gate.
pub const MAX_ENVELOPE_BYTES: usize = 1024 * 1024;

// ── CAS circuit breaker ──────────────────────────────────────────────────────

pub const CAS_BREAKER_FAILURE_THRESHOLD: u32 = 3;
pub const CAS_BREAKER_OPEN_SECS: u64 = 60;
