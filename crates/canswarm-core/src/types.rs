use serde::{Deserialize, Serialize};
use std::fmt;

/// Credit balance in the swarm economy. Integer only; no fractional
/// credits. u64 covers the full supply cap with nine decimal orders of
/// headroom, and (unlike u128) serializes through canonical JSON.
pub type Credits = u64;

/// Logical (Lamport) timestamp. Strictly positive on any signed envelope.
pub type Lamport = u64;

/// Coordination epoch. Monotone non-decreasing on every node; advanced on
/// partition heal.
pub type Epoch = u64;

/// Unix timestamp (seconds, UTC). Advisory only — ordering uses Lamport.
pub type Timestamp = i64;

/// Per-sender envelope counter (replay protection inside a thread).
pub type Nonce = u64;

// ── AgentId ──────────────────────────────────────────────────────────────────

/// 32-byte stable agent identity derived as SHA-256(ed25519_public_key).
///
/// Reputation and stake bind to this id, not to the keypair, so rotating a
/// key under the same registration keeps history while re-registering under
/// a fresh identity starts at baseline.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub [u8; 32]);

impl AgentId {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Base-58 encoded string representation.
    pub fn to_b58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    pub fn from_b58(s: &str) -> Result<Self, bs58::decode::Error> {
        let bytes = bs58::decode(s).into_vec()?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes[..32]);
        Ok(Self(arr))
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b58())
    }
}

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentId({})", &self.to_b58()[..8])
    }
}

// ── Hash-derived identifiers ─────────────────────────────────────────────────

/// Declare a 32-byte hash-derived identifier with hex rendering.
///
/// All of these are SHA-256 outputs (envelope bodies, payloads, artifacts),
/// so they share the same shape: `from_bytes` / `as_bytes` / `to_hex` /
/// `from_hex`, hex `Display`, truncated `Debug`.
macro_rules! hash_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub fn from_bytes(b: [u8; 32]) -> Self {
                Self(b)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s)?;
                if bytes.len() != 32 {
                    return Err(hex::FromHexError::InvalidStringLength);
                }
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                Ok(Self(arr))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({}…)"), &self.to_hex()[..16])
            }
        }
    };
}

hash_id! {
    /// Envelope identifier: SHA-256 of the canonical envelope body.
    EnvelopeId
}

hash_id! {
    /// Causal scope containing one task graph and its envelopes.
    ThreadId
}

hash_id! {
    /// Identifier of a NEED. Equal to the id of the NEED envelope that
    /// opened it; the consensus key and auction key both derive from it.
    NeedId
}

hash_id! {
    /// Task node identifier in the plan op-log.
    TaskId
}

hash_id! {
    /// Identifier of a PROPOSE (bid). Equal to the proposing envelope's id.
    ProposalId
}

hash_id! {
    /// Identifier of a COMMIT. Equal to the committing envelope's id.
    CommitId
}

hash_id! {
    /// Identifier of a CHALLENGE. Equal to the challenging envelope's id.
    ChallengeId
}

hash_id! {
    /// Plan op identifier.
    OpId
}

hash_id! {
    /// SHA-256 of a canonical payload.
    PayloadHash
}

hash_id! {
    /// Identity of a policy capsule: SHA-256 of its canonical definition.
    CapsuleHash
}

hash_id! {
    /// Content address of an artifact in the CAS.
    ArtifactHash
}

hash_id! {
    /// Escrow contract identifier (derived from the opening envelope).
    EscrowId
}

hash_id! {
    /// Lease identifier (derived from the CLAIM envelope).
    LeaseId
}

// ── Ed25519 key material ─────────────────────────────────────────────────────

/// Ed25519 verifying key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}…)", &hex::encode(self.0)[..16])
    }
}

/// Detached Ed25519 signature (64 bytes).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}b)", self.0.len())
    }
}
