use sha2::{Digest, Sha256};

use canswarm_core::types::{AgentId, ArtifactHash, PayloadHash};

/// Compute SHA-256 of arbitrary bytes → 32-byte array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derive an AgentId from raw Ed25519 verifying-key bytes.
pub fn agent_id_from_pubkey(pubkey_bytes: &[u8]) -> AgentId {
    AgentId::from_bytes(sha256(pubkey_bytes))
}

/// Hash a canonical payload serialization.
pub fn payload_hash(canonical_bytes: &[u8]) -> PayloadHash {
    PayloadHash::from_bytes(sha256(canonical_bytes))
}

/// Content address for an artifact blob.
pub fn artifact_hash(bytes: &[u8]) -> ArtifactHash {
    ArtifactHash::from_bytes(sha256(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
