use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use canswarm_core::types::{AgentId, PublicKey, Signature};

use crate::hash::agent_id_from_pubkey;

/// A swarm keypair: Ed25519 signing + verifying keys with derived AgentId.
///
/// The secret key bytes are zeroized on drop.
#[derive(Serialize, Deserialize)]
pub struct KeyPair {
    pub agent_id: AgentId,
    pub public_key: PublicKey,
    secret_key: [u8; 32],
}

impl KeyPair {
    /// Generate a fresh Ed25519 keypair.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing)
    }

    /// Deterministic keypair from a 32-byte seed. Used by tests and by the
    /// node when restoring an identity file.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    fn from_signing_key(signing: SigningKey) -> Self {
        let pk_bytes = signing.verifying_key().to_bytes();
        Self {
            agent_id: agent_id_from_pubkey(&pk_bytes),
            public_key: PublicKey(pk_bytes),
            secret_key: signing.to_bytes(),
        }
    }

    /// Sign `message` with this keypair's secret key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let signing = SigningKey::from_bytes(&self.secret_key);
        Signature(signing.sign(message).to_bytes().to_vec())
    }

    /// Verify `signature` over `message` against this keypair's public key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        verify_signature(&self.public_key, message, signature)
    }
}

/// Verify a detached Ed25519 signature.
pub fn verify_signature(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(&public_key.0) else {
        return false;
    };
    let Ok(sig) = ed25519_dalek::Signature::from_slice(&signature.0) else {
        return false;
    };
    vk.verify(message, &sig).is_ok()
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ agent_id: {:?} }}", self.agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"one outcome per need");
        assert!(kp.verify(b"one outcome per need", &sig));
    }

    #[test]
    fn tampered_message_fails() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"original");
        assert!(!kp.verify(b"tampered", &sig));
    }

    #[test]
    fn seed_is_deterministic() {
        let a = KeyPair::from_seed([9u8; 32]);
        let b = KeyPair::from_seed([9u8; 32]);
        assert_eq!(a.agent_id, b.agent_id);
        assert_eq!(a.public_key, b.public_key);
    }

    #[test]
    fn agent_id_is_hash_of_public_key() {
        let kp = KeyPair::generate();
        assert_eq!(kp.agent_id, agent_id_from_pubkey(&kp.public_key.0));
    }
}
