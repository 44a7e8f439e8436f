//! Envelope construction and verification.
//!
//! Build → sign → verify is the only path an envelope takes into the swarm;
//! every field invariant of the data model is checked here so downstream
//! components can trust a verified envelope completely.

use canswarm_core::envelope::{Envelope, Payload};
use canswarm_core::error::SwarmError;
use canswarm_core::types::{
    CapsuleHash, EnvelopeId, Epoch, Lamport, Nonce, PayloadHash, ThreadId, Timestamp,
};

use crate::canonical::to_canonical_json;
use crate::hash::sha256;
use crate::keypair::{verify_signature, KeyPair};

/// Everything an envelope needs besides the payload and the key.
#[derive(Clone, Copy, Debug)]
pub struct EnvelopeMeta {
    pub thread: ThreadId,
    pub lamport: Lamport,
    pub ts: Timestamp,
    pub capsule: CapsuleHash,
    pub epoch: Epoch,
    pub nonce: Nonce,
}

/// Build and sign an envelope in one step.
///
/// The verb is taken from the payload variant, the payload hash from the
/// canonical payload bytes, and the id from the canonical body bytes.
pub fn build_envelope(
    payload: Payload,
    meta: EnvelopeMeta,
    key: &KeyPair,
) -> Result<Envelope, SwarmError> {
    if meta.lamport == 0 {
        return Err(SwarmError::LamportInvalid);
    }

    let payload_bytes = to_canonical_json(&payload)?;
    let payload_hash = PayloadHash::from_bytes(sha256(&payload_bytes));

    let mut envelope = Envelope {
        id: EnvelopeId::from_bytes([0u8; 32]),
        thread: meta.thread,
        kind: payload.verb(),
        lamport: meta.lamport,
        ts: meta.ts,
        sender: key.agent_id,
        sender_key: key.public_key,
        payload_hash,
        payload,
        capsule: meta.capsule,
        epoch: meta.epoch,
        nonce: meta.nonce,
        signature: canswarm_core::types::Signature(Vec::new()),
    };

    let body_bytes = to_canonical_json(&envelope.body())?;
    envelope.id = EnvelopeId::from_bytes(sha256(&body_bytes));
    envelope.signature = key.sign(&body_bytes);
    Ok(envelope)
}

/// Full structural and cryptographic verification of a signed envelope.
///
/// Checks, in order: payload variant matches `kind`, Lamport > 0, sender id
/// derives from the carried key, payload hash, envelope id, and the
/// detached signature. Any failure is terminal for the envelope.
pub fn verify_envelope(envelope: &Envelope) -> Result<(), SwarmError> {
    if envelope.payload.verb() != envelope.kind {
        return Err(SwarmError::PayloadKindMismatch {
            kind: envelope.kind.as_wire().to_string(),
        });
    }
    if envelope.lamport == 0 {
        return Err(SwarmError::LamportInvalid);
    }
    if crate::hash::agent_id_from_pubkey(&envelope.sender_key.0) != envelope.sender {
        return Err(SwarmError::SignatureInvalid);
    }

    let payload_bytes = to_canonical_json(&envelope.payload)?;
    let computed = PayloadHash::from_bytes(sha256(&payload_bytes));
    if computed != envelope.payload_hash {
        return Err(SwarmError::PayloadHashMismatch {
            declared: envelope.payload_hash.to_hex(),
            computed: computed.to_hex(),
        });
    }

    let body_bytes = to_canonical_json(&envelope.body())?;
    if EnvelopeId::from_bytes(sha256(&body_bytes)) != envelope.id {
        return Err(SwarmError::SignatureInvalid);
    }
    if !verify_signature(&envelope.sender_key, &body_bytes, &envelope.signature) {
        return Err(SwarmError::SignatureInvalid);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use canswarm_core::envelope::{HeartbeatPayload, Payload};
    use canswarm_core::types::{LeaseId, TaskId};

    fn meta(lamport: Lamport) -> EnvelopeMeta {
        EnvelopeMeta {
            thread: ThreadId::from_bytes([1; 32]),
            lamport,
            ts: 1_700_000_000,
            capsule: CapsuleHash::from_bytes([2; 32]),
            epoch: 0,
            nonce: 0,
        }
    }

    fn heartbeat() -> Payload {
        Payload::Heartbeat(HeartbeatPayload {
            task: TaskId::from_bytes([3; 32]),
            lease: LeaseId::from_bytes([4; 32]),
        })
    }

    #[test]
    fn build_then_verify() {
        let kp = KeyPair::from_seed([7; 32]);
        let env = build_envelope(heartbeat(), meta(5), &kp).unwrap();
        verify_envelope(&env).unwrap();
    }

    #[test]
    fn zero_lamport_rejected_at_build() {
        let kp = KeyPair::from_seed([7; 32]);
        assert!(matches!(
            build_envelope(heartbeat(), meta(0), &kp),
            Err(SwarmError::LamportInvalid)
        ));
    }

    #[test]
    fn tampered_payload_hash_detected() {
        let kp = KeyPair::from_seed([7; 32]);
        let mut env = build_envelope(heartbeat(), meta(5), &kp).unwrap();
        env.payload_hash = PayloadHash::from_bytes([0xff; 32]);
        assert!(verify_envelope(&env).is_err());
    }

    #[test]
    fn tampered_field_breaks_signature() {
        let kp = KeyPair::from_seed([7; 32]);
        let mut env = build_envelope(heartbeat(), meta(5), &kp).unwrap();
        env.epoch = 9;
        assert!(verify_envelope(&env).is_err());
    }

    #[test]
    fn forged_sender_identity_detected() {
        let kp = KeyPair::from_seed([7; 32]);
        let other = KeyPair::from_seed([8; 32]);
        let mut env = build_envelope(heartbeat(), meta(5), &kp).unwrap();
        env.sender = other.agent_id;
        assert!(verify_envelope(&env).is_err());
    }

    #[test]
    fn envelope_id_is_deterministic() {
        let kp = KeyPair::from_seed([7; 32]);
        let a = build_envelope(heartbeat(), meta(5), &kp).unwrap();
        let b = build_envelope(heartbeat(), meta(5), &kp).unwrap();
        assert_eq!(a.id, b.id);
    }
}
