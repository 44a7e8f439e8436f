//! canswarm-policy
//!
//! The three policy checkpoints:
//!
//! 1. **Preflight** (sender-side): cheap structural + signature check,
//!    result cached by payload hash.
//! 2. **Ingress** (receiver-side): full evaluation against the bound
//!    capsule; produces a digest recorded into the audit trail so replay
//!    can detect policy drift.
//! 3. **Commit gate** (verifier-side): declared resource claims vs observed
//!    telemetry, run before any ATTEST.
//!
//! Every gate fails closed: an internal error denies. The policy runtime
//! itself is external; this crate owns only the contract and the
//! structural capsule evaluation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use canswarm_core::envelope::{Envelope, ResourceClaims};
use canswarm_core::error::SwarmError;
use canswarm_core::protocol::PolicyCapsule;
use canswarm_core::types::{CapsuleHash, PayloadHash};
use canswarm_crypto::{sha256, to_canonical_json, verify_envelope};
use canswarm_store::SwarmDb;

// ── Capsule identity ─────────────────────────────────────────────────────────

/// The capsule's identity: SHA-256 of its canonical serialization.
pub fn capsule_hash(capsule: &PolicyCapsule) -> Result<CapsuleHash, SwarmError> {
    let bytes = to_canonical_json(capsule)?;
    Ok(CapsuleHash::from_bytes(sha256(&bytes)))
}

/// Digest of one ingress evaluation. Replay compares these to detect a
/// node that validated under a different capsule than it logged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PolicyEvalDigest(pub [u8; 32]);

// ── Gate ─────────────────────────────────────────────────────────────────────

pub struct PolicyGate {
    db: Arc<SwarmDb>,
    /// Preflight results keyed by payload hash. Only successes are cached;
    /// failures re-evaluate so a transient error cannot poison the cache.
    preflight_cache: Mutex<HashMap<PayloadHash, ()>>,
}

impl PolicyGate {
    pub fn new(db: Arc<SwarmDb>) -> Self {
        Self {
            db,
            preflight_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Register a capsule so envelopes bound to it pass ingress.
    pub fn register_capsule(&self, capsule: &PolicyCapsule) -> Result<CapsuleHash, SwarmError> {
        let hash = capsule_hash(capsule)?;
        self.db.put_capsule(&hash, capsule)?;
        debug!(capsule = %hash, version = capsule.version, "policy capsule registered");
        Ok(hash)
    }

    /// Resolve a capsule hash, honouring compatibility lists: a hash is
    /// acceptable if it is registered directly or named in the compat list
    /// of any registered capsule.
    fn capsule_accepted(&self, hash: &CapsuleHash) -> Result<bool, SwarmError> {
        if self.db.capsule_known(hash) {
            return Ok(true);
        }
        // Compatibility is rollover-sized (a handful of capsules), so the
        // linear scan stays cheap.
        for record in self.known_capsules()? {
            if record.compat.contains(hash) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn known_capsules(&self) -> Result<Vec<PolicyCapsule>, SwarmError> {
        // The capsules tree is tiny; enumerate via the stored genesis hash
        // plus whatever has been registered since.
        let mut out = Vec::new();
        if let Some(bytes) = self.db.get_meta("capsule_hashes")? {
            let hashes: Vec<CapsuleHash> = bincode_list(&bytes)?;
            for hash in hashes {
                if let Some(c) = self.db.get_capsule(&hash)? {
                    out.push(c);
                }
            }
        }
        Ok(out)
    }

    /// Track a capsule hash in the enumerable index.
    pub fn index_capsule(&self, hash: &CapsuleHash) -> Result<(), SwarmError> {
        let mut hashes: Vec<CapsuleHash> = match self.db.get_meta("capsule_hashes")? {
            Some(bytes) => bincode_list(&bytes)?,
            None => Vec::new(),
        };
        if !hashes.contains(hash) {
            hashes.push(*hash);
            let bytes = serde_bytes(&hashes)?;
            self.db.put_meta("capsule_hashes", &bytes)?;
        }
        Ok(())
    }

    // ── Checkpoint 1: preflight ──────────────────────────────────────────────

    /// Sender-side structural check before publish. Cached by payload hash.
    pub fn preflight(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        {
            let cache = self.preflight_cache.lock().expect("preflight cache poisoned");
            if cache.contains_key(&envelope.payload_hash) {
                return Ok(());
            }
        }
        self.check_size(envelope)?;
        verify_envelope(envelope)?;
        self.preflight_cache
            .lock()
            .expect("preflight cache poisoned")
            .insert(envelope.payload_hash, ());
        Ok(())
    }

    // ── Checkpoint 2: ingress ────────────────────────────────────────────────

    /// Receiver-side full evaluation. Runs after the bus, before dispatch;
    /// there is no handler path that skips it.
    pub fn ingress(&self, envelope: &Envelope) -> Result<PolicyEvalDigest, SwarmError> {
        self.check_size(envelope)?;
        verify_envelope(envelope)?;
        if !self.capsule_accepted(&envelope.capsule)? {
            warn!(capsule = %envelope.capsule, id = %envelope.id, "unknown policy capsule");
            return Err(SwarmError::PolicyCapsuleUnknown(envelope.capsule.to_hex()));
        }

        let mut buf = Vec::with_capacity(96);
        buf.extend_from_slice(envelope.id.as_bytes());
        buf.extend_from_slice(envelope.capsule.as_bytes());
        buf.extend_from_slice(b"ALLOW");
        Ok(PolicyEvalDigest(sha256(&buf)))
    }

    // ── Checkpoint 3: commit gate ────────────────────────────────────────────

    /// Verifier-side check of a COMMIT's declared resource claims against
    /// observed telemetry. An understated claim rejects the commit before
    /// any verifier attests it.
    pub fn commit_gate(
        &self,
        declared: &ResourceClaims,
        observed: &ResourceClaims,
    ) -> Result<(), SwarmError> {
        if observed.cpu_ms > declared.cpu_ms
            || observed.mem_bytes > declared.mem_bytes
            || observed.io_bytes > declared.io_bytes
        {
            return Err(SwarmError::PolicyDenied(format!(
                "resource claims understated: declared {declared:?}, observed {observed:?}"
            )));
        }
        Ok(())
    }

    fn check_size(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        let max = self
            .db
            .get_capsule(&envelope.capsule)?
            .map(|c| c.max_envelope_bytes)
            .unwrap_or(canswarm_core::constants::MAX_ENVELOPE_BYTES);
        let got = to_canonical_json(envelope)?.len();
        if got > max {
            return Err(SwarmError::SizeLimit { max, got });
        }
        Ok(())
    }
}

fn bincode_list(bytes: &[u8]) -> Result<Vec<CapsuleHash>, SwarmError> {
    let hex_list: Vec<String> = serde_json::from_slice(bytes)
        .map_err(|e| SwarmError::Serialization(e.to_string()))?;
    hex_list
        .iter()
        .map(|h| CapsuleHash::from_hex(h).map_err(|e| SwarmError::Serialization(e.to_string())))
        .collect()
}

fn serde_bytes(hashes: &[CapsuleHash]) -> Result<Vec<u8>, SwarmError> {
    let hex_list: Vec<String> = hashes.iter().map(|h| h.to_hex()).collect();
    serde_json::to_vec(&hex_list).map_err(|e| SwarmError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use canswarm_core::envelope::{HeartbeatPayload, Payload};
    use canswarm_core::types::{LeaseId, TaskId, ThreadId};
    use canswarm_crypto::{build_envelope, EnvelopeMeta, KeyPair};

    fn gate(name: &str) -> PolicyGate {
        let dir =
            std::env::temp_dir().join(format!("canswarm_policy_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        PolicyGate::new(Arc::new(SwarmDb::open(&dir).unwrap()))
    }

    fn default_capsule() -> PolicyCapsule {
        PolicyCapsule {
            version: 1,
            max_envelope_bytes: canswarm_core::constants::MAX_ENVELOPE_BYTES,
            compat: vec![],
        }
    }

    fn envelope(kp: &KeyPair, capsule: CapsuleHash) -> Envelope {
        build_envelope(
            Payload::Heartbeat(HeartbeatPayload {
                task: TaskId::from_bytes([1; 32]),
                lease: LeaseId::from_bytes([2; 32]),
            }),
            EnvelopeMeta {
                thread: ThreadId::from_bytes([1; 32]),
                lamport: 1,
                ts: 0,
                capsule,
                epoch: 0,
                nonce: 0,
            },
            kp,
        )
        .unwrap()
    }

    #[test]
    fn ingress_accepts_known_capsule() {
        let gate = gate("known");
        let hash = gate.register_capsule(&default_capsule()).unwrap();
        gate.index_capsule(&hash).unwrap();
        let kp = KeyPair::from_seed([1; 32]);
        let env = envelope(&kp, hash);
        gate.ingress(&env).unwrap();
    }

    #[test]
    fn ingress_rejects_unknown_capsule() {
        let gate = gate("unknown");
        let kp = KeyPair::from_seed([1; 32]);
        let env = envelope(&kp, CapsuleHash::from_bytes([9; 32]));
        assert!(matches!(
            gate.ingress(&env),
            Err(SwarmError::PolicyCapsuleUnknown(_))
        ));
    }

    #[test]
    fn compat_list_accepts_prior_capsule() {
        let gate = gate("compat");
        let old_hash = CapsuleHash::from_bytes([3; 32]);
        let mut capsule = default_capsule();
        capsule.compat.push(old_hash);
        let hash = gate.register_capsule(&capsule).unwrap();
        gate.index_capsule(&hash).unwrap();

        let kp = KeyPair::from_seed([1; 32]);
        let env = envelope(&kp, old_hash);
        gate.ingress(&env).unwrap();
    }

    #[test]
    fn ingress_rejects_tampered_envelope() {
        let gate = gate("tampered");
        let hash = gate.register_capsule(&default_capsule()).unwrap();
        gate.index_capsule(&hash).unwrap();
        let kp = KeyPair::from_seed([1; 32]);
        let mut env = envelope(&kp, hash);
        env.lamport = 999;
        assert!(gate.ingress(&env).is_err());
    }

    #[test]
    fn preflight_caches_by_payload_hash() {
        let gate = gate("cache");
        let kp = KeyPair::from_seed([1; 32]);
        let env = envelope(&kp, CapsuleHash::from_bytes([0; 32]));
        gate.preflight(&env).unwrap();
        // Cached: passes again without re-verification.
        gate.preflight(&env).unwrap();
    }

    #[test]
    fn commit_gate_rejects_understated_claims() {
        let gate = gate("commit");
        let declared = ResourceClaims {
            cpu_ms: 100,
            mem_bytes: 1_000,
            io_bytes: 10,
        };
        let honest = ResourceClaims {
            cpu_ms: 90,
            mem_bytes: 900,
            io_bytes: 10,
        };
        gate.commit_gate(&declared, &honest).unwrap();
        let hog = ResourceClaims {
            cpu_ms: 500,
            ..honest
        };
        assert!(gate.commit_gate(&declared, &hog).is_err());
    }

    #[test]
    fn ingress_digest_is_stable() {
        let gate = gate("digest");
        let hash = gate.register_capsule(&default_capsule()).unwrap();
        gate.index_capsule(&hash).unwrap();
        let kp = KeyPair::from_seed([1; 32]);
        let env = envelope(&kp, hash);
        assert_eq!(gate.ingress(&env).unwrap(), gate.ingress(&env).unwrap());
    }
}
