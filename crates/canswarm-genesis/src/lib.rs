//! canswarm-genesis
//!
//! Bootstrap of a fresh swarm database: the genesis policy capsule, the
//! SYSTEM pool account, the initial credit mints, and epoch 0. Idempotent:
//! applying the same params twice is a no-op, applying different params to
//! an initialized database is an error.

use serde::{Deserialize, Serialize};
use tracing::info;

use canswarm_core::constants::{MAX_ENVELOPE_BYTES, SYSTEM_AGENT};
use canswarm_core::error::SwarmError;
use canswarm_core::protocol::{EpochReason, EpochRecord, PolicyCapsule, VerifierManifest};
use canswarm_core::types::{AgentId, CapsuleHash, Credits, Timestamp};
use canswarm_ledger::Ledger;
use canswarm_policy::{capsule_hash, PolicyGate};
use canswarm_store::SwarmDb;
use canswarm_verifier::VerifierPool;

/// Everything a fresh node needs to agree with its peers from block one.
///
/// Verifier registration and staking have no protocol verb (registration
/// is out-of-band), so founding verifiers enter through genesis — which
/// also means a replay from the same genesis reproduces the pool exactly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenesisParams {
    /// Accounts funded at genesis (agent, credits).
    pub initial_accounts: Vec<(AgentId, Credits)>,
    /// Founding verifiers: manifest plus stake locked at genesis. The
    /// stake is minted on top of any `initial_accounts` entry.
    pub initial_verifiers: Vec<(VerifierManifest, Credits)>,
    /// Credits seeded into the SYSTEM pool (funds early challenge rewards).
    pub system_pool: Credits,
    /// The first policy capsule.
    pub capsule: PolicyCapsule,
    /// Genesis wall time (UTC seconds).
    pub genesis_ts: Timestamp,
}

impl Default for GenesisParams {
    fn default() -> Self {
        Self {
            initial_accounts: Vec::new(),
            initial_verifiers: Vec::new(),
            system_pool: 0,
            capsule: PolicyCapsule {
                version: 1,
                max_envelope_bytes: MAX_ENVELOPE_BYTES,
                compat: Vec::new(),
            },
            genesis_ts: 0,
        }
    }
}

const GENESIS_META_KEY: &str = "genesis_capsule";

/// Apply genesis to a fresh database. Returns the genesis capsule hash.
pub fn apply_genesis(
    db: &SwarmDb,
    ledger: &Ledger,
    gate: &PolicyGate,
    pool: &VerifierPool,
    params: &GenesisParams,
) -> Result<CapsuleHash, SwarmError> {
    let hash = capsule_hash(&params.capsule)?;

    if let Some(bytes) = db.get_meta(GENESIS_META_KEY)? {
        let prior = String::from_utf8_lossy(&bytes).to_string();
        if prior == hash.to_hex() {
            // Same params, already applied.
            return Ok(hash);
        }
        return Err(SwarmError::GenesisAlreadyApplied);
    }

    gate.register_capsule(&params.capsule)?;
    gate.index_capsule(&hash)?;

    ledger.create_account(&SYSTEM_AGENT, params.genesis_ts)?;
    if params.system_pool > 0 {
        ledger.mint(&SYSTEM_AGENT, params.system_pool, &SYSTEM_AGENT, params.genesis_ts)?;
    }
    for (agent, amount) in &params.initial_accounts {
        ledger.mint(agent, *amount, &SYSTEM_AGENT, params.genesis_ts)?;
    }
    for (manifest, stake) in &params.initial_verifiers {
        ledger.mint(&manifest.agent, *stake, &SYSTEM_AGENT, params.genesis_ts)?;
        ledger.stake(&manifest.agent, *stake)?;
        pool.register(manifest.clone(), params.genesis_ts)?;
    }

    db.put_epoch_record(&EpochRecord {
        epoch: 0,
        reason: EpochReason::Bootstrap,
        started_at: params.genesis_ts,
    })?;
    db.put_meta(GENESIS_META_KEY, hash.to_hex().as_bytes())?;

    info!(
        capsule = %hash,
        accounts = params.initial_accounts.len(),
        system_pool = params.system_pool,
        "genesis applied"
    );
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn setup(name: &str) -> (Arc<SwarmDb>, Ledger, PolicyGate, VerifierPool) {
        let dir =
            std::env::temp_dir().join(format!("canswarm_genesis_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let db = Arc::new(SwarmDb::open(&dir).unwrap());
        (
            Arc::clone(&db),
            Ledger::new(Arc::clone(&db)),
            PolicyGate::new(Arc::clone(&db)),
            VerifierPool::new(db),
        )
    }

    fn params() -> GenesisParams {
        GenesisParams {
            initial_accounts: vec![
                (AgentId::from_bytes([1; 32]), 10_000),
                (AgentId::from_bytes([2; 32]), 5_000),
            ],
            system_pool: 1_000,
            ..GenesisParams::default()
        }
    }

    #[test]
    fn genesis_funds_accounts_and_conserves() {
        let (_db, ledger, gate, pool) = setup("fund");
        apply_genesis(&_db, &ledger, &gate, &pool, &params()).unwrap();
        assert_eq!(
            ledger.get_balance(&AgentId::from_bytes([1; 32])).unwrap(),
            10_000
        );
        assert_eq!(ledger.get_balance(&SYSTEM_AGENT).unwrap(), 1_000);
        let report = ledger.conservation().unwrap();
        assert_eq!(report.minted, 16_000);
        assert!(report.holds());
    }

    #[test]
    fn reapply_same_params_is_noop() {
        let (db, ledger, gate, pool) = setup("idem");
        let first = apply_genesis(&db, &ledger, &gate, &pool, &params()).unwrap();
        let second = apply_genesis(&db, &ledger, &gate, &pool, &params()).unwrap();
        assert_eq!(first, second);
        // Balances were not doubled.
        assert_eq!(
            ledger.get_balance(&AgentId::from_bytes([1; 32])).unwrap(),
            10_000
        );
    }

    #[test]
    fn different_params_on_initialized_db_fail() {
        let (db, ledger, gate, pool) = setup("conflict");
        apply_genesis(&db, &ledger, &gate, &pool, &params()).unwrap();
        let mut other = params();
        other.capsule.version = 2;
        assert!(matches!(
            apply_genesis(&db, &ledger, &gate, &pool, &other),
            Err(SwarmError::GenesisAlreadyApplied)
        ));
    }

    #[test]
    fn genesis_registers_the_capsule() {
        let (db, ledger, gate, pool) = setup("capsule");
        let hash = apply_genesis(&db, &ledger, &gate, &pool, &params()).unwrap();
        assert!(db.capsule_known(&hash));
    }
}
