//! The verifier registry.
//!
//! Registration binds a manifest to the agent's stable identity. Stake
//! amounts live in the ledger (single source of truth); the pool joins them
//! in when computing the active set.

use std::sync::Arc;

use tracing::{debug, info};

use canswarm_core::config::SwarmConfig;
use canswarm_core::constants::REPUTATION_BASELINE_BP;
use canswarm_core::error::SwarmError;
use canswarm_core::protocol::{VerifierManifest, VerifierRecord};
use canswarm_core::types::{AgentId, Timestamp};
use canswarm_ledger::Ledger;
use canswarm_store::SwarmDb;

pub struct VerifierPool {
    db: Arc<SwarmDb>,
}

impl VerifierPool {
    pub fn new(db: Arc<SwarmDb>) -> Self {
        Self { db }
    }

    /// Register (or re-activate) a verifier.
    ///
    /// A returning identity keeps its reputation history; a fresh identity
    /// starts at baseline. Re-registering under a new keypair is a new
    /// identity — that is the Sybil defence, not a loophole.
    pub fn register(&self, manifest: VerifierManifest, now: Timestamp) -> Result<(), SwarmError> {
        let record = match self.db.get_verifier(&manifest.agent)? {
            Some(mut existing) => {
                existing.manifest = manifest;
                existing.last_active = now;
                existing
            }
            None => VerifierRecord {
                manifest,
                reputation_bp: REPUTATION_BASELINE_BP,
                registered_at: now,
                last_active: now,
            },
        };
        info!(agent = %record.manifest.agent, org = %record.manifest.org, "verifier registered");
        self.db.put_verifier(&record)
    }

    pub fn deregister(&self, agent: &AgentId) -> Result<(), SwarmError> {
        debug!(agent = %agent, "verifier deregistered");
        self.db.remove_verifier(agent)
    }

    pub fn get(&self, agent: &AgentId) -> Result<Option<VerifierRecord>, SwarmError> {
        self.db.get_verifier(agent)
    }

    pub fn is_registered(&self, agent: &AgentId) -> Result<bool, SwarmError> {
        Ok(self.db.get_verifier(agent)?.is_some())
    }

    /// Refresh an agent's recency timestamp.
    pub fn touch(&self, agent: &AgentId, now: Timestamp) -> Result<(), SwarmError> {
        if let Some(mut record) = self.db.get_verifier(agent)? {
            record.last_active = now;
            self.db.put_verifier(&record)?;
        }
        Ok(())
    }

    pub fn put(&self, record: &VerifierRecord) -> Result<(), SwarmError> {
        self.db.put_verifier(record)
    }

    /// The active set: registered agents with stake ≥ min_stake whose last
    /// activity is within the recency horizon.
    pub fn active_set(
        &self,
        ledger: &Ledger,
        cfg: &SwarmConfig,
        now: Timestamp,
    ) -> Result<Vec<VerifierRecord>, SwarmError> {
        let horizon = cfg.verifier_recency_horizon_secs as i64;
        let mut out = Vec::new();
        for record in self.db.iter_verifiers()? {
            let stake = ledger.stake_of(&record.manifest.agent)?;
            if stake >= cfg.min_verifier_stake && now - record.last_active <= horizon {
                out.push(record);
            }
        }
        // Deterministic order for everything derived from the set.
        out.sort_by_key(|r| r.manifest.agent);
        Ok(out)
    }
}

/// Related-party link: same organisation or same network-autonomy zone.
/// Region alone is too coarse to count as a link.
pub fn related_party(a: &VerifierManifest, b: &VerifierManifest) -> bool {
    a.org == b.org || a.zone == b.zone
}
