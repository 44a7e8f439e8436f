//! canswarm-challenge
//!
//! Bonded disputes against COMMITs: typed proofs, the bond schedule,
//! submission/withdrawal, and the adjudication flow with its slash
//! distribution and quorum escalation.

pub mod adjudicate;

use std::sync::Arc;

use tracing::{debug, info};

use canswarm_core::config::SwarmConfig;
use canswarm_core::constants::{
    CHALLENGE_WITHDRAW_FEE_PCT, K_ESCALATION_CAP_FACTOR, K_ESCALATION_STEP,
};
use canswarm_core::error::SwarmError;
use canswarm_core::ledger::EscrowPurpose;
use canswarm_core::protocol::{ChallengePhase, ChallengeRecord, ProofType};
use canswarm_core::types::{
    AgentId, ArtifactHash, ChallengeId, CommitId, Credits, EscrowId, TaskId, Timestamp,
};
use canswarm_ledger::Ledger;
use canswarm_store::SwarmDb;

pub use adjudicate::{evaluate_proof, resolve_rejected, resolve_upheld, UpheldOutcome};

/// Bond required for a proof type at a complexity class (1, 2 or 5).
pub fn required_bond(proof_type: ProofType, complexity: u8) -> Result<Credits, SwarmError> {
    if !matches!(complexity, 1 | 2 | 5) {
        return Err(SwarmError::Other(format!(
            "invalid complexity multiplier {complexity}; must be 1, 2 or 5"
        )));
    }
    Ok(proof_type.base_bond() * complexity as Credits)
}

/// Escalated result quorum after an upheld challenge: K += 2, capped at
/// twice the configured target.
pub fn escalated_k_result(prior: u32, cfg: &SwarmConfig) -> u32 {
    (prior + K_ESCALATION_STEP).min(K_ESCALATION_CAP_FACTOR * cfg.k_target)
}

pub struct ChallengeBook {
    db: Arc<SwarmDb>,
}

impl ChallengeBook {
    pub fn new(db: Arc<SwarmDb>) -> Self {
        Self { db }
    }

    /// Submit a bonded challenge inside the window. The bond is escrowed in
    /// the same breath — an unfunded challenge never becomes PENDING.
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        &self,
        ledger: &Ledger,
        challenge_id: ChallengeId,
        task: TaskId,
        commit: CommitId,
        challenger: AgentId,
        proof_type: ProofType,
        complexity: u8,
        evidence: ArtifactHash,
        bond: Credits,
        deadline: Timestamp,
        now: Timestamp,
    ) -> Result<ChallengeRecord, SwarmError> {
        if now > deadline {
            return Err(SwarmError::ChallengeWindowClosed { deadline });
        }
        let required = required_bond(proof_type, complexity)?;
        if bond < required {
            return Err(SwarmError::BondRequired { required });
        }
        if let Some(existing) = self.db.get_challenge(&challenge_id)? {
            // Redelivered CHALLENGE envelope.
            return Ok(existing);
        }

        let bond_escrow = EscrowId::from_bytes(*challenge_id.as_bytes());
        ledger
            .escrow(
                &challenger,
                bond,
                bond_escrow,
                EscrowPurpose::ChallengeBond {
                    challenge: challenge_id,
                },
                now,
            )
            .map_err(|e| match e {
                SwarmError::InsufficientBalance { .. } => {
                    SwarmError::BondEscrowFailed(e.to_string())
                }
                other => other,
            })?;

        let record = ChallengeRecord {
            challenge_id,
            task,
            commit,
            challenger,
            proof_type,
            complexity,
            evidence,
            bond,
            bond_escrow,
            deadline,
            submitted_at: now,
            phase: ChallengePhase::Pending,
        };
        self.db.put_challenge(&record)?;
        info!(
            challenge = %challenge_id,
            task = %task,
            ?proof_type,
            bond,
            "challenge submitted"
        );
        Ok(record)
    }

    pub fn get(&self, id: &ChallengeId) -> Result<Option<ChallengeRecord>, SwarmError> {
        self.db.get_challenge(id)
    }

    /// Pending challenges against a commit.
    pub fn pending_for_commit(&self, commit: &CommitId) -> Result<Vec<ChallengeRecord>, SwarmError> {
        Ok(self
            .db
            .iter_challenges()?
            .into_iter()
            .filter(|c| c.commit == *commit && c.phase == ChallengePhase::Pending)
            .collect())
    }

    /// True if any challenge against this commit was upheld or is still
    /// pending — both block bounty payout.
    pub fn payout_blocked(&self, commit: &CommitId) -> Result<bool, SwarmError> {
        Ok(self.db.iter_challenges()?.into_iter().any(|c| {
            c.commit == *commit
                && matches!(c.phase, ChallengePhase::Pending | ChallengePhase::Upheld)
        }))
    }

    /// Withdraw a pending challenge. The bond comes back minus a small fee.
    pub fn withdraw(
        &self,
        ledger: &Ledger,
        challenge_id: &ChallengeId,
    ) -> Result<Credits, SwarmError> {
        let mut record = self
            .db
            .get_challenge(challenge_id)?
            .ok_or_else(|| SwarmError::ChallengeMissing(challenge_id.to_hex()))?;
        if record.phase != ChallengePhase::Pending {
            return Err(SwarmError::ChallengeAlreadyResolved(challenge_id.to_hex()));
        }
        ledger.release_escrow(&record.bond_escrow, &record.challenger)?;
        let fee = record.bond * CHALLENGE_WITHDRAW_FEE_PCT / 100;
        if fee > 0 {
            ledger.burn(&record.challenger, fee)?;
        }
        record.phase = ChallengePhase::Withdrawn;
        self.db.put_challenge(&record)?;
        debug!(challenge = %challenge_id, fee, "challenge withdrawn");
        Ok(record.bond - fee)
    }

    pub fn put(&self, record: &ChallengeRecord) -> Result<(), SwarmError> {
        self.db.put_challenge(record)
    }

    // ── Per-task result quorum (escalated by upheld challenges) ──────────────

    pub fn k_result_for(&self, task: &TaskId, base: u32) -> Result<u32, SwarmError> {
        match self.db.get_meta(&format!("k_result/{}", task.to_hex()))? {
            Some(bytes) if bytes.len() == 4 => {
                let mut arr = [0u8; 4];
                arr.copy_from_slice(&bytes);
                Ok(u32::from_be_bytes(arr).max(base))
            }
            _ => Ok(base),
        }
    }

    pub fn set_k_result(&self, task: &TaskId, k: u32) -> Result<(), SwarmError> {
        self.db
            .put_meta(&format!("k_result/{}", task.to_hex()), &k.to_be_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canswarm_core::constants::SYSTEM_AGENT;

    fn setup(name: &str) -> (ChallengeBook, Ledger) {
        let dir =
            std::env::temp_dir().join(format!("canswarm_chal_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let db = Arc::new(SwarmDb::open(&dir).unwrap());
        (ChallengeBook::new(Arc::clone(&db)), Ledger::new(db))
    }

    fn fund(ledger: &Ledger, tag: u8, amount: Credits) -> AgentId {
        let agent = AgentId::from_bytes([tag; 32]);
        ledger.mint(&agent, amount, &SYSTEM_AGENT, 0).unwrap();
        agent
    }

    #[test]
    fn bond_schedule_scales() {
        assert_eq!(required_bond(ProofType::SchemaViolation, 1).unwrap(), 10);
        assert_eq!(required_bond(ProofType::MissingCitation, 2).unwrap(), 50);
        assert_eq!(required_bond(ProofType::OutputMismatch, 5).unwrap(), 500);
        assert!(required_bond(ProofType::OutputMismatch, 3).is_err());
    }

    #[test]
    fn submit_escrows_bond_atomically() {
        let (book, ledger) = setup("submit");
        let challenger = fund(&ledger, 1, 1_000);
        book.submit(
            &ledger,
            ChallengeId::from_bytes([1; 32]),
            TaskId::from_bytes([2; 32]),
            CommitId::from_bytes([3; 32]),
            challenger,
            ProofType::OutputMismatch,
            1,
            ArtifactHash::from_bytes([4; 32]),
            100,
            1_000,
            10,
        )
        .unwrap();
        assert_eq!(ledger.get_balance(&challenger).unwrap(), 900);
        assert!(ledger.conservation().unwrap().holds());
    }

    #[test]
    fn underfunded_bond_fails_cleanly() {
        let (book, ledger) = setup("underfunded");
        let challenger = fund(&ledger, 1, 50);
        let result = book.submit(
            &ledger,
            ChallengeId::from_bytes([1; 32]),
            TaskId::from_bytes([2; 32]),
            CommitId::from_bytes([3; 32]),
            challenger,
            ProofType::OutputMismatch,
            1,
            ArtifactHash::from_bytes([4; 32]),
            100,
            1_000,
            10,
        );
        assert!(matches!(result, Err(SwarmError::BondEscrowFailed(_))));
        assert_eq!(ledger.get_balance(&challenger).unwrap(), 50);
    }

    #[test]
    fn late_challenge_is_rejected() {
        let (book, ledger) = setup("late");
        let challenger = fund(&ledger, 1, 1_000);
        let result = book.submit(
            &ledger,
            ChallengeId::from_bytes([1; 32]),
            TaskId::from_bytes([2; 32]),
            CommitId::from_bytes([3; 32]),
            challenger,
            ProofType::SchemaViolation,
            1,
            ArtifactHash::from_bytes([4; 32]),
            10,
            100,
            101,
        );
        assert!(matches!(
            result,
            Err(SwarmError::ChallengeWindowClosed { deadline: 100 })
        ));
    }

    #[test]
    fn withdraw_returns_bond_minus_fee() {
        let (book, ledger) = setup("withdraw");
        let challenger = fund(&ledger, 1, 1_000);
        let id = ChallengeId::from_bytes([1; 32]);
        book.submit(
            &ledger,
            id,
            TaskId::from_bytes([2; 32]),
            CommitId::from_bytes([3; 32]),
            challenger,
            ProofType::OutputMismatch,
            1,
            ArtifactHash::from_bytes([4; 32]),
            100,
            1_000,
            10,
        )
        .unwrap();
        let returned = book.withdraw(&ledger, &id).unwrap();
        assert_eq!(returned, 95);
        assert_eq!(ledger.get_balance(&challenger).unwrap(), 995);
        assert!(ledger.conservation().unwrap().holds());
        // Cannot withdraw twice.
        assert!(book.withdraw(&ledger, &id).is_err());
    }

    #[test]
    fn escalation_steps_and_caps() {
        let cfg = SwarmConfig::default();
        assert_eq!(escalated_k_result(1, &cfg), 3);
        assert_eq!(escalated_k_result(3, &cfg), 5);
        assert_eq!(escalated_k_result(9, &cfg), 10);
        assert_eq!(escalated_k_result(10, &cfg), 10);
    }
}
