//! Challenge adjudication.
//!
//! Typed proofs have deterministic check procedures over the evidence and
//! artifact blobs, so any staked verifier reaches the same verdict from the
//! same CAS contents. Outcome resolution moves credits per the protocol
//! split and pays "honest verifier" claims only when the claimant's ATTEST
//! actually appears in the attestation log for the (task, commit) pair —
//! an unverifiable claim earns nothing.

use serde_json::Value;
use tracing::{info, warn};

use canswarm_core::config::SwarmConfig;
use canswarm_core::constants::{SYSTEM_AGENT, UPHELD_REWARD_PCT};
use canswarm_core::error::SwarmError;
use canswarm_core::ledger::SlashCause;
use canswarm_core::protocol::{ChallengePhase, ChallengeRecord, ProofType};
use canswarm_core::types::{AgentId, Credits, TaskId, Timestamp};
use canswarm_ledger::{split_slash, Ledger};
use canswarm_store::SwarmDb;

use crate::ChallengeBook;

// ── Deterministic proof checks ───────────────────────────────────────────────

/// Evaluate a typed proof against the artifact. `true` means the proof
/// holds and the challenge should be upheld.
///
/// Evidence is a JSON document whose shape depends on the proof type:
///   SCHEMA_VIOLATION       { "required_key": "…" }
///   MISSING_CITATION       { "claim_key": "…" }
///   SEMANTIC_CONTRADICTION { "statement_a": "…", "statement_b": "…" }
///   OUTPUT_MISMATCH        { "expected_sha256": "…" }
///   POLICY_BREACH          { "forbidden": "…" }
pub fn evaluate_proof(proof_type: ProofType, evidence: &[u8], artifact: &[u8]) -> bool {
    let Ok(evidence) = serde_json::from_slice::<Value>(evidence) else {
        // Malformed evidence can never uphold a challenge.
        return false;
    };

    match proof_type {
        ProofType::SchemaViolation => {
            let Some(required) = evidence.get("required_key").and_then(Value::as_str) else {
                return false;
            };
            match serde_json::from_slice::<Value>(artifact) {
                Ok(doc) => doc.get(required).is_none(),
                // Not even JSON: the schema is violated outright.
                Err(_) => true,
            }
        }
        ProofType::MissingCitation => {
            let Some(claim) = evidence.get("claim_key").and_then(Value::as_str) else {
                return false;
            };
            let Ok(doc) = serde_json::from_slice::<Value>(artifact) else {
                return true;
            };
            let has_claim = doc.get(claim).is_some();
            let cited = doc
                .get("citations")
                .and_then(Value::as_array)
                .map(|c| !c.is_empty())
                .unwrap_or(false);
            has_claim && !cited
        }
        ProofType::SemanticContradiction => {
            let (Some(a), Some(b)) = (
                evidence.get("statement_a").and_then(Value::as_str),
                evidence.get("statement_b").and_then(Value::as_str),
            ) else {
                return false;
            };
            let text = String::from_utf8_lossy(artifact);
            text.contains(a) && text.contains(b)
        }
        ProofType::OutputMismatch => {
            let Some(expected) = evidence.get("expected_sha256").and_then(Value::as_str) else {
                return false;
            };
            hex::encode(canswarm_crypto::sha256(artifact)) != expected.to_ascii_lowercase()
        }
        ProofType::PolicyBreach => {
            let Some(forbidden) = evidence.get("forbidden").and_then(Value::as_str) else {
                return false;
            };
            String::from_utf8_lossy(artifact).contains(forbidden)
        }
    }
}

// ── Outcome resolution ───────────────────────────────────────────────────────

/// Ledger effects of an upheld challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpheldOutcome {
    pub total_slashed: Credits,
    /// 50% slash share paid to the challenger.
    pub challenger_share: Credits,
    /// 20% reward (doubled in bootstrap) paid from the system pool.
    pub reward: Credits,
    /// Attest-log-verified honest verifiers and what each received.
    pub honest_paid: Vec<(AgentId, Credits)>,
    /// Claimants with no matching ATTEST record. Paid nothing.
    pub rejected_claims: Vec<AgentId>,
    pub burned: Credits,
    pub new_k_result: u32,
    /// Verifiers who attested the invalid commit and were slashed.
    pub slashed_verifiers: Vec<AgentId>,
}

/// Resolve an upheld challenge.
///
/// Slashes exactly the verifiers whose affirming ATTEST is in the log for
/// (task, commit); splits the total 50/40/10 (challenger / verified honest
/// / burn); refunds the bond; pays the reward from the system pool;
/// escalates the task's result quorum.
#[allow(clippy::too_many_arguments)]
pub fn resolve_upheld(
    db: &SwarmDb,
    book: &ChallengeBook,
    ledger: &Ledger,
    record: &ChallengeRecord,
    honest_claimants: &[AgentId],
    cfg: &SwarmConfig,
    bootstrap: bool,
    prior_k_result: u32,
    now: Timestamp,
) -> Result<UpheldOutcome, SwarmError> {
    if record.phase != ChallengePhase::Pending {
        return Err(SwarmError::ChallengeAlreadyResolved(
            record.challenge_id.to_hex(),
        ));
    }

    // Exactly the verifiers that attested *for* the bad commit are slashed.
    let attests = db.attests_for(&record.task, record.commit.as_bytes())?;
    let mut slashed_verifiers = Vec::new();
    let mut total_slashed: Credits = 0;
    for attest in attests.iter().filter(|a| a.verdict) {
        let stake = ledger.stake_of(&attest.attestor)?;
        let amount = stake * cfg.slash_on_uphold_pct as Credits / 100;
        let slashed = ledger.slash(
            &attest.attestor,
            amount,
            SlashCause::UpheldChallenge,
            Some(record.evidence),
            now,
        )?;
        if slashed > 0 {
            total_slashed += slashed;
            slashed_verifiers.push(attest.attestor);
        }
    }

    let split = split_slash(total_slashed);

    // Challenger: slash share + bond refund.
    ledger.transfer(&SYSTEM_AGENT, &record.challenger, split.challenger, false, now)?;
    ledger.release_escrow(&record.bond_escrow, &record.challenger)?;

    // Honest share: only claims verified against the attestation log.
    // "Honest" = in the log with a rejecting verdict; a claimant with no
    // record (or an affirming one) is a free-rider and gets nothing.
    let mut honest_paid = Vec::new();
    let mut rejected_claims = Vec::new();
    let mut verified: Vec<AgentId> = Vec::new();
    for claimant in honest_claimants {
        let record_for = db.get_attest(&record.task, record.commit.as_bytes(), claimant)?;
        match record_for {
            Some(a) if !a.verdict => verified.push(*claimant),
            _ => {
                warn!(claimant = %claimant, "honest-verifier claim rejected: no attest record");
                rejected_claims.push(*claimant);
            }
        }
    }
    if !verified.is_empty() {
        let share = split.honest_total / verified.len() as Credits;
        let remainder = split.honest_total - share * verified.len() as Credits;
        for (i, claimant) in verified.iter().enumerate() {
            let payout = if i == 0 { share + remainder } else { share };
            ledger.transfer(&SYSTEM_AGENT, claimant, payout, false, now)?;
            honest_paid.push((*claimant, payout));
        }
    }
    // With no verified honest claimants the 40% stays in the system pool.

    ledger.burn(&SYSTEM_AGENT, split.burn)?;

    // Reward comes out of the system pool (the unclaimed honest share plus
    // whatever the pool already held), capped at what the pool can pay.
    let mut reward = total_slashed * UPHELD_REWARD_PCT / 100;
    if bootstrap {
        // Early swarms double challenge rewards to bootstrap verification.
        reward *= 2;
    }
    let reward = reward.min(ledger.get_balance(&SYSTEM_AGENT)?);
    if reward > 0 {
        ledger.transfer(&SYSTEM_AGENT, &record.challenger, reward, false, now)?;
    }

    let new_k_result = crate::escalated_k_result(prior_k_result, cfg);
    book.set_k_result(&record.task, new_k_result)?;

    let mut resolved = record.clone();
    resolved.phase = ChallengePhase::Upheld;
    book.put(&resolved)?;

    info!(
        challenge = %record.challenge_id,
        total_slashed,
        challenger = %record.challenger,
        new_k_result,
        "challenge upheld"
    );
    Ok(UpheldOutcome {
        total_slashed,
        challenger_share: split.challenger,
        reward,
        honest_paid,
        rejected_claims,
        burned: split.burn,
        new_k_result,
        slashed_verifiers,
    })
}

/// Resolve a rejected challenge: the bond is forfeited, half to the system
/// pool and half burned.
pub fn resolve_rejected(
    book: &ChallengeBook,
    ledger: &Ledger,
    record: &ChallengeRecord,
) -> Result<(), SwarmError> {
    if record.phase != ChallengePhase::Pending {
        return Err(SwarmError::ChallengeAlreadyResolved(
            record.challenge_id.to_hex(),
        ));
    }
    ledger.release_escrow(&record.bond_escrow, &SYSTEM_AGENT)?;
    let burn = record.bond / 2;
    ledger.burn(&SYSTEM_AGENT, burn)?;

    let mut resolved = record.clone();
    resolved.phase = ChallengePhase::Rejected;
    book.put(&resolved)?;
    info!(challenge = %record.challenge_id, bond = record.bond, "challenge rejected, bond forfeited");
    Ok(())
}

/// Whether a bounty payout may proceed for a task's commit: the doubled
/// challenge window must have elapsed and no upheld/pending challenge may
/// be in flight.
pub fn payout_clear(
    book: &ChallengeBook,
    commit: &canswarm_core::types::CommitId,
    committed_at: Timestamp,
    cfg: &SwarmConfig,
    now: Timestamp,
) -> Result<bool, SwarmError> {
    if now < committed_at + 2 * cfg.challenge_window_secs as i64 {
        return Ok(false);
    }
    Ok(!book.payout_blocked(commit)?)
}

/// Base quorum for a task's results, honouring any escalation on record.
pub fn effective_k_result(
    book: &ChallengeBook,
    task: &TaskId,
    cfg: &SwarmConfig,
    active_verifiers: usize,
) -> Result<u32, SwarmError> {
    book.k_result_for(task, cfg.k_result(active_verifiers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use canswarm_core::constants::SYSTEM_AGENT;
    use canswarm_core::protocol::{AttestRecord, AttestTarget};
    use canswarm_core::types::{ArtifactHash, ChallengeId, CommitId, EnvelopeId, NeedId};
    use std::sync::Arc;

    fn setup(name: &str) -> (Arc<SwarmDb>, ChallengeBook, Ledger) {
        let dir =
            std::env::temp_dir().join(format!("canswarm_adj_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let db = Arc::new(SwarmDb::open(&dir).unwrap());
        (
            Arc::clone(&db),
            ChallengeBook::new(Arc::clone(&db)),
            Ledger::new(db),
        )
    }

    fn staked_verifier(ledger: &Ledger, tag: u8, stake: Credits) -> AgentId {
        let agent = AgentId::from_bytes([tag; 32]);
        ledger.mint(&agent, stake, &SYSTEM_AGENT, 0).unwrap();
        ledger.stake(&agent, stake).unwrap();
        agent
    }

    fn attest(db: &SwarmDb, task: TaskId, commit: CommitId, attestor: AgentId, verdict: bool) {
        db.put_attest(&AttestRecord {
            target: AttestTarget::Result,
            need: NeedId::from_bytes([0; 32]),
            task,
            subject: *commit.as_bytes(),
            attestor,
            verdict,
            lamport: 1,
            envelope: EnvelopeId::from_bytes([0; 32]),
        })
        .unwrap();
    }

    #[test]
    fn output_mismatch_proof_is_deterministic() {
        let artifact = b"the artifact bytes";
        let honest = serde_json::json!({
            "expected_sha256": hex::encode(canswarm_crypto::sha256(artifact))
        });
        assert!(!evaluate_proof(
            ProofType::OutputMismatch,
            &serde_json::to_vec(&honest).unwrap(),
            artifact
        ));
        let lying = serde_json::json!({ "expected_sha256": "00".repeat(32) });
        assert!(evaluate_proof(
            ProofType::OutputMismatch,
            &serde_json::to_vec(&lying).unwrap(),
            artifact
        ));
    }

    #[test]
    fn schema_violation_checks_required_key() {
        let evidence = serde_json::to_vec(&serde_json::json!({"required_key": "result"})).unwrap();
        assert!(!evaluate_proof(
            ProofType::SchemaViolation,
            &evidence,
            br#"{"result": 1}"#
        ));
        assert!(evaluate_proof(
            ProofType::SchemaViolation,
            &evidence,
            br#"{"other": 1}"#
        ));
        assert!(evaluate_proof(ProofType::SchemaViolation, &evidence, b"not json"));
    }

    #[test]
    fn malformed_evidence_never_upholds() {
        assert!(!evaluate_proof(ProofType::PolicyBreach, b"garbage", b"anything"));
    }

    #[test]
    fn upheld_slashes_attestors_and_pays_challenger() {
        let (db, book, ledger) = setup("upheld");
        let cfg = SwarmConfig::default();
        let task = TaskId::from_bytes([1; 32]);
        let commit = CommitId::from_bytes([2; 32]);

        // Three verifiers with 10 000 staked each attested the bad commit.
        let verifiers: Vec<AgentId> = (10u8..13)
            .map(|t| staked_verifier(&ledger, t, 10_000))
            .collect();
        for v in &verifiers {
            attest(&db, task, commit, *v, true);
        }

        let challenger = AgentId::from_bytes([1; 32]);
        ledger.mint(&challenger, 1_000, &SYSTEM_AGENT, 0).unwrap();
        let record = book
            .submit(
                &ledger,
                ChallengeId::from_bytes([9; 32]),
                task,
                commit,
                challenger,
                ProofType::OutputMismatch,
                1,
                ArtifactHash::from_bytes([3; 32]),
                100,
                10_000,
                100,
            )
            .unwrap();

        let outcome =
            resolve_upheld(&db, &book, &ledger, &record, &[], &cfg, false, 1, 200).unwrap();

        // 3 × 50% of 10 000 = 15 000 slashed.
        assert_eq!(outcome.total_slashed, 15_000);
        assert_eq!(outcome.challenger_share, 7_500);
        assert_eq!(outcome.reward, 3_000);
        assert_eq!(outcome.burned, 1_500);
        assert_eq!(outcome.new_k_result, 3);
        assert_eq!(outcome.slashed_verifiers.len(), 3);

        // Challenger: 1 000 − 100 bond + 100 refund + 7 500 + 3 000.
        assert_eq!(ledger.get_balance(&challenger).unwrap(), 11_500);
        for v in &verifiers {
            assert_eq!(ledger.stake_of(v).unwrap(), 5_000);
        }
        assert!(ledger.conservation().unwrap().holds());
    }

    #[test]
    fn ghost_honest_claim_is_rejected() {
        let (db, book, ledger) = setup("ghost");
        let cfg = SwarmConfig::default();
        let task = TaskId::from_bytes([1; 32]);
        let commit = CommitId::from_bytes([2; 32]);

        let bad = staked_verifier(&ledger, 10, 10_000);
        attest(&db, task, commit, bad, true);
        // A genuinely honest verifier attested against the commit.
        let honest = staked_verifier(&ledger, 11, 10_000);
        attest(&db, task, commit, honest, false);

        let challenger = AgentId::from_bytes([1; 32]);
        ledger.mint(&challenger, 1_000, &SYSTEM_AGENT, 0).unwrap();
        let record = book
            .submit(
                &ledger,
                ChallengeId::from_bytes([9; 32]),
                task,
                commit,
                challenger,
                ProofType::OutputMismatch,
                1,
                ArtifactHash::from_bytes([3; 32]),
                100,
                10_000,
                100,
            )
            .unwrap();

        let ghost = AgentId::from_bytes([0xEE; 32]);
        ledger.create_account(&ghost, 0).unwrap();
        let outcome = resolve_upheld(
            &db,
            &book,
            &ledger,
            &record,
            &[ghost, honest],
            &cfg,
            false,
            1,
            200,
        )
        .unwrap();

        assert_eq!(outcome.rejected_claims, vec![ghost]);
        assert_eq!(ledger.get_balance(&ghost).unwrap(), 0);
        // The verified honest verifier takes the entire 40% share.
        assert_eq!(outcome.honest_paid, vec![(honest, 2_000)]);
        assert!(ledger.conservation().unwrap().holds());
    }

    #[test]
    fn rejected_challenge_forfeits_bond() {
        let (_db, book, ledger) = setup("rejected");
        let challenger = AgentId::from_bytes([1; 32]);
        ledger.mint(&challenger, 1_000, &SYSTEM_AGENT, 0).unwrap();
        let record = book
            .submit(
                &ledger,
                ChallengeId::from_bytes([9; 32]),
                TaskId::from_bytes([1; 32]),
                CommitId::from_bytes([2; 32]),
                challenger,
                ProofType::SchemaViolation,
                2,
                ArtifactHash::from_bytes([3; 32]),
                20,
                10_000,
                100,
            )
            .unwrap();
        resolve_rejected(&book, &ledger, &record).unwrap();
        assert_eq!(ledger.get_balance(&challenger).unwrap(), 980);
        assert_eq!(ledger.get_balance(&SYSTEM_AGENT).unwrap(), 10);
        assert!(ledger.conservation().unwrap().holds());
    }

    #[test]
    fn payout_waits_for_doubled_window() {
        let (_db, book, _ledger) = setup("payout");
        let cfg = SwarmConfig::default();
        let commit = CommitId::from_bytes([2; 32]);
        let committed_at = 1_000;
        let window = cfg.challenge_window_secs as i64;
        assert!(!payout_clear(&book, &commit, committed_at, &cfg, committed_at + window).unwrap());
        assert!(
            payout_clear(&book, &commit, committed_at, &cfg, committed_at + 2 * window + 1)
                .unwrap()
        );
    }
}
