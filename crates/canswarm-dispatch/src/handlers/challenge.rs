//! CHALLENGE and INVALIDATE.
//!
//! A challenge is adjudicated deterministically from CAS contents the
//! moment it lands: the typed proof either holds or it does not, and every
//! node evaluating the same evidence reaches the same outcome. UPHELD
//! emits INVALIDATE, which orphans the commit's results and reopens the
//! task for re-execution under an escalated quorum.

use tracing::{info, warn};

use canswarm_challenge::{evaluate_proof, resolve_rejected, resolve_upheld};
use canswarm_core::envelope::{ChallengePayload, Envelope, InvalidatePayload, Payload};
use canswarm_core::error::SwarmError;
use canswarm_core::plan::{OpBody, TaskState};
use canswarm_core::types::{AgentId, ChallengeId, EscrowId, NeedId, TaskId};
use canswarm_crypto::sha256;

use crate::context::SwarmContext;
use crate::handlers::{annotate, op_from};

pub fn handle_challenge(
    ctx: &SwarmContext,
    env: &Envelope,
    payload: &ChallengePayload,
) -> Result<Vec<Envelope>, SwarmError> {
    let view = ctx
        .plan
        .get_task(&payload.task)?
        .ok_or_else(|| SwarmError::UnknownTask(payload.task.to_hex()))?;
    let committed_at = view
        .annotations
        .get("committed_at")
        .and_then(|a| a.value.as_i64())
        .ok_or_else(|| SwarmError::PolicyDenied("challenge against uncommitted task".into()))?;
    let deadline = committed_at + ctx.cfg.challenge_window_secs as i64;

    let challenge_id = ChallengeId::from_bytes(*env.id.as_bytes());
    let record = ctx.challenges.submit(
        &ctx.ledger,
        challenge_id,
        payload.task,
        payload.commit,
        env.sender,
        payload.proof_type,
        payload.complexity,
        payload.evidence,
        payload.bond,
        deadline,
        env.ts,
    )?;

    // Deterministic adjudication straight from the CAS.
    let evidence = ctx.cas.get(&payload.evidence)?;
    let artifact_hash = view
        .annotations
        .get("artifact")
        .and_then(|a| a.value.as_str())
        .and_then(|s| canswarm_core::types::ArtifactHash::from_hex(s).ok())
        .ok_or_else(|| SwarmError::CasMissing("artifact annotation".into()))?;
    let artifact = ctx.cas.get(&artifact_hash)?;
    let upheld = evaluate_proof(payload.proof_type, &evidence, &artifact);

    let active = ctx.active_verifiers(env.ts)?;
    if upheld {
        // Honest claimants are exactly the verifiers whose rejecting
        // attestation is already in the log — nobody self-nominates.
        let honest: Vec<AgentId> = ctx
            .db
            .attests_for(&payload.task, payload.commit.as_bytes())?
            .into_iter()
            .filter(|a| !a.verdict)
            .map(|a| a.attestor)
            .collect();
        let prior_k = ctx
            .challenges
            .k_result_for(&payload.task, ctx.cfg.k_result(active))?;
        let outcome = resolve_upheld(
            &ctx.db,
            &ctx.challenges,
            &ctx.ledger,
            &record,
            &honest,
            &ctx.cfg,
            ctx.cfg.in_bootstrap(active),
            prior_k,
            env.ts,
        )?;
        for slashed in &outcome.slashed_verifiers {
            let _ = canswarm_verifier::reputation::record_slash(&ctx.pool, slashed, env.ts);
        }
        info!(
            challenge = %challenge_id,
            slashed = outcome.total_slashed,
            new_k = outcome.new_k_result,
            "challenge upheld"
        );
        let invalidate = ctx.synthesize(
            env.thread,
            Payload::Invalidate(InvalidatePayload {
                task: payload.task,
                commit: payload.commit,
                challenge: challenge_id,
            }),
            env.ts,
        )?;
        Ok(vec![invalidate])
    } else {
        resolve_rejected(&ctx.challenges, &ctx.ledger, &record)?;
        warn!(challenge = %challenge_id, "challenge rejected; bond forfeited");
        Ok(Vec::new())
    }
}

pub fn handle_invalidate(
    ctx: &SwarmContext,
    env: &Envelope,
    payload: &InvalidatePayload,
) -> Result<Vec<Envelope>, SwarmError> {
    let view = ctx
        .plan
        .get_task(&payload.task)?
        .ok_or_else(|| SwarmError::UnknownTask(payload.task.to_hex()))?;

    ctx.plan.append_op(&op_from(
        env,
        0,
        payload.task,
        OpBody::State {
            to: TaskState::Invalid,
        },
    ))?;
    ctx.plan.append_op(&op_from(
        env,
        1,
        payload.task,
        annotate("invalidated_by", payload.challenge.to_hex()),
    ))?;
    ctx.leases.release(&payload.task)?;

    // Reopen for re-execution: a fresh task node under the same need.
    let need = view
        .annotations
        .get("need")
        .and_then(|a| a.value.as_str())
        .and_then(|s| NeedId::from_hex(s).ok())
        .unwrap_or_else(|| NeedId::from_bytes(*payload.task.as_bytes()));
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(payload.task.as_bytes());
    buf.extend_from_slice(env.id.as_bytes());
    let retry = TaskId::from_bytes(sha256(&buf));

    ctx.plan.append_op(&op_from(
        env,
        2,
        retry,
        OpBody::AddTask {
            task_type: view.task_type.clone(),
        },
    ))?;
    ctx.plan
        .append_op(&op_from(env, 3, retry, annotate("need", need.to_hex())))?;
    ctx.plan.append_op(&op_from(
        env,
        4,
        retry,
        annotate("reopened_from", payload.task.to_hex()),
    ))?;

    if let Some(auction) = ctx.auctions.get(&need)? {
        ctx.auctions.open(
            need,
            retry,
            auction.budget,
            auction.bounty_escrow,
            env.ts,
            ctx.cfg.bid_window_default_secs,
        )?;
    } else {
        ctx.auctions.open(
            need,
            retry,
            0,
            EscrowId::from_bytes(*need.as_bytes()),
            env.ts,
            ctx.cfg.bid_window_default_secs,
        )?;
    }

    info!(task = %payload.task, retry = %retry, "task invalidated and reopened");
    Ok(Vec::new())
}
