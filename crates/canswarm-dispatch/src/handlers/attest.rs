//! ATTEST_PLAN and ATTEST: staked verifier votes and the quorum events
//! they trigger.
//!
//! The quorum tracker fires exactly once per (scope, subject); the firing
//! invocation attempts consensus (plan) or emits FINALIZE (result). All
//! decide-record fields derive from the K-th attestation envelope, so the
//! record is identical under replay.

use tracing::{debug, info, warn};

use canswarm_core::envelope::{
    AttestPayload, AttestPlanPayload, DecidePayload, Envelope, FinalizePayload, Payload,
};
use canswarm_core::error::SwarmError;
use canswarm_core::plan::{OpBody, TaskState};
use canswarm_core::protocol::{AttestRecord, AttestTarget};
use canswarm_core::types::AgentId;
use canswarm_consensus::{DecideCandidate, Decision};

use crate::context::SwarmContext;
use crate::handlers::{op_from, task_of_need};

/// Reject attestations from agents outside the stake-eligible set.
fn require_eligible_verifier(ctx: &SwarmContext, agent: &AgentId) -> Result<(), SwarmError> {
    if !ctx.pool.is_registered(agent)? {
        return Err(SwarmError::NotAVerifier(agent.to_string()));
    }
    let stake = ctx.ledger.stake_of(agent)?;
    if stake < ctx.cfg.min_verifier_stake {
        return Err(SwarmError::InsufficientStake {
            need: ctx.cfg.min_verifier_stake,
            have: stake,
        });
    }
    Ok(())
}

pub fn handle_plan(
    ctx: &SwarmContext,
    env: &Envelope,
    payload: &AttestPlanPayload,
) -> Result<Vec<Envelope>, SwarmError> {
    require_eligible_verifier(ctx, &env.sender)?;

    // Stale attestations arriving after the DECIDE are dropped; they never
    // count toward later (escalated) quorums.
    if ctx.consensus.get_decide(&payload.need)?.is_some() {
        debug!(need = %payload.need, attestor = %env.sender, "stale plan attestation dropped");
        return Ok(Vec::new());
    }

    let task = task_of_need(&payload.need);
    if ctx
        .db
        .get_attest(&task, payload.proposal.as_bytes(), &env.sender)?
        .is_some()
    {
        debug!(attestor = %env.sender, "duplicate plan attestation ignored");
        return Ok(Vec::new());
    }
    ctx.db.put_attest(&AttestRecord {
        target: AttestTarget::Plan,
        need: payload.need,
        task,
        subject: *payload.proposal.as_bytes(),
        attestor: env.sender,
        verdict: payload.verdict,
        lamport: env.lamport,
        envelope: env.id,
    })?;
    ctx.pool.touch(&env.sender, env.ts)?;

    if !payload.verdict {
        return Ok(Vec::new());
    }

    let k = ctx.cfg.k_plan(ctx.active_verifiers(env.ts)?);
    let fired = ctx.quorum.add_attestation(
        *payload.need.as_bytes(),
        *payload.proposal.as_bytes(),
        env.sender,
        k,
    );
    if !fired {
        return Ok(Vec::new());
    }

    // K_plan reached exactly once: attempt the decision under the current
    // epoch, with ordering fields taken from this (K-th) envelope.
    let decision = ctx.consensus.try_decide(DecideCandidate {
        need: payload.need,
        proposal: payload.proposal,
        epoch: ctx.epochs.current(),
        lamport: env.lamport,
        k_plan: k,
        decider: ctx.node_key.agent_id,
        ts: env.ts,
        provisional: ctx.suspected(),
    })?;

    match decision {
        Decision::Won(record) | Decision::Idempotent(record) => {
            info!(need = %payload.need, proposal = %payload.proposal, "plan quorum decided");
            let decide = ctx.synthesize(
                env.thread,
                Payload::Decide(DecidePayload {
                    need: record.need,
                    proposal: record.proposal,
                    k_plan: record.k_plan,
                }),
                env.ts,
            )?;
            Ok(vec![decide])
        }
        Decision::Conflict(existing) => {
            debug!(
                need = %payload.need,
                winner = %existing.proposal,
                "losing quorum branch; no retry"
            );
            Ok(Vec::new())
        }
        Decision::Fenced { current_epoch } => {
            warn!(need = %payload.need, current_epoch, "decide attempt fenced");
            Ok(Vec::new())
        }
    }
}

pub fn handle_result(
    ctx: &SwarmContext,
    env: &Envelope,
    payload: &AttestPayload,
) -> Result<Vec<Envelope>, SwarmError> {
    require_eligible_verifier(ctx, &env.sender)?;

    let view = ctx
        .plan
        .get_task(&payload.task)?
        .ok_or_else(|| SwarmError::UnknownTask(payload.task.to_hex()))?;
    if view.state == TaskState::Final {
        debug!(task = %payload.task, "stale result attestation dropped");
        return Ok(Vec::new());
    }
    let committed = view
        .annotations
        .get("commit_id")
        .and_then(|a| a.value.as_str())
        .map(String::from);
    if committed.as_deref() != Some(payload.commit.to_hex().as_str()) {
        return Err(SwarmError::PolicyDenied(format!(
            "attestation for commit {} but task carries {:?}",
            payload.commit, committed
        )));
    }

    if ctx
        .db
        .get_attest(&payload.task, payload.commit.as_bytes(), &env.sender)?
        .is_some()
    {
        debug!(attestor = %env.sender, "duplicate result attestation ignored");
        return Ok(Vec::new());
    }
    ctx.db.put_attest(&AttestRecord {
        target: AttestTarget::Result,
        need: canswarm_core::types::NeedId::from_bytes(*payload.task.as_bytes()),
        task: payload.task,
        subject: *payload.commit.as_bytes(),
        attestor: env.sender,
        verdict: payload.verdict,
        lamport: env.lamport,
        envelope: env.id,
    })?;
    ctx.pool.touch(&env.sender, env.ts)?;

    if !payload.verdict {
        return Ok(Vec::new());
    }

    let base = ctx.cfg.k_result(ctx.active_verifiers(env.ts)?);
    let k = ctx.challenges.k_result_for(&payload.task, base)?;
    let fired = ctx.quorum.add_attestation(
        *payload.task.as_bytes(),
        *payload.commit.as_bytes(),
        env.sender,
        k,
    );
    if !fired {
        return Ok(Vec::new());
    }

    ctx.plan.append_op(&op_from(
        env,
        0,
        payload.task,
        OpBody::State {
            to: TaskState::Verified,
        },
    ))?;
    info!(task = %payload.task, commit = %payload.commit, k, "result quorum reached");

    let finalize = ctx.synthesize(
        env.thread,
        Payload::Finalize(FinalizePayload {
            task: payload.task,
            commit: payload.commit,
        }),
        env.ts,
    )?;
    Ok(vec![finalize])
}
