//! FINALIZE: seal the task, then (on a later re-publish once the doubled
//! challenge window has elapsed) release the bounty escrow.
//!
//! The payout is envelope-driven rather than timer-driven so that replay
//! resolves the escrow exactly where the log says it was resolved: the
//! escrow-expiry loop re-publishes FINALIZE when the window clears, and
//! this handler performs the release using the envelope's timestamp.

use tracing::{info, warn};

use canswarm_challenge::adjudicate::payout_clear;
use canswarm_core::envelope::{Envelope, FinalizePayload};
use canswarm_core::error::SwarmError;
use canswarm_core::plan::{OpBody, TaskState};
use canswarm_core::types::{AgentId, EscrowId};
use canswarm_verifier::related_party;

use crate::context::SwarmContext;
use crate::handlers::{annotate, op_from};

pub fn handle(
    ctx: &SwarmContext,
    env: &Envelope,
    payload: &FinalizePayload,
) -> Result<Vec<Envelope>, SwarmError> {
    let view = ctx
        .plan
        .get_task(&payload.task)?
        .ok_or_else(|| SwarmError::UnknownTask(payload.task.to_hex()))?;

    if view.state != TaskState::Final {
        // First FINALIZE: seal the task and release the worker's lease.
        ctx.plan.append_op(&op_from(
            env,
            0,
            payload.task,
            OpBody::State {
                to: TaskState::Final,
            },
        ))?;
        ctx.plan.append_op(&op_from(
            env,
            1,
            payload.task,
            annotate("finalized_at", env.ts),
        ))?;
        ctx.leases.release(&payload.task)?;

        // Reputation credit for every verifier whose affirming attestation
        // is in the log for this commit.
        for attest in ctx
            .db
            .attests_for(&payload.task, payload.commit.as_bytes())?
        {
            if attest.verdict {
                let _ = canswarm_verifier::reputation::record_success(
                    &ctx.pool,
                    &attest.attestor,
                    env.ts,
                );
            }
        }
        info!(task = %payload.task, "task finalized");
        return Ok(Vec::new());
    }

    // Re-published FINALIZE: attempt the bounty payout.
    if view
        .annotations
        .get("bounty_released")
        .and_then(|a| a.value.as_bool())
        .unwrap_or(false)
    {
        return Ok(Vec::new());
    }
    let committed_at = view
        .annotations
        .get("committed_at")
        .and_then(|a| a.value.as_i64())
        .unwrap_or(i64::MAX);
    if !payout_clear(&ctx.challenges, &payload.commit, committed_at, &ctx.cfg, env.ts)? {
        return Ok(Vec::new());
    }

    let Some(worker) = view
        .annotations
        .get("worker")
        .and_then(|a| a.value.as_str())
        .and_then(|s| AgentId::from_b58(s).ok())
    else {
        return Err(SwarmError::UnknownAccount("worker annotation".into()));
    };

    // Related-party gate: a committee member linked to the worker blocks
    // the payout; the need goes back through committee selection.
    if let Some(worker_manifest) = ctx.pool.get(&worker)?.map(|r| r.manifest) {
        for attest in ctx
            .db
            .attests_for(&payload.task, payload.commit.as_bytes())?
        {
            if let Some(member) = ctx.pool.get(&attest.attestor)? {
                if related_party(&member.manifest, &worker_manifest) {
                    warn!(
                        task = %payload.task,
                        worker = %worker,
                        member = %attest.attestor,
                        "related party detected; payout blocked"
                    );
                    ctx.plan.append_op(&op_from(
                        env,
                        0,
                        payload.task,
                        annotate("payout_blocked_related_party", true),
                    ))?;
                    return Err(SwarmError::RelatedPartyDetected {
                        a: worker.to_string(),
                        b: attest.attestor.to_string(),
                    });
                }
            }
        }
    }

    // The bounty escrow lives on the auction record for the originating
    // need (reopened tasks carry the need annotation forward).
    let bounty_escrow = view
        .annotations
        .get("need")
        .and_then(|a| a.value.as_str())
        .and_then(|s| canswarm_core::types::NeedId::from_hex(s).ok())
        .and_then(|need| ctx.auctions.get(&need).ok().flatten())
        .map(|auction| auction.bounty_escrow)
        .unwrap_or_else(|| EscrowId::from_bytes(*payload.task.as_bytes()));
    ctx.ledger.release_escrow(&bounty_escrow, &worker)?;
    ctx.plan.append_op(&op_from(
        env,
        0,
        payload.task,
        annotate("bounty_released", true),
    ))?;
    info!(task = %payload.task, worker = %worker, "bounty released");
    Ok(Vec::new())
}
