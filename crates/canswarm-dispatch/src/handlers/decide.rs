//! DECIDE: install (or acknowledge) the consensus record and move the task.

use tracing::{debug, info};

use canswarm_core::envelope::{DecidePayload, Envelope};
use canswarm_core::error::SwarmError;
use canswarm_core::plan::{OpBody, TaskState};
use canswarm_consensus::{DecideCandidate, Decision};

use crate::context::SwarmContext;
use crate::handlers::{annotate, op_from, task_of_need};

pub fn handle(
    ctx: &SwarmContext,
    env: &Envelope,
    payload: &DecidePayload,
) -> Result<Vec<Envelope>, SwarmError> {
    // DECIDE is epoch-fenced at the handler: a zombie node broadcasting
    // from a pre-heal epoch is rejected outright.
    ctx.epochs.validate_fence(env.epoch)?;

    let decision = ctx.consensus.try_decide(DecideCandidate {
        need: payload.need,
        proposal: payload.proposal,
        epoch: env.epoch,
        lamport: env.lamport,
        k_plan: payload.k_plan,
        decider: env.sender,
        ts: env.ts,
        provisional: ctx.suspected(),
    })?;

    match decision {
        Decision::Won(record) | Decision::Idempotent(record) => {
            let task = task_of_need(&payload.need);
            ctx.plan.append_op(&op_from(
                env,
                0,
                task,
                OpBody::State {
                    to: TaskState::Decided,
                },
            ))?;
            ctx.plan.append_op(&op_from(
                env,
                1,
                task,
                annotate("winning_proposal", record.proposal.to_hex()),
            ))?;
            info!(need = %payload.need, proposal = %record.proposal, "decided");
            Ok(Vec::new())
        }
        Decision::Conflict(existing) => {
            // Normal under concurrency: this branch lost. Logged, no retry.
            debug!(
                need = %payload.need,
                winner = %existing.proposal,
                loser = %payload.proposal,
                "decide conflict; losing branch"
            );
            Ok(Vec::new())
        }
        Decision::Fenced { current_epoch } => Err(SwarmError::ConsensusFenced {
            submitted: env.epoch,
            current: current_epoch,
        }),
    }
}
