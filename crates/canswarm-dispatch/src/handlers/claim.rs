//! CLAIM: the auction winner takes the task under a lease.

use tracing::info;

use canswarm_core::envelope::{ClaimPayload, Envelope};
use canswarm_core::error::SwarmError;
use canswarm_core::plan::{OpBody, TaskState};
use canswarm_core::protocol::Lease;
use canswarm_core::types::LeaseId;

use crate::context::SwarmContext;
use crate::handlers::{annotate, op_from};

pub fn handle(
    ctx: &SwarmContext,
    env: &Envelope,
    payload: &ClaimPayload,
) -> Result<Vec<Envelope>, SwarmError> {
    let view = ctx
        .plan
        .get_task(&payload.task)?
        .ok_or_else(|| SwarmError::UnknownTask(payload.task.to_hex()))?;

    // The auction winner is plan state (set at close through UPDATE_PLAN),
    // so this check replays identically on every node.
    let winner = view
        .annotations
        .get("auction_winner")
        .and_then(|a| a.value.as_str())
        .map(String::from);
    if winner.as_deref() != Some(payload.proposal.to_hex().as_str()) {
        return Err(SwarmError::PolicyDenied(format!(
            "claim for proposal {} but auction winner is {:?}",
            payload.proposal, winner
        )));
    }
    let winning_bidder = view
        .annotations
        .get("auction_winner_bidder")
        .and_then(|a| a.value.as_str())
        .map(String::from);
    if winning_bidder.as_deref() != Some(env.sender.to_b58().as_str()) {
        return Err(SwarmError::LeaseHeldByOther {
            task: payload.task.to_hex(),
        });
    }

    ctx.leases.create(
        Lease {
            lease_id: LeaseId::from_bytes(*env.id.as_bytes()),
            task: payload.task,
            need: payload.need,
            holder: env.sender,
            ttl_secs: ctx.cfg.lease_default_ttl_secs,
            heartbeat_interval_secs: ctx.cfg.heartbeat_interval_secs,
            last_heartbeat: env.ts,
            created_at: env.ts,
            created_epoch: env.epoch,
            last_heartbeat_epoch: env.epoch,
        },
        env.ts,
        env.epoch,
    )?;

    ctx.plan.append_op(&op_from(
        env,
        0,
        payload.task,
        OpBody::State {
            to: TaskState::Claimed,
        },
    ))?;
    ctx.plan.append_op(&op_from(
        env,
        1,
        payload.task,
        annotate("worker", env.sender.to_b58()),
    ))?;

    info!(task = %payload.task, holder = %env.sender, "task claimed");
    Ok(Vec::new())
}
