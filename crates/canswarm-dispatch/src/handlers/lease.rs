//! HEARTBEAT, YIELD and RELEASE.
//!
//! A timely YIELD is free; a system RELEASE for missed heartbeats slashes
//! the holder per missed interval and re-opens the auction.

use tracing::{info, warn};

use canswarm_core::envelope::{
    Envelope, HeartbeatPayload, ReleasePayload, ReleaseReason, YieldPayload,
};
use canswarm_core::error::SwarmError;
use canswarm_core::ledger::SlashCause;
use canswarm_core::plan::{OpBody, TaskState};
use canswarm_core::types::Credits;

use crate::context::SwarmContext;
use crate::handlers::op_from;

pub fn handle_heartbeat(
    ctx: &SwarmContext,
    env: &Envelope,
    payload: &HeartbeatPayload,
) -> Result<Vec<Envelope>, SwarmError> {
    // Renews the lease; never mutates plan state.
    ctx.leases.heartbeat(
        &payload.task,
        &payload.lease,
        &env.sender,
        env.ts,
        env.epoch,
    )?;
    Ok(Vec::new())
}

pub fn handle_yield(
    ctx: &SwarmContext,
    env: &Envelope,
    payload: &YieldPayload,
) -> Result<Vec<Envelope>, SwarmError> {
    let lease = ctx
        .leases
        .get(&payload.task)?
        .ok_or_else(|| SwarmError::LeaseMissing(payload.task.to_hex()))?;
    if lease.holder != env.sender || lease.lease_id != payload.lease {
        return Err(SwarmError::LeaseHeldByOther {
            task: payload.task.to_hex(),
        });
    }
    ctx.leases.release(&payload.task)?;
    ctx.plan.append_op(&op_from(
        env,
        0,
        payload.task,
        OpBody::State {
            to: TaskState::Draft,
        },
    ))?;
    info!(task = %payload.task, holder = %env.sender, "lease yielded");
    Ok(Vec::new())
}

pub fn handle_release(
    ctx: &SwarmContext,
    env: &Envelope,
    payload: &ReleasePayload,
) -> Result<Vec<Envelope>, SwarmError> {
    let Some(lease) = ctx.leases.release(&payload.task)? else {
        // Already scavenged (redelivery or a racing scavenger).
        return Ok(Vec::new());
    };

    // Missed heartbeats cost the holder a slice of stake per interval.
    if let ReleaseReason::MissedHeartbeats { missed } = payload.reason {
        let stake = ctx.ledger.stake_of(&lease.holder)?;
        // Saturating: a long-dead lease must not overflow its way out of
        // the penalty (slash caps at the stake anyway).
        let amount = stake
            .saturating_mul(ctx.cfg.slash_per_missed_heartbeat_pct as Credits)
            .saturating_mul(missed as Credits)
            / 100;
        let slashed = ctx.ledger.slash(
            &lease.holder,
            amount,
            SlashCause::MissedHeartbeat,
            None,
            env.ts,
        )?;
        warn!(
            task = %payload.task,
            holder = %lease.holder,
            missed,
            slashed,
            "lease scavenged for missed heartbeats"
        );
    } else {
        info!(task = %payload.task, holder = %lease.holder, reason = ?payload.reason, "lease scavenged");
    }

    ctx.plan.append_op(&op_from(
        env,
        0,
        payload.task,
        OpBody::State {
            to: TaskState::Draft,
        },
    ))?;

    // Partial progress is not lost work: the task goes back to auction,
    // still backed by the original bounty escrow.
    let need = lease.need;
    if let Some(auction) = ctx.auctions.get(&need)? {
        ctx.auctions.open(
            need,
            payload.task,
            auction.budget,
            auction.bounty_escrow,
            env.ts,
            ctx.cfg.bid_window_default_secs,
        )?;
    }
    Ok(Vec::new())
}
