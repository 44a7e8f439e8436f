//! NEED: create the task, escrow the bounty, open the auction.

use tracing::info;

use canswarm_core::envelope::{Envelope, NeedPayload};
use canswarm_core::error::SwarmError;
use canswarm_core::ledger::EscrowPurpose;
use canswarm_core::plan::OpBody;
use canswarm_core::types::{EscrowId, NeedId};

use crate::context::SwarmContext;
use crate::handlers::{annotate, op_from, task_of_need};

pub fn handle(
    ctx: &SwarmContext,
    env: &Envelope,
    payload: &NeedPayload,
) -> Result<Vec<Envelope>, SwarmError> {
    let need = NeedId::from_bytes(*env.id.as_bytes());
    let task = task_of_need(&need);

    // Bounty budget leaves the requester's balance before the task exists;
    // a requester that cannot fund the budget cannot open a need.
    let bounty_escrow = EscrowId::from_bytes(*env.id.as_bytes());
    ctx.ledger.escrow(
        &env.sender,
        payload.budget,
        bounty_escrow,
        EscrowPurpose::Bounty { need },
        env.ts,
    )?;

    ctx.plan.append_op(&op_from(
        env,
        0,
        task,
        OpBody::AddTask {
            task_type: payload.task_type.clone(),
        },
    ))?;
    // Reopened tasks get fresh ids; the need annotation is how any task
    // finds its way back to the auction and the bounty escrow.
    ctx.plan
        .append_op(&op_from(env, 1, task, annotate("need", need.to_hex())))?;

    let window = payload
        .bid_window_secs
        .unwrap_or(ctx.cfg.bid_window_default_secs);
    ctx.auctions
        .open(need, task, payload.budget, bounty_escrow, env.ts, window)?;

    info!(
        need = %need,
        task_type = %payload.task_type,
        budget = payload.budget,
        window,
        "need opened"
    );
    Ok(Vec::new())
}
