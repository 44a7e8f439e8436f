//! PROPOSE: record a bid under the need's auction.

use tracing::debug;

use canswarm_core::envelope::{Envelope, ProposePayload};
use canswarm_core::error::SwarmError;
use canswarm_core::protocol::Bid;
use canswarm_core::types::ProposalId;

use crate::context::SwarmContext;

pub fn handle(
    ctx: &SwarmContext,
    env: &Envelope,
    payload: &ProposePayload,
) -> Result<Vec<Envelope>, SwarmError> {
    let bid = Bid {
        proposal: ProposalId::from_bytes(*env.id.as_bytes()),
        bidder: env.sender,
        cost: payload.cost,
        eta_ms: payload.eta_ms,
        arrived_at: env.ts,
        lamport: env.lamport,
    };
    ctx.auctions
        .accept_bid(&payload.need, bid, env.ts, &ctx.cfg)?;

    // An attached plan patch is applied only if this proposal wins; it
    // rides along in the auction record via the envelope and is replayed
    // by the winner through UPDATE_PLAN.
    debug!(need = %payload.need, bidder = %env.sender, cost = payload.cost, "bid recorded");
    Ok(Vec::new())
}
