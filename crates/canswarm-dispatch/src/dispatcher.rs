//! The dispatcher: single entry point from the bus into business logic.
//!
//! Registration is closed — the verb table is this match statement, checked
//! exhaustively at compile time; an envelope kind outside the closed set
//! cannot be constructed. Every dispatch re-runs ingress validation before
//! its handler (there is no handler path without policy enforcement) and
//! dedups by envelope id, which makes at-least-once delivery safe.

use std::sync::Arc;

use tracing::{debug, info, warn};

use canswarm_bus::{subject_for, Bus, BusSubscription};
use canswarm_core::envelope::{
    Envelope, Payload, ReleasePayload, UpdatePlanPayload, Verb,
};
use canswarm_core::error::SwarmError;
use canswarm_core::plan::{OpBody, PlanOp};
use canswarm_core::types::{NeedId, Timestamp};

use crate::context::SwarmContext;
use crate::handlers;

pub struct Dispatcher {
    pub ctx: Arc<SwarmContext>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<SwarmContext>) -> Self {
        Self { ctx }
    }

    /// Validate, dedup and route one envelope. Returns follow-up envelopes
    /// for the caller to publish.
    pub fn handle(&self, envelope: &Envelope) -> Result<Vec<Envelope>, SwarmError> {
        // Mandatory enforcement decorator: ingress policy re-runs here even
        // though the bus already gated the envelope.
        self.ctx.policy.ingress(envelope)?;

        // Lamport merge before any state mutation.
        self.ctx.clock.observe(envelope.lamport)?;

        // Dedup key = envelope id; retried and redelivered envelopes are
        // no-ops past this point.
        if !self.ctx.db.mark_seen(&envelope.id)? {
            debug!(id = %envelope.id, "duplicate envelope dropped");
            return Ok(Vec::new());
        }

        let ctx = &self.ctx;
        let result = match (&envelope.payload, envelope.kind) {
            (Payload::Need(p), Verb::Need) => handlers::need::handle(ctx, envelope, p),
            (Payload::Propose(p), Verb::Propose) => handlers::propose::handle(ctx, envelope, p),
            (Payload::Claim(p), Verb::Claim) => handlers::claim::handle(ctx, envelope, p),
            (Payload::Commit(p), Verb::Commit) => handlers::commit::handle(ctx, envelope, p),
            (Payload::Attest(p), Verb::Attest) => {
                handlers::attest::handle_result(ctx, envelope, p)
            }
            (Payload::AttestPlan(p), Verb::AttestPlan) => {
                handlers::attest::handle_plan(ctx, envelope, p)
            }
            (Payload::Decide(p), Verb::Decide) => handlers::decide::handle(ctx, envelope, p),
            (Payload::Finalize(p), Verb::Finalize) => {
                handlers::finalize::handle(ctx, envelope, p)
            }
            (Payload::Yield(p), Verb::Yield) => handlers::lease::handle_yield(ctx, envelope, p),
            (Payload::Release(p), Verb::Release) => {
                handlers::lease::handle_release(ctx, envelope, p)
            }
            (Payload::Heartbeat(p), Verb::Heartbeat) => {
                handlers::lease::handle_heartbeat(ctx, envelope, p)
            }
            (Payload::UpdatePlan(p), Verb::UpdatePlan) => {
                handlers::plan::handle_update_plan(ctx, envelope, p)
            }
            (Payload::Checkpoint(p), Verb::Checkpoint) => {
                handlers::plan::handle_checkpoint(ctx, envelope, p)
            }
            (Payload::Challenge(p), Verb::Challenge) => {
                handlers::challenge::handle_challenge(ctx, envelope, p)
            }
            (Payload::Invalidate(p), Verb::Invalidate) => {
                handlers::challenge::handle_invalidate(ctx, envelope, p)
            }
            (Payload::Reconcile(p), Verb::Reconcile) => {
                handlers::reconcile::handle(ctx, envelope, p)
            }
            // Ingress already enforced payload/kind agreement; this arm is
            // unreachable for a validated envelope.
            _ => Err(SwarmError::PayloadKindMismatch {
                kind: envelope.kind.as_wire().to_string(),
            }),
        };

        if let Err(e) = &result {
            self.record_rejection(envelope, e);
        }
        result
    }

    /// Rejections are never silent: a structured notice referencing the
    /// offending envelope is durably recorded on the sender-addressable
    /// error surface.
    fn record_rejection(&self, envelope: &Envelope, error: &SwarmError) {
        warn!(
            id = %envelope.id,
            kind = envelope.kind.as_wire(),
            sender = %envelope.sender,
            error = %error,
            "envelope rejected"
        );
        let notice = serde_json::json!({
            "envelope": envelope.id.to_hex(),
            "payload_hash": envelope.payload_hash.to_hex(),
            "sender": envelope.sender.to_b58(),
            "error": error.to_string(),
        });
        let _ = self.ctx.db.put_meta(
            &format!("error/{}", envelope.id.to_hex()),
            notice.to_string().as_bytes(),
        );
    }

    // ── Internal triggers ────────────────────────────────────────────────────
    //
    // Timer loops never mutate protocol state directly; they synthesize
    // envelopes that flow through the same publish → gate → dispatch path,
    // so every mutation lands in the audit log.

    /// Close an auction whose window has passed. The winner annotation goes
    /// out as a signed UPDATE_PLAN so the close replays from the log.
    pub fn close_auction(&self, need: &NeedId, now: Timestamp) -> Result<Vec<Envelope>, SwarmError> {
        let ctx = &self.ctx;
        let Some(auction) = ctx.auctions.get(need)? else {
            return Err(SwarmError::AuctionMissing(need.to_hex()));
        };
        let task = auction.task;
        let thread = match ctx.plan.get_task(&task)? {
            Some(view) => view.thread,
            None => return Err(SwarmError::UnknownTask(task.to_hex())),
        };

        let winner = ctx.auctions.close(need, |agent| {
            ctx.pool
                .get(agent)
                .ok()
                .flatten()
                .map(|r| r.reputation_bp)
                .unwrap_or(0)
        })?;

        let Some(winner) = winner else {
            info!(need = %need, "auction closed with no bids");
            return Ok(Vec::new());
        };

        let lamport = ctx.clock.tick();
        let ops = vec![
            PlanOp {
                op_id: canswarm_core::types::OpId::from_bytes(canswarm_crypto::sha256(
                    &[winner.proposal.as_bytes().as_slice(), b"winner"].concat(),
                )),
                thread,
                lamport,
                actor: ctx.node_key.agent_id,
                task,
                body: OpBody::Annotate {
                    key: "auction_winner".into(),
                    value: winner.proposal.to_hex().into(),
                },
                wall: now,
            },
            PlanOp {
                op_id: canswarm_core::types::OpId::from_bytes(canswarm_crypto::sha256(
                    &[winner.proposal.as_bytes().as_slice(), b"bidder"].concat(),
                )),
                thread,
                lamport,
                actor: ctx.node_key.agent_id,
                task,
                body: OpBody::Annotate {
                    key: "auction_winner_bidder".into(),
                    value: winner.bidder.to_b58().into(),
                },
                wall: now,
            },
        ];
        let grant = ctx.synthesize(thread, Payload::UpdatePlan(UpdatePlanPayload { ops }), now)?;
        info!(need = %need, winner = %winner.bidder, "auction closed; claim grant issued");
        Ok(vec![grant])
    }

    /// One scavenger sweep: propose RELEASE for every reclaimable lease.
    /// The proposals go through the normal handler path for linearization;
    /// the scavenger itself holds no lease locks.
    pub fn scavenge(&self, now: Timestamp) -> Result<Vec<Envelope>, SwarmError> {
        let ctx = &self.ctx;
        let epoch = ctx.epochs.current();
        let mut proposals = Vec::new();
        for (lease, reason) in ctx
            .leases
            .scavengable(now, epoch, ctx.cfg.heartbeat_miss_grace)?
        {
            let thread = match ctx.plan.get_task(&lease.task)? {
                Some(view) => view.thread,
                None => continue,
            };
            let release = ctx.synthesize(
                thread,
                Payload::Release(ReleasePayload {
                    task: lease.task,
                    lease: lease.lease_id,
                    reason,
                }),
                now,
            )?;
            proposals.push(release);
        }
        Ok(proposals)
    }

    /// One bounty sweep: re-publish FINALIZE for sealed tasks whose payout
    /// window may have cleared. The FINALIZE handler decides from envelope
    /// time whether the escrow actually releases.
    pub fn sweep_payouts(&self, now: Timestamp) -> Result<Vec<Envelope>, SwarmError> {
        let ctx = &self.ctx;
        let mut finalizes = Vec::new();
        for view in ctx.views.tasks_by_state(canswarm_core::plan::TaskState::Final)? {
            if view
                .annotations
                .get("bounty_released")
                .and_then(|a| a.value.as_bool())
                .unwrap_or(false)
            {
                continue;
            }
            let Some(commit) = view
                .annotations
                .get("commit_id")
                .and_then(|a| a.value.as_str())
                .and_then(|s| canswarm_core::types::CommitId::from_hex(s).ok())
            else {
                continue;
            };
            let finalize = ctx.synthesize(
                view.thread,
                Payload::Finalize(canswarm_core::envelope::FinalizePayload {
                    task: view.task,
                    commit,
                }),
                now,
            )?;
            finalizes.push(finalize);
        }
        Ok(finalizes)
    }

    /// Auctions whose bid window has elapsed.
    pub fn due_auctions(&self, now: Timestamp) -> Result<Vec<NeedId>, SwarmError> {
        Ok(self
            .ctx
            .all_auctions()?
            .into_iter()
            .filter(|a| matches!(a.phase, canswarm_core::protocol::AuctionPhase::Open))
            .filter(|a| now >= a.closes_at)
            .map(|a| a.need)
            .collect())
    }

    /// Drain the bus subscription, dispatching and publishing follow-ups.
    /// Exits when the subscription closes or the shutdown signal flips, so
    /// a stopping node releases its database handles.
    pub async fn run(
        self: Arc<Self>,
        mut sub: BusSubscription,
        bus: Arc<dyn Bus>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                received = sub.receiver.recv() => {
                    let Some((subject, envelope)) = received else { return };
                    debug!(subject = %subject, id = %envelope.id, "dispatching");
                    match self.handle(&envelope) {
                        Ok(followups) => {
                            for followup in followups {
                                let subject = subject_for(&followup.thread, followup.kind);
                                if let Err(e) = bus.publish(&subject, followup).await {
                                    warn!(error = %e, "follow-up publish failed");
                                }
                            }
                        }
                        Err(e) => {
                            debug!(id = %envelope.id, error = %e, "envelope handling failed");
                        }
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }
}

impl SwarmContext {
    fn all_auctions(&self) -> Result<Vec<canswarm_core::protocol::AuctionRecord>, SwarmError> {
        self.db.iter_auctions()
    }
}
