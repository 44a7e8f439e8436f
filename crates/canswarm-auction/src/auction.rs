//! Bid windows, anti-snipe extension and winner scoring.
//!
//! Scoring is pure integer arithmetic over (cost, ETA) normalized against
//! the budget and the bid window, with reputation as the tie-break and a
//! deterministic hash as the final tie-break — auction outcomes are part of
//! replay determinism.

use std::sync::Arc;

use tracing::{debug, info};

use canswarm_core::config::SwarmConfig;
use canswarm_core::error::SwarmError;
use canswarm_core::protocol::{AuctionPhase, AuctionRecord, Bid};
use canswarm_core::types::{AgentId, Credits, EscrowId, NeedId, TaskId, Timestamp};
use canswarm_crypto::sha256;
use canswarm_store::SwarmDb;

/// Score a bid: up to 1000 points for price (cheaper is better) plus up to
/// 1000 for speed (ETA relative to the bid window).
pub fn score_bid(bid: &Bid, budget: Credits, window_ms: u64) -> u64 {
    let cost_score = ((budget.saturating_sub(bid.cost)).min(budget) * 1000 / budget.max(1)) as u64;
    let eta_capped = bid.eta_ms.min(window_ms);
    let eta_score = 1000 - (eta_capped * 1000 / window_ms.max(1));
    cost_score + eta_score
}

fn tie_hash(bidder: &AgentId, need: &NeedId) -> [u8; 32] {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(bidder.as_bytes());
    buf.extend_from_slice(need.as_bytes());
    sha256(&buf)
}

/// Backoff hint for losing bidders: exponential with jitter so a herd of
/// losers does not re-bid in lockstep. Advisory only — not replay state.
pub fn loser_backoff_ms(attempt: u32) -> u64 {
    use rand::Rng;
    let base = 500u64.saturating_mul(1 << attempt.min(8));
    base + rand::thread_rng().gen_range(0..base.max(1))
}

pub struct AuctionBook {
    db: Arc<SwarmDb>,
}

impl AuctionBook {
    pub fn new(db: Arc<SwarmDb>) -> Self {
        Self { db }
    }

    /// Open an auction for a need. Re-opening an already-open auction is a
    /// no-op (redelivery); re-opening a closed one starts a fresh window
    /// (task reopened after INVALID).
    pub fn open(
        &self,
        need: NeedId,
        task: TaskId,
        budget: Credits,
        bounty_escrow: EscrowId,
        now: Timestamp,
        window_secs: u64,
    ) -> Result<AuctionRecord, SwarmError> {
        if let Some(existing) = self.db.get_auction(&need)? {
            if matches!(existing.phase, AuctionPhase::Open) {
                return Ok(existing);
            }
        }
        let record = AuctionRecord {
            need,
            task,
            budget,
            bounty_escrow,
            opened_at: now,
            window_secs,
            closes_at: now + window_secs as i64,
            extensions: 0,
            bids: Vec::new(),
            phase: AuctionPhase::Open,
        };
        self.db.put_auction(&record)?;
        info!(need = %need, budget, closes_at = record.closes_at, "auction opened");
        Ok(record)
    }

    pub fn get(&self, need: &NeedId) -> Result<Option<AuctionRecord>, SwarmError> {
        self.db.get_auction(need)
    }

    /// Record a bid inside the window. A bid landing within the anti-snipe
    /// tail extends the window by the tail, up to the extension cap.
    pub fn accept_bid(
        &self,
        need: &NeedId,
        bid: Bid,
        now: Timestamp,
        cfg: &SwarmConfig,
    ) -> Result<(), SwarmError> {
        let mut auction = self
            .db
            .get_auction(need)?
            .ok_or_else(|| SwarmError::AuctionMissing(need.to_hex()))?;
        if !matches!(auction.phase, AuctionPhase::Open) {
            return Err(SwarmError::AuctionClosed(need.to_hex()));
        }
        if now >= auction.closes_at {
            return Err(SwarmError::BidWindowClosed(need.to_hex()));
        }
        if auction.bids.iter().any(|b| b.proposal == bid.proposal) {
            // Redelivered PROPOSE; already recorded.
            return Ok(());
        }

        let remaining = (auction.closes_at - now) as u64;
        if remaining < cfg.anti_snipe_tail_secs
            && auction.extensions < cfg.anti_snipe_max_extensions
        {
            auction.closes_at += cfg.anti_snipe_tail_secs as i64;
            auction.extensions += 1;
            debug!(
                need = %need,
                extensions = auction.extensions,
                closes_at = auction.closes_at,
                "anti-snipe window extension"
            );
        }

        debug!(need = %need, bidder = %bid.bidder, cost = bid.cost, "bid accepted");
        auction.bids.push(bid);
        self.db.put_auction(&auction)?;
        Ok(())
    }

    /// Close the auction and pick the winner.
    ///
    /// Winner = highest score; ties broken by reputation, then by a
    /// deterministic hash of (bidder, need). Returns `None` if no bids
    /// arrived.
    pub fn close(
        &self,
        need: &NeedId,
        reputation_of: impl Fn(&AgentId) -> u32,
    ) -> Result<Option<Bid>, SwarmError> {
        let mut auction = self
            .db
            .get_auction(need)?
            .ok_or_else(|| SwarmError::AuctionMissing(need.to_hex()))?;
        if let AuctionPhase::Closed { winner } = &auction.phase {
            // Idempotent close.
            let winner = *winner;
            return Ok(auction.bids.into_iter().find(|b| Some(b.proposal) == winner));
        }

        // ETAs normalize against the window this auction actually ran
        // with, which may differ from the configured default.
        let window_ms = auction.window_secs * 1000;
        let winner = auction
            .bids
            .iter()
            .max_by(|a, b| {
                let score_a = score_bid(a, auction.budget, window_ms);
                let score_b = score_bid(b, auction.budget, window_ms);
                score_a
                    .cmp(&score_b)
                    .then_with(|| reputation_of(&a.bidder).cmp(&reputation_of(&b.bidder)))
                    .then_with(|| tie_hash(&a.bidder, need).cmp(&tie_hash(&b.bidder, need)))
            })
            .cloned();

        auction.phase = AuctionPhase::Closed {
            winner: winner.as_ref().map(|b| b.proposal),
        };
        self.db.put_auction(&auction)?;
        info!(
            need = %need,
            winner = ?winner.as_ref().map(|b| b.bidder),
            bids = auction.bids.len(),
            "auction closed"
        );
        Ok(winner)
    }
}
