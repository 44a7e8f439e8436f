//! The service locator handed to every handler.
//!
//! Built once at node startup and threaded explicitly — the Lamport clock
//! and epoch manager are the only process-wide singletons, and they live
//! here rather than in ad-hoc globals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use canswarm_auction::{AuctionBook, LeaseTable};
use canswarm_challenge::ChallengeBook;
use canswarm_clock::LamportClock;
use canswarm_consensus::{ConsensusStore, EpochManager, QuorumTracker};
use canswarm_core::config::SwarmConfig;
use canswarm_core::envelope::Payload;
use canswarm_core::envelope::Envelope;
use canswarm_core::error::SwarmError;
use canswarm_core::types::{CapsuleHash, ThreadId, Timestamp};
use canswarm_crypto::{build_envelope, EnvelopeMeta, KeyPair};
use canswarm_ledger::Ledger;
use canswarm_plan::{PlanStore, PlanViews};
use canswarm_policy::PolicyGate;
use canswarm_store::{AuditLog, Cas, SwarmDb};
use canswarm_verifier::VerifierPool;

pub struct SwarmContext {
    pub db: Arc<SwarmDb>,
    pub cas: Arc<Cas>,
    pub audit: Arc<AuditLog>,
    pub clock: Arc<LamportClock>,
    pub plan: Arc<PlanStore>,
    pub views: Arc<PlanViews>,
    pub ledger: Arc<Ledger>,
    pub consensus: Arc<ConsensusStore>,
    pub epochs: Arc<EpochManager>,
    pub quorum: Arc<QuorumTracker>,
    pub pool: Arc<VerifierPool>,
    pub policy: Arc<PolicyGate>,
    pub auctions: Arc<AuctionBook>,
    pub leases: Arc<LeaseTable>,
    pub challenges: Arc<ChallengeBook>,
    pub cfg: SwarmConfig,
    pub node_key: Arc<KeyPair>,
    /// The capsule this node stamps into synthesized envelopes.
    pub capsule: CapsuleHash,
    /// Raised by the partition detector while the connected peer set is
    /// below quorum. Writes stay in the log either way; the flag marks the
    /// regime they were made under.
    pub partition_suspected: AtomicBool,
}

impl SwarmContext {
    /// Build a signed envelope from this node's identity. Used for
    /// internal triggers (DECIDE, FINALIZE, RELEASE, RECONCILE) so they
    /// flow through the same bus → gate → dispatch path as everything else.
    pub fn synthesize(
        &self,
        thread: ThreadId,
        payload: Payload,
        ts: Timestamp,
    ) -> Result<Envelope, SwarmError> {
        let lamport = self.clock.tick();
        build_envelope(
            payload,
            EnvelopeMeta {
                thread,
                lamport,
                ts,
                capsule: self.capsule,
                epoch: self.epochs.current(),
                nonce: lamport,
            },
            &self.node_key,
        )
    }

    pub fn suspected(&self) -> bool {
        self.partition_suspected.load(Ordering::SeqCst)
    }

    /// Active verifier count as of `now`, shared by every quorum formula.
    pub fn active_verifiers(&self, now: Timestamp) -> Result<usize, SwarmError> {
        Ok(self.pool.active_set(&self.ledger, &self.cfg, now)?.len())
    }
}
