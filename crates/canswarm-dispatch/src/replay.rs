//! The replay verifier.
//!
//! Rebuilds swarm state on a clean database from the signed audit log
//! alone — the log is the only permitted input. Follow-up synthesis is
//! disabled during replay: every envelope the live node synthesized is
//! already in the log, and handler mutations derive purely from envelope
//! fields, so the rebuilt plan, ledger and decide table are byte-identical
//! to the originals.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{debug, info};

use canswarm_auction::{AuctionBook, LeaseTable};
use canswarm_challenge::ChallengeBook;
use canswarm_clock::LamportClock;
use canswarm_consensus::{ConsensusStore, EpochManager, QuorumTracker};
use canswarm_core::config::SwarmConfig;
use canswarm_core::error::SwarmError;
use canswarm_core::types::ThreadId;
use canswarm_crypto::{sha256, to_canonical_json, KeyPair};
use canswarm_ledger::Ledger;
use canswarm_plan::{PlanStore, PlanViews};
use canswarm_policy::PolicyGate;
use canswarm_store::{AuditDirection, AuditLog, AuditReader, Cas, SwarmDb};
use canswarm_verifier::VerifierPool;

use crate::context::SwarmContext;
use crate::dispatcher::Dispatcher;

/// Everything a replay needs besides the log itself: the genesis that
/// seeded the original node and a scratch directory for the rebuilt state.
pub struct ReplayEnv<'a> {
    pub scratch_dir: &'a Path,
    pub cas_dir: &'a Path,
    pub cfg: SwarmConfig,
    pub node_seed: [u8; 32],
    pub genesis: canswarm_genesis::GenesisParams,
}

/// Rebuild a context on a clean database and drive every DELIVER record
/// through the dispatcher in file order.
pub fn replay(env: &ReplayEnv<'_>, audit_dir: &Path) -> Result<[u8; 32], SwarmError> {
    let db = Arc::new(SwarmDb::open(env.scratch_dir)?);
    let node_key = Arc::new(KeyPair::from_seed(env.node_seed));
    let replay_audit_dir = env.scratch_dir.join("audit");
    let ctx = Arc::new(SwarmContext {
        cas: Arc::new(Cas::open(env.cas_dir)?),
        audit: Arc::new(AuditLog::open(&replay_audit_dir, Arc::clone(&node_key))?),
        clock: Arc::new(LamportClock::open(Arc::clone(&db))?),
        plan: Arc::new(PlanStore::new(Arc::clone(&db))),
        views: Arc::new(PlanViews::new(Arc::clone(&db))),
        ledger: Arc::new(Ledger::new(Arc::clone(&db))),
        consensus: Arc::new(ConsensusStore::new(Arc::clone(&db))),
        epochs: Arc::new(EpochManager::open(Arc::clone(&db))?),
        quorum: Arc::new(QuorumTracker::new()),
        pool: Arc::new(VerifierPool::new(Arc::clone(&db))),
        policy: Arc::new(PolicyGate::new(Arc::clone(&db))),
        auctions: Arc::new(AuctionBook::new(Arc::clone(&db))),
        leases: Arc::new(LeaseTable::new(Arc::clone(&db))),
        challenges: Arc::new(ChallengeBook::new(Arc::clone(&db))),
        cfg: env.cfg.clone(),
        node_key,
        capsule: canswarm_genesis::apply_genesis(
            &db,
            &Ledger::new(Arc::clone(&db)),
            &PolicyGate::new(Arc::clone(&db)),
            &VerifierPool::new(Arc::clone(&db)),
            &env.genesis,
        )?,
        partition_suspected: AtomicBool::new(false),
        db,
    });

    let dispatcher = Dispatcher::new(Arc::clone(&ctx));
    let reader = AuditReader::open(audit_dir);
    for thread in reader.threads()? {
        let records = reader.thread_records(&thread)?;
        info!(thread = %thread, records = records.len(), "replaying thread");
        for record in records {
            record.verify()?;
            if record.body.direction != AuditDirection::Deliver {
                continue;
            }
            // Follow-ups are dropped: the live node's synthesized envelopes
            // appear later in the log under their own DELIVER records.
            match dispatcher.handle(&record.body.envelope) {
                Ok(_) | Err(_) => {
                    debug!(id = %record.body.envelope.id, "replayed");
                }
            }
        }
    }

    state_digest(&ctx)
}

/// Canonical digest of the replay-relevant state: task views, accounts,
/// escrows, decide records and the supply counters, in sorted order.
pub fn state_digest(ctx: &SwarmContext) -> Result<[u8; 32], SwarmError> {
    let mut tasks = ctx.db.iter_tasks()?;
    tasks.sort_by_key(|t| t.task);
    let mut accounts = ctx.db.iter_accounts()?;
    accounts.sort_by_key(|a| a.account);
    let mut escrows = ctx.db.iter_escrows()?;
    escrows.sort_by_key(|e| e.escrow_id);
    let mut decides = ctx.consensus.all_decides()?;
    decides.sort_by_key(|d| d.need);
    let meta = ctx.db.ledger_meta()?;

    let bytes = to_canonical_json(&(tasks, accounts, escrows, decides, meta))?;
    Ok(sha256(&bytes))
}

/// Verify a thread's audit log: every record signature must check out and
/// the Lamport stamps of one sender within the thread must be monotone.
pub fn verify_log(audit_dir: &Path, thread: &ThreadId) -> Result<usize, SwarmError> {
    let reader = AuditReader::open(audit_dir);
    let records = reader.thread_records(thread)?;
    let mut last_per_sender: std::collections::HashMap<_, u64> = std::collections::HashMap::new();
    for record in &records {
        record.verify()?;
        if record.body.direction == AuditDirection::Publish {
            let envelope = &record.body.envelope;
            if let Some(last) = last_per_sender.get(&envelope.sender) {
                if envelope.lamport <= *last {
                    return Err(SwarmError::LamportInvalid);
                }
            }
            last_per_sender.insert(envelope.sender, envelope.lamport);
        }
    }
    Ok(records.len())
}
