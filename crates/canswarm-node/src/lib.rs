//! canswarm-node
//!
//! Node assembly: opens the stores, applies genesis, wires the bus through
//! the policy gate into the dispatcher, and runs the background loops
//! (Lamport flusher, lease scavenger, auction closer, unbond expirer,
//! bounty sweeper, partition detector). The binary in `main.rs` is a thin
//! shell over [`Node::start`]; the end-to-end tests drive the same
//! assembly in-process.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use canswarm_auction::{AuctionBook, LeaseTable};
use canswarm_bus::{subject_for, Bus, BusObserver, InProcBus, IngressGate};
use canswarm_challenge::ChallengeBook;
use canswarm_clock::LamportClock;
use canswarm_consensus::{ConsensusStore, EpochManager, QuorumTracker};
use canswarm_core::config::SwarmConfig;
use canswarm_core::envelope::{Envelope, Payload};
use canswarm_core::error::SwarmError;
use canswarm_core::types::{ThreadId, Timestamp};
use canswarm_crypto::{build_envelope, EnvelopeMeta, KeyPair};
use canswarm_dispatch::{Dispatcher, PartitionDetector, SwarmContext};
use canswarm_genesis::GenesisParams;
use canswarm_ledger::Ledger;
use canswarm_plan::{PlanStore, PlanViews};
use canswarm_policy::PolicyGate;
use canswarm_store::{AuditLog, Cas, SwarmDb};
use canswarm_verifier::VerifierPool;

// ── Bus adapters ─────────────────────────────────────────────────────────────

struct GateAdapter(Arc<PolicyGate>);

impl IngressGate for GateAdapter {
    fn check(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        self.0.ingress(envelope).map(|_| ())
    }
}

struct AuditObserver(Arc<AuditLog>);

impl BusObserver for AuditObserver {
    fn on_publish(&self, subject: &str, envelope: &Envelope) {
        if let Err(e) = self.0.record_publish(subject, envelope) {
            warn!(error = %e, "audit publish record failed");
        }
    }

    fn on_deliver(&self, subject: &str, envelope: &Envelope) {
        if let Err(e) = self.0.record_deliver(subject, envelope) {
            warn!(error = %e, "audit deliver record failed");
        }
    }
}

// ── Node ─────────────────────────────────────────────────────────────────────

pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub cfg: SwarmConfig,
    /// Fixed identity seed (tests, replay). None = generate and persist.
    pub node_seed: Option<[u8; 32]>,
    pub genesis: GenesisParams,
    /// Spawn the timer loops. Tests that drive time by hand leave this off.
    pub background_loops: bool,
}

pub struct Node {
    pub ctx: Arc<SwarmContext>,
    pub dispatcher: Arc<Dispatcher>,
    pub bus: Arc<InProcBus>,
    pub detector: Arc<PartitionDetector>,
    pub audit_dir: PathBuf,
    shutdown: watch::Sender<bool>,
}

impl Node {
    pub async fn start(config: NodeConfig) -> Result<Node, SwarmError> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| SwarmError::Storage(e.to_string()))?;
        let db = Arc::new(SwarmDb::open(config.data_dir.join("db"))?);
        let cas = Arc::new(Cas::open(config.data_dir.join("cas"))?);

        let node_key = Arc::new(load_or_create_identity(
            &config.data_dir,
            config.node_seed,
        )?);
        let audit_dir = config.data_dir.join("audit");
        let audit = Arc::new(AuditLog::open(&audit_dir, Arc::clone(&node_key))?);

        let ledger = Ledger::new(Arc::clone(&db));
        let policy = Arc::new(PolicyGate::new(Arc::clone(&db)));
        let pool = Arc::new(VerifierPool::new(Arc::clone(&db)));
        let capsule =
            canswarm_genesis::apply_genesis(&db, &ledger, &policy, &pool, &config.genesis)?;

        let ctx = Arc::new(SwarmContext {
            cas,
            audit: Arc::clone(&audit),
            clock: Arc::new(LamportClock::open(Arc::clone(&db))?),
            plan: Arc::new(PlanStore::new(Arc::clone(&db))),
            views: Arc::new(PlanViews::new(Arc::clone(&db))),
            ledger: Arc::new(Ledger::new(Arc::clone(&db))),
            consensus: Arc::new(ConsensusStore::new(Arc::clone(&db))),
            epochs: Arc::new(EpochManager::open(Arc::clone(&db))?),
            quorum: Arc::new(QuorumTracker::new()),
            pool,
            policy: Arc::clone(&policy),
            auctions: Arc::new(AuctionBook::new(Arc::clone(&db))),
            leases: Arc::new(LeaseTable::new(Arc::clone(&db))),
            challenges: Arc::new(ChallengeBook::new(Arc::clone(&db))),
            cfg: config.cfg.clone(),
            node_key,
            capsule,
            partition_suspected: AtomicBool::new(false),
            db,
        });

        // A restarted node must remember partial quorums: the tracker is
        // in-memory, the attestations are not.
        rebuild_quorum(&ctx)?;

        let bus = Arc::new(InProcBus::new(
            Box::new(GateAdapter(Arc::clone(&policy))),
            Box::new(AuditObserver(audit)),
            config.cfg.bus_queue_depth,
        ));

        let detector = Arc::new(PartitionDetector::new(0));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&ctx)));
        let subscription = bus.subscribe("thread.>")?;
        tokio::spawn(Arc::clone(&dispatcher).run(
            subscription,
            Arc::clone(&bus) as Arc<dyn Bus>,
            shutdown_rx.clone(),
        ));

        if config.background_loops {
            spawn_loops(
                Arc::clone(&ctx),
                Arc::clone(&dispatcher),
                Arc::clone(&bus),
                Arc::clone(&detector),
                shutdown_rx,
            );
        }

        info!(node = %ctx.node_key.agent_id, "node started");
        Ok(Node {
            ctx,
            dispatcher,
            bus,
            detector,
            audit_dir,
            shutdown,
        })
    }

    /// Build, publish and return an envelope from an agent keypair.
    pub async fn publish_as(
        &self,
        key: &KeyPair,
        thread: ThreadId,
        payload: Payload,
        ts: Timestamp,
    ) -> Result<Envelope, SwarmError> {
        let lamport = self.ctx.clock.tick();
        let envelope = build_envelope(
            payload,
            EnvelopeMeta {
                thread,
                lamport,
                ts,
                capsule: self.ctx.capsule,
                epoch: self.ctx.epochs.current(),
                nonce: lamport,
            },
            key,
        )?;
        // Sender-side preflight, then out through the bus.
        self.ctx.policy.preflight(&envelope)?;
        let subject = subject_for(&thread, envelope.kind);
        self.bus.publish(&subject, envelope.clone()).await?;
        Ok(envelope)
    }

    /// Publish pre-built envelopes (dispatcher follow-ups, reconcile).
    pub async fn publish_envelope(&self, envelope: Envelope) -> Result<(), SwarmError> {
        let subject = subject_for(&envelope.thread, envelope.kind);
        self.bus.publish(&subject, envelope).await
    }

    /// Give the in-proc bus a moment to drain, including follow-up chains.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    /// Graceful shutdown: stop the loops and flush the clock synchronously.
    pub fn shutdown(&self) -> Result<(), SwarmError> {
        let _ = self.shutdown.send(true);
        self.ctx.clock.shutdown()?;
        self.ctx.db.flush()?;
        Ok(())
    }
}

fn spawn_loops(
    ctx: Arc<SwarmContext>,
    dispatcher: Arc<Dispatcher>,
    bus: Arc<InProcBus>,
    detector: Arc<PartitionDetector>,
    shutdown: watch::Receiver<bool>,
) {
    // Lamport flusher.
    tokio::spawn(Arc::clone(&ctx.clock).run_flusher(shutdown.clone()));

    // Lease scavenger.
    {
        let dispatcher = Arc::clone(&dispatcher);
        let bus = Arc::clone(&bus);
        let mut shutdown = shutdown.clone();
        let interval_secs = ctx.cfg.scavenge_interval_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = chrono::Utc::now().timestamp();
                        match dispatcher.scavenge(now) {
                            Ok(releases) => {
                                for release in releases {
                                    let subject = subject_for(&release.thread, release.kind);
                                    if let Err(e) = bus.publish(&subject, release).await {
                                        warn!(error = %e, "scavenge publish failed");
                                    }
                                }
                            }
                            Err(e) => warn!(error = %e, "scavenge sweep failed"),
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
        });
    }

    // Auction closer.
    {
        let dispatcher = Arc::clone(&dispatcher);
        let bus = Arc::clone(&bus);
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = chrono::Utc::now().timestamp();
                        let due = match dispatcher.due_auctions(now) {
                            Ok(due) => due,
                            Err(e) => {
                                warn!(error = %e, "auction due check failed");
                                continue;
                            }
                        };
                        for need in due {
                            match dispatcher.close_auction(&need, now) {
                                Ok(grants) => {
                                    for grant in grants {
                                        let subject = subject_for(&grant.thread, grant.kind);
                                        if let Err(e) = bus.publish(&subject, grant).await {
                                            warn!(error = %e, "claim grant publish failed");
                                        }
                                    }
                                }
                                Err(e) => warn!(need = %need, error = %e, "auction close failed"),
                            }
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
        });
    }

    // Unbond expirer and bounty sweeper.
    {
        let ctx = Arc::clone(&ctx);
        let dispatcher = Arc::clone(&dispatcher);
        let bus = Arc::clone(&bus);
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                ctx.cfg.scavenge_interval_secs,
            ));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = chrono::Utc::now().timestamp();
                        if let Err(e) = ctx.ledger.complete_unbonds(now) {
                            warn!(error = %e, "unbond sweep failed");
                        }
                        match dispatcher.sweep_payouts(now) {
                            Ok(finalizes) => {
                                for finalize in finalizes {
                                    let subject = subject_for(&finalize.thread, finalize.kind);
                                    if let Err(e) = bus.publish(&subject, finalize).await {
                                        warn!(error = %e, "payout sweep publish failed");
                                    }
                                }
                            }
                            Err(e) => warn!(error = %e, "payout sweep failed"),
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
        });
    }

    // Partition detector.
    {
        let ctx = Arc::clone(&ctx);
        let detector = Arc::clone(&detector);
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                ctx.cfg.peer_heartbeat_interval_secs,
            ));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        detector.check(&ctx, chrono::Utc::now().timestamp());
                    }
                    _ = shutdown.changed() => return,
                }
            }
        });
    }
}

/// Rebuild the in-memory quorum tracker from the persisted attestation
/// log. Without this, two of three attestations landing before a restart
/// and the third after it would report count = 1 and the quorum would
/// never fire, even though all three records are on disk.
///
/// K is computed the way the handlers compute it, against the registry's
/// most recent activity timestamp (wall time on a fresh database). A
/// quorum that already completed fires again into the void here, which
/// also re-marks it fired so late attestations cannot fire it twice.
fn rebuild_quorum(ctx: &SwarmContext) -> Result<(), SwarmError> {
    use canswarm_core::protocol::AttestTarget;

    let now_ref = ctx
        .db
        .iter_verifiers()?
        .iter()
        .map(|r| r.last_active)
        .max()
        .unwrap_or_else(|| chrono::Utc::now().timestamp());
    let active = ctx.active_verifiers(now_ref)?;

    let mut seeded = 0usize;
    for attest in ctx.db.iter_attests()? {
        if !attest.verdict {
            continue;
        }
        let (scope, k) = match attest.target {
            AttestTarget::Plan => (*attest.need.as_bytes(), ctx.cfg.k_plan(active)),
            AttestTarget::Result => (
                *attest.task.as_bytes(),
                ctx.challenges
                    .k_result_for(&attest.task, ctx.cfg.k_result(active))?,
            ),
        };
        ctx.quorum
            .add_attestation(scope, attest.subject, attest.attestor, k);
        seeded += 1;
    }
    if seeded > 0 {
        info!(seeded, "quorum tracker rebuilt from attestation log");
    }
    Ok(())
}

fn load_or_create_identity(
    data_dir: &Path,
    seed: Option<[u8; 32]>,
) -> Result<KeyPair, SwarmError> {
    if let Some(seed) = seed {
        return Ok(KeyPair::from_seed(seed));
    }
    let path = data_dir.join("identity.seed");
    if path.exists() {
        let hex_seed =
            std::fs::read_to_string(&path).map_err(|e| SwarmError::Storage(e.to_string()))?;
        let bytes = hex::decode(hex_seed.trim())
            .map_err(|e| SwarmError::Serialization(e.to_string()))?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes[..32]);
        Ok(KeyPair::from_seed(arr))
    } else {
        // Persist the seed so the node keeps its identity across restarts.
        let seed: [u8; 32] = rand::random();
        std::fs::write(&path, hex::encode(seed))
            .map_err(|e| SwarmError::Storage(e.to_string()))?;
        Ok(KeyPair::from_seed(seed))
    }
}
