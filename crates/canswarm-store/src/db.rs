use std::path::Path;

use canswarm_core::error::SwarmError;
use canswarm_core::ledger::{AccountState, EscrowState, LedgerMeta, SlashEvent, UnbondingEntry};
use canswarm_core::plan::{PlanOp, TaskView};
use canswarm_core::protocol::{
    AttestRecord, AuctionRecord, ChallengeRecord, DecideRecord, EpochRecord, Lease, PolicyCapsule,
    VerifierRecord,
};
use canswarm_core::types::{
    AgentId, CapsuleHash, ChallengeId, EnvelopeId, EscrowId, NeedId, OpId, TaskId, ThreadId,
};

fn storage_err(e: impl std::fmt::Display) -> SwarmError {
    SwarmError::Storage(e.to_string())
}

fn ser_err(e: impl std::fmt::Display) -> SwarmError {
    SwarmError::Serialization(e.to_string())
}

/// Persistent swarm database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   plan_ops       — OpId bytes                         → bincode(PlanOp)
///   plan_op_index  — thread ‖ lamport be8 ‖ OpId        → OpId bytes
///   tasks          — TaskId bytes                       → bincode(TaskView)
///   decides        — bucket u8 ‖ NeedId bytes           → bincode(DecideRecord)
///   bucket_epochs  — bucket u8                          → u64 be8
///   accounts       — AgentId bytes                      → bincode(AccountState)
///   escrows        — EscrowId bytes                     → bincode(EscrowState)
///   unbonding      — AgentId ‖ matures be8 ‖ seq be8    → bincode(UnbondingEntry)
///   slash_events   — seq be8                            → bincode(SlashEvent)
///   verifiers      — AgentId bytes                      → bincode(VerifierRecord)
///   leases         — TaskId bytes                       → bincode(Lease)
///   auctions       — NeedId bytes                       → bincode(AuctionRecord)
///   challenges     — ChallengeId bytes                  → bincode(ChallengeRecord)
///   attest_log     — TaskId ‖ subject ‖ AgentId         → bincode(AttestRecord)
///   capsules       — CapsuleHash bytes                  → bincode(PolicyCapsule)
///   seen_envelopes — EnvelopeId bytes                   → []   (dedup set)
///   meta           — utf8 key bytes                     → raw bytes
pub struct SwarmDb {
    db: sled::Db,
    plan_ops: sled::Tree,
    plan_op_index: sled::Tree,
    tasks: sled::Tree,
    decides: sled::Tree,
    bucket_epochs: sled::Tree,
    accounts: sled::Tree,
    escrows: sled::Tree,
    unbonding: sled::Tree,
    slash_events: sled::Tree,
    verifiers: sled::Tree,
    leases: sled::Tree,
    auctions: sled::Tree,
    challenges: sled::Tree,
    attest_log: sled::Tree,
    capsules: sled::Tree,
    seen_envelopes: sled::Tree,
    meta: sled::Tree,
}

impl SwarmDb {
    /// Open or create the swarm database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SwarmError> {
        let db = sled::open(path).map_err(storage_err)?;
        let open = |name: &str| db.open_tree(name).map_err(storage_err);
        Ok(Self {
            plan_ops: open("plan_ops")?,
            plan_op_index: open("plan_op_index")?,
            tasks: open("tasks")?,
            decides: open("decides")?,
            bucket_epochs: open("bucket_epochs")?,
            accounts: open("accounts")?,
            escrows: open("escrows")?,
            unbonding: open("unbonding")?,
            slash_events: open("slash_events")?,
            verifiers: open("verifiers")?,
            leases: open("leases")?,
            auctions: open("auctions")?,
            challenges: open("challenges")?,
            attest_log: open("attest_log")?,
            capsules: open("capsules")?,
            seen_envelopes: open("seen_envelopes")?,
            meta: open("meta")?,
            db,
        })
    }

    /// Monotone process-local sequence number (used for composite keys).
    pub fn next_seq(&self) -> Result<u64, SwarmError> {
        self.db.generate_id().map_err(storage_err)
    }

    /// Flush all trees to disk. Called on graceful shutdown.
    pub fn flush(&self) -> Result<(), SwarmError> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    // ── Generic helpers ──────────────────────────────────────────────────────

    fn get_typed<T: serde::de::DeserializeOwned>(
        tree: &sled::Tree,
        key: &[u8],
    ) -> Result<Option<T>, SwarmError> {
        match tree.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    fn put_typed<T: serde::Serialize>(
        tree: &sled::Tree,
        key: &[u8],
        value: &T,
    ) -> Result<(), SwarmError> {
        let bytes = bincode::serialize(value).map_err(ser_err)?;
        tree.insert(key, bytes).map_err(storage_err)?;
        Ok(())
    }

    // ── Plan ops ─────────────────────────────────────────────────────────────

    pub fn get_plan_op(&self, op_id: &OpId) -> Result<Option<PlanOp>, SwarmError> {
        Self::get_typed(&self.plan_ops, op_id.as_bytes())
    }

    pub fn plan_op_exists(&self, op_id: &OpId) -> bool {
        self.plan_ops.contains_key(op_id.as_bytes()).unwrap_or(false)
    }

    /// Persist an op and its thread-order index entry.
    pub fn put_plan_op(&self, op: &PlanOp) -> Result<(), SwarmError> {
        Self::put_typed(&self.plan_ops, op.op_id.as_bytes(), op)?;
        let mut key = Vec::with_capacity(72);
        key.extend_from_slice(op.thread.as_bytes());
        key.extend_from_slice(&op.lamport.to_be_bytes());
        key.extend_from_slice(op.op_id.as_bytes());
        self.plan_op_index
            .insert(key, op.op_id.as_bytes().to_vec())
            .map_err(storage_err)?;
        Ok(())
    }

    /// All ops for a thread, ordered by (lamport, op id).
    pub fn ops_for_thread(&self, thread: &ThreadId) -> Result<Vec<PlanOp>, SwarmError> {
        let mut out = Vec::new();
        for item in self.plan_op_index.scan_prefix(thread.as_bytes()) {
            let (_, op_id_bytes) = item.map_err(storage_err)?;
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&op_id_bytes);
            if let Some(op) = self.get_plan_op(&OpId::from_bytes(arr))? {
                out.push(op);
            }
        }
        Ok(out)
    }

    // ── Tasks (materialized views) ───────────────────────────────────────────

    pub fn get_task(&self, task: &TaskId) -> Result<Option<TaskView>, SwarmError> {
        Self::get_typed(&self.tasks, task.as_bytes())
    }

    pub fn put_task(&self, view: &TaskView) -> Result<(), SwarmError> {
        Self::put_typed(&self.tasks, view.task.as_bytes(), view)
    }

    pub fn iter_tasks(&self) -> Result<Vec<TaskView>, SwarmError> {
        let mut out = Vec::new();
        for item in self.tasks.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    // ── Decide records ───────────────────────────────────────────────────────

    fn decide_key(need: &NeedId) -> Vec<u8> {
        let bucket = canswarm_crypto::sha256(need.as_bytes())[0];
        let mut key = Vec::with_capacity(33);
        key.push(bucket);
        key.extend_from_slice(need.as_bytes());
        key
    }

    pub fn get_decide(&self, need: &NeedId) -> Result<Option<DecideRecord>, SwarmError> {
        Self::get_typed(&self.decides, &Self::decide_key(need))
    }

    /// Atomic insert-if-absent of a decide record. Returns the previously
    /// stored record when the key was already occupied.
    pub fn decide_cas(&self, record: &DecideRecord) -> Result<Option<DecideRecord>, SwarmError> {
        let key = Self::decide_key(&record.need);
        let bytes = bincode::serialize(record).map_err(ser_err)?;
        match self
            .decides
            .compare_and_swap(&key, None as Option<&[u8]>, Some(bytes))
            .map_err(storage_err)?
        {
            Ok(()) => Ok(None),
            Err(cas) => {
                let current = cas.current.ok_or(SwarmError::LedgerBusy)?;
                Ok(Some(bincode::deserialize(&current).map_err(ser_err)?))
            }
        }
    }

    /// Overwrite an existing decide record (partition-heal merge only).
    pub fn put_decide(&self, record: &DecideRecord) -> Result<(), SwarmError> {
        Self::put_typed(&self.decides, &Self::decide_key(&record.need), record)
    }

    pub fn iter_decides(&self) -> Result<Vec<DecideRecord>, SwarmError> {
        let mut out = Vec::new();
        for item in self.decides.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    pub fn bucket_epoch(&self, bucket: u8) -> Result<u64, SwarmError> {
        match self.bucket_epochs.get([bucket]).map_err(storage_err)? {
            Some(bytes) => {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&bytes);
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    pub fn set_bucket_epoch(&self, bucket: u8, epoch: u64) -> Result<(), SwarmError> {
        self.bucket_epochs
            .insert([bucket], epoch.to_be_bytes().to_vec())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn bucket_of(need: &NeedId) -> u8 {
        canswarm_crypto::sha256(need.as_bytes())[0]
    }

    // ── Accounts / ledger ────────────────────────────────────────────────────

    pub fn get_account(&self, id: &AgentId) -> Result<Option<AccountState>, SwarmError> {
        Self::get_typed(&self.accounts, id.as_bytes())
    }

    pub fn put_account(&self, account: &AccountState) -> Result<(), SwarmError> {
        Self::put_typed(&self.accounts, account.account.as_bytes(), account)
    }

    pub fn account_exists(&self, id: &AgentId) -> bool {
        self.accounts.contains_key(id.as_bytes()).unwrap_or(false)
    }

    pub fn iter_accounts(&self) -> Result<Vec<AccountState>, SwarmError> {
        let mut out = Vec::new();
        for item in self.accounts.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    pub fn get_escrow(&self, id: &EscrowId) -> Result<Option<EscrowState>, SwarmError> {
        Self::get_typed(&self.escrows, id.as_bytes())
    }

    pub fn put_escrow(&self, escrow: &EscrowState) -> Result<(), SwarmError> {
        Self::put_typed(&self.escrows, escrow.escrow_id.as_bytes(), escrow)
    }

    pub fn iter_escrows(&self) -> Result<Vec<EscrowState>, SwarmError> {
        let mut out = Vec::new();
        for item in self.escrows.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    /// Atomic release of an escrow: flips `released` and credits `to`
    /// inside one sled transaction. Exactly one concurrent caller wins;
    /// the rest see `EscrowAlreadyReleased`.
    pub fn release_escrow_txn(
        &self,
        escrow_id: &EscrowId,
        to: &AgentId,
    ) -> Result<EscrowState, SwarmError> {
        use sled::transaction::ConflictableTransactionError as Abort;
        use sled::Transactional;

        let result = (&self.escrows, &self.accounts).transaction(|(escrows, accounts)| {
            let escrow_bytes = escrows
                .get(escrow_id.as_bytes())?
                .ok_or(Abort::Abort(SwarmError::EscrowMissing(escrow_id.to_hex())))?;
            let mut escrow: EscrowState = bincode::deserialize(&escrow_bytes)
                .map_err(|e| Abort::Abort(SwarmError::Serialization(e.to_string())))?;
            if escrow.released {
                return Err(Abort::Abort(SwarmError::EscrowAlreadyReleased(
                    escrow_id.to_hex(),
                )));
            }
            escrow.released = true;

            let account_bytes = accounts
                .get(to.as_bytes())?
                .ok_or(Abort::Abort(SwarmError::UnknownAccount(to.to_string())))?;
            let mut account: AccountState = bincode::deserialize(&account_bytes)
                .map_err(|e| Abort::Abort(SwarmError::Serialization(e.to_string())))?;
            account.balance = account.balance.saturating_add(escrow.amount);

            let escrow_out = bincode::serialize(&escrow)
                .map_err(|e| Abort::Abort(SwarmError::Serialization(e.to_string())))?;
            let account_out = bincode::serialize(&account)
                .map_err(|e| Abort::Abort(SwarmError::Serialization(e.to_string())))?;
            escrows.insert(escrow_id.as_bytes().as_slice(), escrow_out)?;
            accounts.insert(to.as_bytes().as_slice(), account_out)?;
            Ok(escrow.clone())
        });

        match result {
            Ok(escrow) => Ok(escrow),
            Err(sled::transaction::TransactionError::Abort(e)) => Err(e),
            Err(sled::transaction::TransactionError::Storage(e)) => Err(storage_err(e)),
        }
    }

    // ── Unbonding ────────────────────────────────────────────────────────────

    pub fn push_unbonding(&self, entry: &UnbondingEntry) -> Result<(), SwarmError> {
        let seq = self.next_seq()?;
        let mut key = Vec::with_capacity(48);
        key.extend_from_slice(entry.account.as_bytes());
        key.extend_from_slice(&(entry.matures_at.max(0) as u64).to_be_bytes());
        key.extend_from_slice(&seq.to_be_bytes());
        Self::put_typed(&self.unbonding, &key, entry)
    }

    pub fn iter_unbonding(&self) -> Result<Vec<(Vec<u8>, UnbondingEntry)>, SwarmError> {
        let mut out = Vec::new();
        for item in self.unbonding.iter() {
            let (key, bytes) = item.map_err(storage_err)?;
            out.push((key.to_vec(), bincode::deserialize(&bytes).map_err(ser_err)?));
        }
        Ok(out)
    }

    pub fn remove_unbonding(&self, key: &[u8]) -> Result<(), SwarmError> {
        self.unbonding.remove(key).map_err(storage_err)?;
        Ok(())
    }

    // ── Slash events ─────────────────────────────────────────────────────────

    pub fn append_slash_event(&self, event: &SlashEvent) -> Result<(), SwarmError> {
        let seq = self.next_seq()?;
        Self::put_typed(&self.slash_events, &seq.to_be_bytes(), event)
    }

    pub fn iter_slash_events(&self) -> Result<Vec<SlashEvent>, SwarmError> {
        let mut out = Vec::new();
        for item in self.slash_events.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    // ── Ledger meta ──────────────────────────────────────────────────────────

    pub fn ledger_meta(&self) -> Result<LedgerMeta, SwarmError> {
        Ok(Self::get_typed(&self.meta, b"ledger_meta")?.unwrap_or_default())
    }

    pub fn put_ledger_meta(&self, meta: &LedgerMeta) -> Result<(), SwarmError> {
        Self::put_typed(&self.meta, b"ledger_meta", meta)
    }

    // ── Verifiers ────────────────────────────────────────────────────────────

    pub fn get_verifier(&self, id: &AgentId) -> Result<Option<VerifierRecord>, SwarmError> {
        Self::get_typed(&self.verifiers, id.as_bytes())
    }

    pub fn put_verifier(&self, record: &VerifierRecord) -> Result<(), SwarmError> {
        Self::put_typed(&self.verifiers, record.manifest.agent.as_bytes(), record)
    }

    pub fn remove_verifier(&self, id: &AgentId) -> Result<(), SwarmError> {
        self.verifiers.remove(id.as_bytes()).map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_verifiers(&self) -> Result<Vec<VerifierRecord>, SwarmError> {
        let mut out = Vec::new();
        for item in self.verifiers.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    // ── Leases ───────────────────────────────────────────────────────────────

    pub fn get_lease(&self, task: &TaskId) -> Result<Option<Lease>, SwarmError> {
        Self::get_typed(&self.leases, task.as_bytes())
    }

    pub fn put_lease(&self, lease: &Lease) -> Result<(), SwarmError> {
        Self::put_typed(&self.leases, lease.task.as_bytes(), lease)
    }

    pub fn remove_lease(&self, task: &TaskId) -> Result<(), SwarmError> {
        self.leases.remove(task.as_bytes()).map_err(storage_err)?;
        Ok(())
    }

    /// Insert-if-absent for lease creation: at most one holder per task.
    pub fn lease_cas(&self, lease: &Lease) -> Result<Option<Lease>, SwarmError> {
        let bytes = bincode::serialize(lease).map_err(ser_err)?;
        match self
            .leases
            .compare_and_swap(lease.task.as_bytes(), None as Option<&[u8]>, Some(bytes))
            .map_err(storage_err)?
        {
            Ok(()) => Ok(None),
            Err(cas) => {
                let current = cas.current.ok_or(SwarmError::LedgerBusy)?;
                Ok(Some(bincode::deserialize(&current).map_err(ser_err)?))
            }
        }
    }

    pub fn iter_leases(&self) -> Result<Vec<Lease>, SwarmError> {
        let mut out = Vec::new();
        for item in self.leases.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    // ── Auctions ─────────────────────────────────────────────────────────────

    pub fn get_auction(&self, need: &NeedId) -> Result<Option<AuctionRecord>, SwarmError> {
        Self::get_typed(&self.auctions, need.as_bytes())
    }

    pub fn put_auction(&self, auction: &AuctionRecord) -> Result<(), SwarmError> {
        Self::put_typed(&self.auctions, auction.need.as_bytes(), auction)
    }

    pub fn iter_auctions(&self) -> Result<Vec<AuctionRecord>, SwarmError> {
        let mut out = Vec::new();
        for item in self.auctions.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    // ── Challenges ───────────────────────────────────────────────────────────

    pub fn get_challenge(&self, id: &ChallengeId) -> Result<Option<ChallengeRecord>, SwarmError> {
        Self::get_typed(&self.challenges, id.as_bytes())
    }

    pub fn put_challenge(&self, record: &ChallengeRecord) -> Result<(), SwarmError> {
        Self::put_typed(&self.challenges, record.challenge_id.as_bytes(), record)
    }

    pub fn iter_challenges(&self) -> Result<Vec<ChallengeRecord>, SwarmError> {
        let mut out = Vec::new();
        for item in self.challenges.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    // ── Attestation log ──────────────────────────────────────────────────────

    fn attest_key(task: &TaskId, subject: &[u8; 32], attestor: &AgentId) -> Vec<u8> {
        let mut key = Vec::with_capacity(96);
        key.extend_from_slice(task.as_bytes());
        key.extend_from_slice(subject);
        key.extend_from_slice(attestor.as_bytes());
        key
    }

    pub fn put_attest(&self, record: &AttestRecord) -> Result<(), SwarmError> {
        let key = Self::attest_key(&record.task, &record.subject, &record.attestor);
        Self::put_typed(&self.attest_log, &key, record)
    }

    pub fn get_attest(
        &self,
        task: &TaskId,
        subject: &[u8; 32],
        attestor: &AgentId,
    ) -> Result<Option<AttestRecord>, SwarmError> {
        Self::get_typed(&self.attest_log, &Self::attest_key(task, subject, attestor))
    }

    /// Every attestation on record. The restart path walks this to rebuild
    /// the in-memory quorum tracker.
    pub fn iter_attests(&self) -> Result<Vec<AttestRecord>, SwarmError> {
        let mut out = Vec::new();
        for item in self.attest_log.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    /// All attestations recorded for one (task, subject) pair.
    pub fn attests_for(
        &self,
        task: &TaskId,
        subject: &[u8; 32],
    ) -> Result<Vec<AttestRecord>, SwarmError> {
        let mut prefix = Vec::with_capacity(64);
        prefix.extend_from_slice(task.as_bytes());
        prefix.extend_from_slice(subject);
        let mut out = Vec::new();
        for item in self.attest_log.scan_prefix(&prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    // ── Policy capsules ──────────────────────────────────────────────────────

    pub fn get_capsule(&self, hash: &CapsuleHash) -> Result<Option<PolicyCapsule>, SwarmError> {
        Self::get_typed(&self.capsules, hash.as_bytes())
    }

    pub fn put_capsule(
        &self,
        hash: &CapsuleHash,
        capsule: &PolicyCapsule,
    ) -> Result<(), SwarmError> {
        Self::put_typed(&self.capsules, hash.as_bytes(), capsule)
    }

    pub fn capsule_known(&self, hash: &CapsuleHash) -> bool {
        self.capsules.contains_key(hash.as_bytes()).unwrap_or(false)
    }

    // ── Envelope dedup ───────────────────────────────────────────────────────

    /// Mark an envelope as processed. Returns false if it was already seen
    /// (at-least-once delivery dedup key).
    pub fn mark_seen(&self, id: &EnvelopeId) -> Result<bool, SwarmError> {
        match self
            .seen_envelopes
            .compare_and_swap(id.as_bytes(), None as Option<&[u8]>, Some(&[][..]))
            .map_err(storage_err)?
        {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    // ── Meta ─────────────────────────────────────────────────────────────────

    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, SwarmError> {
        Ok(self
            .meta
            .get(key.as_bytes())
            .map_err(storage_err)?
            .map(|v| v.to_vec()))
    }

    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), SwarmError> {
        self.meta.insert(key.as_bytes(), value).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_epoch_record(&self) -> Result<Option<EpochRecord>, SwarmError> {
        Self::get_typed(&self.meta, b"epoch")
    }

    pub fn put_epoch_record(&self, record: &EpochRecord) -> Result<(), SwarmError> {
        Self::put_typed(&self.meta, b"epoch", record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canswarm_core::protocol::DecideRecord;

    fn open_db(name: &str) -> SwarmDb {
        let dir = std::env::temp_dir().join(format!("canswarm_db_test_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        SwarmDb::open(&dir).unwrap()
    }

    fn decide(need: u8, proposal: u8) -> DecideRecord {
        DecideRecord {
            need: NeedId::from_bytes([need; 32]),
            proposal: canswarm_core::types::ProposalId::from_bytes([proposal; 32]),
            epoch: 1,
            lamport: 10,
            k_plan: 1,
            decider: AgentId::from_bytes([1; 32]),
            ts: 0,
            provisional: false,
        }
    }

    #[test]
    fn decide_cas_inserts_once() {
        let db = open_db("decide_cas");
        assert!(db.decide_cas(&decide(1, 1)).unwrap().is_none());
        // Second attempt for the same need observes the first record.
        let prior = db.decide_cas(&decide(1, 2)).unwrap().unwrap();
        assert_eq!(prior.proposal, canswarm_core::types::ProposalId::from_bytes([1; 32]));
    }

    #[test]
    fn mark_seen_dedups() {
        let db = open_db("seen");
        let id = EnvelopeId::from_bytes([3; 32]);
        assert!(db.mark_seen(&id).unwrap());
        assert!(!db.mark_seen(&id).unwrap());
    }

    #[test]
    fn escrow_release_is_exactly_once() {
        let db = open_db("escrow");
        let to = AgentId::from_bytes([5; 32]);
        db.put_account(&AccountState::new(to, 0)).unwrap();
        let escrow = EscrowState {
            escrow_id: EscrowId::from_bytes([6; 32]),
            from: AgentId::from_bytes([4; 32]),
            amount: 100,
            purpose: canswarm_core::ledger::EscrowPurpose::Bounty {
                need: NeedId::from_bytes([1; 32]),
            },
            created_at: 0,
            released: false,
        };
        db.put_escrow(&escrow).unwrap();

        db.release_escrow_txn(&escrow.escrow_id, &to).unwrap();
        assert_eq!(db.get_account(&to).unwrap().unwrap().balance, 100);
        assert!(matches!(
            db.release_escrow_txn(&escrow.escrow_id, &to),
            Err(SwarmError::EscrowAlreadyReleased(_))
        ));
        // Balance unchanged by the failed second release.
        assert_eq!(db.get_account(&to).unwrap().unwrap().balance, 100);
    }

    #[test]
    fn ops_for_thread_orders_by_lamport() {
        use canswarm_core::plan::{OpBody, PlanOp};
        let db = open_db("op_order");
        let thread = ThreadId::from_bytes([9; 32]);
        for (lamport, tag) in [(30u64, 3u8), (10, 1), (20, 2)] {
            db.put_plan_op(&PlanOp {
                op_id: OpId::from_bytes([tag; 32]),
                thread,
                lamport,
                actor: AgentId::from_bytes([0; 32]),
                task: TaskId::from_bytes([0; 32]),
                body: OpBody::AddTask {
                    task_type: "t".into(),
                },
                wall: 0,
            })
            .unwrap();
        }
        let ops = db.ops_for_thread(&thread).unwrap();
        let lamports: Vec<u64> = ops.iter().map(|o| o.lamport).collect();
        assert_eq!(lamports, vec![10, 20, 30]);
    }
}
