//! The lease table: exclusive task holds with TTL, heartbeat renewal and
//! scavenging.
//!
//! The scavenger itself holds no lease locks — it computes which leases are
//! reclaimable and the caller proposes RELEASE envelopes through the normal
//! handler path, so releases linearize with everything else.

use std::sync::Arc;

use tracing::{debug, info};

use canswarm_core::envelope::ReleaseReason;
use canswarm_core::error::SwarmError;
use canswarm_core::protocol::Lease;
use canswarm_core::types::{AgentId, Epoch, LeaseId, TaskId, Timestamp};
use canswarm_store::SwarmDb;

pub struct LeaseTable {
    db: Arc<SwarmDb>,
}

impl LeaseTable {
    pub fn new(db: Arc<SwarmDb>) -> Self {
        Self { db }
    }

    /// Create a lease. At most one holder per task: an insert against a
    /// live lease by another holder fails with `LeaseHeldByOther`; a lease
    /// left over from a previous epoch without a heartbeat in the current
    /// one is replaced.
    pub fn create(&self, lease: Lease, now: Timestamp, epoch: Epoch) -> Result<(), SwarmError> {
        match self.db.lease_cas(&lease)? {
            None => {
                info!(task = %lease.task, holder = %lease.holder, "lease created");
                Ok(())
            }
            Some(existing) => {
                if existing.holder == lease.holder && existing.lease_id == lease.lease_id {
                    return Ok(()); // redelivered CLAIM
                }
                let fenced = existing.last_heartbeat_epoch < epoch;
                if fenced || existing.expired(now) {
                    self.db.put_lease(&lease)?;
                    info!(
                        task = %lease.task,
                        old_holder = %existing.holder,
                        new_holder = %lease.holder,
                        "stale lease replaced"
                    );
                    Ok(())
                } else {
                    Err(SwarmError::LeaseHeldByOther {
                        task: lease.task.to_hex(),
                    })
                }
            }
        }
    }

    pub fn get(&self, task: &TaskId) -> Result<Option<Lease>, SwarmError> {
        self.db.get_lease(task)
    }

    /// Renew a lease. Heartbeats do not mutate plan state.
    pub fn heartbeat(
        &self,
        task: &TaskId,
        lease_id: &LeaseId,
        holder: &AgentId,
        now: Timestamp,
        epoch: Epoch,
    ) -> Result<(), SwarmError> {
        let mut lease = self
            .db
            .get_lease(task)?
            .ok_or_else(|| SwarmError::LeaseMissing(task.to_hex()))?;
        if lease.lease_id != *lease_id || lease.holder != *holder {
            return Err(SwarmError::LeaseHeldByOther {
                task: task.to_hex(),
            });
        }
        lease.last_heartbeat = now;
        lease.last_heartbeat_epoch = epoch;
        self.db.put_lease(&lease)?;
        debug!(task = %task, holder = %holder, "heartbeat");
        Ok(())
    }

    /// Drop a lease (YIELD or RELEASE handler).
    pub fn release(&self, task: &TaskId) -> Result<Option<Lease>, SwarmError> {
        let existing = self.db.get_lease(task)?;
        if existing.is_some() {
            self.db.remove_lease(task)?;
            debug!(task = %task, "lease released");
        }
        Ok(existing)
    }

    /// Leases the scavenger should reclaim, with the reason for each.
    pub fn scavengable(
        &self,
        now: Timestamp,
        epoch: Epoch,
        grace_intervals: u32,
    ) -> Result<Vec<(Lease, ReleaseReason)>, SwarmError> {
        let mut out = Vec::new();
        for lease in self.db.iter_leases()? {
            let missed = lease.missed_intervals(now);
            if lease.created_epoch < epoch && lease.last_heartbeat_epoch < epoch {
                out.push((lease, ReleaseReason::EpochFence));
            } else if missed > grace_intervals {
                out.push((lease, ReleaseReason::MissedHeartbeats { missed }));
            } else if lease.expired(now) {
                out.push((lease, ReleaseReason::Expired));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> LeaseTable {
        let dir =
            std::env::temp_dir().join(format!("canswarm_lease_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        LeaseTable::new(Arc::new(SwarmDb::open(&dir).unwrap()))
    }

    fn lease(task: u8, holder: u8, last_heartbeat: Timestamp, epoch: Epoch) -> Lease {
        Lease {
            lease_id: LeaseId::from_bytes([task ^ holder; 32]),
            task: TaskId::from_bytes([task; 32]),
            need: canswarm_core::types::NeedId::from_bytes([task; 32]),
            holder: AgentId::from_bytes([holder; 32]),
            ttl_secs: 30,
            heartbeat_interval_secs: 10,
            last_heartbeat,
            created_at: last_heartbeat,
            created_epoch: epoch,
            last_heartbeat_epoch: epoch,
        }
    }

    #[test]
    fn one_holder_per_task() {
        let table = table("exclusive");
        table.create(lease(1, 1, 100, 0), 100, 0).unwrap();
        assert!(matches!(
            table.create(lease(1, 2, 100, 0), 105, 0),
            Err(SwarmError::LeaseHeldByOther { .. })
        ));
    }

    #[test]
    fn redelivered_claim_is_idempotent() {
        let table = table("idem");
        table.create(lease(1, 1, 100, 0), 100, 0).unwrap();
        table.create(lease(1, 1, 100, 0), 101, 0).unwrap();
    }

    #[test]
    fn expired_lease_is_replaceable() {
        let table = table("expired");
        table.create(lease(1, 1, 100, 0), 100, 0).unwrap();
        // TTL is 30 s; at t=131 the old lease is dead.
        table.create(lease(1, 2, 131, 0), 131, 0).unwrap();
        assert_eq!(
            table.get(&TaskId::from_bytes([1; 32])).unwrap().unwrap().holder,
            AgentId::from_bytes([2; 32])
        );
    }

    #[test]
    fn heartbeat_renews_only_for_holder() {
        let table = table("hb");
        let l = lease(1, 1, 100, 0);
        table.create(l.clone(), 100, 0).unwrap();
        table
            .heartbeat(&l.task, &l.lease_id, &l.holder, 110, 0)
            .unwrap();
        assert_eq!(table.get(&l.task).unwrap().unwrap().last_heartbeat, 110);

        let stranger = AgentId::from_bytes([9; 32]);
        assert!(matches!(
            table.heartbeat(&l.task, &l.lease_id, &stranger, 111, 0),
            Err(SwarmError::LeaseHeldByOther { .. })
        ));
    }

    #[test]
    fn scavenger_flags_missed_heartbeats() {
        let table = table("scavenge");
        // Heartbeat interval 10 s, grace 3 intervals. Last beat at t=15.
        table.create(lease(1, 1, 15, 0), 15, 0).unwrap();
        // At t=40: 2 missed intervals — inside grace, and inside TTL.
        assert!(table.scavengable(40, 0, 3).unwrap().is_empty());
        // At t=46: TTL (30 s) exceeded.
        let flagged = table.scavengable(46, 0, 3).unwrap();
        assert_eq!(flagged.len(), 1);
        assert!(matches!(flagged[0].1, ReleaseReason::Expired));
    }

    #[test]
    fn epoch_fence_scavenges_prior_epoch_leases() {
        let table = table("fence");
        table.create(lease(1, 1, 100, 1), 100, 1).unwrap();
        // Epoch advanced to 2, no heartbeat inside it yet.
        let flagged = table.scavengable(101, 2, 3).unwrap();
        assert_eq!(flagged.len(), 1);
        assert!(matches!(flagged[0].1, ReleaseReason::EpochFence));

        // A heartbeat inside the new epoch clears the fence.
        let l = lease(2, 1, 100, 1);
        table.create(l.clone(), 100, 1).unwrap();
        table.heartbeat(&l.task, &l.lease_id, &l.holder, 102, 2).unwrap();
        let flagged = table.scavengable(103, 2, 3).unwrap();
        assert_eq!(flagged.len(), 1, "only the un-renewed lease is flagged");
    }
}
