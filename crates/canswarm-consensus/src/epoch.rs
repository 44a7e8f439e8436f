//! The epoch manager: a persisted, process-wide monotone integer tagging
//! the coordination regime. Fencing applies at consensus (stale DECIDEs),
//! leases (scavenge across epochs) and handlers (configurable per verb).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use canswarm_core::error::SwarmError;
use canswarm_core::protocol::{EpochRecord, EpochReason};
use canswarm_core::types::{Epoch, Timestamp};
use canswarm_store::SwarmDb;

pub struct EpochManager {
    db: Arc<SwarmDb>,
    current: AtomicU64,
}

impl EpochManager {
    /// Load the current epoch from persistence (0 on a fresh database).
    pub fn open(db: Arc<SwarmDb>) -> Result<Self, SwarmError> {
        let current = db.get_epoch_record()?.map(|r| r.epoch).unwrap_or(0);
        Ok(Self {
            db,
            current: AtomicU64::new(current),
        })
    }

    pub fn current(&self) -> Epoch {
        self.current.load(Ordering::SeqCst)
    }

    /// Advance to the next epoch and persist the transition.
    pub fn advance(&self, reason: EpochReason, now: Timestamp) -> Result<EpochRecord, SwarmError> {
        let next = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let record = EpochRecord {
            epoch: next,
            reason,
            started_at: now,
        };
        self.db.put_epoch_record(&record)?;
        info!(epoch = next, ?reason, "epoch advanced");
        Ok(record)
    }

    /// Adopt an epoch observed from a peer (RECONCILE). Monotone: never
    /// moves backwards. Returns the resulting current epoch.
    pub fn observe(
        &self,
        epoch: Epoch,
        reason: EpochReason,
        now: Timestamp,
    ) -> Result<Epoch, SwarmError> {
        let mut current = self.current.load(Ordering::SeqCst);
        while epoch > current {
            match self.current.compare_exchange(
                current,
                epoch,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    self.db.put_epoch_record(&EpochRecord {
                        epoch,
                        reason,
                        started_at: now,
                    })?;
                    info!(epoch, ?reason, "epoch adopted from peer");
                    return Ok(epoch);
                }
                Err(actual) => current = actual,
            }
        }
        Ok(current)
    }

    /// Reject fence tokens from a previous regime.
    pub fn validate_fence(&self, epoch: Epoch) -> Result<(), SwarmError> {
        let current = self.current();
        if epoch < current {
            return Err(SwarmError::ConsensusFenced {
                submitted: epoch,
                current,
            });
        }
        Ok(())
    }
}
