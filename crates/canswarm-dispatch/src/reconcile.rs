//! Partition-heal reconciliation.
//!
//! On rejoin the epoch advances, decide records are exchanged, and for
//! every conflicting need the total order (epoch, Lamport, decider id)
//! picks one winner. Losers are orphaned — annotated in the plan and kept
//! in every log, never deleted. The merge is summarized in a RECONCILE
//! envelope so that remote nodes and replays apply the identical outcome.

use tracing::info;

use canswarm_core::envelope::{Envelope, Payload, ReconcileOutcome, ReconcilePayload};
use canswarm_core::error::SwarmError;
use canswarm_core::protocol::{DecideRecord, EpochReason};
use canswarm_core::types::{ThreadId, Timestamp};

use crate::context::SwarmContext;

/// Merge a rejoined peer set's decide records into local state.
///
/// Returns the RECONCILE envelope to broadcast (None when nothing
/// conflicted and no epoch advance was needed).
pub fn reconcile(
    ctx: &SwarmContext,
    thread: ThreadId,
    remote_decides: &[DecideRecord],
    now: Timestamp,
) -> Result<Option<Envelope>, SwarmError> {
    let epoch_record = ctx.epochs.advance(EpochReason::PartitionHeal, now)?;

    let mut resolved = Vec::new();
    for remote in remote_decides {
        let local = ctx.consensus.get_decide(&remote.need)?;
        if let Some(displaced) = ctx.consensus.merge_decide(remote)? {
            // Remote outranked us: our branch is the orphan.
            resolved.push(ReconcileOutcome {
                need: remote.need,
                winner: remote.clone(),
                orphaned: displaced.proposal,
            });
        } else if let Some(local) = local {
            if local.proposal != remote.proposal {
                // We outranked the remote: their branch orphans.
                resolved.push(ReconcileOutcome {
                    need: remote.need,
                    winner: local,
                    orphaned: remote.proposal,
                });
            }
        }
    }

    if resolved.is_empty() {
        info!(epoch = epoch_record.epoch, "heal merge clean; no conflicting decides");
    }

    let envelope = ctx.synthesize(
        thread,
        Payload::Reconcile(ReconcilePayload {
            healed_epoch: epoch_record.epoch,
            resolved,
        }),
        now,
    )?;
    Ok(Some(envelope))
}
