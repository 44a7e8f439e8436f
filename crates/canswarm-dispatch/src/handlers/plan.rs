//! UPDATE_PLAN and CHECKPOINT.

use tracing::{debug, warn};

use canswarm_core::envelope::{CheckpointPayload, Envelope, UpdatePlanPayload};
use canswarm_core::error::SwarmError;
use canswarm_core::types::{PayloadHash, ThreadId};
use canswarm_crypto::sha256;

use crate::context::SwarmContext;

pub fn handle_update_plan(
    ctx: &SwarmContext,
    env: &Envelope,
    payload: &UpdatePlanPayload,
) -> Result<Vec<Envelope>, SwarmError> {
    for op in &payload.ops {
        if op.thread != env.thread {
            return Err(SwarmError::PolicyDenied(format!(
                "plan op {} targets thread {} outside envelope thread {}",
                op.op_id, op.thread, env.thread
            )));
        }
        ctx.plan.append_op(op)?;
    }
    debug!(ops = payload.ops.len(), thread = %env.thread, "plan updated");
    Ok(Vec::new())
}

/// Merkle-style root over a thread's op-log: a SHA-256 fold of op ids in
/// (lamport, op id) order. Cheap, deterministic, and enough to compare two
/// nodes' op-logs for divergence.
pub fn oplog_root(ctx: &SwarmContext, thread: &ThreadId) -> Result<(PayloadHash, u64), SwarmError> {
    let ops = ctx.plan.ops_for_thread(thread)?;
    let mut acc = [0u8; 32];
    for op in &ops {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&acc);
        buf.extend_from_slice(op.op_id.as_bytes());
        acc = sha256(&buf);
    }
    Ok((PayloadHash::from_bytes(acc), ops.len() as u64))
}

pub fn handle_checkpoint(
    ctx: &SwarmContext,
    env: &Envelope,
    payload: &CheckpointPayload,
) -> Result<Vec<Envelope>, SwarmError> {
    let (local_root, local_count) = oplog_root(ctx, &payload.thread)?;
    if local_root != payload.merkle_root || local_count != payload.op_count {
        // Divergence is a signal for reconciliation, not a validation
        // failure of the checkpoint envelope itself.
        warn!(
            thread = %payload.thread,
            local = %local_root,
            remote = %payload.merkle_root,
            local_count,
            remote_count = payload.op_count,
            "checkpoint divergence"
        );
    }
    let bytes = serde_json::to_vec(&(payload.merkle_root.to_hex(), payload.op_count, env.id.to_hex()))
        .map_err(|e| SwarmError::Serialization(e.to_string()))?;
    ctx.db
        .put_meta(&format!("checkpoint/{}", payload.thread.to_hex()), &bytes)?;
    debug!(thread = %payload.thread, ops = payload.op_count, "checkpoint recorded");
    Ok(Vec::new())
}
