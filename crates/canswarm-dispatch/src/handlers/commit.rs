//! COMMIT: artifact handoff by content hash, behind the commit gate.

use tracing::info;

use canswarm_core::envelope::{CommitPayload, Envelope, ResourceClaims};
use canswarm_core::error::SwarmError;
use canswarm_core::plan::OpBody;

use crate::context::SwarmContext;
use crate::handlers::{annotate, op_from};

pub fn handle(
    ctx: &SwarmContext,
    env: &Envelope,
    payload: &CommitPayload,
) -> Result<Vec<Envelope>, SwarmError> {
    let lease = ctx
        .leases
        .get(&payload.task)?
        .ok_or_else(|| SwarmError::LeaseMissing(payload.task.to_hex()))?;
    if lease.holder != env.sender {
        return Err(SwarmError::LeaseHeldByOther {
            task: payload.task.to_hex(),
        });
    }

    // The artifact must already be in the CAS; the envelope carries only
    // its hash.
    if !ctx.cas.exists(&payload.artifact) {
        return Err(SwarmError::CasMissing(payload.artifact.to_hex()));
    }

    // Commit gate: declared resource claims against observed telemetry.
    // Telemetry arrives as a task annotation from the execution surface;
    // absent telemetry, the declaration stands alone.
    let view = ctx
        .plan
        .get_task(&payload.task)?
        .ok_or_else(|| SwarmError::UnknownTask(payload.task.to_hex()))?;
    let observed = view
        .annotations
        .get("telemetry")
        .map(|a| serde_json::from_value::<ResourceClaims>(a.value.clone()))
        .transpose()
        .map_err(|e| SwarmError::Serialization(e.to_string()))?
        .unwrap_or_else(|| payload.resource_claims.clone());
    ctx.policy.commit_gate(&payload.resource_claims, &observed)?;

    ctx.plan.append_op(&op_from(
        env,
        0,
        payload.task,
        annotate("commit_id", env.id.to_hex()),
    ))?;
    ctx.plan.append_op(&op_from(
        env,
        1,
        payload.task,
        annotate("artifact", payload.artifact.to_hex()),
    ))?;
    ctx.plan.append_op(&op_from(
        env,
        2,
        payload.task,
        annotate("committed_at", env.ts),
    ))?;
    ctx.plan.append_op(&op_from(
        env,
        3,
        payload.task,
        OpBody::Produces {
            artifact: payload.artifact,
        },
    ))?;

    info!(task = %payload.task, artifact = %payload.artifact, "commit recorded");
    Ok(Vec::new())
}
