//! RECONCILE: apply a partition-heal merge broadcast.
//!
//! The envelope carries the healed epoch and the full winning record for
//! every resolved conflict, so any receiver — including one replaying the
//! log from scratch — converges to the same decide table and the same
//! orphan annotations. Orphaned branches stay in the op-log, annotated,
//! never deleted.

use tracing::info;

use canswarm_core::envelope::{Envelope, ReconcilePayload};
use canswarm_core::error::SwarmError;
use canswarm_core::plan::OpBody;
use canswarm_core::protocol::EpochReason;
use canswarm_core::plan::TaskState;

use crate::context::SwarmContext;
use crate::handlers::{annotate, op_from, task_of_need};

pub fn handle(
    ctx: &SwarmContext,
    env: &Envelope,
    payload: &ReconcilePayload,
) -> Result<Vec<Envelope>, SwarmError> {
    // Adopt the healed epoch before touching any records.
    ctx.epochs
        .observe(payload.healed_epoch, EpochReason::PartitionHeal, env.ts)?;

    let mut op_index: u32 = 0;
    for outcome in &payload.resolved {
        // Install the winner if it outranks whatever this node decided.
        ctx.consensus.merge_decide(&outcome.winner)?;

        let task = task_of_need(&outcome.need);
        if ctx.plan.get_task(&task)?.is_some() {
            ctx.plan.append_op(&op_from(
                env,
                op_index,
                task,
                annotate("orphaned_proposal", outcome.orphaned.to_hex()),
            ))?;
            ctx.plan.append_op(&op_from(
                env,
                op_index + 1,
                task,
                annotate("orphaned_by_epoch", payload.healed_epoch),
            ))?;
            ctx.plan.append_op(&op_from(
                env,
                op_index + 2,
                task,
                annotate("winning_proposal", outcome.winner.proposal.to_hex()),
            ))?;
            op_index += 3;
        }

        // Tasks spawned under the losing branch are terminal-orphaned.
        for view in ctx.views.tasks_by_thread(&env.thread)? {
            let from_loser = view
                .annotations
                .get("decided_under")
                .and_then(|a| a.value.as_str())
                == Some(outcome.orphaned.to_hex().as_str());
            if from_loser && !view.state.is_terminal_side() {
                ctx.plan.append_op(&op_from(
                    env,
                    op_index,
                    view.task,
                    OpBody::State {
                        to: TaskState::Orphaned,
                    },
                ))?;
                op_index += 1;
            }
        }
    }

    info!(
        healed_epoch = payload.healed_epoch,
        conflicts = payload.resolved.len(),
        "reconcile applied"
    );
    Ok(Vec::new())
}
