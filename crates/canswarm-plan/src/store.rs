//! The plan op-log: append-only CRDT over tasks, edges and annotations.
//!
//! `append_op` is the sole mutation path. Materialization is deterministic
//! and order-independent for concurrent ops: any two nodes that have seen
//! the same set of ops hold identical task views. Convergence across nodes
//! is by op exchange, not state diff.

use std::sync::Arc;

use tracing::debug;

use canswarm_core::error::SwarmError;
use canswarm_core::plan::{Annotation, OpBody, PlanOp, TaskView};
use canswarm_core::types::{AgentId, Lamport, TaskId, ThreadId};
use canswarm_store::SwarmDb;

/// Owner of the plan op-log and its materialized task views.
///
/// Writes are serialized by the dispatcher (single logical owner); reads
/// are concurrent.
pub struct PlanStore {
    db: Arc<SwarmDb>,
}

impl PlanStore {
    pub fn new(db: Arc<SwarmDb>) -> Self {
        Self { db }
    }

    /// Append an op and fold it into the materialized views.
    ///
    /// Idempotent by op id: a duplicate append is a no-op returning `false`.
    /// Ops are never deleted.
    pub fn append_op(&self, op: &PlanOp) -> Result<bool, SwarmError> {
        if self.db.plan_op_exists(&op.op_id) {
            return Ok(false);
        }
        self.db.put_plan_op(op)?;
        self.fold(op)?;
        debug!(op = %op.op_id, kind = op.body.kind_name(), task = %op.task, "plan op appended");
        Ok(true)
    }

    pub fn get_task(&self, task: &TaskId) -> Result<Option<TaskView>, SwarmError> {
        self.db.get_task(task)
    }

    pub fn ops_for_thread(&self, thread: &ThreadId) -> Result<Vec<PlanOp>, SwarmError> {
        self.db.ops_for_thread(thread)
    }

    // ── Materialization ──────────────────────────────────────────────────────

    /// Load a view, or create the skeleton a pre-ADD op folds into.
    ///
    /// Edge and annotation ops may arrive before the ADD_TASK that names the
    /// task; the skeleton's creation key is (Lamport::MAX, actor) so any real
    /// ADD_TASK wins the task_type regardless of arrival order.
    fn view_or_skeleton(
        &self,
        task: TaskId,
        thread: ThreadId,
        actor: AgentId,
    ) -> Result<TaskView, SwarmError> {
        match self.db.get_task(&task)? {
            Some(view) => Ok(view),
            None => Ok(TaskView::new(task, thread, String::new(), Lamport::MAX, actor)),
        }
    }

    fn fold(&self, op: &PlanOp) -> Result<(), SwarmError> {
        match &op.body {
            OpBody::AddTask { task_type } => {
                let mut view = self.view_or_skeleton(op.task, op.thread, op.actor)?;
                // First ADD wins: lowest (lamport, actor) sets the type.
                if (op.lamport, op.actor) < (view.created_lamport, view.created_actor) {
                    view.task_type = task_type.clone();
                    view.created_lamport = op.lamport;
                    view.created_actor = op.actor;
                }
                self.db.put_task(&view)?;
            }
            OpBody::Link { parent, child } => {
                let mut parent_view = self.view_or_skeleton(*parent, op.thread, op.actor)?;
                parent_view.children.insert(*child);
                self.db.put_task(&parent_view)?;
                let mut child_view = self.view_or_skeleton(*child, op.thread, op.actor)?;
                child_view.parents.insert(*parent);
                self.db.put_task(&child_view)?;
            }
            OpBody::State { to } => {
                let mut view = self.view_or_skeleton(op.task, op.thread, op.actor)?;
                let newer =
                    (op.lamport, op.actor) > (view.last_state_lamport, view.last_state_actor);
                if view.state.admits(*to) && newer {
                    view.state = *to;
                    view.last_state_lamport = op.lamport;
                    view.last_state_actor = op.actor;
                    self.db.put_task(&view)?;
                }
            }
            OpBody::Annotate { key, value } => {
                let mut view = self.view_or_skeleton(op.task, op.thread, op.actor)?;
                let apply = match view.annotations.get(key) {
                    Some(existing) => (op.lamport, op.actor) > (existing.lamport, existing.actor),
                    None => true,
                };
                if apply {
                    view.annotations.insert(
                        key.clone(),
                        Annotation {
                            value: value.clone(),
                            lamport: op.lamport,
                            actor: op.actor,
                        },
                    );
                    self.db.put_task(&view)?;
                }
            }
            OpBody::Requires { dependency } => {
                let mut view = self.view_or_skeleton(op.task, op.thread, op.actor)?;
                view.requires.insert(*dependency);
                self.db.put_task(&view)?;
            }
            OpBody::Produces { artifact } => {
                let mut view = self.view_or_skeleton(op.task, op.thread, op.actor)?;
                view.produces.insert(*artifact);
                self.db.put_task(&view)?;
            }
        }
        Ok(())
    }
}
