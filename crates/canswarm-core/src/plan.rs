//! Data structures for the plan op-log CRDT.
//!
//! The op-log itself (append, materialization, derived views) lives in
//! `canswarm-plan`; this module defines the records it stores so that
//! envelope payloads can carry plan ops without a dependency cycle.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{AgentId, ArtifactHash, Lamport, OpId, TaskId, ThreadId, Timestamp};

// ── Task state lattice ───────────────────────────────────────────────────────

/// Task lifecycle state.
///
/// The main chain DRAFT → CLAIMED → DECIDED → VERIFIED → FINAL is a total
/// order; STATE ops only ever move a task up it. INVALID and ORPHANED are
/// terminal side states reachable from CLAIMED, DECIDED and VERIFIED.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Draft,
    Claimed,
    Decided,
    Verified,
    Final,
    Invalid,
    Orphaned,
}

impl TaskState {
    /// Position on the main chain, or `None` for the terminal side states.
    pub fn rank(&self) -> Option<u8> {
        match self {
            TaskState::Draft => Some(0),
            TaskState::Claimed => Some(1),
            TaskState::Decided => Some(2),
            TaskState::Verified => Some(3),
            TaskState::Final => Some(4),
            TaskState::Invalid | TaskState::Orphaned => None,
        }
    }

    pub fn is_terminal_side(&self) -> bool {
        matches!(self, TaskState::Invalid | TaskState::Orphaned)
    }

    /// Whether a STATE op moving `self` → `to` is admissible on the lattice.
    ///
    /// Re-asserting the current state is admissible (idempotent replay);
    /// the Lamport tie-break in the materializer decides whether it applies.
    /// DRAFT is special: a RELEASE legitimately moves CLAIMED back to DRAFT,
    /// so the lattice treats DRAFT as reachable from CLAIMED only.
    pub fn admits(&self, to: TaskState) -> bool {
        if self.is_terminal_side() {
            return false;
        }
        if to.is_terminal_side() {
            // INVALID / ORPHANED reachable from CLAIMED, DECIDED, VERIFIED.
            return matches!(
                self,
                TaskState::Claimed | TaskState::Decided | TaskState::Verified
            );
        }
        if *self == TaskState::Claimed && to == TaskState::Draft {
            return true;
        }
        match (self.rank(), to.rank()) {
            (Some(a), Some(b)) => b >= a,
            _ => false,
        }
    }
}

// ── Plan ops ─────────────────────────────────────────────────────────────────

/// The closed set of op bodies. Every mutation of plan state is one of these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpBody {
    /// G-Set insert of a task node. First (lamport, actor) wins `task_type`;
    /// later ADDs for the same task id are no-ops.
    AddTask { task_type: String },
    /// G-Set insert of a parent → child edge. Cycles are detectable in read
    /// views, never silently removed.
    Link { parent: TaskId, child: TaskId },
    /// Monotone state move along the task lattice.
    State { to: TaskState },
    /// Last-writer-wins annotation keyed by (lamport, actor).
    Annotate { key: String, value: serde_json::Value },
    /// G-Set dependency edge: this task requires `dependency` to be FINAL.
    Requires { dependency: TaskId },
    /// G-Set output edge: this task produces `artifact`.
    Produces { artifact: ArtifactHash },
}

impl OpBody {
    pub fn kind_name(&self) -> &'static str {
        match self {
            OpBody::AddTask { .. } => "ADD_TASK",
            OpBody::Link { .. } => "LINK",
            OpBody::State { .. } => "STATE",
            OpBody::Annotate { .. } => "ANNOTATE",
            OpBody::Requires { .. } => "REQUIRES",
            OpBody::Produces { .. } => "PRODUCES",
        }
    }
}

/// One append-only record in the plan op-log. Never deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanOp {
    pub op_id: OpId,
    pub thread: ThreadId,
    pub lamport: Lamport,
    /// Public-key identity of whoever emitted the mutating envelope.
    pub actor: AgentId,
    /// Task this op targets (for LINK: the parent).
    pub task: TaskId,
    pub body: OpBody,
    /// Advisory wall time.
    pub wall: Timestamp,
}

// ── Materialized view ────────────────────────────────────────────────────────

/// An annotation value with its LWW ordering key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub value: serde_json::Value,
    pub lamport: Lamport,
    pub actor: AgentId,
}

/// Deterministic materialization of all ops for one task.
///
/// Two nodes that have seen the same set of ops hold identical views,
/// regardless of arrival order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub task: TaskId,
    pub thread: ThreadId,
    pub task_type: String,
    pub state: TaskState,
    /// Lamport of the op that set `task_type` (first-ADD tie-break key).
    pub created_lamport: Lamport,
    pub created_actor: AgentId,
    /// Lamport of the last applied STATE op.
    pub last_state_lamport: Lamport,
    pub last_state_actor: AgentId,
    pub annotations: BTreeMap<String, Annotation>,
    /// Inbound LINK edges (parents of this task).
    pub parents: BTreeSet<TaskId>,
    /// Outbound LINK edges (children of this task).
    pub children: BTreeSet<TaskId>,
    pub requires: BTreeSet<TaskId>,
    pub produces: BTreeSet<ArtifactHash>,
}

impl TaskView {
    pub fn new(
        task: TaskId,
        thread: ThreadId,
        task_type: String,
        lamport: Lamport,
        actor: AgentId,
    ) -> Self {
        Self {
            task,
            thread,
            task_type,
            state: TaskState::Draft,
            created_lamport: lamport,
            created_actor: actor,
            last_state_lamport: 0,
            last_state_actor: actor,
            annotations: BTreeMap::new(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            requires: BTreeSet::new(),
            produces: BTreeSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_is_monotone() {
        assert!(TaskState::Draft.admits(TaskState::Claimed));
        assert!(TaskState::Claimed.admits(TaskState::Decided));
        assert!(TaskState::Decided.admits(TaskState::Final));
        assert!(!TaskState::Final.admits(TaskState::Draft));
        assert!(!TaskState::Decided.admits(TaskState::Claimed));
    }

    #[test]
    fn release_moves_claimed_back_to_draft() {
        assert!(TaskState::Claimed.admits(TaskState::Draft));
        assert!(!TaskState::Decided.admits(TaskState::Draft));
    }

    #[test]
    fn terminal_side_states_absorb() {
        assert!(TaskState::Decided.admits(TaskState::Orphaned));
        assert!(TaskState::Verified.admits(TaskState::Invalid));
        assert!(!TaskState::Invalid.admits(TaskState::Final));
        assert!(!TaskState::Orphaned.admits(TaskState::Draft));
        assert!(!TaskState::Draft.admits(TaskState::Invalid));
    }
}
