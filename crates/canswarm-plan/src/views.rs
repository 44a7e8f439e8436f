//! Derived read views over the materialized plan.
//!
//! Everything here is computed from task views; nothing mutates the op-log.
//! Cycles in LINK edges are detectable but never silently removed — the
//! G-Set keeps every edge that was ever asserted.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use canswarm_core::error::SwarmError;
use canswarm_core::plan::{TaskState, TaskView};
use canswarm_core::types::{TaskId, ThreadId};
use canswarm_store::SwarmDb;

pub struct PlanViews {
    db: Arc<SwarmDb>,
}

impl PlanViews {
    pub fn new(db: Arc<SwarmDb>) -> Self {
        Self { db }
    }

    pub fn tasks_by_state(&self, state: TaskState) -> Result<Vec<TaskView>, SwarmError> {
        Ok(self
            .db
            .iter_tasks()?
            .into_iter()
            .filter(|t| t.state == state)
            .collect())
    }

    pub fn tasks_by_thread(&self, thread: &ThreadId) -> Result<Vec<TaskView>, SwarmError> {
        Ok(self
            .db
            .iter_tasks()?
            .into_iter()
            .filter(|t| t.thread == *thread)
            .collect())
    }

    /// DRAFT tasks whose REQUIRES dependencies are all FINAL.
    pub fn ready_tasks(&self, thread: &ThreadId) -> Result<Vec<TaskView>, SwarmError> {
        let tasks = self.tasks_by_thread(thread)?;
        let states: HashMap<TaskId, TaskState> =
            tasks.iter().map(|t| (t.task, t.state)).collect();
        Ok(tasks
            .into_iter()
            .filter(|t| t.state == TaskState::Draft)
            .filter(|t| {
                t.requires
                    .iter()
                    .all(|dep| states.get(dep) == Some(&TaskState::Final))
            })
            .collect())
    }

    pub fn parents(&self, task: &TaskId) -> Result<BTreeSet<TaskId>, SwarmError> {
        Ok(self
            .db
            .get_task(task)?
            .map(|t| t.parents)
            .unwrap_or_default())
    }

    pub fn children(&self, task: &TaskId) -> Result<BTreeSet<TaskId>, SwarmError> {
        Ok(self
            .db
            .get_task(task)?
            .map(|t| t.children)
            .unwrap_or_default())
    }

    pub fn ancestors(&self, task: &TaskId) -> Result<BTreeSet<TaskId>, SwarmError> {
        self.walk(task, |view| view.parents.clone())
    }

    pub fn descendants(&self, task: &TaskId) -> Result<BTreeSet<TaskId>, SwarmError> {
        self.walk(task, |view| view.children.clone())
    }

    fn walk(
        &self,
        start: &TaskId,
        next: impl Fn(&TaskView) -> BTreeSet<TaskId>,
    ) -> Result<BTreeSet<TaskId>, SwarmError> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([*start]);
        while let Some(task) = queue.pop_front() {
            if let Some(view) = self.db.get_task(&task)? {
                for n in next(&view) {
                    if seen.insert(n) {
                        queue.push_back(n);
                    }
                }
            }
        }
        seen.remove(start);
        Ok(seen)
    }

    /// Kahn topological sort of a thread's LINK graph. Defined only if the
    /// graph is acyclic; a cycle surfaces as `CycleDetected`.
    pub fn topological_sort(&self, thread: &ThreadId) -> Result<Vec<TaskId>, SwarmError> {
        let tasks = self.tasks_by_thread(thread)?;
        let in_thread: HashSet<TaskId> = tasks.iter().map(|t| t.task).collect();
        let mut indegree: HashMap<TaskId, usize> = HashMap::new();
        for t in &tasks {
            let count = t.parents.iter().filter(|p| in_thread.contains(p)).count();
            indegree.insert(t.task, count);
        }
        let views: HashMap<TaskId, &TaskView> = tasks.iter().map(|t| (t.task, t)).collect();

        // Deterministic: the ready frontier is kept sorted.
        let mut frontier: BTreeSet<TaskId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(t, _)| *t)
            .collect();
        let mut order = Vec::with_capacity(tasks.len());
        while let Some(task) = frontier.iter().next().copied() {
            frontier.remove(&task);
            order.push(task);
            if let Some(view) = views.get(&task) {
                for child in &view.children {
                    if let Some(d) = indegree.get_mut(child) {
                        *d -= 1;
                        if *d == 0 {
                            frontier.insert(*child);
                        }
                    }
                }
            }
        }

        if order.len() != tasks.len() {
            let stuck = indegree
                .iter()
                .find(|(t, _)| !order.contains(t))
                .map(|(t, _)| t.to_hex())
                .unwrap_or_default();
            return Err(SwarmError::CycleDetected(stuck));
        }
        Ok(order)
    }

    /// Find one cycle in a thread's LINK graph, if any.
    pub fn find_cycle(&self, thread: &ThreadId) -> Result<Option<Vec<TaskId>>, SwarmError> {
        let tasks = self.tasks_by_thread(thread)?;
        let views: HashMap<TaskId, &TaskView> = tasks.iter().map(|t| (t.task, t)).collect();

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }
        let mut marks: HashMap<TaskId, Mark> = HashMap::new();

        fn visit(
            task: TaskId,
            views: &HashMap<TaskId, &TaskView>,
            marks: &mut HashMap<TaskId, Mark>,
            stack: &mut Vec<TaskId>,
        ) -> Option<Vec<TaskId>> {
            match marks.get(&task) {
                Some(Mark::Done) => return None,
                Some(Mark::InProgress) => {
                    let start = stack.iter().position(|t| *t == task).unwrap_or(0);
                    return Some(stack[start..].to_vec());
                }
                None => {}
            }
            marks.insert(task, Mark::InProgress);
            stack.push(task);
            if let Some(view) = views.get(&task) {
                for child in &view.children {
                    if views.contains_key(child) {
                        if let Some(cycle) = visit(*child, views, marks, stack) {
                            return Some(cycle);
                        }
                    }
                }
            }
            stack.pop();
            marks.insert(task, Mark::Done);
            None
        }

        let mut roots: Vec<TaskId> = views.keys().copied().collect();
        roots.sort();
        for root in roots {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(root, &views, &mut marks, &mut stack) {
                return Ok(Some(cycle));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PlanStore;
    use canswarm_core::plan::{OpBody, PlanOp};
    use canswarm_core::types::{AgentId, OpId};

    fn setup(name: &str) -> (PlanStore, PlanViews, ThreadId) {
        let dir =
            std::env::temp_dir().join(format!("canswarm_views_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let db = Arc::new(SwarmDb::open(&dir).unwrap());
        (
            PlanStore::new(Arc::clone(&db)),
            PlanViews::new(db),
            ThreadId::from_bytes([1; 32]),
        )
    }

    fn add(store: &PlanStore, thread: ThreadId, tag: u8, lamport: u64) {
        store
            .append_op(&PlanOp {
                op_id: OpId::from_bytes([tag; 32]),
                thread,
                lamport,
                actor: AgentId::from_bytes([0; 32]),
                task: TaskId::from_bytes([tag; 32]),
                body: OpBody::AddTask {
                    task_type: "t".into(),
                },
                wall: 0,
            })
            .unwrap();
    }

    fn link(store: &PlanStore, thread: ThreadId, op_tag: u8, parent: u8, child: u8, lamport: u64) {
        store
            .append_op(&PlanOp {
                op_id: OpId::from_bytes([op_tag; 32]),
                thread,
                lamport,
                actor: AgentId::from_bytes([0; 32]),
                task: TaskId::from_bytes([parent; 32]),
                body: OpBody::Link {
                    parent: TaskId::from_bytes([parent; 32]),
                    child: TaskId::from_bytes([child; 32]),
                },
                wall: 0,
            })
            .unwrap();
    }

    #[test]
    fn topo_sort_linear_chain() {
        let (store, views, thread) = setup("topo");
        add(&store, thread, 1, 1);
        add(&store, thread, 2, 2);
        add(&store, thread, 3, 3);
        link(&store, thread, 10, 1, 2, 4);
        link(&store, thread, 11, 2, 3, 5);
        let order = views.topological_sort(&thread).unwrap();
        assert_eq!(
            order,
            vec![
                TaskId::from_bytes([1; 32]),
                TaskId::from_bytes([2; 32]),
                TaskId::from_bytes([3; 32])
            ]
        );
    }

    #[test]
    fn cycle_is_detected_not_removed() {
        let (store, views, thread) = setup("cycle");
        add(&store, thread, 1, 1);
        add(&store, thread, 2, 2);
        link(&store, thread, 10, 1, 2, 3);
        link(&store, thread, 11, 2, 1, 4);
        assert!(matches!(
            views.topological_sort(&thread),
            Err(SwarmError::CycleDetected(_))
        ));
        let cycle = views.find_cycle(&thread).unwrap().unwrap();
        assert_eq!(cycle.len(), 2);
        // Edges survive in the views: nothing was dropped to break the cycle.
        assert!(!views.children(&TaskId::from_bytes([1; 32])).unwrap().is_empty());
        assert!(!views.children(&TaskId::from_bytes([2; 32])).unwrap().is_empty());
    }

    #[test]
    fn ancestors_and_descendants() {
        let (store, views, thread) = setup("ancestry");
        for tag in 1..=4 {
            add(&store, thread, tag, tag as u64);
        }
        link(&store, thread, 10, 1, 2, 5);
        link(&store, thread, 11, 2, 3, 6);
        link(&store, thread, 12, 2, 4, 7);
        let descendants = views.descendants(&TaskId::from_bytes([1; 32])).unwrap();
        assert_eq!(descendants.len(), 3);
        let ancestors = views.ancestors(&TaskId::from_bytes([3; 32])).unwrap();
        assert_eq!(ancestors.len(), 2);
    }

    #[test]
    fn ready_tasks_require_final_dependencies() {
        let (store, views, thread) = setup("ready");
        add(&store, thread, 1, 1);
        add(&store, thread, 2, 2);
        store
            .append_op(&PlanOp {
                op_id: OpId::from_bytes([20; 32]),
                thread,
                lamport: 3,
                actor: AgentId::from_bytes([0; 32]),
                task: TaskId::from_bytes([2; 32]),
                body: OpBody::Requires {
                    dependency: TaskId::from_bytes([1; 32]),
                },
                wall: 0,
            })
            .unwrap();

        // Task 1 is DRAFT, so task 2 is not ready; task 1 itself is.
        let ready: Vec<TaskId> = views
            .ready_tasks(&thread)
            .unwrap()
            .iter()
            .map(|t| t.task)
            .collect();
        assert_eq!(ready, vec![TaskId::from_bytes([1; 32])]);

        // Walk task 1 to FINAL; now task 2 becomes ready.
        for (tag, state, lamport) in [
            (30u8, TaskState::Claimed, 4u64),
            (31, TaskState::Decided, 5),
            (32, TaskState::Verified, 6),
            (33, TaskState::Final, 7),
        ] {
            store
                .append_op(&PlanOp {
                    op_id: OpId::from_bytes([tag; 32]),
                    thread,
                    lamport,
                    actor: AgentId::from_bytes([0; 32]),
                    task: TaskId::from_bytes([1; 32]),
                    body: OpBody::State { to: state },
                    wall: 0,
                })
                .unwrap();
        }
        let ready: Vec<TaskId> = views
            .ready_tasks(&thread)
            .unwrap()
            .iter()
            .map(|t| t.task)
            .collect();
        assert_eq!(ready, vec![TaskId::from_bytes([2; 32])]);
    }
}
