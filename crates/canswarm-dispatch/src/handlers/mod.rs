//! One handler per verb.
//!
//! Handlers are synchronous: they validate, mutate owned state, and return
//! follow-up envelopes for the dispatcher to publish. No handler holds a
//! lock across I/O, and every state mutation derives from fields of the
//! triggering envelope (lamport, ts, id) — never from local clocks — so
//! replaying the audit log reproduces state bit for bit.

pub mod attest;
pub mod challenge;
pub mod claim;
pub mod commit;
pub mod decide;
pub mod finalize;
pub mod lease;
pub mod need;
pub mod plan;
pub mod propose;
pub mod reconcile;

use canswarm_core::envelope::Envelope;
use canswarm_core::plan::{OpBody, PlanOp};
use canswarm_core::types::{NeedId, OpId, TaskId};
use canswarm_crypto::sha256;

/// Deterministic op id: SHA-256(envelope id ‖ index). The same envelope
/// always yields the same ops, which makes `append_op` idempotent under
/// redelivery and replay.
pub(crate) fn op_id_for(envelope: &Envelope, index: u32) -> OpId {
    let mut buf = Vec::with_capacity(36);
    buf.extend_from_slice(envelope.id.as_bytes());
    buf.extend_from_slice(&index.to_be_bytes());
    OpId::from_bytes(sha256(&buf))
}

/// Build a plan op whose ordering fields come from the envelope.
pub(crate) fn op_from(envelope: &Envelope, index: u32, task: TaskId, body: OpBody) -> PlanOp {
    PlanOp {
        op_id: op_id_for(envelope, index),
        thread: envelope.thread,
        lamport: envelope.lamport,
        actor: envelope.sender,
        task,
        body,
        wall: envelope.ts,
    }
}

/// The task opened by a need shares its identifier bytes.
pub(crate) fn task_of_need(need: &NeedId) -> TaskId {
    TaskId::from_bytes(*need.as_bytes())
}

/// JSON string annotation helper.
pub(crate) fn annotate(key: &str, value: impl Into<serde_json::Value>) -> OpBody {
    OpBody::Annotate {
        key: key.to_string(),
        value: value.into(),
    }
}
