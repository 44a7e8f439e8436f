//! canswarm-core
//!
//! Shared data model for the CAN Swarm coordination fabric: identifiers,
//! the signed envelope and its closed verb set, plan op-log records, ledger
//! records, protocol records (decides, leases, auctions, challenges,
//! verifier manifests), the closed error enum, protocol constants and the
//! runtime configuration surface.
//!
//! This crate holds data only. Each record type is owned by exactly one
//! component crate that implements its lifecycle; cross-component references
//! are by immutable id, never by shared pointer.

pub mod config;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod ledger;
pub mod plan;
pub mod protocol;
pub mod types;

pub use config::SwarmConfig;
pub use envelope::{Envelope, EnvelopeBody, Payload, Verb};
pub use error::SwarmError;
pub use plan::{OpBody, PlanOp, TaskState, TaskView};
pub use protocol::DecideRecord;
pub use types::{AgentId, Credits, Epoch, Lamport, Timestamp};
