//! canswarm-dispatch
//!
//! The verb state machine: dispatcher, per-verb handlers, the partition
//! detector and heal reconciler, and the audit-log replay verifier.

pub mod context;
pub mod dispatcher;
pub mod handlers;
pub mod partition;
pub mod reconcile;
pub mod replay;

pub use context::SwarmContext;
pub use dispatcher::Dispatcher;
pub use partition::PartitionDetector;
pub use reconcile::reconcile;
pub use replay::{replay, state_digest, verify_log, ReplayEnv};
