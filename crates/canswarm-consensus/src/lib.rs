//! canswarm-consensus
//!
//! The decision layer: bucketed epoch-fenced compare-and-set DECIDE,
//! K-of-N quorum tracking, and the epoch manager.

pub mod decide;
pub mod epoch;
pub mod quorum;

pub use decide::{ConsensusStore, DecideCandidate, Decision};
pub use epoch::EpochManager;
pub use quorum::QuorumTracker;
