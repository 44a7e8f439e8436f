//! canswarm-verifier
//!
//! Verifier registry, reputation, and diversity-constrained committee
//! selection.

pub mod pool;
pub mod reputation;
pub mod selection;

pub use pool::{related_party, VerifierPool};
pub use selection::{select_committee, selection_weight};
