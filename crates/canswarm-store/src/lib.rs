//! canswarm-store
//!
//! Storage layer for a swarm node: the sled-backed [`SwarmDb`] with one
//! named tree per owned entity, the file-backed content-addressed store
//! [`Cas`], and the signed JSONL [`AuditLog`] that every publish/deliver
//! event is appended to.

pub mod audit;
pub mod cas;
pub mod db;

pub use audit::{AuditDirection, AuditLog, AuditReader, AuditRecord};
pub use cas::Cas;
pub use db::SwarmDb;
