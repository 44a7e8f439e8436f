//! canswarm-auction
//!
//! Auctions (bid windows with anti-snipe, deterministic scoring) and leases
//! (TTL, heartbeat, scavenging).

pub mod auction;
pub mod lease;

pub use auction::{loser_backoff_ms, score_bid, AuctionBook};
pub use lease::LeaseTable;
