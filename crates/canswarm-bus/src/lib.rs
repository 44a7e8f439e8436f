//! canswarm-bus
//!
//! The transport contract: topic pub/sub with at-least-once delivery and a
//! mandatory ingress gate in front of every handler. Concrete remote
//! transports are out of scope; [`InProcBus`] is the reference
//! implementation the node and the test harnesses run on.

pub mod memory;
pub mod subject;

use async_trait::async_trait;
use tokio::sync::mpsc;

use canswarm_core::envelope::Envelope;
use canswarm_core::error::SwarmError;

pub use memory::InProcBus;
pub use subject::{subject_for, Pattern};

/// Receiver-side policy hook the bus runs before any delivery.
pub trait IngressGate: Send + Sync {
    fn check(&self, envelope: &Envelope) -> Result<(), SwarmError>;
}

/// Audit hook: one callback per BUS.PUBLISH / BUS.DELIVER event.
pub trait BusObserver: Send + Sync {
    fn on_publish(&self, subject: &str, envelope: &Envelope);
    fn on_deliver(&self, subject: &str, envelope: &Envelope);
}

/// Gate that admits everything. Test harnesses only.
pub struct AllowAll;

impl IngressGate for AllowAll {
    fn check(&self, _envelope: &Envelope) -> Result<(), SwarmError> {
        Ok(())
    }
}

/// Observer that records nothing. Test harnesses only.
pub struct NoopObserver;

impl BusObserver for NoopObserver {
    fn on_publish(&self, _subject: &str, _envelope: &Envelope) {}
    fn on_deliver(&self, _subject: &str, _envelope: &Envelope) {}
}

/// A live subscription: envelopes arrive on `receiver` as
/// (subject, envelope) pairs.
pub struct BusSubscription {
    pub receiver: mpsc::Receiver<(String, Envelope)>,
}

#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish an envelope. Fails with `BusUnavailable` under backpressure
    /// and with the gate's error if ingress denies the envelope.
    async fn publish(&self, subject: &str, envelope: Envelope) -> Result<(), SwarmError>;

    /// Subscribe to a subject pattern (`thread.*.need`, `thread.<id>.>`).
    fn subscribe(&self, pattern: &str) -> Result<BusSubscription, SwarmError>;
}
