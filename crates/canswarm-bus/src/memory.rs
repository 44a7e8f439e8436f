//! In-process bus implementation.
//!
//! Topic pub/sub over bounded tokio channels. Delivery is at-least-once:
//! the dispatcher dedups by envelope id, so a redelivered envelope is
//! harmless. A saturated subscriber queue surfaces as BUS_UNAVAILABLE to
//! the publisher (backpressure), never as a silent drop.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use canswarm_core::envelope::Envelope;
use canswarm_core::error::SwarmError;

use crate::subject::Pattern;
use crate::{Bus, BusObserver, BusSubscription, IngressGate};

struct Subscriber {
    pattern: Pattern,
    sender: mpsc::Sender<(String, Envelope)>,
}

pub struct InProcBus {
    gate: Box<dyn IngressGate>,
    observer: Box<dyn BusObserver>,
    subscribers: Mutex<Vec<Subscriber>>,
    queue_depth: usize,
}

impl InProcBus {
    pub fn new(
        gate: Box<dyn IngressGate>,
        observer: Box<dyn BusObserver>,
        queue_depth: usize,
    ) -> Self {
        Self {
            gate,
            observer,
            subscribers: Mutex::new(Vec::new()),
            queue_depth,
        }
    }
}

#[async_trait]
impl Bus for InProcBus {
    async fn publish(&self, subject: &str, envelope: Envelope) -> Result<(), SwarmError> {
        self.observer.on_publish(subject, &envelope);

        // Ingress policy runs before any handler can see the envelope.
        if let Err(e) = self.gate.check(&envelope) {
            warn!(subject, id = %envelope.id, error = %e, "envelope rejected at ingress");
            return Err(e);
        }

        let mut delivered = 0usize;
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.lock().expect("subscriber list poisoned");
            for (i, sub) in subscribers.iter().enumerate() {
                if !sub.pattern.matches(subject) {
                    continue;
                }
                match sub.sender.try_send((subject.to_string(), envelope.clone())) {
                    Ok(()) => {
                        self.observer.on_deliver(subject, &envelope);
                        delivered += 1;
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        return Err(SwarmError::BusUnavailable(format!(
                            "subscriber queue full for {subject}"
                        )));
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(i),
                }
            }
        }
        if !closed.is_empty() {
            let mut subscribers = self.subscribers.lock().expect("subscriber list poisoned");
            for i in closed.into_iter().rev() {
                if i < subscribers.len() {
                    subscribers.remove(i);
                }
            }
        }
        debug!(subject, id = %envelope.id, delivered, "published");
        Ok(())
    }

    fn subscribe(&self, pattern: &str) -> Result<BusSubscription, SwarmError> {
        let (sender, receiver) = mpsc::channel(self.queue_depth);
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push(Subscriber {
                pattern: Pattern::parse(pattern),
                sender,
            });
        Ok(BusSubscription { receiver })
    }
}
