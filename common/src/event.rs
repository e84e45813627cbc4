//! Billing event bus.
//!
//! The Ledger's suspension callback would otherwise call directly into a
//! session manager that itself calls back into this service. §9 breaks that
//! cycle by routing the callback through an event bus instead; this trait is
//! the seam. `InProcessEventBus` is the default wiring (a `broadcast`
//! channel), with a real message-broker publisher left as an adapter that
//! implements the same trait.

use crate::model::BillingEvent;
use async_trait::async_trait;
use tokio::sync::broadcast;

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: BillingEvent);
}

pub struct InProcessEventBus {
    sender: broadcast::Sender<BillingEvent>,
}

impl InProcessEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BillingEvent> {
        self.sender.subscribe()
    }
}

impl Default for InProcessEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for InProcessEventBus {
    async fn publish(&self, event: BillingEvent) {
        // No active subscribers is not an error: the bus degrades to a no-op.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = InProcessEventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(BillingEvent::new("topup_credited", "tenant-1")).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type, "topup_credited");
    }

    #[tokio::test]
    async fn publish_without_subscriber_does_not_panic() {
        let bus = InProcessEventBus::default();
        bus.publish(BillingEvent::new("topup_credited", "tenant-1")).await;
    }
}
