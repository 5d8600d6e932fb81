use crate::notifications::{Notification, NotificationHub};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the order and payment workflows. Each event
/// carries the identities needed to route notifications without another
/// database read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        buyer_id: Uuid,
    },
    OrderPaid {
        order_id: Uuid,
        buyer_id: Uuid,
    },
    OrderDelivered {
        order_id: Uuid,
        buyer_id: Uuid,
    },
    OrderCancelled {
        order_id: Uuid,
        buyer_id: Uuid,
    },
    /// A farmer has produce in an order that was just paid for.
    FarmerOrderPaid {
        order_id: Uuid,
        farmer_id: Uuid,
    },
    FarmerOrderCancelled {
        order_id: Uuid,
        farmer_id: Uuid,
    },
    PaymentFailed {
        payment_id: Uuid,
        user_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event. Failures are reported, never propagated into the
    /// request path; notification fan-out is best-effort.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!(error = %e, "Failed to enqueue event");
        }
    }
}

/// Background task that fans events out to per-user notification channels.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>, hub: Arc<NotificationHub>) {
    info!("Event processor started");
    while let Some(event) = receiver.recv().await {
        for (user_id, notification) in route(&event) {
            hub.publish(user_id, notification);
        }
    }
    info!("Event processor stopped");
}

/// Maps an event to the notification channel names the clients subscribe to.
fn route(event: &Event) -> Vec<(Uuid, Notification)> {
    match event {
        Event::OrderCreated { .. } => Vec::new(),
        Event::OrderPaid { order_id, buyer_id } => vec![(
            *buyer_id,
            Notification::new("orderPaid", format!("Order {} has been paid", order_id)),
        )],
        Event::OrderDelivered { order_id, buyer_id } => vec![(
            *buyer_id,
            Notification::new(
                "orderDelivered",
                format!("Order {} has been delivered", order_id),
            ),
        )],
        Event::OrderCancelled { order_id, buyer_id } => vec![(
            *buyer_id,
            Notification::new(
                "orderCancelled",
                format!("Order {} has been cancelled", order_id),
            ),
        )],
        Event::FarmerOrderPaid {
            order_id,
            farmer_id,
        } => vec![(
            *farmer_id,
            Notification::new(
                "newOrder",
                format!("You have a new paid order {}", order_id),
            ),
        )],
        Event::FarmerOrderCancelled {
            order_id,
            farmer_id,
        } => vec![(
            *farmer_id,
            Notification::new(
                "farmerOrderCancelled",
                format!("Order {} was cancelled", order_id),
            ),
        )],
        Event::PaymentFailed {
            payment_id,
            user_id,
        } => vec![(
            *user_id,
            Notification::new(
                "paymentFailed",
                format!("Payment {} was not completed", payment_id),
            ),
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paid_order_notifies_buyer_on_order_paid_channel() {
        let buyer = Uuid::new_v4();
        let routed = route(&Event::OrderPaid {
            order_id: Uuid::new_v4(),
            buyer_id: buyer,
        });
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].0, buyer);
        assert_eq!(routed[0].1.kind, "orderPaid");
    }

    #[test]
    fn farmer_learns_of_paid_order_via_new_order_channel() {
        let farmer = Uuid::new_v4();
        let routed = route(&Event::FarmerOrderPaid {
            order_id: Uuid::new_v4(),
            farmer_id: farmer,
        });
        assert_eq!(routed[0].0, farmer);
        assert_eq!(routed[0].1.kind, "newOrder");
    }

    #[test]
    fn order_creation_is_silent() {
        assert!(route(&Event::OrderCreated {
            order_id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
        })
        .is_empty());
    }

    #[tokio::test]
    async fn events_reach_subscribed_user() {
        let hub = Arc::new(NotificationHub::new());
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        tokio::spawn(process_events(rx, hub.clone()));

        let buyer = Uuid::new_v4();
        let mut stream = hub.subscribe(buyer);
        sender
            .send(Event::OrderPaid {
                order_id: Uuid::new_v4(),
                buyer_id: buyer,
            })
            .await;

        let notification = tokio::time::timeout(std::time::Duration::from_secs(1), stream.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(notification.kind, "orderPaid");
    }
}
