use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 64;

/// A single push notification delivered over a user's channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    /// Channel name the client switches on: "newOrder", "orderPaid",
    /// "orderDelivered", "orderCancelled", "farmerOrderCancelled", ...
    pub kind: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

/// In-process fan-out of notifications to per-user broadcast channels.
/// Publishing to a user nobody is listening to is a no-op.
#[derive(Debug, Default)]
pub struct NotificationHub {
    channels: DashMap<Uuid, broadcast::Sender<Notification>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn publish(&self, user_id: Uuid, notification: Notification) {
        if let Some(sender) = self.channels.get(&user_id) {
            // A send error only means no subscriber is currently connected.
            let _ = sender.send(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_notification() {
        let hub = NotificationHub::new();
        let user = Uuid::new_v4();
        let mut rx = hub.subscribe(user);

        hub.publish(user, Notification::new("orderPaid", "paid"));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.kind, "orderPaid");
        assert_eq!(got.message, "paid");
    }

    #[tokio::test]
    async fn publish_without_subscriber_is_noop() {
        let hub = NotificationHub::new();
        hub.publish(Uuid::new_v4(), Notification::new("orderPaid", "paid"));
    }

    #[tokio::test]
    async fn channels_are_isolated_per_user() {
        let hub = NotificationHub::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = hub.subscribe(a);
        let mut rx_b = hub.subscribe(b);

        hub.publish(a, Notification::new("orderPaid", "for a"));
        assert_eq!(rx_a.recv().await.unwrap().message, "for a");
        assert!(rx_b.try_recv().is_err());
    }
}
