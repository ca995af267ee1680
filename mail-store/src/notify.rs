//! Fan-out of mailbox changes to the REST surface: a multi-subscriber
//! broadcast so several REST/websocket handlers for the same user may be
//! live at once.

use tokio::sync::broadcast;

use crate::entities::{EmailId, UserId};

#[derive(Debug, Clone)]
pub enum Event {
    EmailUpdated { user_id: UserId, email_id: EmailId, is_read: bool },
    EmailDeleted { user_id: UserId, email_id: EmailId },
    UnreadCountChanged { user_id: UserId, new_count: u64 },
}

/// Delivery is best-effort and asynchronous; a lagging or absent
/// subscriber never blocks or fails the originating protocol command.
/// `broadcast` drops the oldest events for slow subscribers rather than
/// applying backpressure.
pub struct NotificationBus {
    tx: broadcast::Sender<Event>,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Never returns an error to the caller: a `SendError` just means no
    /// subscriber is currently listening, which is a normal condition.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = NotificationBus::default();
        bus.publish(Event::UnreadCountChanged {
            user_id: UserId(1),
            new_count: 3,
        });
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = NotificationBus::default();
        let mut rx = bus.subscribe();
        bus.publish(Event::EmailDeleted {
            user_id: UserId(1),
            email_id: EmailId(7),
        });
        let evt = rx.recv().await.unwrap();
        matches!(evt, Event::EmailDeleted { .. });
    }
}
