use std::sync::Arc;

use medchat_common::{Message, ServerEvent};

use crate::presence::Switchboard;

/// Whether a routed message reached at least one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteOutcome {
    pub delivered: bool,
    pub connections: usize,
}

/// Pushes persisted messages to every live connection of the recipient.
///
/// Only ever called after the store acknowledged the write. Offline
/// recipients pull the message later through history queries.
pub struct DeliveryRouter {
    switchboard: Arc<Switchboard>,
}

impl DeliveryRouter {
    pub fn new(switchboard: Arc<Switchboard>) -> Self {
        Self { switchboard }
    }

    pub fn route(&self, message: &Message) -> RouteOutcome {
        let event = ServerEvent::NewMessage(message.clone());
        let fan_out = self.switchboard.push_to_user(&message.recipient_id, &event);

        for failure in &fan_out.failures {
            log::warn!("Live delivery of message {} skipped: {failure}", message.id);
        }
        if fan_out.targets == 0 {
            log::debug!(
                "Recipient {} is offline; message {} waits in the store",
                message.recipient_id,
                message.id
            );
        }

        RouteOutcome {
            delivered: fan_out.delivered > 0,
            connections: fan_out.delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::mpsc;

    fn message(to: &str) -> Message {
        Message {
            id: "m-1".to_string(),
            sender_id: "P1".to_string(),
            recipient_id: to.to_string(),
            content: "Hello".to_string(),
            created_at: Utc::now(),
            read: false,
            read_at: None,
        }
    }

    #[tokio::test]
    async fn routes_to_all_recipient_devices() {
        let board = Arc::new(Switchboard::new());
        let router = DeliveryRouter::new(Arc::clone(&board));
        let mut receivers = Vec::new();
        for _ in 0..2 {
            let (tx, rx) = mpsc::channel(4);
            let (conn, _kill) = board.attach(tx);
            board.bind(conn, "D1").unwrap();
            receivers.push(rx);
        }

        let outcome = router.route(&message("D1"));

        assert_eq!(
            outcome,
            RouteOutcome {
                delivered: true,
                connections: 2,
            }
        );
        for rx in &mut receivers {
            assert_eq!(
                rx.recv().await.unwrap(),
                ServerEvent::NewMessage(message("D1"))
            );
        }
    }

    #[tokio::test]
    async fn offline_recipient_is_not_delivered() {
        let board = Arc::new(Switchboard::new());
        let router = DeliveryRouter::new(board);

        let outcome = router.route(&message("D1"));
        assert!(!outcome.delivered);
        assert_eq!(outcome.connections, 0);
    }

    #[tokio::test]
    async fn dead_device_is_skipped() {
        let board = Arc::new(Switchboard::new());
        let router = DeliveryRouter::new(Arc::clone(&board));
        let (tx, rx) = mpsc::channel(4);
        let (conn, _kill) = board.attach(tx);
        board.bind(conn, "D1").unwrap();
        drop(rx);

        assert!(!router.route(&message("D1")).delivered);
    }
}
