use std::sync::Arc;

use chrono::Utc;
use medchat_common::{Message, ServerEvent};

use crate::error::{ChatError, ChatResult};
use crate::presence::Switchboard;
use crate::storage::MessageStore;

/// Read state and unread counters.
///
/// The unread count is never cached: it is recomputed from the store on
/// every query and pushed whenever it may have changed.
pub struct ReadTracker {
    store: Arc<dyn MessageStore>,
    switchboard: Arc<Switchboard>,
}

impl ReadTracker {
    pub fn new(store: Arc<dyn MessageStore>, switchboard: Arc<Switchboard>) -> Self {
        Self { store, switchboard }
    }

    /// Mark an inbound message read on behalf of its recipient.
    ///
    /// Marking an already-read message returns it unchanged and notifies nobody.
    pub async fn mark_read(&self, message_id: &str, reader_id: &str) -> ChatResult<Message> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(message_id.to_string()))?;

        if message.recipient_id != reader_id {
            log::warn!(
                "User {reader_id} tried to mark message {message_id} addressed to {} as read",
                message.recipient_id
            );
            return Err(ChatError::forbidden(
                reader_id,
                format!("mark message {message_id} as read"),
            ));
        }
        if message.read {
            return Ok(message);
        }

        let update = self
            .store
            .update_message_read(message_id, Utc::now())
            .await?
            .ok_or_else(|| ChatError::NotFound(message_id.to_string()))?;
        if !update.transitioned {
            // Another request marked it between the read and the write.
            return Ok(update.message);
        }

        if let Err(err) = self.publish_unread(reader_id).await {
            log::error!("Unread count for {reader_id} not pushed: {err}");
        }
        self.send_receipt(&update.message);

        Ok(update.message)
    }

    pub async fn unread_count(&self, user_id: &str) -> ChatResult<u64> {
        Ok(self.store.count_unread(user_id).await?)
    }

    /// Recompute the unread count and push it to every connection of `user_id`.
    pub async fn publish_unread(&self, user_id: &str) -> ChatResult<u64> {
        let count = self.unread_count(user_id).await?;
        let fan_out = self.switchboard.push_to_user(
            user_id,
            &ServerEvent::UnreadCount {
                user_id: user_id.to_string(),
                count,
            },
        );
        for failure in fan_out.failures {
            log::debug!("Unread count push to {user_id} skipped: {failure}");
        }
        Ok(count)
    }

    fn send_receipt(&self, message: &Message) {
        let Some(read_timestamp) = message.read_at else {
            return;
        };
        let receipt = ServerEvent::MessageRead {
            message_id: message.id.clone(),
            reader_id: message.recipient_id.clone(),
            read_timestamp,
        };
        let fan_out = self.switchboard.push_to_user(&message.sender_id, &receipt);
        for failure in fan_out.failures {
            log::debug!("Read receipt for {} skipped: {failure}", message.id);
        }
    }
}
