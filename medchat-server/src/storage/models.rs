use chrono::{DateTime, Utc};
use medchat_common::Message;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Raw `messages` row; timestamps are unix milliseconds.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub created_at: i64,
    pub read: bool,
    pub read_at: Option<i64>,
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message, StoreError> {
        let created_at = millis_to_utc(self.created_at)?;
        let read_at = self.read_at.map(millis_to_utc).transpose()?;
        Ok(Message {
            id: self.id,
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            content: self.content,
            created_at,
            read: self.read,
            read_at,
        })
    }
}

fn millis_to_utc(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {millis} out of range")))
}

/// Outcome of a mark-read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadUpdate {
    pub message: Message,
    /// This request performed the unread→read transition.
    pub transitioned: bool,
}

/// Row filter for history queries. Empty fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFilter {
    pub sender_id: Option<String>,
    pub recipient_id: Option<String>,
    /// Either side of the message.
    pub participant: Option<String>,
    /// Together with `participant`, narrows to the two-party conversation.
    pub counterpart: Option<String>,
    pub unread_only: bool,
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(page: usize, limit: usize) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    /// Clamp the page size to `max_limit`.
    pub fn clamped(self, max_limit: usize) -> Self {
        Self::new(self.page, self.limit.min(max_limit.max(1)))
    }

    /// Rows to skip, or `None` when the page lies beyond what SQLite can address.
    pub fn offset(&self) -> Option<i64> {
        let skipped = (self.page - 1).checked_mul(self.limit)?;
        i64::try_from(skipped).ok()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_offsets_are_one_based() {
        assert_eq!(Page::new(1, 20).offset(), Some(0));
        assert_eq!(Page::new(3, 20).offset(), Some(40));
        assert_eq!(Page::new(0, 0), Page::new(1, 1));
    }

    #[test]
    fn unaddressable_page_has_no_offset() {
        assert_eq!(Page::new(usize::MAX, 50).clamped(200).offset(), None);
        assert_eq!(Page::new(usize::MAX, 1).offset(), None);
    }

    #[test]
    fn page_clamps_limit() {
        assert_eq!(Page::new(2, 500).clamped(200), Page::new(2, 200));
        assert_eq!(Page::new(2, 10).clamped(200), Page::new(2, 10));
    }

    #[test]
    fn row_conversion_keeps_read_state() {
        let row = MessageRow {
            id: "m-1".to_string(),
            sender_id: "P1".to_string(),
            recipient_id: "D1".to_string(),
            content: "Hello".to_string(),
            created_at: 1_700_000_000_000,
            read: true,
            read_at: Some(1_700_000_005_000),
        };

        let message = row.into_message().unwrap();
        assert!(message.read);
        assert_eq!(
            message.read_at.unwrap() - message.created_at,
            chrono::Duration::seconds(5)
        );
    }
}
