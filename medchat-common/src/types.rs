use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted chat message between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    #[serde(rename = "readTimestamp")]
    pub read_at: Option<DateTime<Utc>>,
}

/// A message submission, before the store has assigned an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
}

impl NewMessage {
    pub fn new(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_uses_camel_case_and_read_timestamp() {
        let message = Message {
            id: "m-1".to_string(),
            sender_id: "P1".to_string(),
            recipient_id: "D1".to_string(),
            content: "Hello".to_string(),
            created_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            read: false,
            read_at: None,
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["senderId"], "P1");
        assert_eq!(json["recipientId"], "D1");
        assert!(json["readTimestamp"].is_null());
        assert!(json.get("read_at").is_none());
    }
}
